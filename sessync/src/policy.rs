//! Import denylist.
//!
//! Some databases must never be overwritten by an imported session, typically
//! those owned by third-party scripts embedded in the page. A [`Denylist`]
//! combines configured name rules with an optional injected predicate.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, SyncError};

/// A configured database name rule.
///
/// In TOML: `{ exact = "..." }`, `{ contains = "..." }`, `{ prefix = "..." }`
/// or `{ pattern = "regex" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DenyRule {
    Exact(String),
    Contains(String),
    Prefix(String),
    Pattern(String),
}

impl fmt::Display for DenyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyRule::Exact(s) => write!(f, "exact '{}'", s),
            DenyRule::Contains(s) => write!(f, "contains '{}'", s),
            DenyRule::Prefix(s) => write!(f, "prefix '{}'", s),
            DenyRule::Pattern(s) => write!(f, "pattern /{}/", s),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Contains(String),
    Prefix(String),
    Pattern(Regex),
}

impl Matcher {
    fn compile(rule: &DenyRule) -> Result<Self> {
        Ok(match rule {
            DenyRule::Exact(s) => Matcher::Exact(s.clone()),
            DenyRule::Contains(s) => Matcher::Contains(s.clone()),
            DenyRule::Prefix(s) => Matcher::Prefix(s.clone()),
            DenyRule::Pattern(p) => Matcher::Pattern(
                Regex::new(p)
                    .map_err(|e| SyncError::Config(format!("invalid denylist pattern: {}", e)))?,
            ),
        })
    }

    fn is_match(&self, name: &str) -> bool {
        match self {
            Matcher::Exact(s) => name == s,
            Matcher::Contains(s) => name.contains(s.as_str()),
            Matcher::Prefix(s) => name.starts_with(s.as_str()),
            Matcher::Pattern(re) => re.is_match(name),
        }
    }
}

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Database names excluded from import.
#[derive(Clone, Default)]
pub struct Denylist {
    rules: Vec<(DenyRule, Matcher)>,
    predicate: Option<Predicate>,
}

impl Denylist {
    /// An empty denylist: every database is imported.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: &[DenyRule]) -> Result<Self> {
        let mut denylist = Self::new();
        for rule in rules {
            denylist = denylist.with_rule(rule.clone())?;
        }
        Ok(denylist)
    }

    pub fn with_rule(mut self, rule: DenyRule) -> Result<Self> {
        let matcher = Matcher::compile(&rule)?;
        self.rules.push((rule, matcher));
        Ok(self)
    }

    /// Deny databases whose name contains `needle`.
    pub fn contains(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.rules
            .push((DenyRule::Contains(needle.clone()), Matcher::Contains(needle)));
        self
    }

    /// Deny a database by exact name.
    pub fn exact(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.rules
            .push((DenyRule::Exact(name.clone()), Matcher::Exact(name)));
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.rules
            .push((DenyRule::Prefix(prefix.clone()), Matcher::Prefix(prefix)));
        self
    }

    /// Deny every name for which `predicate` returns true.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Describe the first rule denying `name`, if any.
    pub fn matching_rule(&self, name: &str) -> Option<String> {
        if let Some((rule, _)) = self.rules.iter().find(|(_, m)| m.is_match(name)) {
            return Some(rule.to_string());
        }
        match &self.predicate {
            Some(predicate) if predicate(name) => Some("predicate".to_string()),
            _ => None,
        }
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.matching_rule(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.predicate.is_none()
    }

    pub fn rules(&self) -> impl Iterator<Item = &DenyRule> {
        self.rules.iter().map(|(rule, _)| rule)
    }
}

impl fmt::Debug for Denylist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Denylist")
            .field("rules", &self.rules().collect::<Vec<_>>())
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}
