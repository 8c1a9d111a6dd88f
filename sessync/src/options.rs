use std::time::Duration;

use crate::policy::Denylist;

/// Runtime knobs shared by export and import.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound for each individual storage call. `None` waits forever.
    pub operation_timeout: Option<Duration>,
    /// Apply the key-value sections of imported snapshots
    pub import_key_values: bool,
    /// Apply the structured section of imported snapshots
    pub import_structured: bool,
    /// Databases that import never touches
    pub denylist: Denylist,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            operation_timeout: None,
            import_key_values: true,
            import_structured: true,
            denylist: Denylist::new(),
        }
    }
}

impl SyncOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn with_denylist(mut self, denylist: Denylist) -> Self {
        self.denylist = denylist;
        self
    }
}
