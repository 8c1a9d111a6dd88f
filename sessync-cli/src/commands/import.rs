use anyhow::{Context, Result};
use sessync::{import_snapshot, read_snapshot, Config, DatabaseOutcome, SkipReason, SyncOptions};
use std::path::Path;

use super::origin_provider;

/// Command-line adjustments applied on top of the configured sync options.
#[derive(Debug, Default)]
pub struct ImportArgs {
    pub deny: Vec<String>,
    pub skip_key_values: bool,
    pub skip_structured: bool,
}

impl ImportArgs {
    fn apply(self, mut options: SyncOptions) -> SyncOptions {
        for needle in self.deny {
            options.denylist = options.denylist.contains(needle);
        }
        if self.skip_key_values {
            options.import_key_values = false;
        }
        if self.skip_structured {
            options.import_structured = false;
        }
        options
    }
}

pub async fn run_import(config: &Config, origin: &str, input: &Path, args: ImportArgs) -> Result<()> {
    let snapshot = read_snapshot(input)
        .with_context(|| format!("Failed to read snapshot from {:?}", input))?;
    let options = args.apply(config.sync.to_options()?);
    let provider = origin_provider(config, origin);

    let report = import_snapshot(&provider, &snapshot, &options).await;

    println!("Imported {} -> {}", input.display(), origin);
    println!("  {} key-value entries written", report.keys_written);
    for failure in &report.key_failures {
        println!("  ! {}", failure);
    }
    for (name, outcome) in &report.databases {
        match outcome {
            DatabaseOutcome::Committed {
                stores,
                records,
                created_stores,
            } => {
                print!("  {:<32} {} stores, {} records", name, stores, records);
                if !created_stores.is_empty() {
                    print!(" (created {})", created_stores.join(", "));
                }
                println!();
            }
            DatabaseOutcome::Skipped(SkipReason::Denied(rule)) => {
                println!("  {:<32} skipped, denied by {}", name, rule)
            }
            DatabaseOutcome::Skipped(SkipReason::NoStores) => {
                println!("  {:<32} skipped, no stores", name)
            }
            DatabaseOutcome::Failed(e) | DatabaseOutcome::Aborted(e) => {
                println!("  {:<32} {}: {}", name, outcome.state(), e)
            }
        }
    }

    if !report.is_clean() {
        anyhow::bail!("{} failure(s) while importing", report.failures().count());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_options() {
        let args = ImportArgs {
            deny: vec!["firebase".to_string(), "analytics".to_string()],
            skip_key_values: true,
            skip_structured: false,
        };
        let options = args.apply(SyncOptions::default());
        assert!(!options.import_key_values);
        assert!(options.import_structured);
        assert!(options.denylist.is_denied("firebaseLocalStorageDb"));
        assert!(options.denylist.is_denied("analytics-v2"));
        assert!(!options.denylist.is_denied("notes"));
    }
}
