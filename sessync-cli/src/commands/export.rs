use anyhow::{Context, Result};
use sessync::{export_snapshot, write_snapshot, Config};
use std::path::{Path, PathBuf};

use super::origin_provider;

/// Default file name: the origin with unsafe characters replaced, plus a timestamp.
fn default_output(origin: &str) -> PathBuf {
    let safe: String = origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    PathBuf::from(format!("{}-{}.json", safe.trim_matches('_'), stamp))
}

pub async fn run_export(config: &Config, origin: &str, output: Option<PathBuf>) -> Result<()> {
    let provider = origin_provider(config, origin);
    let options = config.sync.to_options()?;

    let (snapshot, report) = export_snapshot(&provider, &options).await;
    let output = output.unwrap_or_else(|| default_output(origin));
    write_snapshot(&output, &snapshot)
        .with_context(|| format!("Failed to write snapshot to {:?}", output))?;

    print_summary(origin, &output, &snapshot.stats().to_string(), report.failures.len());
    for failure in &report.failures {
        println!("  ! {}", failure);
    }
    Ok(())
}

fn print_summary(origin: &str, output: &Path, stats: &str, failures: usize) {
    println!("Exported {} -> {}", origin, output.display());
    println!("  {}", stats);
    if failures > 0 {
        println!("  {} failure(s), affected databases were left out:", failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_is_filesystem_safe() {
        let path = default_output("https://app.example.com:8443");
        let name = path.to_string_lossy();
        assert!(name.starts_with("https___app.example.com_8443-"));
        assert!(name.ends_with(".json"));
        assert!(!name.contains('/'));
    }
}
