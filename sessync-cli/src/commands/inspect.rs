use anyhow::{Context, Result};
use sessync::read_snapshot;
use std::path::Path;

/// Print what a snapshot file contains.
pub fn run_inspect(input: &Path, verbose: bool) -> Result<()> {
    let snapshot = read_snapshot(input)
        .with_context(|| format!("Failed to read snapshot from {:?}", input))?;
    let stats = snapshot.stats();

    println!();
    println!("Snapshot: {}", input.display());
    println!("--------------------------------------------------------------------------------");
    println!("  Local keys:     {}", stats.local_keys);
    println!("  Session keys:   {}", stats.session_keys);
    println!("  Databases:      {}", stats.databases);
    println!("  Object stores:  {}", stats.stores);
    println!("  Records:        {}", stats.records);

    if verbose && !snapshot.structured.is_empty() {
        println!();
        println!("Databases");
        println!("--------------------------------------------------------------------------------");
        for (database, stores) in &snapshot.structured {
            println!("  {}", database);
            for (store, records) in stores {
                println!("    {:<30} {:>8} records", store, records.len());
            }
        }
    }
    println!();
    Ok(())
}
