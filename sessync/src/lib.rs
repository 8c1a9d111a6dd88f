//! Export and import per-origin storage snapshots.
//!
//! A [`Snapshot`] captures both key-value areas and every structured
//! database of one origin. [`export_snapshot`] reads it through a
//! [`StorageProvider`]; [`import_snapshot`] writes it back, merging key-value
//! entries and replacing the object stores it names. Both are best effort:
//! failures are isolated to the database or entry they occur in and are
//! returned in a report instead of aborting the operation.
//!
//! ```no_run
//! use sessync::{export_snapshot, import_snapshot, SyncOptions};
//! use sessync_storage::MemoryProvider;
//!
//! # async fn example() {
//! let source = MemoryProvider::new();
//! let target = MemoryProvider::new();
//! let options = SyncOptions::default();
//!
//! let (snapshot, _) = export_snapshot(&source, &options).await;
//! let report = import_snapshot(&target, &snapshot, &options).await;
//! assert!(report.is_clean());
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod export;
mod handle;
pub mod import;
pub mod options;
pub mod policy;
pub mod snapshot;

pub use bridge::{BridgeStats, GuestMessage, HostMessage, SessionBridge};
pub use config::Config;
pub use error::{Result, SyncError};
pub use export::{ExportReport, SnapshotExporter};
pub use import::{DatabaseOutcome, ImportReport, ImportState, SkipReason, SnapshotImporter};
pub use options::SyncOptions;
pub use policy::{DenyRule, Denylist};
pub use snapshot::{read_snapshot, write_snapshot, SessionExport, Snapshot, SnapshotStats};

pub use sessync_storage::StorageProvider;

/// Capture the current state of the origin behind `provider`.
pub async fn export_snapshot(
    provider: &dyn StorageProvider,
    options: &SyncOptions,
) -> (Snapshot, ExportReport) {
    SnapshotExporter::new(provider, options)
        .export_with_report()
        .await
}

/// Apply `snapshot` to the origin behind `provider`.
pub async fn import_snapshot(
    provider: &dyn StorageProvider,
    snapshot: &Snapshot,
    options: &SyncOptions,
) -> ImportReport {
    SnapshotImporter::new(provider, options).import(snapshot).await
}
