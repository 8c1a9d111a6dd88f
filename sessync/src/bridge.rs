//! Host/guest session bridge.
//!
//! The guest side of a page runs one [`SessionBridge`] per origin. It announces
//! itself with `request-session-data`, then handles host messages strictly in
//! arrival order on a single worker task, so an export never interleaves with
//! an import of the same origin.
//!
//! Messages are JSON objects tagged by channel:
//!
//! ```json
//! {"channel": "inject-session-data", "payload": {"localStorage": {"k": "v"}}}
//! {"channel": "export-session"}
//! ```

use serde::{Deserialize, Serialize};
use sessync_storage::StorageProvider;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::export::SnapshotExporter;
use crate::import::SnapshotImporter;
use crate::options::SyncOptions;
use crate::snapshot::{SessionExport, Snapshot};

const INBOX_CAPACITY: usize = 32;

/// Host to guest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum HostMessage {
    /// Apply a snapshot. Never acknowledged.
    InjectSessionData(Snapshot),
    /// Capture the origin and reply with `initiate-full-session-export`
    ExportSession,
    Shutdown,
}

/// Guest to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "kebab-case")]
pub enum GuestMessage {
    RequestSessionData,
    InitiateFullSessionExport(SessionExport),
}

impl HostMessage {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl GuestMessage {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Work done by a bridge over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub imports: usize,
    pub exports: usize,
    /// Failures recorded by all imports and exports
    pub failures: usize,
}

pub struct SessionBridge {
    inbox: mpsc::Sender<HostMessage>,
    worker: JoinHandle<BridgeStats>,
}

impl SessionBridge {
    /// Start the worker. Guest messages are delivered on `outbound`.
    pub fn spawn(
        provider: Arc<dyn StorageProvider>,
        options: SyncOptions,
        outbound: mpsc::Sender<GuestMessage>,
    ) -> Self {
        let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
        let worker = tokio::spawn(run_worker(provider, options, rx, outbound));
        Self { inbox, worker }
    }

    /// A handle for posting host messages from elsewhere.
    pub fn sender(&self) -> mpsc::Sender<HostMessage> {
        self.inbox.clone()
    }

    pub async fn send(&self, message: HostMessage) -> Result<()> {
        self.inbox
            .send(message)
            .await
            .map_err(|_| SyncError::BridgeClosed)
    }

    /// Finish queued work, stop the worker and return its statistics.
    pub async fn shutdown(self) -> Result<BridgeStats> {
        // Already stopped if this fails; the join below still collects stats
        let _ = self.inbox.send(HostMessage::Shutdown).await;
        drop(self.inbox);
        self.worker.await.map_err(|e| {
            warn!(error = %e, "Session bridge worker did not finish cleanly");
            SyncError::BridgeClosed
        })
    }
}

async fn run_worker(
    provider: Arc<dyn StorageProvider>,
    options: SyncOptions,
    mut inbox: mpsc::Receiver<HostMessage>,
    outbound: mpsc::Sender<GuestMessage>,
) -> BridgeStats {
    let mut stats = BridgeStats::default();

    if outbound.send(GuestMessage::RequestSessionData).await.is_err() {
        warn!("Host side closed before session data was requested");
    }

    while let Some(message) = inbox.recv().await {
        match message {
            HostMessage::InjectSessionData(snapshot) => {
                debug!(stats = %snapshot.stats(), "Received session data");
                let report = SnapshotImporter::new(provider.as_ref(), &options)
                    .import(&snapshot)
                    .await;
                stats.imports += 1;
                stats.failures += report.failures().count();
            }
            HostMessage::ExportSession => {
                let (snapshot, report) = SnapshotExporter::new(provider.as_ref(), &options)
                    .export_with_report()
                    .await;
                stats.exports += 1;
                stats.failures += report.failures.len();

                let reply = GuestMessage::InitiateFullSessionExport(snapshot.into());
                if outbound.send(reply).await.is_err() {
                    warn!("Host side closed, dropping session export");
                    break;
                }
            }
            HostMessage::Shutdown => break,
        }
    }

    info!(
        imports = stats.imports,
        exports = stats.exports,
        failures = stats.failures,
        "Session bridge stopped"
    );
    stats
}
