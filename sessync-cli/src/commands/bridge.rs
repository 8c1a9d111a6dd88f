use anyhow::{Context, Result};
use sessync::{Config, GuestMessage, HostMessage, SessionBridge};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::origin_provider;

/// Run a session bridge for `origin` over stdio until stdin closes or a
/// `shutdown` message arrives.
pub async fn run_bridge(config: &Config, origin: &str) -> Result<()> {
    let provider = Arc::new(origin_provider(config, origin));
    let options = config.sync.to_options()?;

    let (outbound, mut replies) = mpsc::channel::<GuestMessage>(16);
    let bridge = SessionBridge::spawn(provider, options, outbound);
    tracing::info!(origin, "Session bridge started");

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = replies.recv().await {
            let mut line = message.to_json()?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message = match HostMessage::from_json(&line) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed host message");
                continue;
            }
        };
        let stop = message == HostMessage::Shutdown;
        if bridge.send(message).await.is_err() || stop {
            break;
        }
    }

    let stats = bridge.shutdown().await?;
    writer.await.context("Bridge output task failed")??;
    tracing::info!(
        imports = stats.imports,
        exports = stats.exports,
        failures = stats.failures,
        "Session bridge finished"
    );
    Ok(())
}
