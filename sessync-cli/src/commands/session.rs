use anyhow::Result;
use sessync::Config;

use super::origin_provider;

/// End the origin's browsing session: the session area is discarded.
pub async fn run_clear_session(config: &Config, origin: &str) -> Result<()> {
    let provider = origin_provider(config, origin);
    provider.end_session().await?;
    tracing::info!(origin, "Cleared session storage");
    Ok(())
}
