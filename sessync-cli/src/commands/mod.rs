pub mod bridge;
pub mod export;
pub mod import;
pub mod inspect;
pub mod session;

pub use bridge::run_bridge;
pub use export::run_export;
pub use import::{run_import, ImportArgs};
pub use inspect::run_inspect;
pub use session::run_clear_session;

use sessync::Config;
use sessync_storage::LocalProvider;

/// Directory-backed provider for one origin under the configured data dir.
pub(crate) fn origin_provider(config: &Config, origin: &str) -> LocalProvider {
    LocalProvider::with_paths(config.origin_paths(origin))
}
