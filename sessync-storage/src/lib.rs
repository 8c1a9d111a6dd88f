//! Storage provider abstraction for sessync.
//!
//! An origin's persistent state is made of two flat key-value areas
//! (`local` and `session`) and any number of structured databases. Each
//! database has a version and a set of named object stores holding
//! auto-keyed records. This crate defines the [`StorageProvider`] capability
//! trait over that model, so snapshot export/import can run against a real
//! engine, a directory on disk, or an in-memory fake.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │  sessync (export / import / bridge)       │
//! └─────────────────────┬─────────────────────┘
//!                       ▼
//!             ┌──────────────────┐
//!             │ StorageProvider  │  ← keys / items / databases / open
//!             └────────┬─────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//!   ┌──────────────┐        ┌──────────────┐
//!   │    Memory    │        │    Local     │
//!   └──────────────┘        └──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use sessync_storage::{KeyValueArea, LocalProvider, StorageProvider, TransactionMode};
//!
//! # async fn example() -> sessync_storage::Result<()> {
//! let provider = LocalProvider::new("./origin");
//! provider.set_item(KeyValueArea::Local, "theme", "dark").await?;
//!
//! for info in provider.databases().await? {
//!     let db = provider.open(&info.name, None, None).await?;
//!     let stores = db.store_names();
//!     let mut tx = db.transaction(&stores, TransactionMode::ReadOnly).await?;
//!     for store in &stores {
//!         println!("{}/{}: {} records", info.name, store, tx.get_all(store).await?.len());
//!     }
//!     db.close();
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod local;
mod memory;
mod path;
mod store;
mod traits;

pub use error::{Result, StorageError};
pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use path::{decode_name, encode_name, OriginPaths};
pub use store::{ObjectStore, SchemaDraft};
pub use traits::{
    Database, DatabaseInfo, KeyValueArea, Record, SchemaUpgrade, StorageProvider, Transaction,
    TransactionMode, UpgradeHandler, VersionChange,
};
