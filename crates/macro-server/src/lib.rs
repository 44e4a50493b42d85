//! Macro engine daemon
//!
//! Hosts one [`Engine`](macro_engine::Engine) instance: configuration is read
//! from YAML, the macro collection is loaded from and saved to the
//! `.storage/` directory, and a tokio interval drives the scheduler tick.

pub mod config;
pub mod daemon;
pub mod driver;
pub mod storage;

pub use config::{ConfigError, ConfigResult, ServerConfig};
pub use daemon::Daemon;
pub use storage::{MacroStore, Storage, StorageError, StorageFile, StorageResult};
