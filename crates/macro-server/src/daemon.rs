//! Daemon lifecycle: load, run, save

use crate::config::ServerConfig;
use crate::driver;
use crate::storage::MacroStore;
use anyhow::{Context, Result};
use macro_engine::{register_builtins, Engine};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// The running macro daemon
pub struct Daemon {
    /// Engine holding the macro collection
    pub engine: Arc<Engine>,
    /// Persistence for the collection
    pub store: MacroStore,
}

impl Daemon {
    /// Create the engine with the built-in segments registered
    pub fn new(config: &ServerConfig) -> Self {
        let engine = Engine::new(config.engine.clone());
        register_builtins(&engine);

        Self {
            engine: Arc::new(engine),
            store: MacroStore::new(&config.config_dir),
        }
    }

    /// Load the stored collection; a missing file leaves the engine empty
    pub async fn load(&self) -> Result<()> {
        let Some(document) = self
            .store
            .load()
            .await
            .context("failed to read macro storage")?
        else {
            info!("No stored macros found, starting empty");
            return Ok(());
        };

        self.engine
            .load(&document)
            .context("failed to load stored macros")?;
        info!(count = self.engine.len(), "Loaded macros");
        Ok(())
    }

    /// Write the current collection to storage
    pub async fn save(&self) -> Result<()> {
        self.store
            .save(self.engine.save())
            .await
            .context("failed to write macro storage")?;
        info!(count = self.engine.len(), "Saved macros");
        Ok(())
    }

    /// Tick until `shutdown` resolves, then stop every macro and save
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        driver::run(self.engine.clone(), shutdown).await?;
        self.save().await
    }
}
