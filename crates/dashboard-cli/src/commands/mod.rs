//! CLI command implementations.

mod auth;
mod resources;

pub use auth::{login, logout, status};
pub use resources::{create, delete, list, update};

use anyhow::Result;
use client_config::{Config, Paths};
use credential_store::{CredentialStore, FileStorage};
use request_pipeline::RequestPipeline;
use std::sync::Arc;

/// Everything a command needs: resolved paths, configuration and a pipeline
/// backed by the persisted credential file.
pub struct Context {
    pub paths: Paths,
    pub config: Config,
    pub pipeline: RequestPipeline,
}

impl Context {
    pub fn new(paths: Paths, config: Config) -> Result<Self> {
        paths.ensure_dirs()?;
        let storage = FileStorage::open(paths.credentials_file())?;
        let credentials = Arc::new(CredentialStore::new(Box::new(storage))?);
        let pipeline = RequestPipeline::new(&config, credentials)?;

        Ok(Self {
            paths,
            config,
            pipeline,
        })
    }

    /// Fail early when no session is stored.
    fn require_login(&self) -> Result<()> {
        if !self.pipeline.session_status().is_logged_in() {
            anyhow::bail!("Not logged in. Run 'dashboard login' first");
        }
        Ok(())
    }
}
