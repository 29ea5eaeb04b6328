//! Application State
//!
//! Loads configuration, opens the memory database and builds the services
//! the command-line front end drives.

use std::path::PathBuf;
use std::sync::Arc;

use grounded_chat_retrieval::RetrievalCoordinator;

use crate::models::settings::AppConfig;
use crate::services::pipeline::{HeuristicClassifier, Pipeline, PipelineConfig};
use crate::services::retrieval::{build_coordinator, build_generator};
use crate::storage::{ConfigService, Database, Secrets};
use crate::utils::error::AppResult;

pub struct AppState {
    config: AppConfig,
    secrets: Secrets,
    database: Arc<Database>,
    coordinator: Arc<RetrievalCoordinator>,
}

impl AppState {
    /// Load config (default location unless `config_path` is given), open the
    /// database and build the retrieval coordinator.
    pub fn initialize(config_path: Option<PathBuf>) -> AppResult<Self> {
        let service = match config_path {
            Some(path) => ConfigService::at(path)?,
            None => ConfigService::new()?,
        };
        let config = service.get_config().clone();
        let secrets = Secrets::from_env();
        tracing::debug!(config = %service.path().display(), secrets = ?secrets, "configuration loaded");

        let database = match &config.storage.database_path {
            Some(path) => Database::open(path)?,
            None => Database::new()?,
        };
        Self::from_parts(config, secrets, database)
    }

    pub fn from_parts(config: AppConfig, secrets: Secrets, database: Database) -> AppResult<Self> {
        let coordinator = build_coordinator(&config.retrieval, config.proxy.as_ref(), &secrets)?;
        Ok(Self {
            config,
            secrets,
            database: Arc::new(database),
            coordinator: Arc::new(coordinator),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn coordinator(&self) -> &Arc<RetrievalCoordinator> {
        &self.coordinator
    }

    /// Build the pipeline over the configured models.
    pub fn pipeline(&self) -> AppResult<Pipeline> {
        let generator = build_generator(&self.config.llm, self.config.proxy.as_ref(), &self.secrets)?;
        let config = PipelineConfig::from_settings(&self.config);
        let classifier = HeuristicClassifier::new(
            self.config.retrieval.repository_hosts.clone(),
            config.max_result_bytes,
        );
        Ok(Pipeline::new(
            Arc::new(generator),
            self.coordinator.clone(),
            self.database.clone(),
            config,
        )
        .with_classifier(Arc::new(classifier)))
    }
}
