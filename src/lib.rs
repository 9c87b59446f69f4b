pub mod config;
pub mod controllers;
pub mod database;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use services::assistant::AssistantClient;
use services::connections::ConnectionManager;

// Shared state для всего приложения
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub config: config::Config,
    pub assistant: AssistantClient,
    pub connections: ConnectionManager,
}

impl AppState {
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let db = database::Database::new(&config.database.url, config.database.pool_size).await?;

        db.run_migrations().await?;

        let assistant = AssistantClient::from_config(&config.openai, &config.circuit_breaker);

        Ok(Arc::new(Self {
            db,
            assistant,
            connections: ConnectionManager::new(),
            config,
        }))
    }
}
