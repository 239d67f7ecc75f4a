use thiserror::Error;

use crate::llm::ChatError;

#[derive(Error, Debug)]
pub enum LlmTraceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Provider not configured: {0}")]
    ProviderConfig(String),

    #[error("Provider call failed: {0}")]
    ProviderCall(#[from] ChatError),

    /// The provider call failed and recording that failure failed as well.
    /// Both errors are kept apart; `Display` reports the persistence failure.
    #[error("Failed to record error outcome: {persist_error}")]
    OutcomeNotRecorded {
        provider_error: ChatError,
        persist_error: Box<LlmTraceError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmTraceError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}
