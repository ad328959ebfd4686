//! Error types for InKCre

use thiserror::Error;

/// Result type alias using InKCre's Error
pub type Result<T> = std::result::Result<T, Error>;

/// InKCre error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("{kind} {id} not found. Run `inkcre recent` to see the latest blocks.")]
    EntityNotFound { kind: &'static str, id: i64 },

    #[error("Storage '{0}' is not registered.")]
    StorageNotFound(String),

    #[error("Block {0} has no embedding. Run `inkcre embed {0}` to compute it.")]
    EmbeddingMissing(i64),

    // Network errors (E100-E199)
    #[error("Could not reach the provider: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `inkcre config get llm.api_key`.")]
    LLMError(String),

    #[error("Provider rate limit hit; retry in {0}s")]
    RateLimited(u64),

    #[error("Could not embed text: {0}")]
    EmbeddingFailed(String),

    // Extraction errors (E200-E299)
    #[error("No resolver registered for block kind '{0}'.")]
    UnsupportedKind(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    // Search errors (E300-E399)
    #[error("Agent reply does not match any known command: {reply:?}")]
    AgentProtocolViolation { reply: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a missing block
    pub fn block_not_found(id: impl Into<i64>) -> Self {
        Self::EntityNotFound {
            kind: "Block",
            id: id.into(),
        }
    }

    /// Shorthand for a missing relation
    pub fn relation_not_found(id: impl Into<i64>) -> Self {
        Self::EntityNotFound {
            kind: "Relation",
            id: id.into(),
        }
    }

    /// Stable code shown next to the message
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntityNotFound { .. } => "E001",
            Self::StorageNotFound(_) => "E002",
            Self::EmbeddingMissing(_) => "E003",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::EmbeddingFailed(_) => "E103",
            Self::UnsupportedKind(_) => "E200",
            Self::ExtractionFailed(_) => "E201",
            Self::AgentProtocolViolation { .. } => "E300",
            Self::Cancelled => "E301",
            Self::DatabaseError(_) => "E400",
            Self::PersistenceConflict(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Command or setting that would fix this, if one is known
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::EntityNotFound { .. } => Some("inkcre recent".to_string()),
            Self::EmbeddingMissing(id) => Some(format!("inkcre embed {}", id)),
            Self::NetworkError(_) => Some("Check the network and llm.base_url".to_string()),
            Self::LLMError(_) => Some("inkcre config get llm.api_key".to_string()),
            Self::ExtractionFailed(_) => Some("Re-run `inkcre organize` on the block".to_string()),
            _ => None,
        }
    }

    /// Whether re-invoking the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExtractionFailed(_) | Self::RateLimited(_) | Self::NetworkError(_)
        )
    }
}
