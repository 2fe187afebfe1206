//! Error types for Cairn

use thiserror::Error;

/// Result type alias using Cairn's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Cairn error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Entity '{0}' not found.")]
    EntityNotFound(String),

    #[error("Community '{0}' not found. Run `cairn communities detect` to rebuild the hierarchy.")]
    CommunityNotFound(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("LLM API error: {0}. Check your API key with `cairn config get llm.api_key`.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    // Community detection errors (E200-E299)
    #[error("Community detection is already running.")]
    DetectionInProgress,

    #[error("Community detection is disabled. Enable it with `cairn config set communities.enabled true`.")]
    CommunitiesDisabled,

    #[error("Unknown clustering algorithm '{0}'. Available: {1}")]
    UnknownAlgorithm(String, String),

    #[error("Clustering failed: {0}")]
    ClusteringFailed(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

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
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::EntityNotFound(_) => "E001",
            Self::CommunityNotFound(_) => "E002",
            Self::NetworkError(_) => "E100",
            Self::LLMError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::EmbeddingFailed(_) => "E103",
            Self::DetectionInProgress => "E200",
            Self::CommunitiesDisabled => "E201",
            Self::UnknownAlgorithm(..) => "E202",
            Self::ClusteringFailed(_) => "E203",
            Self::DatabaseError(_) => "E400",
            Self::Serialization(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::CommunityNotFound(_) => Some("cairn communities detect".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("cairn config get llm.api_key".to_string()),
            Self::CommunitiesDisabled => {
                Some("cairn config set communities.enabled true".to_string())
            }
            Self::UnknownAlgorithm(_, available) => {
                Some(format!("cairn config set communities.algorithm <{}>", available))
            }
            Self::DetectionInProgress => Some("Wait for the running detection to finish".to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_grouped() {
        assert_eq!(Error::DetectionInProgress.code(), "E200");
        assert_eq!(Error::CommunityNotFound("c1".into()).code(), "E002");
        assert_eq!(Error::Other("x".into()).code(), "E9999");
    }

    #[test]
    fn test_unknown_algorithm_suggestion() {
        let err = Error::UnknownAlgorithm("spectral".into(), "leiden|louvain".into());
        assert!(err.to_string().contains("spectral"));
        assert_eq!(
            err.suggestion().as_deref(),
            Some("cairn config set communities.algorithm <leiden|louvain>")
        );
    }

    #[test]
    fn test_sqlx_error_converts() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "E400");
        assert!(err.suggestion().is_none());
    }
}
