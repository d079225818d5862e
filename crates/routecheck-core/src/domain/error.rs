//! Domain-level error taxonomy for routecheck.

/// routecheck domain errors.
#[derive(Debug, thiserror::Error)]
pub enum RouteCheckError {
    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("duplicate test case id in batch: {0}")]
    DuplicateCaseId(String),

    #[error("invalid test batch: {0}")]
    InvalidBatch(String),

    #[error("classification failed: {0}")]
    Classification(#[from] crate::completion::CompletionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for routecheck domain operations.
pub type Result<T> = std::result::Result<T, RouteCheckError>;

/// Truncate an error message to at most `max_chars` characters.
///
/// Counts chars, not bytes, so multi-byte messages never split mid-codepoint.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
