use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("Calendar API error: {0}")]
    Http(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Calendar not connected for coach {0}")]
    NotConnected(String),
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl InfraError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            InfraError::Timeout(_) => true,
            InfraError::Http(message) | InfraError::OAuth(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
                    || message.contains("http 429")
                    || message.contains("http 5")
            }
            _ => false,
        }
    }
}
