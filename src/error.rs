use crate::models::FieldErrors;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("File rejected: {0}")]
    FileRejected(String),
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),
    #[error("HTTP Error: {0}")]
    Transport(String),
    #[error("Server error ({status}): {}", .detail.as_deref().unwrap_or("no detail"))]
    Server { status: u16, detail: Option<String> },
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Export error: {0}")]
    Export(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Text shown to the user next to the failed step. Prefers the server's
    /// `detail` over the transport message.
    pub fn detail(&self) -> String {
        match self {
            AppError::Server { detail: Some(detail), .. } => detail.clone(),
            AppError::Server { status, detail: None } => {
                format!("Request failed with status code {}", status)
            }
            AppError::Transport(msg)
            | AppError::InvalidInput(msg)
            | AppError::FileRejected(msg)
            | AppError::ParseError(msg)
            | AppError::Connection(msg)
            | AppError::Export(msg)
            | AppError::Config(msg) => msg.clone(),
            AppError::Validation(errors) => errors.to_string(),
            AppError::IoError(err) => err.to_string(),
            AppError::Cancelled => "Cancelled".to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Transport(err.to_string())
    }
}
