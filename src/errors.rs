use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("API_FAILURE: {0}")]
    Api(String),
    #[error("VALIDATION_REJECTED: {0}")]
    Validation(String),
    #[error("LIMIT_REACHED: auto-refresh limit of {limit} reports reached ({current} enabled)")]
    LimitReached { limit: u32, current: u32 },
    #[error("INVALID_TRANSITION: {0}")]
    InvalidTransition(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Every failure in this crate is scoped to one report, one mutation or
    /// one metric column; none of them should take the application down.
    pub fn is_scoped_failure(&self) -> bool {
        true
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Api(_) => "API_FAILURE",
            Self::Validation(_) => "VALIDATION_REJECTED",
            Self::LimitReached { .. } => "LIMIT_REACHED",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Io(_) => "IO_FAILURE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        Self::Api(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
