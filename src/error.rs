use crate::services::ClaimError;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Claim error: {0}")]
    Claim(#[from] ClaimError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Stable code for log lines and for collaborators that render errors.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Claim(ClaimError::NoStock) => "NO_STOCK",
            AppError::Claim(ClaimError::OrderAlreadyBound(_)) => "ORDER_ALREADY_BOUND",
            AppError::Claim(ClaimError::Cancelled) => "CANCELLED",
            AppError::Claim(ClaimError::Storage(_)) => "CLAIM_FAILED",
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ConfigError(_) => "CONFIG_ERROR",
            AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Logs at the level matching the error's severity.
    pub fn log(&self, context: &str) {
        match self {
            AppError::ValidationError(msg) => log::warn!("{context}: validation error: {msg}"),
            AppError::NotFound(msg) => log::warn!("{context}: not found: {msg}"),
            AppError::Claim(ClaimError::NoStock) | AppError::Claim(ClaimError::Cancelled) => {
                log::info!("{context}: {self}")
            }
            _ => log::error!("{context}: [{}] {self}", self.error_code()),
        }
    }
}
