// Camtrap Sync Error Types

use thiserror::Error;

use crate::lock::LockError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Store already exists: {0}")]
    StoreExists(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Invalid data label: {0}")]
    InvalidDataLabel(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Template change is blocked: {0}")]
    TemplateBlocked(String),

    #[error("Template change needs confirmation: {0}")]
    ConfirmationRequired(String),

    #[error("Foreign key check found {0} dangling reference(s)")]
    IntegrityViolation(usize),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
