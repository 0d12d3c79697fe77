//! Error handling for the skillfeed client

use std::fmt;
use thiserror::Error;

use crate::models::BookingStatus;
use skillfeed_auth::AuthError;
use skillfeed_functions::FunctionsError;
use skillfeed_postgrest::PostgrestError;
use skillfeed_realtime::RealtimeError;
use skillfeed_storage::StorageError;

/// Unified error type for the skillfeed client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] PostgrestError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("Function error: {0}")]
    Function(#[from] FunctionsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Booking cannot move from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// How a UI should surface an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreachable backend or timeout; offer a retry
    Network,
    /// A constraint rejected the write; often idempotent
    Constraint,
    /// Authorization or row-level security denial
    Denied,
    /// Referenced data is gone
    Missing,
    /// Bad input or misuse; show a toast
    Client,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn forbidden<T: fmt::Display>(msg: T) -> Self {
        Error::Forbidden(msg.to_string())
    }

    pub fn validation<T: fmt::Display>(msg: T) -> Self {
        Error::Validation(msg.to_string())
    }

    pub fn not_eligible<T: fmt::Display>(msg: T) -> Self {
        Error::NotEligible(msg.to_string())
    }

    pub fn not_found<T: fmt::Display>(msg: T) -> Self {
        Error::NotFound(msg.to_string())
    }

    /// Backend error code, if the backend returned one
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::Database(e) => e.code(),
            _ => None,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Error::Database(e) if e.is_unique_violation())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(e) => match e {
                PostgrestError::NetworkError(_) => ErrorKind::Network,
                _ if e.is_not_found() => ErrorKind::Missing,
                _ if e.code().is_some_and(|c| c.starts_with("23")) => ErrorKind::Constraint,
                _ if e.code() == Some("42501") => ErrorKind::Denied,
                _ => match e.status().map(|s| s.as_u16()) {
                    Some(401) | Some(403) => ErrorKind::Denied,
                    Some(404) => ErrorKind::Missing,
                    Some(s) if s >= 500 => ErrorKind::Network,
                    _ => ErrorKind::Client,
                },
            },
            Error::Auth(AuthError::NetworkError(_)) => ErrorKind::Network,
            Error::Auth(AuthError::AuthenticationError(_)) | Error::Auth(AuthError::MissingSession) => {
                ErrorKind::Denied
            }
            Error::Auth(_) => ErrorKind::Client,
            Error::Storage(StorageError::NetworkError(_)) => ErrorKind::Network,
            Error::Storage(StorageError::ApiError { status, .. }) if *status == 403 => ErrorKind::Denied,
            Error::Storage(_) => ErrorKind::Client,
            Error::Realtime(_) => ErrorKind::Network,
            Error::Function(FunctionsError::RequestError(_)) => ErrorKind::Network,
            Error::Function(_) => ErrorKind::Client,
            Error::NotSignedIn | Error::Forbidden(_) => ErrorKind::Denied,
            Error::NotEligible(_) => ErrorKind::Constraint,
            Error::Timeout(_) => ErrorKind::Network,
            Error::NotFound(_) => ErrorKind::Missing,
            Error::Json(_)
            | Error::Url(_)
            | Error::Validation(_)
            | Error::InvalidTransition { .. }
            | Error::Config(_) => ErrorKind::Client,
        }
    }
}
