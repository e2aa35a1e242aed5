// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the gateway.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum TidemailError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The remote mail server could not be reached (network or TLS failure).
    /// Never retried automatically inside the pool.
    #[error("Cannot reach mail server: {0}")]
    Dial(String),

    #[error("TLS Error: {0}")]
    Tls(String),

    /// The mail server rejected the supplied credentials. A user-level
    /// failure, not a system fault.
    #[error("Mail server rejected the credentials")]
    AuthFailed,

    /// The token is unknown, or the session it named has been deleted or
    /// reaped. The two cases are indistinguishable to the caller.
    #[error("Session expired")]
    SessionExpired,

    /// The session's connection died and a single re-authentication attempt
    /// failed. The entry has already been removed from the pool.
    #[error("Session broken: {0}")]
    SessionBroken(String),

    /// The pool refused to allocate a new session entry.
    #[error("Session pool exhausted")]
    PoolExhausted,

    /// A bounded wait (same-token lock, dial, or login round trip) elapsed.
    /// Callers treat this like `SessionBroken`.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The mail server sent a response the client could not interpret.
    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for TidemailError {
    fn clone(&self) -> Self {
        match self {
            TidemailError::Io(e) => TidemailError::Io(Arc::clone(e)),
            TidemailError::Dial(s) => TidemailError::Dial(s.clone()),
            TidemailError::Tls(s) => TidemailError::Tls(s.clone()),
            TidemailError::AuthFailed => TidemailError::AuthFailed,
            TidemailError::SessionExpired => TidemailError::SessionExpired,
            TidemailError::SessionBroken(s) => TidemailError::SessionBroken(s.clone()),
            TidemailError::PoolExhausted => TidemailError::PoolExhausted,
            TidemailError::Timeout(s) => TidemailError::Timeout(s.clone()),
            TidemailError::Protocol(s) => TidemailError::Protocol(s.clone()),
            TidemailError::InvalidRequest(s) => TidemailError::InvalidRequest(s.clone()),
            TidemailError::Internal(s) => TidemailError::Internal(s.clone()),
        }
    }
}

impl PartialEq for TidemailError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TidemailError::Io(e1), TidemailError::Io(e2)) => e1.to_string() == e2.to_string(),
            (TidemailError::Dial(s1), TidemailError::Dial(s2)) => s1 == s2,
            (TidemailError::Tls(s1), TidemailError::Tls(s2)) => s1 == s2,
            (TidemailError::SessionBroken(s1), TidemailError::SessionBroken(s2)) => s1 == s2,
            (TidemailError::Timeout(s1), TidemailError::Timeout(s2)) => s1 == s2,
            (TidemailError::Protocol(s1), TidemailError::Protocol(s2)) => s1 == s2,
            (TidemailError::InvalidRequest(s1), TidemailError::InvalidRequest(s2)) => s1 == s2,
            (TidemailError::Internal(s1), TidemailError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for TidemailError {
    fn from(e: std::io::Error) -> Self {
        TidemailError::Io(Arc::new(e))
    }
}

impl From<rustls::Error> for TidemailError {
    fn from(e: rustls::Error) -> Self {
        TidemailError::Tls(e.to_string())
    }
}

impl From<std::str::Utf8Error> for TidemailError {
    fn from(e: std::str::Utf8Error) -> Self {
        TidemailError::Protocol(format!("response is not valid UTF-8: {e}"))
    }
}

impl From<std::string::FromUtf8Error> for TidemailError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        TidemailError::Protocol(format!("response is not valid UTF-8: {e}"))
    }
}
