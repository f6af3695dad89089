//! Crate-wide error taxonomy. Every component-local error enum converts into
//! a [`ControlPlaneError`] carrying one of the [`ErrorKind`] values, which is
//! the only thing the (sketched) HTTP layer needs to pick a status code.

use thiserror::Error;

/// The error kinds named by the control-plane's error-handling design.
/// These are categories, not concrete types — every component's local error
/// enum is mapped into one of these at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    Validation,
    CredentialResolution,
    NetworkTransient,
    NetworkFatal,
    RemoteCommandFailure,
    Integrity,
    Capacity,
    Shutdown,
    NotFound,
    Internal,
    /// An operation's overall cap was exceeded (distinct from a single
    /// retryable transient failure) — e.g. §4.7's "total ≤ 30s" metrics
    /// collection bound. Maps to 504 per §6's status list.
    Timeout,
}

impl ErrorKind {
    /// Maps a kind onto the HTTP status the (sketched) router would return.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::Authentication => 401,
            ErrorKind::Authorization => 403,
            ErrorKind::Validation => 400,
            ErrorKind::CredentialResolution => 409,
            ErrorKind::NetworkTransient => 503,
            ErrorKind::NetworkFatal => 502,
            ErrorKind::RemoteCommandFailure => 500,
            ErrorKind::Integrity => 500,
            ErrorKind::Capacity => 503,
            ErrorKind::Shutdown => 503,
            ErrorKind::NotFound => 404,
            ErrorKind::Internal => 500,
            ErrorKind::Timeout => 504,
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct ControlPlaneError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: Option<String>,
}

impl ControlPlaneError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}
