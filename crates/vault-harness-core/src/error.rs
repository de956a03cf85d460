//! Error taxonomy for fixture orchestration.
//!
//! Each error class has a fixed blast radius:
//!
//! | Error                   | Scope                                  |
//! |-------------------------|----------------------------------------|
//! | `ProvisioningError`     | the owning fixture                     |
//! | `SessionTransportError` | the current test                       |
//! | `SessionError`          | the current test                       |
//! | `TeardownError`         | none, logged at the point it occurs    |
//! | `SmokeGateExhausted`    | the entire suite                       |
//!
//! Authentication failures on the login page are not errors at all; they
//! surface as [`crate::pages::AuthenticationOutcome::Rejected`].

use thiserror::Error;

/// Result type alias for provisioning operations.
pub type ProvisioningResult<T> = std::result::Result<T, ProvisioningError>;

/// Result type alias for browser interactions.
pub type TransportResult<T> = std::result::Result<T, SessionTransportError>;

/// The backend refused or failed to create, seed, or modify an environment.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// An environment with this name already exists on the backend.
    #[error("environment name already in use: {0}")]
    NameCollision(String),

    /// The backend could not be reached or reported itself unavailable.
    #[error("provisioning backend unavailable: {0}")]
    Unavailable(String),

    /// The backend understood the request but rejected it.
    #[error("backend rejected {operation} on {environment}: {reason}")]
    Rejected {
        environment: String,
        operation: String,
        reason: String,
    },

    /// A promoted object referenced a connector label that was never configured.
    #[error("no external connector labelled '{label}' on {environment}")]
    ConnectorMissing { environment: String, label: String },

    /// The environment was already released.
    #[error("environment {0} has already been torn down")]
    TornDown(String),

    /// The shared capacity gate was closed while waiting for a permit.
    #[error("provisioning capacity gate closed")]
    CapacityClosed,

    /// The provisioning API returned something we could not interpret.
    #[error("provisioning transport error: {0}")]
    Transport(String),
}

/// A browser automation interaction failed (crash, timeout, missing element).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionTransportError {
    /// The browser could not be started.
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// A required element was not present on the page.
    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    /// A browser command did not complete in time.
    #[error("browser command timed out: {0}")]
    Timeout(String),

    /// The browser process or remote session went away.
    #[error("browser session crashed: {0}")]
    Crashed(String),

    /// The automation endpoint answered with an unexpected payload.
    #[error("webdriver protocol error: {0}")]
    Protocol(String),

    /// An operation was attempted on a session that has been quit.
    #[error("session has been destroyed")]
    SessionDestroyed,
}

/// Failure to reach an authenticated home view.
///
/// Distinct from [`crate::pages::AuthenticationOutcome`]: this is raised only
/// when a caller asked to *start at home* and the implicit login did not get
/// there, which the calling test cannot meaningfully continue from.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] SessionTransportError),

    #[error("implicit login rejected for {username}: {message}")]
    LoginRejected { username: String, message: String },

    /// No credential was given and the environment has none to default to.
    #[error("environment {0} has no credential to log in with")]
    MissingCredential(String),
}

/// Releasing an environment or external repository failed.
///
/// Never propagated: the provisioner logs it and moves on.
#[derive(Debug, Error)]
#[error("teardown of {target} failed: {reason}")]
pub struct TeardownError {
    pub target: String,
    pub reason: String,
}

/// The pre-flight login check failed on every attempt.
#[derive(Debug, Error)]
#[error("smoke gate exhausted after {attempts} login attempt(s): {last_failure}")]
pub struct SmokeGateExhausted {
    pub attempts: u32,
    pub last_failure: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts_into_session_error() {
        let err: SessionError = SessionTransportError::ElementNotFound {
            selector: "#login".to_string(),
        }
        .into();
        assert!(matches!(err, SessionError::Transport(_)));
        assert_eq!(err.to_string(), "element not found: #login");
    }

    #[test]
    fn test_smoke_gate_message_mentions_attempts() {
        let err = SmokeGateExhausted {
            attempts: 3,
            last_failure: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "smoke gate exhausted after 3 login attempt(s): connection refused"
        );
    }

    #[test]
    fn test_connector_missing_message() {
        let err = ProvisioningError::ConnectorMissing {
            environment: "vh-1".to_string(),
            label: "share".to_string(),
        };
        assert_eq!(err.to_string(), "no external connector labelled 'share' on vh-1");
    }
}
