//! Fixtures and the tests they group.
//!
//! A fixture declares the environment it needs (template and credential
//! roles) and an ordered list of tests. The runner gives every fixture its
//! own environment and session, runs the tests one after another through a
//! shared [`FixtureContext`], and tears everything down afterwards.
//!
//! ```text
//! provision ─▶ test₁ ─▶ finalize ─▶ test₂ ─▶ finalize ─▶ … ─▶ ensure_quit ─▶ teardown
//! ```

use async_trait::async_trait;
use std::any::Any;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vault_harness_core::{
    DEFAULT_ROLE, DatasetTemplate, Environment, FixtureParameters, ProvisioningError,
    ResourceProvisioner, RoleSpec, SessionError, SessionManager, SessionTransportError,
    UserCredential,
};

/// Why a test did not pass. Any variant yields a `Fail` outcome.
#[derive(Debug, Error)]
pub enum TestFailure {
    #[error("{name}: expected {expected}, got {actual}")]
    Assertion {
        name: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Transport(#[from] SessionTransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error("test timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("test panicked: {0}")]
    Panicked(String),
}

impl TestFailure {
    pub fn assertion(
        name: impl Into<String>,
        expected: impl Display,
        actual: impl Display,
    ) -> Self {
        TestFailure::Assertion {
            name: name.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Builds a failure from a caught panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        TestFailure::Panicked(message)
    }
}

/// Fails with an assertion error unless `condition` holds.
pub fn ensure(
    condition: bool,
    name: &str,
    expected: impl Display,
    actual: impl Display,
) -> Result<(), TestFailure> {
    if condition {
        Ok(())
    } else {
        Err(TestFailure::assertion(name, expected, actual))
    }
}

/// Fails with an assertion error unless `actual == expected`.
pub fn ensure_eq<T>(name: &str, expected: T, actual: T) -> Result<(), TestFailure>
where
    T: PartialEq + std::fmt::Debug,
{
    if expected == actual {
        Ok(())
    } else {
        Err(TestFailure::assertion(
            name,
            format!("{expected:?}"),
            format!("{actual:?}"),
        ))
    }
}

/// Everything a test can reach: the fixture's session, its environment,
/// the provisioner for seeding content, and resolved parameters.
pub struct FixtureContext {
    pub session: SessionManager,
    pub environment: Arc<Environment>,
    pub provisioner: Arc<ResourceProvisioner>,
    pub parameters: FixtureParameters,
}

impl FixtureContext {
    /// Credential provisioned for `role`.
    pub fn credential(&self, role: &str) -> Result<UserCredential, TestFailure> {
        self.environment.credential(role).cloned().ok_or_else(|| {
            TestFailure::assertion(
                "credential available",
                format!("a credential for role '{role}'"),
                format!("none in {}", self.environment.name()),
            )
        })
    }

    /// Connector label scoped to this environment.
    ///
    /// External repositories are global on the backend, so labels are
    /// prefixed with the environment name to keep fixtures apart.
    pub fn connector_label(&self, suffix: &str) -> String {
        format!("{}-{suffix}", self.environment.name())
    }
}

/// One test inside a fixture.
#[async_trait]
pub trait FixtureTest: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first; ties keep declaration order.
    fn order(&self) -> i32 {
        0
    }

    /// When true, a test that passes while still on the login screen is
    /// recorded as failed.
    fn expects_navigation_away(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure>;
}

/// A group of tests sharing one environment and one session.
pub trait Fixture: Send + Sync {
    /// Unique identifier (e.g., "login").
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Dataset to clone; `None` uses the configured default.
    fn template(&self) -> Option<DatasetTemplate> {
        None
    }

    /// Credential roles to seed into the environment.
    fn role_specs(&self) -> Vec<RoleSpec>;

    /// Role whose credential is used when a test does not name one.
    fn default_role(&self) -> &str {
        DEFAULT_ROLE
    }

    fn tests(&self) -> Vec<Box<dyn FixtureTest>>;
}
