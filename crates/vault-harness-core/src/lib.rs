//! # vault-harness-core
//!
//! Fixture orchestration for browser-driven acceptance suites of the vault
//! document-management application.
//!
//! This crate provides:
//! - Isolated environment provisioning and teardown behind a shared capacity gate
//! - One browser session per fixture, with outcome-driven recovery between tests
//! - The pre-flight login smoke gate
//! - Configuration loading and per-fixture parameter resolution
//! - Failure diagnostics (screenshots and notes) archived per run
//! - In-memory fakes of the deployment and browser for tests

pub mod backend;
pub mod browser;
pub mod capacity;
pub mod config;
pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod pages;
pub mod provisioner;
pub mod session;
pub mod smoke;
pub mod testing;

pub use backend::BackendKind;
pub use browser::{BrowserDriver, BrowserLauncher, WebDriverLauncher, WebDriverSession};
pub use capacity::{CapacityGate, CapacityPermit};
pub use config::{
    ConfigError, FixtureParameters, HarnessConfig, LOGIN_SMOKE_PARAMETER, ParameterResolver,
};
pub use diagnostics::{Artifact, DiagnosticsDir};
pub use environment::{
    DEFAULT_ROLE, DatasetTemplate, Environment, RoleAttributes, RoleSpec, UserCredential,
};
pub use error::{
    ProvisioningError, ProvisioningResult, SessionError, SessionTransportError, SmokeGateExhausted,
    TeardownError, TransportResult,
};
pub use pages::{AuthenticationOutcome, HomePage, LoginPage, PersonalView, SiteMap};
pub use provisioner::{
    HttpProvisioningBackend, PromotedObject, ProvisioningBackend, ResourceProvisioner,
};
pub use session::{SessionId, SessionManager, SessionState, SessionStats, TestOutcome};
pub use smoke::{SmokeGate, SmokeReport};
