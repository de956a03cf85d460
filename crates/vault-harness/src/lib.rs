//! # vault-harness
//!
//! Runs browser-driven acceptance fixtures against isolated vaults.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────────┐
//! │  TestRunner │────▶│  SmokeGate  │────▶│ ResourceProvisioner │
//! └─────────────┘     └─────────────┘     └─────────────────────┘
//!        │                                          ▲
//!        ▼                                          │
//! ┌─────────────┐     ┌────────────────┐            │
//! │  Fixtures   │────▶│ SessionManager │────────────┘
//! └─────────────┘     └────────────────┘
//!        │
//!        ▼
//! ┌─────────────┐
//! │  Reporter   │
//! └─────────────┘
//! ```
//!
//! Orchestration primitives live in `vault-harness-core`; this crate adds
//! the fixture model, the runner, reporting, and the built-in fixtures.

pub use crate::fixture::{
    Fixture, FixtureContext, FixtureTest, TestFailure, ensure, ensure_eq,
};
pub use crate::models::{FixtureResult, ReportFormat, TestResult};
pub use crate::reporter::{
    JsonReporter, ReportSummary, ReportWriter, ReporterError, TerminalReporter, TestReport,
    Verbosity, create_progress_callback,
};
pub use crate::runner::{
    ProgressCallback, ProgressEvent, RunConfig, RunResults, RunnerError, TestRunner,
};
pub use crate::scenarios::{LoginFixture, PersonalViewsFixture, builtin_fixtures};

pub mod fixture;
mod models;
pub mod reporter;
pub mod runner;
pub mod scenarios;

/// Library version, matching the crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
