//! Result records produced by the runner and consumed by the reporters.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vault_harness_core::{SessionId, TestOutcome};

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// JSON report in the reports directory
    #[default]
    Json,
    /// Terminal summary only
    None,
}

/// Result of one test inside a fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub fixture_id: String,
    pub test_name: String,
    /// Outcome after session finalization.
    pub outcome: TestOutcome,
    /// Why the test failed, if it did.
    pub failure: Option<String>,
    /// Session the test ran in; `None` if it never got one.
    pub session_id: Option<SessionId>,
    /// Screenshot or note captured on failure.
    pub artifact: Option<PathBuf>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl TestResult {
    pub fn passed(&self) -> bool {
        self.outcome.is_pass()
    }
}

/// Result of one fixture: its environment and every test it ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResult {
    pub fixture_id: String,
    pub description: String,
    /// Name of the environment the fixture ran against.
    pub environment: Option<String>,
    /// Usernames provisioned for the fixture.
    pub usernames: Vec<String>,
    /// Set when provisioning failed and no test ran.
    pub setup_error: Option<String>,
    pub tests: Vec<TestResult>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl FixtureResult {
    /// A fixture whose environment could not be provisioned.
    pub fn setup_failed(
        fixture_id: impl Into<String>,
        description: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            fixture_id: fixture_id.into(),
            description: description.into(),
            environment: None,
            usernames: Vec::new(),
            setup_error: Some(error.into()),
            tests: Vec::new(),
            duration,
        }
    }

    pub fn passed(&self) -> bool {
        self.setup_error.is_none() && self.tests.iter().all(TestResult::passed)
    }

    pub fn failed_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.tests.iter().filter(|t| !t.passed())
    }
}

/// Serde helper for Duration serialization.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
