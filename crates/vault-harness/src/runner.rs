//! Suite runner.
//!
//! The TestRunner runs the smoke gate once, then every matching fixture in
//! its own tokio task. Fixtures share nothing but the provisioner's
//! capacity gate. Inside a fixture, tests run sequentially and each one is
//! finalized through the session manager before the next starts.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vault_harness::{RunConfig, TestRunner, builtin_fixtures};
//! use vault_harness_core::{
//!     BackendKind, CapacityGate, HttpProvisioningBackend, ResourceProvisioner, SiteMap,
//!     WebDriverLauncher,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = HttpProvisioningBackend::new("http://localhost:8080/api/test", Duration::from_secs(30))?;
//!     let provisioner = ResourceProvisioner::new(Arc::new(backend), BackendKind::Embedded, CapacityGate::new(4));
//!     let launcher = WebDriverLauncher::new("http://localhost:4444", "chrome", true, Duration::from_secs(30))?;
//!
//!     let runner = TestRunner::new(
//!         Arc::new(provisioner),
//!         Arc::new(launcher),
//!         SiteMap::new("http://localhost:8080"),
//!         builtin_fixtures(),
//!     );
//!     let results = runner.run(&RunConfig::new()).await?;
//!     println!("Passed: {}", results.passed_count());
//!     Ok(())
//! }
//! ```

use crate::fixture::{Fixture, FixtureContext, FixtureTest, TestFailure};
use crate::models::{FixtureResult, TestResult};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vault_harness_core::{
    Artifact, BrowserLauncher, DatasetTemplate, DiagnosticsDir, FixtureParameters, HarnessConfig,
    ParameterResolver, ResourceProvisioner, SessionManager, SiteMap, SmokeGate,
    SmokeGateExhausted, SmokeReport, TestOutcome,
};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The pre-flight login check failed; no fixture ran.
    #[error(transparent)]
    SmokeGateExhausted(#[from] SmokeGateExhausted),

    /// No fixtures matched the filter.
    #[error("no fixtures matched filter: {0}")]
    NoMatchingFixtures(String),
}

/// Configuration for a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Filter fixtures by pattern (matches fixture ID or description).
    pub filter: Option<String>,

    /// Skip the pre-flight login check.
    pub skip_smoke: bool,

    /// Per-test time limit.
    pub test_timeout: Duration,

    pub smoke_attempts: u32,

    /// Dataset for fixtures that do not name one.
    pub template: DatasetTemplate,

    /// Where diagnostics are archived when the run ends.
    pub reports_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            filter: None,
            skip_smoke: false,
            test_timeout: Duration::from_secs(300),
            smoke_attempts: SmokeGate::DEFAULT_ATTEMPTS,
            template: DatasetTemplate::default(),
            reports_dir: None,
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes timeouts, attempts, template and reports dir from a loaded config.
    pub fn from_harness_config(config: &HarnessConfig) -> Self {
        Self {
            filter: None,
            skip_smoke: false,
            test_timeout: config.test_timeout(),
            smoke_attempts: config.smoke.attempts,
            template: config.backend.template.clone(),
            reports_dir: Some(config.diagnostics.reports_dir.clone()),
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn skip_smoke(mut self, skip: bool) -> Self {
        self.skip_smoke = skip;
        self
    }

    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }
}

/// Aggregated results of a run.
#[derive(Debug, Clone, Default)]
pub struct RunResults {
    /// Per-fixture results, in registration order.
    pub fixtures: Vec<FixtureResult>,

    /// Present when the smoke gate ran and passed.
    pub smoke: Option<SmokeReport>,

    pub duration: Duration,

    /// Where diagnostics were archived.
    pub archived_to: Option<PathBuf>,
}

impl RunResults {
    pub fn tests(&self) -> impl Iterator<Item = &TestResult> {
        self.fixtures.iter().flat_map(|f| f.tests.iter())
    }

    pub fn passed_count(&self) -> usize {
        self.tests().filter(|t| t.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.tests().filter(|t| !t.passed()).count()
    }

    pub fn total_count(&self) -> usize {
        self.tests().count()
    }

    /// Fixtures that never ran because provisioning failed.
    pub fn setup_failures(&self) -> Vec<&FixtureResult> {
        self.fixtures
            .iter()
            .filter(|f| f.setup_error.is_some())
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.fixtures.iter().all(FixtureResult::passed)
    }

    pub fn failures(&self) -> Vec<&TestResult> {
        self.tests().filter(|t| !t.passed()).collect()
    }

    pub fn fixture(&self, id: &str) -> Option<&FixtureResult> {
        self.fixtures.iter().find(|f| f.fixture_id == id)
    }
}

/// Progress callback for run updates. Shared by every fixture task.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    RunStarted { total_fixtures: usize },

    SmokeStarted { attempts: u32 },

    SmokePassed { report: SmokeReport },

    SmokeFailed { attempts: u32, reason: String },

    SmokeSkipped { reason: String },

    /// A fixture's environment is ready and its first test is about to run.
    FixtureStarted {
        fixture_id: String,
        environment: String,
    },

    TestCompleted { result: TestResult },

    FixtureCompleted { result: FixtureResult },

    RunCompleted { results: RunResults },
}

/// Runs fixtures against isolated environments.
pub struct TestRunner {
    provisioner: Arc<ResourceProvisioner>,
    launcher: Arc<dyn BrowserLauncher>,
    site: SiteMap,
    fixtures: Vec<Arc<dyn Fixture>>,
    parameters: ParameterResolver,
    diagnostics: Option<DiagnosticsDir>,
    on_progress: Option<ProgressCallback>,
}

impl TestRunner {
    pub fn new(
        provisioner: Arc<ResourceProvisioner>,
        launcher: Arc<dyn BrowserLauncher>,
        site: SiteMap,
        fixtures: Vec<Arc<dyn Fixture>>,
    ) -> Self {
        Self {
            provisioner,
            launcher,
            site,
            fixtures,
            parameters: ParameterResolver::default(),
            diagnostics: None,
            on_progress: None,
        }
    }

    /// Sets the resolver for suite and per-fixture parameters.
    pub fn with_parameters(mut self, parameters: ParameterResolver) -> Self {
        self.parameters = parameters;
        self
    }

    /// Captures failure artifacts into `diagnostics`.
    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsDir) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn fixture_count(&self) -> usize {
        self.fixtures.len()
    }

    /// Returns fixtures matching the given config.
    pub fn matching_fixtures(&self, config: &RunConfig) -> Vec<Arc<dyn Fixture>> {
        self.fixtures
            .iter()
            .filter(|f| matches_filter(f.as_ref(), config.filter.as_deref()))
            .cloned()
            .collect()
    }

    /// Runs the smoke gate, then every matching fixture concurrently.
    pub async fn run(&self, config: &RunConfig) -> Result<RunResults, RunnerError> {
        let start = Instant::now();
        let matching = self.matching_fixtures(config);

        if matching.is_empty()
            && let Some(filter) = &config.filter
        {
            return Err(RunnerError::NoMatchingFixtures(filter.clone()));
        }

        self.emit(ProgressEvent::RunStarted {
            total_fixtures: matching.len(),
        });

        let smoke = match self.run_smoke(config).await {
            Ok(report) => report,
            Err(err) => {
                self.archive(config);
                return Err(err.into());
            }
        };

        let mut tasks = JoinSet::new();
        for (index, fixture) in matching.iter().enumerate() {
            let job = FixtureJob {
                fixture: Arc::clone(fixture),
                parameters: self.parameters.resolve(fixture.id()),
                provisioner: Arc::clone(&self.provisioner),
                launcher: Arc::clone(&self.launcher),
                site: self.site.clone(),
                template: config.template.clone(),
                test_timeout: config.test_timeout,
                diagnostics: self.diagnostics.clone(),
                on_progress: self.on_progress.clone(),
            };
            tasks.spawn(async move { (index, job.run().await) });
        }

        let mut slots: Vec<Option<FixtureResult>> = vec![None; matching.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(err) => warn!(error = %err, "Fixture task did not complete"),
            }
        }

        let fixtures = slots
            .into_iter()
            .zip(&matching)
            .map(|(slot, fixture)| {
                slot.unwrap_or_else(|| {
                    FixtureResult::setup_failed(
                        fixture.id(),
                        fixture.description(),
                        "fixture task panicked",
                        Duration::ZERO,
                    )
                })
            })
            .collect();

        let results = RunResults {
            fixtures,
            smoke,
            duration: start.elapsed(),
            archived_to: self.archive(config),
        };

        info!(
            passed = results.passed_count(),
            failed = results.failed_count(),
            setup_failures = results.setup_failures().len(),
            "Run completed"
        );
        self.emit(ProgressEvent::RunCompleted {
            results: results.clone(),
        });

        Ok(results)
    }

    async fn run_smoke(&self, config: &RunConfig) -> Result<Option<SmokeReport>, SmokeGateExhausted> {
        if config.skip_smoke {
            self.emit(ProgressEvent::SmokeSkipped {
                reason: "--skip-smoke".to_string(),
            });
            return Ok(None);
        }
        if !self.parameters.suite().login_smoke_enabled() {
            self.emit(ProgressEvent::SmokeSkipped {
                reason: "login_smoke_enabled is false".to_string(),
            });
            return Ok(None);
        }

        let mut gate = SmokeGate::new(
            Arc::clone(&self.provisioner),
            Arc::clone(&self.launcher),
            self.site.clone(),
        )
        .with_attempts(config.smoke_attempts)
        .with_template(config.template.clone());
        if let Some(diagnostics) = &self.diagnostics {
            gate = gate.with_diagnostics(diagnostics.clone());
        }

        self.emit(ProgressEvent::SmokeStarted {
            attempts: gate.attempts(),
        });
        match gate.run().await {
            Ok(report) => {
                self.emit(ProgressEvent::SmokePassed {
                    report: report.clone(),
                });
                Ok(Some(report))
            }
            Err(err) => {
                self.emit(ProgressEvent::SmokeFailed {
                    attempts: err.attempts,
                    reason: err.last_failure.clone(),
                });
                Err(err)
            }
        }
    }

    fn archive(&self, config: &RunConfig) -> Option<PathBuf> {
        let diagnostics = self.diagnostics.as_ref()?;
        let reports_dir = config.reports_dir.as_ref()?;
        match diagnostics.archive_to(reports_dir) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(error = %err, "Failed to archive diagnostics");
                None
            }
        }
    }

    fn emit(&self, event: ProgressEvent) {
        emit(self.on_progress.as_ref(), event);
    }
}

fn emit(callback: Option<&ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

fn matches_filter(fixture: &dyn Fixture, filter: Option<&str>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    let filter = filter.to_lowercase();
    fixture.id().to_lowercase().contains(&filter)
        || fixture.description().to_lowercase().contains(&filter)
}

/// Everything one fixture task owns.
struct FixtureJob {
    fixture: Arc<dyn Fixture>,
    parameters: FixtureParameters,
    provisioner: Arc<ResourceProvisioner>,
    launcher: Arc<dyn BrowserLauncher>,
    site: SiteMap,
    template: DatasetTemplate,
    test_timeout: Duration,
    diagnostics: Option<DiagnosticsDir>,
    on_progress: Option<ProgressCallback>,
}

impl FixtureJob {
    async fn run(self) -> FixtureResult {
        let started = Instant::now();
        let fixture = Arc::clone(&self.fixture);
        let template = fixture.template().unwrap_or_else(|| self.template.clone());

        let env = match self
            .provisioner
            .provision(&template, &fixture.role_specs())
            .await
        {
            Ok(env) => Arc::new(env),
            Err(err) => {
                warn!(fixture = %fixture.id(), error = %err, "Fixture setup failed");
                let result = FixtureResult::setup_failed(
                    fixture.id(),
                    fixture.description(),
                    err.to_string(),
                    started.elapsed(),
                );
                emit(
                    self.on_progress.as_ref(),
                    ProgressEvent::FixtureCompleted {
                        result: result.clone(),
                    },
                );
                return result;
            }
        };

        info!(fixture = %fixture.id(), environment = %env.name(), "Fixture started");
        emit(
            self.on_progress.as_ref(),
            ProgressEvent::FixtureStarted {
                fixture_id: fixture.id().to_string(),
                environment: env.name().to_string(),
            },
        );

        let mut session =
            SessionManager::new(Arc::clone(&self.launcher), Arc::clone(&env), self.site.clone());
        if let Some(credential) = env.credential(fixture.default_role()) {
            session = session.with_default_credential(credential.clone());
        }
        let mut ctx = FixtureContext {
            session,
            environment: Arc::clone(&env),
            provisioner: Arc::clone(&self.provisioner),
            parameters: self.parameters.clone(),
        };

        let mut tests = fixture.tests();
        tests.sort_by_key(|t| t.order());

        let mut results = Vec::with_capacity(tests.len());
        for test in &tests {
            let result = self.run_test(&mut ctx, test.as_ref()).await;
            emit(
                self.on_progress.as_ref(),
                ProgressEvent::TestCompleted {
                    result: result.clone(),
                },
            );
            results.push(result);
        }

        // The session must be gone before its environment is released.
        ctx.session.ensure_quit().await;
        self.provisioner.teardown(&env).await;

        let result = FixtureResult {
            fixture_id: fixture.id().to_string(),
            description: fixture.description().to_string(),
            environment: Some(env.name().to_string()),
            usernames: env.credentials().map(|c| c.username.clone()).collect(),
            setup_error: None,
            tests: results,
            duration: started.elapsed(),
        };
        emit(
            self.on_progress.as_ref(),
            ProgressEvent::FixtureCompleted {
                result: result.clone(),
            },
        );
        result
    }

    async fn run_test(&self, ctx: &mut FixtureContext, test: &dyn FixtureTest) -> TestResult {
        let started = Instant::now();
        let fixture_id = self.fixture.id();
        debug!(fixture = %fixture_id, test = %test.name(), "Test started");

        // A panicking test fails on its own; the fixture keeps going.
        let guarded = AssertUnwindSafe(test.run(ctx)).catch_unwind();
        let outcome = match tokio::time::timeout(self.test_timeout, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(TestFailure::from_panic(payload.as_ref())),
            Err(_) => Err(TestFailure::Timeout(self.test_timeout)),
        };
        let session_id = ctx.session.session_id();

        let mut artifact = None;
        if let Err(failure) = &outcome {
            warn!(fixture = %fixture_id, test = %test.name(), error = %failure, "Test failed");
            if let Some(diagnostics) = &self.diagnostics {
                let captured = match ctx.session.capture_screenshot().await {
                    Some(png) => Artifact::Screenshot(png),
                    None => Artifact::Note(failure.to_string()),
                };
                artifact = diagnostics.capture(&format!("{fixture_id} {}", test.name()), &captured);
            }
        }

        let requested = TestOutcome::from_passed(outcome.is_ok());
        let effective = if test.expects_navigation_away() {
            ctx.session.finalize_expecting_navigation(requested).await
        } else {
            ctx.session.finalize_based_on_outcome(requested).await
        };

        let failure = match (&outcome, effective) {
            (Err(failure), _) => Some(failure.to_string()),
            (Ok(()), TestOutcome::Fail) => {
                Some("passed but never navigated away from the login screen".to_string())
            }
            (Ok(()), TestOutcome::Pass) => None,
        };

        TestResult {
            fixture_id: fixture_id.to_string(),
            test_name: test.name().to_string(),
            outcome: effective,
            failure,
            session_id,
            artifact,
            duration: started.elapsed(),
        }
    }
}
