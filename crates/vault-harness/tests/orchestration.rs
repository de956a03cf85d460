//! End-to-end runs of the harness against the in-memory deployment.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vault_harness::{
    Fixture, FixtureContext, FixtureTest, ReportWriter, RunConfig, RunnerError, TestFailure,
    TestRunner, builtin_fixtures, ensure,
};
use vault_harness_core::testing::{FakeDeployment, FakeLauncher};
use vault_harness_core::{
    BackendKind, CapacityGate, DiagnosticsDir, ResourceProvisioner, RoleSpec, SiteMap,
    TestOutcome,
};

struct Harness {
    deployment: FakeDeployment,
    launcher: FakeLauncher,
    provisioner: Arc<ResourceProvisioner>,
}

impl Harness {
    fn new(capacity: usize) -> Self {
        Self::with_deployment(FakeDeployment::new(), capacity)
    }

    fn with_deployment(deployment: FakeDeployment, capacity: usize) -> Self {
        let launcher = FakeLauncher::new(deployment.clone());
        let provisioner = ResourceProvisioner::new(
            Arc::new(deployment.clone()),
            BackendKind::Embedded,
            CapacityGate::new(capacity),
        );
        Self {
            deployment,
            launcher,
            provisioner: Arc::new(provisioner),
        }
    }

    fn runner(&self, fixtures: Vec<Arc<dyn Fixture>>) -> TestRunner {
        TestRunner::new(
            Arc::clone(&self.provisioner),
            Arc::new(self.launcher.clone()),
            SiteMap::new(FakeDeployment::BASE_URL),
            fixtures,
        )
    }
}

/// Logs in and optionally fails afterwards.
struct LoginThen {
    name: &'static str,
    order: i32,
    pass: bool,
}

#[async_trait]
impl FixtureTest for LoginThen {
    fn name(&self) -> &str {
        self.name
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let mut home = ctx.session.start_at_home_page(None).await?;
        ensure(home.is_at_landing().await?, "landing", "home", "elsewhere")?;
        ensure(self.pass, self.name, "pass", "deliberate failure")
    }
}

/// Logs in, then panics the way a buggy test body would.
struct PanicsAfterLogin;

#[async_trait]
impl FixtureTest for PanicsAfterLogin {
    fn name(&self) -> &str {
        "panics"
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        ctx.session.start_at_home_page(None).await?;
        let rows: Vec<&str> = Vec::new();
        ensure(!rows[0].is_empty(), "first row", "present", "missing")
    }
}

struct PanickingFixture;

impl Fixture for PanickingFixture {
    fn id(&self) -> &str {
        "panicking"
    }

    fn description(&self) -> &str {
        "a test body that panics"
    }

    fn role_specs(&self) -> Vec<RoleSpec> {
        vec![RoleSpec::user()]
    }

    fn tests(&self) -> Vec<Box<dyn FixtureTest>> {
        vec![
            Box::new(PanicsAfterLogin),
            Box::new(LoginThen {
                name: "after",
                order: 1,
                pass: true,
            }),
        ]
    }
}

struct Scripted {
    id: String,
    tests: Vec<(&'static str, bool)>,
}

impl Scripted {
    fn new(id: impl Into<String>, tests: Vec<(&'static str, bool)>) -> Arc<dyn Fixture> {
        Arc::new(Self {
            id: id.into(),
            tests,
        })
    }
}

impl Fixture for Scripted {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "scripted"
    }

    fn role_specs(&self) -> Vec<RoleSpec> {
        let mut specs = vec![RoleSpec::user()];
        specs.extend(RoleSpec::generic_users(2));
        specs
    }

    fn tests(&self) -> Vec<Box<dyn FixtureTest>> {
        self.tests
            .iter()
            .zip(0..)
            .map(|((name, pass), order)| {
                Box::new(LoginThen {
                    name: *name,
                    order,
                    pass: *pass,
                }) as Box<dyn FixtureTest>
            })
            .collect()
    }
}

#[tokio::test]
async fn test_builtin_fixtures_pass_against_fake_deployment() {
    let harness = Harness::new(4);

    let results = harness
        .runner(builtin_fixtures())
        .run(&RunConfig::new())
        .await
        .unwrap();

    for failure in results.failures() {
        eprintln!("{}::{} -> {:?}", failure.fixture_id, failure.test_name, failure.failure);
    }
    assert!(results.all_passed());
    assert!(results.smoke.is_some());
    assert_eq!(results.total_count(), 10);
    assert_eq!(harness.deployment.live_environment_count(), 0);

    let share = format!(
        "{}-share",
        results.fixture("personal-views").unwrap().environment.as_deref().unwrap()
    );
    assert!(harness.deployment.cleared_repositories().contains(&share));
}

#[tokio::test]
async fn test_concurrent_fixtures_get_disjoint_environments_and_users() {
    let harness = Harness::new(8);
    let fixtures = (0..6)
        .map(|i| Scripted::new(format!("iso-{i}"), vec![("a", true), ("b", true)]))
        .collect();

    let results = harness
        .runner(fixtures)
        .run(&RunConfig::new().skip_smoke(true))
        .await
        .unwrap();

    assert!(results.all_passed());
    let environments: HashSet<_> = results
        .fixtures
        .iter()
        .map(|f| f.environment.clone().unwrap())
        .collect();
    assert_eq!(environments.len(), 6);

    let mut seen = HashSet::new();
    for fixture in &results.fixtures {
        assert_eq!(fixture.usernames.len(), 3);
        for username in &fixture.usernames {
            assert!(seen.insert(username.clone()), "{username} shared between fixtures");
        }
    }

    let sessions: HashSet<_> = results.tests().map(|t| t.session_id.unwrap()).collect();
    assert_eq!(sessions.len(), 6, "one session per fixture");
}

#[tokio::test]
async fn test_smoke_exhaustion_runs_no_fixtures() {
    let harness = Harness::new(4);
    harness.deployment.fail_next_logins(3);

    let err = harness
        .runner(builtin_fixtures())
        .run(&RunConfig::new())
        .await
        .unwrap_err();

    match err {
        RunnerError::SmokeGateExhausted(exhausted) => assert_eq!(exhausted.attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    // Only the smoke environment was ever created, and it is gone.
    assert_eq!(harness.deployment.create_calls(), 1);
    assert_eq!(harness.deployment.live_environment_count(), 0);
    assert_eq!(harness.launcher.launches(), 3);
}

#[tokio::test]
async fn test_smoke_recovers_on_third_attempt() {
    let harness = Harness::new(4);
    harness.deployment.fail_next_logins(2);

    let results = harness
        .runner(vec![Scripted::new("after-smoke", vec![("a", true)])])
        .run(&RunConfig::new())
        .await
        .unwrap();

    assert_eq!(results.smoke.as_ref().unwrap().attempts, 3);
    assert!(results.all_passed());
}

#[tokio::test]
async fn test_failed_test_gets_fresh_session_and_pass_reuses_it() {
    let harness = Harness::new(2);
    let fixture = Scripted::new(
        "recovery",
        vec![("first", true), ("second", true), ("breaks", false), ("after", true)],
    );

    let results = harness
        .runner(vec![fixture])
        .run(&RunConfig::new().skip_smoke(true))
        .await
        .unwrap();

    let tests: Vec<_> = results.tests().collect();
    assert_eq!(tests[2].outcome, TestOutcome::Fail);
    assert_eq!(tests[0].session_id, tests[1].session_id);
    assert_eq!(tests[1].session_id, tests[2].session_id);
    assert_ne!(tests[2].session_id, tests[3].session_id);
    // One quit after the failure, one at fixture end.
    assert_eq!(harness.launcher.launches(), 2);
    assert_eq!(harness.launcher.quits(), 2);
}

#[tokio::test]
async fn test_provisions_beyond_capacity_wait() {
    let deployment = FakeDeployment::new().with_creation_delay(Duration::from_millis(50));
    let harness = Harness::with_deployment(deployment, 2);
    let fixtures = (0..3)
        .map(|i| Scripted::new(format!("cap-{i}"), vec![("a", true)]))
        .collect();

    let results = harness
        .runner(fixtures)
        .run(&RunConfig::new().skip_smoke(true))
        .await
        .unwrap();

    assert!(results.all_passed());
    assert_eq!(harness.deployment.create_calls(), 3);
    assert_eq!(harness.deployment.max_concurrent_creations(), 2);
}

#[tokio::test]
async fn test_failure_artifacts_are_archived_with_report() {
    let temp = TempDir::new().unwrap();
    let harness = Harness::new(2);
    let diagnostics = DiagnosticsDir::create(&temp.path().join("diagnostics")).unwrap();
    let mut config = RunConfig::new().skip_smoke(true);
    config.reports_dir = Some(temp.path().join("reports"));

    let results = harness
        .runner(vec![Scripted::new("broken", vec![("breaks", false)])])
        .with_diagnostics(diagnostics)
        .run(&config)
        .await
        .unwrap();

    let failure = results.failures()[0];
    let artifact = failure.artifact.as_ref().unwrap();
    assert_eq!(artifact.extension().unwrap(), "png");

    let archive = results.archived_to.clone().unwrap();
    assert!(archive.starts_with(temp.path().join("reports")));
    assert!(archive.join(artifact.file_name().unwrap()).exists());

    let report = ReportWriter::new(temp.path().join("reports"))
        .write_json(&results)
        .unwrap();
    assert_eq!(report, archive.join("report.json"));
}

#[tokio::test]
async fn test_provisioning_failure_only_affects_its_fixture() {
    let harness = Harness::new(1);
    harness.deployment.reject_role("user-2");

    let results = harness
        .runner(vec![
            Scripted::new("needs-user-2", vec![("a", true)]),
            builtin_fixtures().remove(0),
        ])
        .run(&RunConfig::new().skip_smoke(true))
        .await
        .unwrap();

    let broken = results.fixture("needs-user-2").unwrap();
    assert!(broken.setup_error.is_some());
    assert!(broken.tests.is_empty());
    assert!(results.fixture("login").unwrap().passed());
    assert_eq!(harness.deployment.live_environment_count(), 0);
}

#[tokio::test]
async fn test_panicking_test_fails_alone_and_fixture_is_torn_down() {
    let harness = Harness::new(2);

    let results = harness
        .runner(vec![Arc::new(PanickingFixture)])
        .run(&RunConfig::new().skip_smoke(true))
        .await
        .unwrap();

    let fixture = results.fixture("panicking").unwrap();
    assert!(fixture.setup_error.is_none());
    assert_eq!(fixture.tests.len(), 2);

    let panicked = &fixture.tests[0];
    assert_eq!(panicked.outcome, TestOutcome::Fail);
    assert!(panicked.failure.as_deref().unwrap().starts_with("test panicked"));
    let after = &fixture.tests[1];
    assert!(after.passed());
    assert_ne!(after.session_id, panicked.session_id);

    // The failed session was destroyed, the second one quit at fixture end.
    assert_eq!(harness.launcher.launches(), 2);
    assert_eq!(harness.launcher.quits(), 2);
    assert_eq!(harness.deployment.live_environment_count(), 0);
}
