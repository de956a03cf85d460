//! Browser session lifecycle for one fixture.
//!
//! A [`SessionManager`] owns at most one live [`Session`] at a time and
//! decides, after every test, whether that session survives:
//!
//! ```text
//!              create               authenticate(ok)
//! NotStarted ─────────▶ AtLogin ─────────────────────▶ AtHome ──┐ navigate
//!                        ▲  │ authenticate(fail)          │  ▲   │
//!                        │  └──────────┘                  │  └───┘
//!                        └──────────── logout ────────────┘
//!
//! any state ── failure | ensure_quit ──▶ Destroyed
//! ```
//!
//! A passing test keeps the session and resets it to the landing view; a
//! failing test destroys it so the next test starts clean. Transport faults
//! are never retried here.

use crate::browser::{BrowserDriver, BrowserLauncher};
use crate::environment::{Environment, UserCredential};
use crate::error::{SessionError, SessionTransportError, TransportResult};
use crate::pages::{self, AuthenticationOutcome, HomePage, LoginPage, SiteMap, selectors};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

static SESSION_SEQ: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(SESSION_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s-{}", self.0)
    }
}

/// Navigation state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    /// Browser is up but has not loaded any page yet.
    Launched,
    AtLogin,
    AtHome,
    Destroyed,
}

/// Pass/fail signal for one test, consumed to decide session recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    Fail,
}

impl TestOutcome {
    pub fn from_passed(passed: bool) -> Self {
        if passed { TestOutcome::Pass } else { TestOutcome::Fail }
    }

    pub fn is_pass(self) -> bool {
        self == TestOutcome::Pass
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestOutcome::Pass => write!(f, "pass"),
            TestOutcome::Fail => write!(f, "fail"),
        }
    }
}

/// Counters for asserting recovery behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub sessions_created: u32,
    pub quits: u32,
}

/// A live browser bound to one environment.
pub struct Session {
    id: SessionId,
    driver: Box<dyn BrowserDriver>,
    state: SessionState,
    credential: Option<UserCredential>,
    environment: Arc<Environment>,
    site: SiteMap,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn credential(&self) -> Option<&UserCredential> {
        self.credential.as_ref()
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub(crate) fn site(&self) -> &SiteMap {
        &self.site
    }

    pub(crate) fn home_url(&self) -> String {
        self.site.home_url(self.environment.name())
    }

    pub(crate) fn driver(&mut self) -> &mut dyn BrowserDriver {
        self.driver.as_mut()
    }

    pub(crate) fn mark_authenticated(&mut self, credential: UserCredential) {
        self.state = SessionState::AtHome;
        self.credential = Some(credential);
    }

    pub(crate) fn mark_logged_out(&mut self) {
        self.state = SessionState::AtLogin;
        self.credential = None;
    }

    async fn go_to_login(&mut self) -> TransportResult<()> {
        let url = self.site.login_url(self.environment.name());
        self.driver.navigate(&url).await?;
        self.state = SessionState::AtLogin;
        Ok(())
    }

    async fn go_home(&mut self) -> TransportResult<()> {
        let url = self.home_url();
        self.driver.navigate(&url).await
    }
}

/// Brokers the single session of one fixture.
pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    environment: Arc<Environment>,
    site: SiteMap,
    default_credential: Option<UserCredential>,
    session: Option<Session>,
    destroyed: bool,
    stats: SessionStats,
}

impl SessionManager {
    /// Creates a manager for `environment`. No browser is started yet.
    ///
    /// The default credential is the environment's `user` role (or its
    /// first role).
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        environment: Arc<Environment>,
        site: SiteMap,
    ) -> Self {
        let default_credential = environment.default_credential().cloned();
        Self {
            launcher,
            environment,
            site,
            default_credential,
            session: None,
            destroyed: false,
            stats: SessionStats::default(),
        }
    }

    /// Overrides the credential used when a test does not name one.
    pub fn with_default_credential(mut self, credential: UserCredential) -> Self {
        self.default_credential = Some(credential);
        self
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn default_credential(&self) -> Option<&UserCredential> {
        self.default_credential.as_ref()
    }

    /// Identity of the live session, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(Session::id)
    }

    pub fn state(&self) -> SessionState {
        match &self.session {
            Some(session) => session.state,
            None if self.destroyed => SessionState::Destroyed,
            None => SessionState::NotStarted,
        }
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Navigates to the login screen, creating a session if needed.
    ///
    /// An authenticated session is logged out first so the handle always
    /// starts unauthenticated.
    pub async fn start_at_login_page(&mut self) -> TransportResult<LoginPage<'_>> {
        let session = self.ensure_session().await?;
        if session.state == SessionState::AtHome {
            session.driver.click(selectors::LOGOUT).await?;
            session.mark_logged_out();
        }
        session.go_to_login().await?;
        Ok(LoginPage::new(session))
    }

    /// Ensures an authenticated session at the landing view.
    ///
    /// Reuses a session already authenticated as `credential` (or the
    /// default credential). A session bound to a different credential is
    /// replaced rather than re-bound.
    pub async fn start_at_home_page(
        &mut self,
        credential: Option<&UserCredential>,
    ) -> Result<HomePage<'_>, SessionError> {
        let credential = self.resolve_credential(credential)?;

        let bound_elsewhere = self.session.as_ref().is_some_and(|s| {
            s.credential
                .as_ref()
                .is_some_and(|bound| bound.username != credential.username)
        });
        if bound_elsewhere {
            debug!(username = %credential.username, "Session bound to another user, replacing");
            self.ensure_quit().await;
        }

        let reusable = self.session.as_ref().is_some_and(|s| {
            s.state == SessionState::AtHome
                && s.credential.as_ref() == Some(&credential)
        });

        if reusable {
            let session = self.live_session()?;
            session.go_home().await?;
            return Ok(HomePage::new(session));
        }

        self.ensure_session().await?;
        self.implicit_login(&credential).await
    }

    /// Discards any existing session and logs in from a brand-new browser.
    pub async fn fresh_login_and_start(
        &mut self,
        credential: &UserCredential,
    ) -> Result<HomePage<'_>, SessionError> {
        self.ensure_quit().await;
        self.ensure_session().await?;
        self.implicit_login(credential).await
    }

    /// Applies post-test recovery and returns the outcome as recorded.
    ///
    /// `Pass` keeps the session and resets it to the landing view (or the
    /// login screen if the test ended logged out). `Fail` destroys it.
    pub async fn finalize_based_on_outcome(&mut self, outcome: TestOutcome) -> TestOutcome {
        match outcome {
            TestOutcome::Fail => {
                if let Some(id) = self.session_id() {
                    info!(session_id = %id, "Test failed, destroying session");
                }
                self.ensure_quit().await;
            }
            TestOutcome::Pass => {
                let reset = match self.session.as_mut() {
                    Some(session) if session.state == SessionState::AtHome => {
                        session.go_home().await
                    }
                    Some(session) if session.state == SessionState::AtLogin => {
                        session.go_to_login().await
                    }
                    _ => Ok(()),
                };
                if let Err(err) = reset {
                    warn!(error = %err, "Could not reset navigation after passing test, destroying session");
                    self.ensure_quit().await;
                }
            }
        }
        outcome
    }

    /// Like [`finalize_based_on_outcome`](Self::finalize_based_on_outcome),
    /// but a test that passed while still sitting on the login screen is
    /// treated as failed. Catches silent authentication regressions.
    pub async fn finalize_expecting_navigation(&mut self, outcome: TestOutcome) -> TestOutcome {
        let effective = if outcome.is_pass() && self.still_at_login().await {
            warn!("Test passed but never left the login screen, treating as failure");
            TestOutcome::Fail
        } else {
            outcome
        };
        self.finalize_based_on_outcome(effective).await
    }

    /// Quits the live session, if any. Safe to call repeatedly.
    pub async fn ensure_quit(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.state = SessionState::Destroyed;
        if let Err(err) = session.driver.quit().await {
            warn!(session_id = %session.id, error = %err, "Browser quit failed");
        }
        self.stats.quits += 1;
        self.destroyed = true;
        debug!(session_id = %session.id, "Session destroyed");
    }

    /// Captures a screenshot of the live session, if there is one.
    pub async fn capture_screenshot(&mut self) -> Option<Vec<u8>> {
        let session = self.session.as_mut()?;
        match session.driver.screenshot().await {
            Ok(png) => Some(png),
            Err(err) => {
                debug!(error = %err, "Screenshot failed");
                None
            }
        }
    }

    async fn still_at_login(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.state == SessionState::AtLogin {
            return true;
        }
        // The page may have bounced back to login without us noticing.
        session
            .driver
            .is_present(selectors::LOGIN_FORM)
            .await
            .unwrap_or(true)
    }

    fn resolve_credential(
        &self,
        credential: Option<&UserCredential>,
    ) -> Result<UserCredential, SessionError> {
        credential
            .or(self.default_credential.as_ref())
            .cloned()
            .ok_or_else(|| SessionError::MissingCredential(self.environment.name().to_string()))
    }

    fn live_session(&mut self) -> TransportResult<&mut Session> {
        self.session
            .as_mut()
            .ok_or(SessionTransportError::SessionDestroyed)
    }

    async fn ensure_session(&mut self) -> TransportResult<&mut Session> {
        if self.session.is_none() {
            let driver = self.launcher.launch().await?;
            let session = Session {
                id: SessionId::next(),
                driver,
                state: SessionState::Launched,
                credential: None,
                environment: Arc::clone(&self.environment),
                site: self.site.clone(),
            };
            debug!(session_id = %session.id, environment = %self.environment.name(), "Session created");
            self.stats.sessions_created += 1;
            self.destroyed = false;
            self.session = Some(session);
        }
        self.live_session()
    }

    async fn implicit_login(
        &mut self,
        credential: &UserCredential,
    ) -> Result<HomePage<'_>, SessionError> {
        let session = self.live_session()?;
        if session.state == SessionState::AtHome {
            session.driver.click(selectors::LOGOUT).await?;
            session.mark_logged_out();
        }
        session.go_to_login().await?;

        match pages::submit_login(session, credential).await? {
            AuthenticationOutcome::Authenticated => Ok(HomePage::new(session)),
            AuthenticationOutcome::Rejected { message } => Err(SessionError::LoginRejected {
                username: credential.username.clone(),
                message,
            }),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            warn!(
                session_id = %session.id,
                "SessionManager dropped with a live session; call ensure_quit() first"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::environment::{DatasetTemplate, RoleSpec};
    use crate::pages::PersonalView;
    use crate::testing::{FakeDeployment, FakeLauncher};

    struct Harness {
        deployment: FakeDeployment,
        launcher: FakeLauncher,
        env: Arc<Environment>,
    }

    async fn harness() -> Harness {
        let deployment = FakeDeployment::new();
        let env = deployment
            .provision_direct(
                BackendKind::Embedded,
                &DatasetTemplate::default(),
                &[RoleSpec::user(), RoleSpec::admin(), RoleSpec::disabled_login()],
            )
            .await;
        let launcher = FakeLauncher::new(deployment.clone());
        Harness {
            deployment,
            launcher,
            env: Arc::new(env),
        }
    }

    fn manager(h: &Harness) -> SessionManager {
        SessionManager::new(
            Arc::new(h.launcher.clone()),
            Arc::clone(&h.env),
            SiteMap::new(FakeDeployment::BASE_URL),
        )
    }

    #[tokio::test]
    async fn test_session_is_created_lazily() {
        let h = harness().await;
        let mut mgr = manager(&h);
        assert_eq!(mgr.state(), SessionState::NotStarted);
        assert_eq!(h.launcher.launches(), 0);

        mgr.start_at_home_page(None).await.unwrap();
        assert_eq!(mgr.state(), SessionState::AtHome);
        assert_eq!(h.launcher.launches(), 1);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_failed_first_navigation_leaves_session_launched() {
        let h = harness().await;
        let mut mgr = manager(&h);
        h.deployment.set_unreachable(true);

        assert!(mgr.start_at_login_page().await.is_err());
        assert_eq!(mgr.state(), SessionState::Launched);
        assert_eq!(h.launcher.launches(), 1);

        // Once the page loads, the same browser reaches the login screen.
        h.deployment.set_unreachable(false);
        mgr.start_at_login_page().await.unwrap();
        assert_eq!(mgr.state(), SessionState::AtLogin);
        assert_eq!(h.launcher.launches(), 1);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_home_page_reuses_session_for_same_credential() {
        let h = harness().await;
        let mut mgr = manager(&h);

        mgr.start_at_home_page(None).await.unwrap();
        let first = mgr.session_id();
        mgr.start_at_home_page(None).await.unwrap();

        assert_eq!(mgr.session_id(), first);
        assert_eq!(h.launcher.launches(), 1);
        assert_eq!(h.deployment.login_attempts(), 1);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_home_page_replaces_session_bound_to_other_user() {
        let h = harness().await;
        let mut mgr = manager(&h);
        let admin = h.env.credential("admin").unwrap().clone();

        mgr.start_at_home_page(None).await.unwrap();
        let first = mgr.session_id();
        let home = mgr.start_at_home_page(Some(&admin)).await.unwrap();
        assert_eq!(home.credential().unwrap().username, admin.username);

        assert_ne!(mgr.session_id(), first);
        assert_eq!(mgr.stats().quits, 1);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_login_page_exposes_error_text_without_failing() {
        let h = harness().await;
        let mut mgr = manager(&h);
        let wrong = h.env.default_credential().unwrap().with_wrong_password();

        let mut login = mgr.start_at_login_page().await.unwrap();
        let outcome = login.log_in(&wrong).await.unwrap();

        assert!(!outcome.is_authenticated());
        assert_eq!(login.error_message(), Some(FakeDeployment::WRONG_PASSWORD_MESSAGE));
        assert!(login.is_displayed().await.unwrap());
        assert_eq!(mgr.state(), SessionState::AtLogin);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_login_page_then_successful_login_reaches_home() {
        let h = harness().await;
        let mut mgr = manager(&h);
        let cred = h.env.default_credential().unwrap().clone();

        let mut login = mgr.start_at_login_page().await.unwrap();
        assert!(login.log_in(&cred).await.unwrap().is_authenticated());
        let mut home = login.into_home().unwrap();
        assert!(home.is_at_landing().await.unwrap());
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_implicit_login_rejection_is_session_error() {
        let h = harness().await;
        let mut mgr = manager(&h);
        let disabled = h.env.credential("disabled-login").unwrap().clone();

        let err = mgr.start_at_home_page(Some(&disabled)).await.err().unwrap();
        assert!(matches!(err, SessionError::LoginRejected { .. }));
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_pass_keeps_session_and_resets_to_landing() {
        let h = harness().await;
        let mut mgr = manager(&h);

        let mut home = mgr.start_at_home_page(None).await.unwrap();
        home.open_view(PersonalView::Recent).await.unwrap();
        let before = mgr.session_id();

        let outcome = mgr.finalize_based_on_outcome(TestOutcome::Pass).await;
        assert_eq!(outcome, TestOutcome::Pass);
        assert_eq!(mgr.session_id(), before);
        assert_eq!(
            h.launcher.last_url().unwrap(),
            SiteMap::new(FakeDeployment::BASE_URL).home_url(h.env.name())
        );
        assert_eq!(mgr.stats().quits, 0);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_fail_destroys_session_and_next_start_is_fresh() {
        let h = harness().await;
        let mut mgr = manager(&h);

        mgr.start_at_home_page(None).await.unwrap();
        let before = mgr.session_id().unwrap();

        mgr.finalize_based_on_outcome(TestOutcome::Fail).await;
        assert_eq!(mgr.state(), SessionState::Destroyed);
        assert_eq!(mgr.stats().quits, 1);
        assert_eq!(h.launcher.quits(), 1);

        mgr.start_at_home_page(None).await.unwrap();
        assert_ne!(mgr.session_id().unwrap(), before);
        assert_eq!(mgr.stats().sessions_created, 2);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_fail_destroys_session_even_on_crashed_browser() {
        let h = harness().await;
        let mut mgr = manager(&h);
        mgr.start_at_home_page(None).await.unwrap();

        h.launcher.crash_all();
        mgr.finalize_based_on_outcome(TestOutcome::Fail).await;

        assert_eq!(mgr.state(), SessionState::Destroyed);
        assert_eq!(mgr.stats().quits, 1);
    }

    #[tokio::test]
    async fn test_pass_with_broken_browser_destroys_session() {
        let h = harness().await;
        let mut mgr = manager(&h);
        mgr.start_at_home_page(None).await.unwrap();

        h.launcher.crash_all();
        mgr.finalize_based_on_outcome(TestOutcome::Pass).await;

        assert_eq!(mgr.state(), SessionState::Destroyed);
    }

    #[tokio::test]
    async fn test_navigation_variant_fails_test_left_on_login() {
        let h = harness().await;
        let mut mgr = manager(&h);
        mgr.start_at_login_page().await.unwrap();

        let outcome = mgr.finalize_expecting_navigation(TestOutcome::Pass).await;

        assert_eq!(outcome, TestOutcome::Fail);
        assert_eq!(mgr.state(), SessionState::Destroyed);
    }

    #[tokio::test]
    async fn test_navigation_variant_passes_when_home() {
        let h = harness().await;
        let mut mgr = manager(&h);
        mgr.start_at_home_page(None).await.unwrap();

        let outcome = mgr.finalize_expecting_navigation(TestOutcome::Pass).await;

        assert_eq!(outcome, TestOutcome::Pass);
        assert_eq!(mgr.state(), SessionState::AtHome);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_ensure_quit_is_idempotent() {
        let h = harness().await;
        let mut mgr = manager(&h);
        mgr.ensure_quit().await;
        assert_eq!(mgr.state(), SessionState::NotStarted);

        mgr.start_at_home_page(None).await.unwrap();
        mgr.ensure_quit().await;
        mgr.ensure_quit().await;

        assert_eq!(mgr.stats().quits, 1);
        assert_eq!(h.launcher.quits(), 1);
    }

    #[tokio::test]
    async fn test_fresh_login_always_replaces_session() {
        let h = harness().await;
        let mut mgr = manager(&h);
        let cred = h.env.default_credential().unwrap().clone();

        mgr.start_at_home_page(None).await.unwrap();
        let before = mgr.session_id();
        mgr.fresh_login_and_start(&cred).await.unwrap();

        assert_ne!(mgr.session_id(), before);
        assert_eq!(h.launcher.launches(), 2);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_fresh_login_of_new_user_shows_empty_personal_views() {
        let h = harness().await;
        let mut mgr = manager(&h);
        let admin = h.env.credential("admin").unwrap().clone();

        let mut home = mgr.fresh_login_and_start(&admin).await.unwrap();
        for view in PersonalView::all() {
            assert!(home.open_view(*view).await.unwrap().is_empty(), "{view} not empty");
        }
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_logout_returns_to_login_and_unbinds() {
        let h = harness().await;
        let mut mgr = manager(&h);

        let home = mgr.start_at_home_page(None).await.unwrap();
        let mut login = home.log_out().await.unwrap();
        assert!(login.is_displayed().await.unwrap());
        assert_eq!(mgr.state(), SessionState::AtLogin);
        mgr.ensure_quit().await;
    }

    #[tokio::test]
    async fn test_missing_credential_is_reported() {
        let h = harness().await;
        let empty = Arc::new(Environment::new(
            "vh-empty",
            BackendKind::Embedded,
            DatasetTemplate::default(),
            Vec::new(),
        ));
        let mut mgr = SessionManager::new(
            Arc::new(h.launcher.clone()),
            empty,
            SiteMap::new(FakeDeployment::BASE_URL),
        );
        let err = mgr.start_at_home_page(None).await.err().unwrap();
        assert!(matches!(err, SessionError::MissingCredential(_)));
        assert_eq!(h.launcher.launches(), 0);
    }
}
