//! Entry-point page handles returned by the session manager.
//!
//! These are deliberately thin: they cover the login screen and the landing
//! view only. Scenario-specific page objects are built on top of
//! [`HomePage::driver`].

use crate::browser::BrowserDriver;
use crate::environment::UserCredential;
use crate::error::{SessionTransportError, TransportResult};
use crate::session::{Session, SessionState};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// CSS selectors of the entry screens.
pub mod selectors {
    pub const LOGIN_FORM: &str = "form#login";
    pub const USERNAME: &str = "#username";
    pub const PASSWORD: &str = "#password";
    pub const LOGIN_BUTTON: &str = "#login-button";
    pub const LOGIN_ERROR: &str = ".login-error";
    pub const HOME_MARKER: &str = "[data-view='home']";
    pub const VIEW_TITLE: &str = ".view-title";
    pub const LISTING_ITEM: &str = ".listing .item-title";
    pub const LOGOUT: &str = "#logout";
}

/// URL layout of the web application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteMap {
    base_url: String,
}

impl SiteMap {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn login_url(&self, environment: &str) -> String {
        format!("{}/login?vault={}", self.base_url, environment)
    }

    /// The landing view every passing test is reset to.
    pub fn home_url(&self, environment: &str) -> String {
        format!("{}/vault/{}/home", self.base_url, environment)
    }

    pub fn view_url(&self, environment: &str, view: PersonalView) -> String {
        format!("{}/vault/{}/views/{}", self.base_url, environment, view.slug())
    }

    pub fn object_url(&self, environment: &str, object_id: u64) -> String {
        format!("{}/vault/{}/objects/{}", self.base_url, environment, object_id)
    }
}

/// Per-user views that start empty for a never-used account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PersonalView {
    Recent,
    AssignedToMe,
    CheckedOutToMe,
}

impl PersonalView {
    pub fn all() -> &'static [PersonalView] {
        &[
            PersonalView::Recent,
            PersonalView::AssignedToMe,
            PersonalView::CheckedOutToMe,
        ]
    }

    pub fn slug(&self) -> &'static str {
        match self {
            PersonalView::Recent => "recent",
            PersonalView::AssignedToMe => "assigned",
            PersonalView::CheckedOutToMe => "checked-out",
        }
    }

    /// Parses the last path segment of a view URL.
    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::all().iter().copied().find(|view| view.slug() == slug)
    }
}

impl fmt::Display for PersonalView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonalView::Recent => write!(f, "Recently Accessed by Me"),
            PersonalView::AssignedToMe => write!(f, "Assigned to Me"),
            PersonalView::CheckedOutToMe => write!(f, "Checked Out to Me"),
        }
    }
}

/// Result of submitting the login form. Not an error either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    Authenticated,
    /// The page stayed on the login screen and showed `message`.
    Rejected { message: String },
}

impl AuthenticationOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthenticationOutcome::Authenticated)
    }
}

/// The unauthenticated entry screen.
pub struct LoginPage<'a> {
    session: &'a mut Session,
    last_error: Option<String>,
}

impl<'a> LoginPage<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self {
            session,
            last_error: None,
        }
    }

    /// Fills and submits the login form.
    ///
    /// On success the session moves to the home view and binds to
    /// `credential`. On rejection it stays here and the literal error text is
    /// kept for [`error_message`](Self::error_message).
    pub async fn log_in(
        &mut self,
        credential: &UserCredential,
    ) -> TransportResult<AuthenticationOutcome> {
        let outcome = submit_login(self.session, credential).await?;
        self.last_error = match &outcome {
            AuthenticationOutcome::Authenticated => None,
            AuthenticationOutcome::Rejected { message } => Some(message.clone()),
        };
        Ok(outcome)
    }

    /// Error text shown by the most recent rejected attempt.
    pub fn error_message(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True while the login form is displayed.
    pub async fn is_displayed(&mut self) -> TransportResult<bool> {
        self.session.driver().is_present(selectors::LOGIN_FORM).await
    }

    /// Continues as a home handle after a successful [`log_in`](Self::log_in).
    pub fn into_home(self) -> Option<HomePage<'a>> {
        if self.session.state() == SessionState::AtHome {
            Some(HomePage::new(self.session))
        } else {
            None
        }
    }

    pub fn driver(&mut self) -> &mut dyn BrowserDriver {
        self.session.driver()
    }
}

/// The authenticated landing view.
pub struct HomePage<'a> {
    session: &'a mut Session,
}

impl<'a> HomePage<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    /// The credential this session is authenticated as.
    pub fn credential(&self) -> Option<&UserCredential> {
        self.session.credential()
    }

    pub fn environment_name(&self) -> &str {
        self.session.environment().name()
    }

    /// Title of the view currently displayed.
    pub async fn current_view(&mut self) -> TransportResult<String> {
        self.session.driver().read_text(selectors::VIEW_TITLE).await
    }

    /// True when the browser shows the landing view.
    pub async fn is_at_landing(&mut self) -> TransportResult<bool> {
        let expected = self.session.home_url();
        Ok(self.session.driver().current_url().await? == expected)
    }

    /// Opens a personal view and returns the titles listed in it.
    pub async fn open_view(&mut self, view: PersonalView) -> TransportResult<Vec<String>> {
        let url = self.session.site().view_url(self.session.environment().name(), view);
        self.session.driver().navigate(&url).await?;
        self.session.driver().read_all_text(selectors::LISTING_ITEM).await
    }

    /// Opens an object's metadata card.
    pub async fn open_object(&mut self, object_id: u64) -> TransportResult<()> {
        let url = self
            .session
            .site()
            .object_url(self.session.environment().name(), object_id);
        self.session.driver().navigate(&url).await
    }

    /// Logs out, keeping the browser. The session becomes unbound.
    pub async fn log_out(self) -> TransportResult<LoginPage<'a>> {
        self.session.driver().click(selectors::LOGOUT).await?;
        self.session.mark_logged_out();
        Ok(LoginPage::new(self.session))
    }

    pub fn driver(&mut self) -> &mut dyn BrowserDriver {
        self.session.driver()
    }
}

/// Shared login flow for the explicit page handle and implicit logins.
pub(crate) async fn submit_login(
    session: &mut Session,
    credential: &UserCredential,
) -> TransportResult<AuthenticationOutcome> {
    if session.state() == SessionState::Destroyed {
        return Err(SessionTransportError::SessionDestroyed);
    }

    let driver = session.driver();
    driver.type_text(selectors::USERNAME, &credential.username).await?;
    driver.type_text(selectors::PASSWORD, &credential.password).await?;
    driver.click(selectors::LOGIN_BUTTON).await?;

    if driver.is_present(selectors::LOGIN_ERROR).await? {
        let message = driver.read_text(selectors::LOGIN_ERROR).await?;
        debug!(session_id = %session.id(), username = %credential.username, "Login rejected");
        return Ok(AuthenticationOutcome::Rejected { message });
    }

    if driver.is_present(selectors::HOME_MARKER).await? {
        session.mark_authenticated(credential.clone());
        debug!(session_id = %session.id(), username = %credential.username, "Logged in");
        return Ok(AuthenticationOutcome::Authenticated);
    }

    Err(SessionTransportError::Protocol(
        "login submitted but neither the home view nor an error appeared".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_map_urls() {
        let site = SiteMap::new("https://vault.example.test/");
        assert_eq!(site.login_url("vh-1"), "https://vault.example.test/login?vault=vh-1");
        assert_eq!(site.home_url("vh-1"), "https://vault.example.test/vault/vh-1/home");
        assert_eq!(
            site.view_url("vh-1", PersonalView::CheckedOutToMe),
            "https://vault.example.test/vault/vh-1/views/checked-out"
        );
    }

    #[test]
    fn test_personal_view_slug_round_trip() {
        for view in PersonalView::all() {
            assert_eq!(PersonalView::from_slug(view.slug()), Some(*view));
        }
        assert_eq!(PersonalView::from_slug("favorites"), None);
    }
}
