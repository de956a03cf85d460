//! Fake browser rendering the login screen and vault views of a
//! [`FakeDeployment`].

use super::FakeDeployment;
use crate::browser::{BrowserDriver, BrowserLauncher};
use crate::error::{SessionTransportError, TransportResult};
use crate::pages::{PersonalView, selectors};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fake PNG payload returned by screenshots.
pub const FAKE_SCREENSHOT: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[derive(Debug, Default)]
struct LauncherState {
    launches: usize,
    quits: usize,
    crashed: bool,
    fail_next_launches: usize,
    last_url: Option<String>,
}

/// Launches [`FakeBrowser`]s against a deployment. Clones share counters.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    deployment: FakeDeployment,
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub fn new(deployment: FakeDeployment) -> Self {
        Self {
            deployment,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, LauncherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn launches(&self) -> usize {
        self.state().launches
    }

    /// Quit calls received, including ones on crashed browsers.
    pub fn quits(&self) -> usize {
        self.state().quits
    }

    /// URL most recently shown by any browser from this launcher.
    pub fn last_url(&self) -> Option<String> {
        self.state().last_url.clone()
    }

    /// Every browser, live or future, fails all further commands.
    pub fn crash_all(&self) {
        self.state().crashed = true;
    }

    /// The next `count` launches fail.
    pub fn fail_next_launches(&self, count: usize) {
        self.state().fail_next_launches = count;
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> TransportResult<Box<dyn BrowserDriver>> {
        let mut state = self.state();
        if state.fail_next_launches > 0 {
            state.fail_next_launches -= 1;
            return Err(SessionTransportError::Launch("scripted launch failure".to_string()));
        }
        state.launches += 1;
        Ok(Box::new(FakeBrowser {
            deployment: self.deployment.clone(),
            launcher: Arc::clone(&self.state),
            page: Page::Blank,
            authenticated: None,
            quit: false,
        }))
    }
}

#[derive(Debug, Clone)]
enum Page {
    Blank,
    Login {
        vault: String,
        username: String,
        password: String,
        error: Option<String>,
    },
    Home {
        vault: String,
    },
    View {
        vault: String,
        view: PersonalView,
    },
    Object {
        vault: String,
        id: u64,
        title: String,
    },
    Other {
        vault: String,
        url: String,
    },
}

/// One simulated browser window.
pub struct FakeBrowser {
    deployment: FakeDeployment,
    launcher: Arc<Mutex<LauncherState>>,
    page: Page,
    /// `(vault, username)` of the logged-in user.
    authenticated: Option<(String, String)>,
    quit: bool,
}

impl FakeBrowser {
    fn check_alive(&self) -> TransportResult<()> {
        if self.quit {
            return Err(SessionTransportError::SessionDestroyed);
        }
        let crashed = self
            .launcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .crashed;
        if crashed {
            return Err(SessionTransportError::Crashed("fake browser crashed".to_string()));
        }
        Ok(())
    }

    fn url(&self) -> String {
        let base = FakeDeployment::BASE_URL;
        match &self.page {
            Page::Blank => "about:blank".to_string(),
            Page::Login { vault, .. } => format!("{base}/login?vault={vault}"),
            Page::Home { vault } => format!("{base}/vault/{vault}/home"),
            Page::View { vault, view } => format!("{base}/vault/{vault}/views/{}", view.slug()),
            Page::Object { vault, id, .. } => format!("{base}/vault/{vault}/objects/{id}"),
            Page::Other { url, .. } => url.clone(),
        }
    }

    fn show(&mut self, page: Page) {
        self.page = page;
        let url = self.url();
        self.launcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_url = Some(url);
    }

    fn login_page(vault: &str) -> Page {
        Page::Login {
            vault: vault.to_string(),
            username: String::new(),
            password: String::new(),
            error: None,
        }
    }

    fn user_in(&self, vault: &str) -> Option<String> {
        self.authenticated
            .as_ref()
            .filter(|(v, _)| v == vault)
            .map(|(_, user)| user.clone())
    }

    fn route(&self, url: &str) -> TransportResult<Page> {
        let path = url
            .strip_prefix(FakeDeployment::BASE_URL)
            .ok_or_else(|| SessionTransportError::Protocol(format!("unknown host in {url}")))?;

        if let Some(vault) = path.strip_prefix("/login?vault=") {
            return Ok(Self::login_page(vault));
        }

        let rest = path
            .strip_prefix("/vault/")
            .ok_or_else(|| SessionTransportError::Protocol(format!("no route for {url}")))?;
        let (vault, rest) = rest.split_once('/').unwrap_or((rest, ""));

        // Unauthenticated requests bounce to the login screen.
        let Some(user) = self.user_in(vault) else {
            return Ok(Self::login_page(vault));
        };

        let vault = vault.to_string();
        if rest == "home" {
            return Ok(Page::Home { vault });
        }
        if let Some(view) = rest.strip_prefix("views/").and_then(PersonalView::from_slug) {
            return Ok(Page::View { vault, view });
        }
        if let Some(id) = rest.strip_prefix("objects/").and_then(|id| id.parse().ok()) {
            let title = self
                .deployment
                .visit_object(&vault, &user, id)
                .ok_or_else(|| SessionTransportError::Protocol(format!("no object {id}")))?;
            return Ok(Page::Object { vault, id, title });
        }
        Ok(Page::Other {
            vault,
            url: url.to_string(),
        })
    }

    fn present(&self, selector: &str) -> bool {
        match (&self.page, selector) {
            (
                Page::Login { .. },
                selectors::LOGIN_FORM | selectors::USERNAME | selectors::PASSWORD | selectors::LOGIN_BUTTON,
            ) => true,
            (Page::Login { error, .. }, selectors::LOGIN_ERROR) => error.is_some(),
            (Page::Home { .. }, selectors::HOME_MARKER) => true,
            (
                Page::Home { .. } | Page::View { .. } | Page::Object { .. } | Page::Other { .. },
                selectors::VIEW_TITLE | selectors::LOGOUT,
            ) => true,
            (Page::View { .. }, selectors::LISTING_ITEM) => !self.listing().is_empty(),
            _ => false,
        }
    }

    fn listing(&self) -> Vec<String> {
        match &self.page {
            Page::View { vault, view } => self
                .user_in(vault)
                .map(|user| self.deployment.personal_items(vault, &user, *view))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    fn not_found(selector: &str) -> SessionTransportError {
        SessionTransportError::ElementNotFound {
            selector: selector.to_string(),
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn navigate(&mut self, url: &str) -> TransportResult<()> {
        self.check_alive()?;
        if self.deployment.is_unreachable() {
            return Err(SessionTransportError::Timeout(format!("loading {url}")));
        }
        let page = self.route(url)?;
        self.show(page);
        Ok(())
    }

    async fn current_url(&mut self) -> TransportResult<String> {
        self.check_alive()?;
        Ok(self.url())
    }

    async fn is_present(&mut self, selector: &str) -> TransportResult<bool> {
        self.check_alive()?;
        Ok(self.present(selector))
    }

    async fn read_text(&mut self, selector: &str) -> TransportResult<String> {
        self.check_alive()?;
        match (&self.page, selector) {
            (Page::Login { error: Some(error), .. }, selectors::LOGIN_ERROR) => Ok(error.clone()),
            (Page::Home { .. }, selectors::VIEW_TITLE) => Ok("Home".to_string()),
            (Page::View { view, .. }, selectors::VIEW_TITLE) => Ok(view.to_string()),
            (Page::Object { title, .. }, selectors::VIEW_TITLE) => Ok(title.clone()),
            (Page::View { .. }, selectors::LISTING_ITEM) => self
                .listing()
                .into_iter()
                .next()
                .ok_or_else(|| Self::not_found(selector)),
            _ => Err(Self::not_found(selector)),
        }
    }

    async fn read_all_text(&mut self, selector: &str) -> TransportResult<Vec<String>> {
        self.check_alive()?;
        if selector == selectors::LISTING_ITEM {
            Ok(self.listing())
        } else if self.present(selector) {
            Ok(vec![self.read_text(selector).await?])
        } else {
            Ok(Vec::new())
        }
    }

    async fn click(&mut self, selector: &str) -> TransportResult<()> {
        self.check_alive()?;
        if !self.present(selector) {
            return Err(Self::not_found(selector));
        }

        match (self.page.clone(), selector) {
            (
                Page::Login {
                    vault,
                    username,
                    password,
                    ..
                },
                selectors::LOGIN_BUTTON,
            ) => match self.deployment.authenticate(&vault, &username, &password) {
                Ok(()) => {
                    self.authenticated = Some((vault.clone(), username));
                    self.show(Page::Home { vault });
                }
                Err(message) => {
                    self.show(Page::Login {
                        vault,
                        username,
                        password: String::new(),
                        error: Some(message),
                    });
                }
            },
            (
                Page::Home { vault }
                | Page::View { vault, .. }
                | Page::Object { vault, .. }
                | Page::Other { vault, .. },
                selectors::LOGOUT,
            ) => {
                self.authenticated = None;
                self.show(Self::login_page(&vault));
            }
            _ => {}
        }
        Ok(())
    }

    async fn type_text(&mut self, selector: &str, text: &str) -> TransportResult<()> {
        self.check_alive()?;
        match (&mut self.page, selector) {
            (Page::Login { username, .. }, selectors::USERNAME) => {
                *username = text.to_string();
                Ok(())
            }
            (Page::Login { password, .. }, selectors::PASSWORD) => {
                *password = text.to_string();
                Ok(())
            }
            _ => Err(Self::not_found(selector)),
        }
    }

    async fn screenshot(&mut self) -> TransportResult<Vec<u8>> {
        self.check_alive()?;
        Ok(FAKE_SCREENSHOT.to_vec())
    }

    async fn quit(&mut self) -> TransportResult<()> {
        self.launcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .quits += 1;
        self.check_alive()?;
        self.quit = true;
        Ok(())
    }
}
