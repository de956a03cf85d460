//! Browser automation primitives, consumed opaquely.
//!
//! The session layer never talks to a browser directly; it goes through
//! [`BrowserDriver`], which exposes only the handful of primitives the page
//! handles need. [`BrowserLauncher`] produces a fresh driver per session.
//! The W3C WebDriver implementation lives in [`webdriver`]; in-memory doubles
//! live in [`crate::testing`].

pub mod webdriver;

pub use webdriver::{WebDriverLauncher, WebDriverSession};

use crate::error::TransportResult;
use async_trait::async_trait;

/// One live browser.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Loads `url` and waits for the document to be ready.
    async fn navigate(&mut self, url: &str) -> TransportResult<()>;

    /// Returns the URL currently displayed.
    async fn current_url(&mut self) -> TransportResult<String>;

    /// Returns true if at least one element matches `selector`.
    async fn is_present(&mut self, selector: &str) -> TransportResult<bool>;

    /// Reads the text of the first element matching `selector`.
    ///
    /// Fails with `ElementNotFound` when nothing matches.
    async fn read_text(&mut self, selector: &str) -> TransportResult<String>;

    /// Reads the text of every element matching `selector`, in document order.
    async fn read_all_text(&mut self, selector: &str) -> TransportResult<Vec<String>>;

    async fn click(&mut self, selector: &str) -> TransportResult<()>;

    /// Replaces the value of the input matching `selector` with `text`.
    async fn type_text(&mut self, selector: &str, text: &str) -> TransportResult<()>;

    /// Captures the viewport as PNG bytes.
    async fn screenshot(&mut self) -> TransportResult<Vec<u8>>;

    /// Closes the browser. Called at most once per driver.
    async fn quit(&mut self) -> TransportResult<()>;
}

/// Starts browsers.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> TransportResult<Box<dyn BrowserDriver>>;
}
