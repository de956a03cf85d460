//! In-memory deployment and browser fakes.
//!
//! Used by this crate's tests and by downstream integration tests to
//! exercise provisioning and session recovery without a live deployment
//! or WebDriver endpoint.

mod browser;
mod deployment;

pub use browser::{FAKE_SCREENSHOT, FakeBrowser, FakeLauncher};
pub use deployment::FakeDeployment;
