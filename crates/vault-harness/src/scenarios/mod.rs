//! Built-in fixtures.
//!
//! These cover the login screen and personal views end to end. Deployment
//! specific suites register their own [`Fixture`] implementations alongside
//! them.

mod login;
mod personal_views;

pub use login::{
    ACCOUNT_DISABLED_MESSAGE, LOGIN_DISABLED_MESSAGE, LoginFixture, NO_LICENSE_MESSAGE,
    WRONG_PASSWORD_MESSAGE,
};
pub use personal_views::PersonalViewsFixture;

use crate::fixture::Fixture;
use std::sync::Arc;

/// Every built-in fixture, in registration order.
pub fn builtin_fixtures() -> Vec<Arc<dyn Fixture>> {
    vec![
        Arc::new(LoginFixture::new()),
        Arc::new(PersonalViewsFixture::new()),
    ]
}
