//! Login screen: rejection messages, admin access, logout.

use crate::fixture::{Fixture, FixtureContext, FixtureTest, TestFailure, ensure, ensure_eq};
use async_trait::async_trait;
use vault_harness_core::{AuthenticationOutcome, RoleSpec};

/// Messages the login screen shows, overridable per deployment through
/// fixture parameters of the same name.
pub const WRONG_PASSWORD_MESSAGE: &str = "Incorrect username or password.";
pub const LOGIN_DISABLED_MESSAGE: &str = "Login to this account has been disabled.";
pub const ACCOUNT_DISABLED_MESSAGE: &str = "Your user account is disabled.";
pub const NO_LICENSE_MESSAGE: &str = "No license is assigned to your user account.";

/// Accounts in every login state, each checked through the login form.
#[derive(Debug, Default)]
pub struct LoginFixture;

impl LoginFixture {
    pub fn new() -> Self {
        Self
    }
}

impl Fixture for LoginFixture {
    fn id(&self) -> &str {
        "login"
    }

    fn description(&self) -> &str {
        "Login screen accepts valid users and explains every rejection"
    }

    fn role_specs(&self) -> Vec<RoleSpec> {
        vec![
            RoleSpec::user(),
            RoleSpec::admin(),
            RoleSpec::disabled_login(),
            RoleSpec::disabled_account(),
            RoleSpec::no_license(),
        ]
    }

    fn tests(&self) -> Vec<Box<dyn FixtureTest>> {
        vec![
            Box::new(WrongPasswordTest),
            Box::new(RejectedLoginTest {
                name: "disabled_login_is_rejected",
                role: "disabled-login",
                parameter: "login_disabled_message",
                default_message: LOGIN_DISABLED_MESSAGE,
            }),
            Box::new(RejectedLoginTest {
                name: "disabled_account_is_rejected",
                role: "disabled-account",
                parameter: "account_disabled_message",
                default_message: ACCOUNT_DISABLED_MESSAGE,
            }),
            Box::new(RejectedLoginTest {
                name: "no_license_is_rejected",
                role: "no-license",
                parameter: "no_license_message",
                default_message: NO_LICENSE_MESSAGE,
            }),
            Box::new(AdminLogsInTest),
            Box::new(LogOutTest),
        ]
    }
}

fn expected_message(ctx: &FixtureContext, parameter: &str, default: &str) -> String {
    ctx.parameters
        .get(parameter)
        .unwrap_or_else(|| default.to_string())
}

fn rejection_message(outcome: AuthenticationOutcome) -> Result<String, TestFailure> {
    match outcome {
        AuthenticationOutcome::Rejected { message } => Ok(message),
        AuthenticationOutcome::Authenticated => Err(TestFailure::assertion(
            "login rejected",
            "a login error",
            "authenticated",
        )),
    }
}

struct WrongPasswordTest;

#[async_trait]
impl FixtureTest for WrongPasswordTest {
    fn name(&self) -> &str {
        "wrong_password_shows_error"
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let credential = ctx.credential("user")?.with_wrong_password();
        let expected = expected_message(ctx, "wrong_password_message", WRONG_PASSWORD_MESSAGE);

        let mut page = ctx.session.start_at_login_page().await?;
        let message = rejection_message(page.log_in(&credential).await?)?;

        ensure_eq("error text", expected.as_str(), message.as_str())?;
        ensure_eq("error_message()", Some(message.as_str()), page.error_message())?;
        ensure(page.is_displayed().await?, "still at login", "login form", "no login form")
    }
}

/// A provisioned account in a state that must not authenticate.
struct RejectedLoginTest {
    name: &'static str,
    role: &'static str,
    parameter: &'static str,
    default_message: &'static str,
}

#[async_trait]
impl FixtureTest for RejectedLoginTest {
    fn name(&self) -> &str {
        self.name
    }

    fn order(&self) -> i32 {
        1
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let credential = ctx.credential(self.role)?;
        let expected = expected_message(ctx, self.parameter, self.default_message);

        let mut page = ctx.session.start_at_login_page().await?;
        let message = rejection_message(page.log_in(&credential).await?)?;

        ensure_eq("error text", expected.as_str(), message.as_str())
    }
}

struct AdminLogsInTest;

#[async_trait]
impl FixtureTest for AdminLogsInTest {
    fn name(&self) -> &str {
        "admin_logs_in"
    }

    fn order(&self) -> i32 {
        2
    }

    fn expects_navigation_away(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let credential = ctx.credential("admin")?;

        let mut page = ctx.session.start_at_login_page().await?;
        let outcome = page.log_in(&credential).await?;
        ensure(
            outcome.is_authenticated(),
            "admin authenticated",
            "home view",
            format!("{outcome:?}"),
        )?;

        let mut home = page.into_home().ok_or_else(|| {
            TestFailure::assertion("home handle", "authenticated session", "still at login")
        })?;
        ensure_eq("view title", "Home".to_string(), home.current_view().await?)
    }
}

struct LogOutTest;

#[async_trait]
impl FixtureTest for LogOutTest {
    fn name(&self) -> &str {
        "user_logs_out"
    }

    fn order(&self) -> i32 {
        3
    }

    async fn run(&self, ctx: &mut FixtureContext) -> Result<(), TestFailure> {
        let home = ctx.session.start_at_home_page(None).await?;
        let mut page = home.log_out().await?;
        ensure(page.is_displayed().await?, "logged out", "login form", "no login form")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_harness_core::testing::FakeDeployment;

    #[test]
    fn test_messages_match_fake_deployment() {
        assert_eq!(WRONG_PASSWORD_MESSAGE, FakeDeployment::WRONG_PASSWORD_MESSAGE);
        assert_eq!(LOGIN_DISABLED_MESSAGE, FakeDeployment::LOGIN_DISABLED_MESSAGE);
        assert_eq!(ACCOUNT_DISABLED_MESSAGE, FakeDeployment::ACCOUNT_DISABLED_MESSAGE);
        assert_eq!(NO_LICENSE_MESSAGE, FakeDeployment::NO_LICENSE_MESSAGE);
    }

    #[test]
    fn test_every_test_role_is_provisioned() {
        let fixture = LoginFixture::new();
        let roles: Vec<String> = fixture.role_specs().into_iter().map(|r| r.role).collect();
        for role in ["user", "admin", "disabled-login", "disabled-account", "no-license"] {
            assert!(roles.iter().any(|r| r == role), "missing role {role}");
        }
        assert_eq!(fixture.tests().len(), 6);
    }
}
