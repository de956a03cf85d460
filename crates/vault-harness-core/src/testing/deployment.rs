//! In-memory stand-in for the deployment: provisioning API plus the
//! authentication and per-user state the fake browser reads.

use crate::backend::BackendKind;
use crate::environment::{DatasetTemplate, Environment, RoleAttributes, RoleSpec, UserCredential};
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::pages::PersonalView;
use crate::provisioner::{PromotedObject, ProvisioningBackend};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct FakeUser {
    password: String,
    attributes: RoleAttributes,
}

#[derive(Debug, Default)]
struct FakeVault {
    users: HashMap<String, FakeUser>,
    connectors: HashSet<String>,
    objects: HashMap<u64, String>,
    personal: HashMap<(String, PersonalView), Vec<String>>,
}

#[derive(Debug, Default)]
struct DeploymentState {
    vaults: HashMap<String, FakeVault>,
    create_calls: usize,
    destroy_calls: usize,
    connector_calls: usize,
    in_flight_creations: usize,
    max_concurrent_creations: usize,
    fail_next_creations: usize,
    rejected_roles: HashSet<String>,
    fail_destroys: bool,
    cleared: Vec<String>,
    login_attempts: usize,
    fail_next_logins: usize,
    unreachable: bool,
    user_seq: u64,
    object_seq: u64,
    env_seq: u64,
}

/// Scriptable fake deployment. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeDeployment {
    state: Arc<Mutex<DeploymentState>>,
    creation_delay: Duration,
}

impl FakeDeployment {
    pub const BASE_URL: &'static str = "http://vault.fake";
    pub const WRONG_PASSWORD_MESSAGE: &'static str = "Incorrect username or password.";
    pub const LOGIN_DISABLED_MESSAGE: &'static str = "Login to this account has been disabled.";
    pub const ACCOUNT_DISABLED_MESSAGE: &'static str = "Your user account is disabled.";
    pub const NO_LICENSE_MESSAGE: &'static str = "No license is assigned to your user account.";
    pub const UNAVAILABLE_MESSAGE: &'static str = "The vault is temporarily unavailable.";

    pub fn new() -> Self {
        Self::default()
    }

    /// Holds every creation open for `delay`, so overlap can be observed.
    pub fn with_creation_delay(mut self, delay: Duration) -> Self {
        self.creation_delay = delay;
        self
    }

    fn state(&self) -> MutexGuard<'_, DeploymentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- scripting -------------------------------------------------------

    /// The next `count` environment creations fail as unavailable.
    pub fn fail_next_creations(&self, count: usize) {
        self.state().fail_next_creations = count;
    }

    /// Seeding a user for `role` is rejected.
    pub fn reject_role(&self, role: &str) {
        self.state().rejected_roles.insert(role.to_string());
    }

    /// Destroy and clear calls fail while set.
    pub fn fail_destroys(&self, fail: bool) {
        self.state().fail_destroys = fail;
    }

    /// The next `count` login attempts are refused as if the server were down.
    pub fn fail_next_logins(&self, count: usize) {
        self.state().fail_next_logins = count;
    }

    /// Page loads time out while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    // --- observation -----------------------------------------------------

    pub fn environment_exists(&self, name: &str) -> bool {
        self.state().vaults.contains_key(name)
    }

    pub fn live_environment_count(&self) -> usize {
        self.state().vaults.len()
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn destroy_calls(&self) -> usize {
        self.state().destroy_calls
    }

    pub fn connector_calls(&self) -> usize {
        self.state().connector_calls
    }

    /// Highest number of creations observed in flight at once.
    pub fn max_concurrent_creations(&self) -> usize {
        self.state().max_concurrent_creations
    }

    pub fn cleared_repositories(&self) -> Vec<String> {
        self.state().cleared.clone()
    }

    pub fn login_attempts(&self) -> usize {
        self.state().login_attempts
    }

    /// Creates an environment without going through a provisioner.
    pub async fn provision_direct(
        &self,
        kind: BackendKind,
        template: &DatasetTemplate,
        roles: &[RoleSpec],
    ) -> Environment {
        let name = {
            let mut state = self.state();
            state.env_seq += 1;
            format!("fake-{}", state.env_seq)
        };
        self.create_environment(&name, kind, template)
            .await
            .unwrap_or_else(|e| panic!("fake environment creation failed: {e}"));

        let mut credentials = Vec::new();
        for spec in roles {
            let credential = self
                .create_user(&name, spec)
                .await
                .unwrap_or_else(|e| panic!("fake user creation failed: {e}"));
            credentials.push(credential);
        }
        Environment::new(name, kind, template.clone(), credentials)
    }

    // --- used by the fake browser ----------------------------------------

    pub(crate) fn is_unreachable(&self) -> bool {
        self.state().unreachable
    }

    /// Checks a login; returns the message the login page would show on refusal.
    pub(crate) fn authenticate(
        &self,
        vault: &str,
        username: &str,
        password: &str,
    ) -> Result<(), String> {
        let mut state = self.state();
        state.login_attempts += 1;
        if state.fail_next_logins > 0 {
            state.fail_next_logins -= 1;
            return Err(Self::UNAVAILABLE_MESSAGE.to_string());
        }

        let user = state
            .vaults
            .get(vault)
            .and_then(|v| v.users.get(username))
            .filter(|u| u.password == password)
            .ok_or_else(|| Self::WRONG_PASSWORD_MESSAGE.to_string())?;

        if !user.attributes.account_enabled {
            Err(Self::ACCOUNT_DISABLED_MESSAGE.to_string())
        } else if !user.attributes.login_enabled {
            Err(Self::LOGIN_DISABLED_MESSAGE.to_string())
        } else if !user.attributes.license_present {
            Err(Self::NO_LICENSE_MESSAGE.to_string())
        } else {
            Ok(())
        }
    }

    pub(crate) fn personal_items(&self, vault: &str, username: &str, view: PersonalView) -> Vec<String> {
        self.state()
            .vaults
            .get(vault)
            .and_then(|v| v.personal.get(&(username.to_string(), view)))
            .cloned()
            .unwrap_or_default()
    }

    /// Records that `username` opened `object_id`; returns its title.
    pub(crate) fn visit_object(&self, vault: &str, username: &str, object_id: u64) -> Option<String> {
        let mut state = self.state();
        let vault = state.vaults.get_mut(vault)?;
        let title = vault.objects.get(&object_id)?.clone();
        let recent = vault
            .personal
            .entry((username.to_string(), PersonalView::Recent))
            .or_default();
        recent.retain(|t| t != &title);
        recent.insert(0, title.clone());
        Some(title)
    }
}

#[async_trait]
impl ProvisioningBackend for FakeDeployment {
    async fn create_environment(
        &self,
        name: &str,
        _kind: BackendKind,
        _template: &DatasetTemplate,
    ) -> ProvisioningResult<()> {
        {
            let mut state = self.state();
            state.create_calls += 1;
            if state.fail_next_creations > 0 {
                state.fail_next_creations -= 1;
                return Err(ProvisioningError::Unavailable("scripted outage".to_string()));
            }
            if state.vaults.contains_key(name) {
                return Err(ProvisioningError::NameCollision(name.to_string()));
            }
            state.in_flight_creations += 1;
            state.max_concurrent_creations =
                state.max_concurrent_creations.max(state.in_flight_creations);
        }

        if !self.creation_delay.is_zero() {
            tokio::time::sleep(self.creation_delay).await;
        }

        let mut state = self.state();
        state.in_flight_creations -= 1;
        state.vaults.insert(name.to_string(), FakeVault::default());
        Ok(())
    }

    async fn create_user(
        &self,
        environment: &str,
        spec: &RoleSpec,
    ) -> ProvisioningResult<UserCredential> {
        let mut state = self.state();
        if state.rejected_roles.contains(&spec.role) {
            return Err(ProvisioningError::Rejected {
                environment: environment.to_string(),
                operation: "create_user".to_string(),
                reason: format!("role '{}' refused", spec.role),
            });
        }

        state.user_seq += 1;
        let seq = state.user_seq;
        let vault = state
            .vaults
            .get_mut(environment)
            .ok_or_else(|| ProvisioningError::Rejected {
                environment: environment.to_string(),
                operation: "create_user".to_string(),
                reason: "no such environment".to_string(),
            })?;

        let username = format!("{}-{seq}", spec.role);
        let password = format!("pw-{seq}");
        vault.users.insert(
            username.clone(),
            FakeUser {
                password: password.clone(),
                attributes: spec.attributes,
            },
        );
        Ok(UserCredential::new(spec.role.clone(), username, password, spec.attributes))
    }

    async fn destroy_environment(&self, environment: &str) -> ProvisioningResult<()> {
        let mut state = self.state();
        state.destroy_calls += 1;
        if state.fail_destroys {
            return Err(ProvisioningError::Unavailable("scripted destroy failure".to_string()));
        }
        state.vaults.remove(environment);
        Ok(())
    }

    async fn configure_connector(&self, environment: &str, label: &str) -> ProvisioningResult<()> {
        let mut state = self.state();
        state.connector_calls += 1;
        let vault = state
            .vaults
            .get_mut(environment)
            .ok_or_else(|| ProvisioningError::TornDown(environment.to_string()))?;
        vault.connectors.insert(label.to_string());
        Ok(())
    }

    async fn promote_object(
        &self,
        environment: &str,
        label: &str,
        path: &str,
        version: Option<u32>,
    ) -> ProvisioningResult<PromotedObject> {
        let mut state = self.state();
        state.object_seq += 1;
        let object_id = state.object_seq;
        let vault = state
            .vaults
            .get_mut(environment)
            .ok_or_else(|| ProvisioningError::TornDown(environment.to_string()))?;
        if !vault.connectors.contains(label) {
            return Err(ProvisioningError::ConnectorMissing {
                environment: environment.to_string(),
                label: label.to_string(),
            });
        }

        let title = path.rsplit('/').next().unwrap_or(path).to_string();
        vault.objects.insert(object_id, title);
        Ok(PromotedObject {
            object_id,
            path: path.to_string(),
            version: version.unwrap_or(1),
        })
    }

    async fn clear_external_repository(&self, label: &str) -> ProvisioningResult<()> {
        let mut state = self.state();
        state.cleared.push(label.to_string());
        if state.fail_destroys {
            return Err(ProvisioningError::Unavailable("scripted clear failure".to_string()));
        }
        for vault in state.vaults.values_mut() {
            vault.connectors.remove(label);
        }
        Ok(())
    }
}
