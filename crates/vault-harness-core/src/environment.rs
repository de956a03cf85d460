//! Isolated backend environments ("vaults") and the credentials seeded into them.

use crate::backend::BackendKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Role name used when a fixture does not ask for a specific credential.
pub const DEFAULT_ROLE: &str = "user";

/// Dataset a new environment is cloned from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetTemplate(String);

impl DatasetTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DatasetTemplate {
    fn default() -> Self {
        Self::new("sample-vault")
    }
}

impl fmt::Display for DatasetTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account flags a provisioned user is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAttributes {
    pub login_enabled: bool,
    pub account_enabled: bool,
    pub license_present: bool,
    pub admin: bool,
}

impl Default for RoleAttributes {
    fn default() -> Self {
        Self {
            login_enabled: true,
            account_enabled: true,
            license_present: true,
            admin: false,
        }
    }
}

/// A logical role a fixture needs a credential for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleSpec {
    pub role: String,
    pub attributes: RoleAttributes,
}

impl RoleSpec {
    /// Creates a role with default attributes (enabled, licensed, not admin).
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            attributes: RoleAttributes::default(),
        }
    }

    /// Plain licensed user under the default role name.
    pub fn user() -> Self {
        Self::new(DEFAULT_ROLE)
    }

    pub fn admin() -> Self {
        let mut spec = Self::new("admin");
        spec.attributes.admin = true;
        spec
    }

    /// Account exists but may not log in.
    pub fn disabled_login() -> Self {
        let mut spec = Self::new("disabled-login");
        spec.attributes.login_enabled = false;
        spec
    }

    /// Account is disabled entirely.
    pub fn disabled_account() -> Self {
        let mut spec = Self::new("disabled-account");
        spec.attributes.account_enabled = false;
        spec
    }

    /// Account has no license assigned.
    pub fn no_license() -> Self {
        let mut spec = Self::new("no-license");
        spec.attributes.license_present = false;
        spec
    }

    /// `count` interchangeable users named `user-1` .. `user-N`.
    pub fn generic_users(count: usize) -> Vec<Self> {
        (1..=count).map(|i| Self::new(format!("user-{i}"))).collect()
    }

    pub fn with_attributes(mut self, attributes: RoleAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Login credentials for one provisioned user. Fixed at creation.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserCredential {
    pub role: String,
    pub username: String,
    pub password: String,
    pub attributes: RoleAttributes,
}

impl UserCredential {
    pub fn new(
        role: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        attributes: RoleAttributes,
    ) -> Self {
        Self {
            role: role.into(),
            username: username.into(),
            password: password.into(),
            attributes,
        }
    }

    /// Returns a copy with a different password, for negative login tests.
    pub fn with_wrong_password(&self) -> Self {
        let mut cred = self.clone();
        cred.password = format!("{}-wrong", self.password);
        cred
    }
}

// Passwords stay out of logs and panic messages.
impl fmt::Debug for UserCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredential")
            .field("role", &self.role)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// One isolated vault, exclusively owned by the fixture that provisioned it.
#[derive(Debug)]
pub struct Environment {
    name: String,
    kind: BackendKind,
    template: DatasetTemplate,
    credentials: BTreeMap<String, UserCredential>,
    connectors: Mutex<BTreeSet<String>>,
    torn_down: AtomicBool,
}

impl Environment {
    pub fn new(
        name: impl Into<String>,
        kind: BackendKind,
        template: DatasetTemplate,
        credentials: impl IntoIterator<Item = UserCredential>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            template,
            credentials: credentials
                .into_iter()
                .map(|cred| (cred.role.clone(), cred))
                .collect(),
            connectors: Mutex::new(BTreeSet::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn template(&self) -> &DatasetTemplate {
        &self.template
    }

    /// Looks up the credential provisioned for a logical role.
    pub fn credential(&self, role: &str) -> Option<&UserCredential> {
        self.credentials.get(role)
    }

    /// The credential used when a test does not name one: the `user` role,
    /// falling back to the first provisioned role.
    pub fn default_credential(&self) -> Option<&UserCredential> {
        self.credentials
            .get(DEFAULT_ROLE)
            .or_else(|| self.credentials.values().next())
    }

    pub fn credentials(&self) -> impl Iterator<Item = &UserCredential> {
        self.credentials.values()
    }

    pub fn roles(&self) -> Vec<&str> {
        self.credentials.keys().map(String::as_str).collect()
    }

    pub fn has_connector(&self, label: &str) -> bool {
        self.connectors().contains(label)
    }

    pub fn connector_labels(&self) -> Vec<String> {
        self.connectors().iter().cloned().collect()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Records a connector label; returns false if it was already present.
    pub(crate) fn insert_connector(&self, label: &str) -> bool {
        self.connectors().insert(label.to_string())
    }

    /// Flags the environment as released; returns false if it already was.
    pub(crate) fn mark_torn_down(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    fn connectors(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.connectors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
