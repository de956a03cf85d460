//! Environment provisioning and teardown.
//!
//! The [`ResourceProvisioner`] is the only component shared by every fixture.
//! It holds no per-fixture state itself: everything it mutates lives on the
//! [`Environment`] the caller owns, and the only contended resource is the
//! [`CapacityGate`] limiting concurrent creations.
//!
//! # Lifecycle
//!
//! ```text
//! provision() ──▶ configure_external_connector()* ──▶ promote_object()*
//!      │                                                     │
//!      └──────────────────────── teardown() ◀────────────────┘
//! ```

mod http;

pub use http::HttpProvisioningBackend;

use crate::backend::BackendKind;
use crate::capacity::CapacityGate;
use crate::environment::{DatasetTemplate, Environment, RoleSpec, UserCredential};
use crate::error::{ProvisioningError, ProvisioningResult, TeardownError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Process-wide sequence keeping generated environment names distinct.
static ENVIRONMENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// An externally-sourced item brought under managed control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotedObject {
    pub object_id: u64,
    pub path: String,
    pub version: u32,
}

/// The backend's provisioning API.
///
/// Implementations perform one remote operation per call and do no
/// bookkeeping; idempotency and capacity limits are handled by
/// [`ResourceProvisioner`].
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Creates an empty environment cloned from `template`.
    async fn create_environment(
        &self,
        name: &str,
        kind: BackendKind,
        template: &DatasetTemplate,
    ) -> ProvisioningResult<()>;

    /// Creates one user in `environment` and returns its login credentials.
    async fn create_user(&self, environment: &str, spec: &RoleSpec)
    -> ProvisioningResult<UserCredential>;

    /// Destroys `environment` and everything in it.
    async fn destroy_environment(&self, environment: &str) -> ProvisioningResult<()>;

    /// Attaches the simulated external source `label` to `environment`.
    async fn configure_connector(&self, environment: &str, label: &str) -> ProvisioningResult<()>;

    /// Promotes `path` from the external source `label` into `environment`.
    async fn promote_object(
        &self,
        environment: &str,
        label: &str,
        path: &str,
        version: Option<u32>,
    ) -> ProvisioningResult<PromotedObject>;

    /// Empties the external repository behind `label`.
    async fn clear_external_repository(&self, label: &str) -> ProvisioningResult<()>;
}

/// Creates and destroys isolated environments on behalf of fixtures.
pub struct ResourceProvisioner {
    backend: Arc<dyn ProvisioningBackend>,
    kind: BackendKind,
    gate: CapacityGate,
}

impl ResourceProvisioner {
    /// Creates a provisioner targeting `kind` environments, limited by `gate`.
    pub fn new(backend: Arc<dyn ProvisioningBackend>, kind: BackendKind, gate: CapacityGate) -> Self {
        Self {
            backend,
            kind,
            gate,
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn gate(&self) -> &CapacityGate {
        &self.gate
    }

    /// Creates a new environment and seeds one credential per role.
    ///
    /// Waits for a capacity slot first. If seeding fails after the
    /// environment was created, the partial environment is released before
    /// the error is returned.
    pub async fn provision(
        &self,
        template: &DatasetTemplate,
        role_specs: &[RoleSpec],
    ) -> ProvisioningResult<Environment> {
        let name = self.next_environment_name();
        check_unique_roles(&name, role_specs)?;

        let _permit = self.gate.acquire().await?;
        debug!(environment = %name, template = %template, "Creating environment");

        self.backend
            .create_environment(&name, self.kind, template)
            .await?;

        let mut credentials = Vec::with_capacity(role_specs.len());
        for spec in role_specs {
            match self.backend.create_user(&name, spec).await {
                Ok(credential) => credentials.push(credential),
                Err(err) => {
                    warn!(
                        environment = %name,
                        role = %spec.role,
                        error = %err,
                        "Seeding credentials failed, releasing partial environment"
                    );
                    if let Err(teardown_err) = self.destroy(&name).await {
                        warn!("{teardown_err}");
                    }
                    return Err(err);
                }
            }
        }

        info!(
            environment = %name,
            kind = %self.kind,
            roles = role_specs.len(),
            "Provisioned environment"
        );
        Ok(Environment::new(name, self.kind, template.clone(), credentials))
    }

    /// Attaches an external content source under `label`. Idempotent per label.
    pub async fn configure_external_connector(
        &self,
        env: &Environment,
        label: &str,
    ) -> ProvisioningResult<()> {
        ensure_live(env)?;
        if env.has_connector(label) {
            debug!(environment = %env.name(), label, "Connector already configured");
            return Ok(());
        }

        self.backend.configure_connector(env.name(), label).await?;
        env.insert_connector(label);
        debug!(environment = %env.name(), label, "Configured external connector");
        Ok(())
    }

    /// Brings `path` (`"<label>/<relative path>"`) under managed control.
    pub async fn promote_object(
        &self,
        env: &Environment,
        path: &str,
        version_hint: Option<u32>,
    ) -> ProvisioningResult<PromotedObject> {
        ensure_live(env)?;
        let (label, relative) = split_connector_path(path).ok_or_else(|| {
            ProvisioningError::Rejected {
                environment: env.name().to_string(),
                operation: "promote_object".to_string(),
                reason: format!("path '{path}' does not start with a connector label"),
            }
        })?;

        if !env.has_connector(label) {
            return Err(ProvisioningError::ConnectorMissing {
                environment: env.name().to_string(),
                label: label.to_string(),
            });
        }

        let object = self
            .backend
            .promote_object(env.name(), label, relative, version_hint)
            .await?;
        debug!(
            environment = %env.name(),
            path,
            object_id = object.object_id,
            version = object.version,
            "Promoted external object"
        );
        Ok(object)
    }

    /// Releases `env`. Never fails; a second call is a no-op.
    pub async fn teardown(&self, env: &Environment) {
        if !env.mark_torn_down() {
            debug!(environment = %env.name(), "Environment already torn down");
            return;
        }

        match self.destroy(env.name()).await {
            Ok(()) => info!(environment = %env.name(), "Tore down environment"),
            Err(err) => warn!("{err}"),
        }
    }

    /// Empties the external repository behind `label`. Never fails.
    pub async fn clear_external_repository(&self, label: &str) {
        match self.backend.clear_external_repository(label).await {
            Ok(()) => debug!(label, "Cleared external repository"),
            Err(err) => warn!(
                "{}",
                TeardownError {
                    target: format!("external repository '{label}'"),
                    reason: err.to_string(),
                }
            ),
        }
    }

    async fn destroy(&self, name: &str) -> Result<(), TeardownError> {
        let limit = self.kind.default_provision_timeout();
        match tokio::time::timeout(limit, self.backend.destroy_environment(name)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TeardownError {
                target: name.to_string(),
                reason: err.to_string(),
            }),
            Err(_) => Err(TeardownError {
                target: name.to_string(),
                reason: format!("timed out after {}s", limit.as_secs()),
            }),
        }
    }

    fn next_environment_name(&self) -> String {
        let seq = ENVIRONMENT_SEQ.fetch_add(1, Ordering::Relaxed);
        format!(
            "vh-{}-{}-{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            std::process::id(),
            seq
        )
    }
}

fn ensure_live(env: &Environment) -> ProvisioningResult<()> {
    if env.is_torn_down() {
        Err(ProvisioningError::TornDown(env.name().to_string()))
    } else {
        Ok(())
    }
}

fn check_unique_roles(environment: &str, role_specs: &[RoleSpec]) -> ProvisioningResult<()> {
    let mut seen = HashSet::new();
    for spec in role_specs {
        if !seen.insert(spec.role.as_str()) {
            return Err(ProvisioningError::Rejected {
                environment: environment.to_string(),
                operation: "provision".to_string(),
                reason: format!("duplicate role '{}'", spec.role),
            });
        }
    }
    Ok(())
}

/// Splits `"label/rest/of/path"` into `("label", "rest/of/path")`.
fn split_connector_path(path: &str) -> Option<(&str, &str)> {
    let (label, rest) = path.trim_start_matches('/').split_once('/')?;
    if label.is_empty() || rest.is_empty() {
        None
    } else {
        Some((label, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDeployment;
    use std::time::Duration;

    fn provisioner(deployment: &FakeDeployment, capacity: usize) -> ResourceProvisioner {
        ResourceProvisioner::new(
            Arc::new(deployment.clone()),
            BackendKind::Embedded,
            CapacityGate::new(capacity),
        )
    }

    #[test]
    fn test_split_connector_path() {
        assert_eq!(split_connector_path("share/a/b.txt"), Some(("share", "a/b.txt")));
        assert_eq!(split_connector_path("/share/b.txt"), Some(("share", "b.txt")));
        assert_eq!(split_connector_path("nolabel"), None);
        assert_eq!(split_connector_path("share/"), None);
    }

    #[tokio::test]
    async fn test_provision_seeds_every_role() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 2);

        let env = provisioner
            .provision(
                &DatasetTemplate::default(),
                &[RoleSpec::user(), RoleSpec::admin(), RoleSpec::no_license()],
            )
            .await
            .unwrap();

        assert!(env.name().starts_with("vh-"));
        assert_eq!(env.roles(), vec!["admin", "no-license", "user"]);
        assert!(!env.credential("no-license").unwrap().attributes.license_present);
        assert!(deployment.environment_exists(env.name()));
    }

    #[tokio::test]
    async fn test_provisioned_names_are_distinct() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 4);
        let a = provisioner.provision(&DatasetTemplate::default(), &[RoleSpec::user()]).await.unwrap();
        let b = provisioner.provision(&DatasetTemplate::default(), &[RoleSpec::user()]).await.unwrap();
        assert_ne!(a.name(), b.name());
        assert_ne!(
            a.default_credential().unwrap().username,
            b.default_credential().unwrap().username
        );
    }

    #[tokio::test]
    async fn test_duplicate_roles_are_rejected_before_backend_call() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 1);
        let err = provisioner
            .provision(&DatasetTemplate::default(), &[RoleSpec::user(), RoleSpec::user()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Rejected { .. }));
        assert_eq!(deployment.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_backend_rejection_surfaces_as_provisioning_error() {
        let deployment = FakeDeployment::new();
        deployment.fail_next_creations(1);
        let provisioner = provisioner(&deployment, 1);
        let err = provisioner
            .provision(&DatasetTemplate::default(), &[RoleSpec::user()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::Unavailable(_)));
        assert_eq!(deployment.live_environment_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_releases_created_environment() {
        let deployment = FakeDeployment::new();
        deployment.reject_role("admin");
        let provisioner = provisioner(&deployment, 1);

        let err = provisioner
            .provision(&DatasetTemplate::default(), &[RoleSpec::user(), RoleSpec::admin()])
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisioningError::Rejected { .. }));
        assert_eq!(deployment.create_calls(), 1);
        assert_eq!(deployment.destroy_calls(), 1);
        assert_eq!(deployment.live_environment_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_twice_is_noop() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 1);
        let env = provisioner.provision(&DatasetTemplate::default(), &[RoleSpec::user()]).await.unwrap();

        provisioner.teardown(&env).await;
        provisioner.teardown(&env).await;

        assert!(env.is_torn_down());
        assert_eq!(deployment.destroy_calls(), 1);
        assert!(!deployment.environment_exists(env.name()));
    }

    #[tokio::test]
    async fn test_teardown_swallows_backend_failure() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 1);
        let env = provisioner.provision(&DatasetTemplate::default(), &[RoleSpec::user()]).await.unwrap();

        deployment.fail_destroys(true);
        provisioner.teardown(&env).await;

        assert!(env.is_torn_down());
        assert_eq!(deployment.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_connector_configuration_is_idempotent_per_label() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 1);
        let env = provisioner.provision(&DatasetTemplate::default(), &[RoleSpec::user()]).await.unwrap();

        provisioner.configure_external_connector(&env, "share").await.unwrap();
        provisioner.configure_external_connector(&env, "share").await.unwrap();
        provisioner.configure_external_connector(&env, "archive").await.unwrap();

        assert_eq!(deployment.connector_calls(), 2);
        assert_eq!(env.connector_labels(), vec!["archive".to_string(), "share".to_string()]);
    }

    #[tokio::test]
    async fn test_promote_requires_configured_connector() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 1);
        let env = provisioner.provision(&DatasetTemplate::default(), &[RoleSpec::user()]).await.unwrap();

        let err = provisioner
            .promote_object(&env, "share/contracts/a.docx", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisioningError::ConnectorMissing { .. }));

        provisioner.configure_external_connector(&env, "share").await.unwrap();
        let object = provisioner
            .promote_object(&env, "share/contracts/a.docx", Some(2))
            .await
            .unwrap();
        assert_eq!(object.path, "contracts/a.docx");
        assert_eq!(object.version, 2);
    }

    #[tokio::test]
    async fn test_operations_on_torn_down_environment_fail() {
        let deployment = FakeDeployment::new();
        let provisioner = provisioner(&deployment, 1);
        let env = provisioner.provision(&DatasetTemplate::default(), &[RoleSpec::user()]).await.unwrap();
        provisioner.teardown(&env).await;

        let err = provisioner.configure_external_connector(&env, "share").await.unwrap_err();
        assert!(matches!(err, ProvisioningError::TornDown(_)));
    }

    #[tokio::test]
    async fn test_clear_external_repository_never_fails() {
        let deployment = FakeDeployment::new();
        deployment.fail_destroys(true);
        let provisioner = provisioner(&deployment, 1);
        provisioner.clear_external_repository("share").await;
        assert_eq!(deployment.cleared_repositories(), vec!["share".to_string()]);
    }

    #[tokio::test]
    async fn test_capacity_limits_concurrent_creations() {
        let deployment = FakeDeployment::new().with_creation_delay(Duration::from_millis(40));
        let provisioner = Arc::new(provisioner(&deployment, 2));

        let calls = (0..5).map(|_| {
            let provisioner = Arc::clone(&provisioner);
            async move {
                provisioner
                    .provision(&DatasetTemplate::default(), &[RoleSpec::user()])
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(deployment.max_concurrent_creations(), 2);
    }
}
