//! REST client for the deployment's provisioning API.

use super::{PromotedObject, ProvisioningBackend};
use crate::backend::BackendKind;
use crate::environment::{DatasetTemplate, RoleSpec, UserCredential};
use crate::error::{ProvisioningError, ProvisioningResult};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct CreateEnvironmentRequest<'a> {
    name: &'a str,
    kind: BackendKind,
    template: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateUserRequest<'a> {
    role: &'a str,
    login_enabled: bool,
    account_enabled: bool,
    license_present: bool,
    admin: bool,
}

#[derive(Debug, Deserialize)]
struct CreateUserResponse {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct PromoteObjectRequest<'a> {
    connector: &'a str,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct PromoteObjectResponse {
    object_id: u64,
    version: u32,
}

/// [`ProvisioningBackend`] speaking JSON over HTTP.
pub struct HttpProvisioningBackend {
    client: Client,
    api_url: String,
}

impl HttpProvisioningBackend {
    /// Creates a client for the API rooted at `api_url`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> ProvisioningResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProvisioningError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    /// Maps a non-success response to the matching provisioning error.
    async fn check(
        response: Response,
        environment: &str,
        operation: &str,
    ) -> ProvisioningResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::CONFLICT => ProvisioningError::NameCollision(environment.to_string()),
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => {
                ProvisioningError::Unavailable(format!("{status} - {body}"))
            }
            _ => ProvisioningError::Rejected {
                environment: environment.to_string(),
                operation: operation.to_string(),
                reason: format!("{status} - {body}"),
            },
        })
    }
}

fn transport(err: reqwest::Error) -> ProvisioningError {
    if err.is_connect() || err.is_timeout() {
        ProvisioningError::Unavailable(err.to_string())
    } else {
        ProvisioningError::Transport(err.to_string())
    }
}

#[async_trait]
impl ProvisioningBackend for HttpProvisioningBackend {
    async fn create_environment(
        &self,
        name: &str,
        kind: BackendKind,
        template: &DatasetTemplate,
    ) -> ProvisioningResult<()> {
        debug!(environment = name, "POST environments");
        let response = self
            .client
            .post(self.url("environments"))
            .json(&CreateEnvironmentRequest {
                name,
                kind,
                template: template.as_str(),
            })
            .send()
            .await
            .map_err(transport)?;

        Self::check(response, name, "create_environment").await?;
        Ok(())
    }

    async fn create_user(
        &self,
        environment: &str,
        spec: &RoleSpec,
    ) -> ProvisioningResult<UserCredential> {
        let response = self
            .client
            .post(self.url(&format!("environments/{environment}/users")))
            .json(&CreateUserRequest {
                role: &spec.role,
                login_enabled: spec.attributes.login_enabled,
                account_enabled: spec.attributes.account_enabled,
                license_present: spec.attributes.license_present,
                admin: spec.attributes.admin,
            })
            .send()
            .await
            .map_err(transport)?;

        let created: CreateUserResponse = Self::check(response, environment, "create_user")
            .await?
            .json()
            .await
            .map_err(|e| ProvisioningError::Transport(e.to_string()))?;

        Ok(UserCredential::new(
            spec.role.clone(),
            created.username,
            created.password,
            spec.attributes,
        ))
    }

    async fn destroy_environment(&self, environment: &str) -> ProvisioningResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("environments/{environment}")))
            .send()
            .await
            .map_err(transport)?;

        // Already gone is as good as destroyed.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response, environment, "destroy_environment").await?;
        Ok(())
    }

    async fn configure_connector(&self, environment: &str, label: &str) -> ProvisioningResult<()> {
        let response = self
            .client
            .put(self.url(&format!("environments/{environment}/connectors/{label}")))
            .send()
            .await
            .map_err(transport)?;

        Self::check(response, environment, "configure_connector").await?;
        Ok(())
    }

    async fn promote_object(
        &self,
        environment: &str,
        label: &str,
        path: &str,
        version: Option<u32>,
    ) -> ProvisioningResult<PromotedObject> {
        let response = self
            .client
            .post(self.url(&format!("environments/{environment}/objects")))
            .json(&PromoteObjectRequest {
                connector: label,
                path,
                version,
            })
            .send()
            .await
            .map_err(transport)?;

        let promoted: PromoteObjectResponse =
            Self::check(response, environment, "promote_object")
                .await?
                .json()
                .await
                .map_err(|e| ProvisioningError::Transport(e.to_string()))?;

        Ok(PromotedObject {
            object_id: promoted.object_id,
            path: path.to_string(),
            version: promoted.version,
        })
    }

    async fn clear_external_repository(&self, label: &str) -> ProvisioningResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("external-repositories/{label}")))
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response, label, "clear_external_repository").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let backend =
            HttpProvisioningBackend::new("http://localhost:8081/api/", Duration::from_secs(5))
                .unwrap();
        assert_eq!(
            backend.url("/environments/vh-1/users"),
            "http://localhost:8081/api/environments/vh-1/users"
        );
    }

    #[test]
    fn test_create_environment_request_serializes_kind_lowercase() {
        let body = serde_json::to_value(CreateEnvironmentRequest {
            name: "vh-1",
            kind: BackendKind::Sql,
            template: "sample-vault",
        })
        .unwrap();
        assert_eq!(body["kind"], "sql");
        assert_eq!(body["template"], "sample-vault");
    }

    #[test]
    fn test_promote_request_omits_missing_version() {
        let body = serde_json::to_value(PromoteObjectRequest {
            connector: "share",
            path: "a.txt",
            version: None,
        })
        .unwrap();
        assert!(body.get("version").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_api_reports_unavailable() {
        // Port 9 (discard) is essentially never listening on test hosts.
        let backend =
            HttpProvisioningBackend::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = backend
            .create_environment("vh-1", BackendKind::Embedded, &DatasetTemplate::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisioningError::Unavailable(_) | ProvisioningError::Transport(_)
        ));
    }
}
