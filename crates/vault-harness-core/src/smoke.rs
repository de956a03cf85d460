//! Pre-flight login check run once before any fixture.
//!
//! If the deployment cannot produce an authenticated home view after a few
//! tries, nothing else in the suite can pass either, so the whole run is
//! aborted with [`SmokeGateExhausted`].

use crate::browser::BrowserLauncher;
use crate::diagnostics::{Artifact, DiagnosticsDir};
use crate::environment::{DatasetTemplate, RoleSpec};
use crate::error::SmokeGateExhausted;
use crate::pages::SiteMap;
use crate::provisioner::ResourceProvisioner;
use crate::session::SessionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of a passing smoke check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeReport {
    /// Login attempts used, including the successful one.
    pub attempts: u32,
    pub environment: String,
    pub duration: Duration,
}

/// Bounded-retry login check against a throwaway environment.
pub struct SmokeGate {
    provisioner: Arc<ResourceProvisioner>,
    launcher: Arc<dyn BrowserLauncher>,
    site: SiteMap,
    attempts: u32,
    template: DatasetTemplate,
    diagnostics: Option<DiagnosticsDir>,
}

impl SmokeGate {
    pub const DEFAULT_ATTEMPTS: u32 = 3;

    pub fn new(
        provisioner: Arc<ResourceProvisioner>,
        launcher: Arc<dyn BrowserLauncher>,
        site: SiteMap,
    ) -> Self {
        Self {
            provisioner,
            launcher,
            site,
            attempts: Self::DEFAULT_ATTEMPTS,
            template: DatasetTemplate::default(),
            diagnostics: None,
        }
    }

    /// Sets the attempt budget. At least one attempt is always made.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_template(mut self, template: DatasetTemplate) -> Self {
        self.template = template;
        self
    }

    /// Writes a screenshot or note for every failed attempt into `diagnostics`.
    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsDir) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs the check. The throwaway environment is always torn down.
    pub async fn run(&self) -> Result<SmokeReport, SmokeGateExhausted> {
        let started = Instant::now();
        info!(attempts = self.attempts, "Running login smoke check");

        let env = match self
            .provisioner
            .provision(&self.template, &[RoleSpec::user()])
            .await
        {
            Ok(env) => Arc::new(env),
            Err(err) => {
                warn!(error = %err, "Smoke check could not provision its environment");
                self.capture("smoke provisioning", &Artifact::Note(err.to_string()));
                return Err(SmokeGateExhausted {
                    attempts: 0,
                    last_failure: err.to_string(),
                });
            }
        };

        let mut manager =
            SessionManager::new(Arc::clone(&self.launcher), Arc::clone(&env), self.site.clone());
        let mut last_failure = String::new();

        for attempt in 1..=self.attempts {
            let result = manager.start_at_home_page(None).await.map(|_| ());
            match result {
                Ok(()) => {
                    manager.ensure_quit().await;
                    self.provisioner.teardown(&env).await;
                    info!(attempt, "Smoke check passed");
                    return Ok(SmokeReport {
                        attempts: attempt,
                        environment: env.name().to_string(),
                        duration: started.elapsed(),
                    });
                }
                Err(err) => {
                    warn!(attempt, max = self.attempts, error = %err, "Smoke login attempt failed");
                    let artifact = match manager.capture_screenshot().await {
                        Some(png) => Artifact::Screenshot(png),
                        None => Artifact::Note(format!("attempt {attempt}: {err}")),
                    };
                    self.capture(&format!("smoke attempt {attempt}"), &artifact);
                    manager.ensure_quit().await;
                    last_failure = err.to_string();
                }
            }
        }

        self.capture(
            "smoke exhausted",
            &Artifact::Note(format!(
                "environment {} unreachable after {} attempt(s): {}",
                env.name(),
                self.attempts,
                last_failure
            )),
        );
        self.provisioner.teardown(&env).await;

        Err(SmokeGateExhausted {
            attempts: self.attempts,
            last_failure,
        })
    }

    fn capture(&self, label: &str, artifact: &Artifact) {
        if let Some(diagnostics) = &self.diagnostics {
            diagnostics.capture(label, artifact);
        }
    }
}
