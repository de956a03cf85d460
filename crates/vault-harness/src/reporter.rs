//! Reporters for suite runs.
//!
//! - `TerminalReporter`: colored progress and summary on stdout
//! - `JsonReporter`: machine-readable report
//! - `ReportWriter`: writes the report next to the archived diagnostics
//!
//! # Example
//!
//! ```no_run
//! use vault_harness::{ProgressEvent, ReportWriter, RunResults, TerminalReporter};
//! use std::path::PathBuf;
//!
//! let mut reporter = TerminalReporter::new();
//! reporter.handle_progress(ProgressEvent::RunStarted { total_fixtures: 2 });
//!
//! let results = RunResults::default();
//! reporter.print_summary(&results);
//!
//! let writer = ReportWriter::new(PathBuf::from("reports"));
//! writer.write_json(&results).unwrap();
//! ```

use crate::models::{FixtureResult, TestResult, duration_serde};
use crate::runner::{ProgressCallback, ProgressEvent, RunResults};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use vault_harness_core::SmokeReport;

/// Verbosity level for terminal output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Only the final pass/fail line.
    Quiet,
    /// Fixture and test progress.
    #[default]
    Normal,
    /// Also environments, smoke details, and failure reasons as they happen.
    Verbose,
}

/// Terminal reporter for suite runs.
#[derive(Debug, Default)]
pub struct TerminalReporter {
    verbosity: Verbosity,
}

impl TerminalReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbosity(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    /// Handles a progress event, printing appropriate output.
    pub fn handle_progress(&mut self, event: ProgressEvent) {
        let quiet = self.verbosity == Verbosity::Quiet;
        let verbose = self.verbosity == Verbosity::Verbose;

        match event {
            ProgressEvent::RunStarted { total_fixtures } if !quiet => {
                println!(
                    "\n{}\n",
                    format!(
                        "Running {} fixture{}...",
                        total_fixtures,
                        if total_fixtures == 1 { "" } else { "s" }
                    )
                    .bold()
                );
            }
            ProgressEvent::SmokeStarted { attempts } if verbose => {
                println!("  {} login smoke check (up to {attempts} attempts)", "…".dimmed());
            }
            ProgressEvent::SmokePassed { report } if !quiet => self.print_smoke_passed(&report),
            ProgressEvent::SmokeFailed { attempts, reason } => {
                println!(
                    "  {} {} {}",
                    "🚫".red(),
                    format!("Login smoke check failed after {attempts} attempt(s)").red().bold(),
                    format!("({reason})").dimmed()
                );
            }
            ProgressEvent::SmokeSkipped { reason } if !quiet => {
                println!(
                    "  {} {} {}",
                    "⏭️".dimmed(),
                    "login smoke check".dimmed(),
                    format!("({reason})").dimmed()
                );
            }
            ProgressEvent::FixtureStarted {
                fixture_id,
                environment,
            } if verbose => {
                println!("{} {}", fixture_id.bold().underline(), format!("[{environment}]").dimmed());
            }
            ProgressEvent::TestCompleted { result } if !quiet => self.print_test_completed(&result),
            ProgressEvent::FixtureCompleted { result } if !quiet => {
                self.print_fixture_completed(&result);
            }
            ProgressEvent::RunCompleted { results } if quiet => self.print_quiet_summary(&results),
            _ => {}
        }
    }

    fn print_smoke_passed(&self, report: &SmokeReport) {
        println!(
            "  ✅ login smoke check {}",
            format!(
                "(attempt {}, {:.1}s)",
                report.attempts,
                report.duration.as_secs_f64()
            )
            .dimmed()
        );
        println!();
    }

    fn print_test_completed(&self, result: &TestResult) {
        let status = if result.passed() { "✅" } else { "❌" };
        let duration = format!("({:.1}s)", result.duration.as_secs_f64()).dimmed();
        println!(
            "  {} {}::{} {}",
            status, result.fixture_id, result.test_name, duration
        );
        if self.verbosity == Verbosity::Verbose
            && let Some(failure) = &result.failure
        {
            println!("     {} {}", "└─ ✗".red(), failure);
        }
    }

    fn print_fixture_completed(&self, result: &FixtureResult) {
        if let Some(error) = &result.setup_error {
            println!(
                "  {} {} {}",
                "⚠️".yellow(),
                result.fixture_id.yellow().bold(),
                format!("(setup failed: {error})").dimmed()
            );
        }
    }

    fn print_quiet_summary(&self, results: &RunResults) {
        let passed = results.passed_count();
        let failed = results.failed_count();
        let total = results.total_count();

        if results.all_passed() {
            println!("{}", format!("✓ {passed}/{total} passed").green());
        } else {
            println!("{}", format!("✗ {failed}/{total} failed").red());
        }
    }

    /// Prints a full summary of the run.
    pub fn print_summary(&self, results: &RunResults) {
        println!("\n{}", "━".repeat(40).dimmed());

        let passed = results.passed_count();
        let failed = results.failed_count();
        let setup_failures = results.setup_failures().len();
        let total = results.total_count();

        let (emoji, verdict, color) = if results.all_passed() {
            ("🟢", "PASSED", colored::Color::Green)
        } else if passed > 0 {
            ("🟡", "MIXED", colored::Color::Yellow)
        } else {
            ("🔴", "FAILED", colored::Color::Red)
        };

        let mut parts = vec![];
        if passed > 0 {
            parts.push(format!("{passed} passed").green().to_string());
        }
        if failed > 0 {
            parts.push(format!("{failed} failed").red().to_string());
        }
        if setup_failures > 0 {
            parts.push(
                format!("{setup_failures} fixture setup failure(s)")
                    .yellow()
                    .to_string(),
            );
        }

        let verdict_text = format!("{verdict}: {passed} of {total} tests");
        println!("{} {}", emoji, verdict_text.color(color).bold());
        if !parts.is_empty() {
            println!("   {}", parts.join(", "));
        }

        println!(
            "\n   {}",
            format!("Completed in {:.1}s", results.duration.as_secs_f64()).dimmed()
        );
        if let Some(path) = &results.archived_to {
            println!("   {}", format!("Diagnostics: {}", path.display()).dimmed());
        }
    }

    /// Prints details of failed tests and fixtures that never ran.
    pub fn print_failures(&self, results: &RunResults) {
        let failures = results.failures();
        let setup_failures = results.setup_failures();
        if failures.is_empty() && setup_failures.is_empty() {
            return;
        }

        println!("\n{}\n", "Failed Tests:".red().bold());

        for fixture in setup_failures {
            println!("  {} {}", "⚠️".yellow(), fixture.fixture_id.yellow().bold());
            println!("     {}", fixture.description.dimmed());
            if let Some(error) = &fixture.setup_error {
                println!("     {} {}", "✗".red(), error);
            }
            println!();
        }

        for result in failures {
            println!(
                "  {} {}",
                "❌".red(),
                format!("{}::{}", result.fixture_id, result.test_name)
                    .red()
                    .bold()
            );
            if let Some(failure) = &result.failure {
                println!("     {} {}", "✗".red(), failure);
            }
            if let Some(artifact) = &result.artifact {
                println!("     {}", format!("artifact: {}", artifact.display()).dimmed());
            }
            println!();
        }
    }
}

/// Creates a progress callback that feeds a shared `TerminalReporter`.
pub fn create_progress_callback(verbosity: Verbosity) -> ProgressCallback {
    let reporter = Arc::new(Mutex::new(TerminalReporter::with_verbosity(verbosity)));

    Arc::new(move |event| {
        reporter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle_progress(event);
    })
}

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("failed to write report: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Full report structure for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub timestamp: DateTime<Utc>,

    /// Harness version that produced the report.
    pub harness_version: String,

    #[serde(with = "duration_serde")]
    pub duration: Duration,

    pub passed: bool,

    pub summary: ReportSummary,

    /// Smoke gate outcome; absent when skipped.
    pub smoke: Option<SmokeReport>,

    pub fixtures: Vec<FixtureResult>,

    /// Where failure artifacts were archived.
    pub diagnostics: Option<PathBuf>,
}

/// Summary statistics for the report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub fixtures: usize,
    pub setup_failures: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

/// Generates JSON reports.
#[derive(Debug, Default)]
pub struct JsonReporter;

impl JsonReporter {
    pub fn new() -> Self {
        Self
    }

    pub fn build_report(&self, results: &RunResults) -> TestReport {
        TestReport {
            timestamp: Utc::now(),
            harness_version: crate::VERSION.to_string(),
            duration: results.duration,
            passed: results.all_passed(),
            summary: ReportSummary {
                fixtures: results.fixtures.len(),
                setup_failures: results.setup_failures().len(),
                total: results.total_count(),
                passed: results.passed_count(),
                failed: results.failed_count(),
            },
            smoke: results.smoke.clone(),
            fixtures: results.fixtures.clone(),
            diagnostics: results.archived_to.clone(),
        }
    }

    pub fn generate(&self, results: &RunResults) -> Result<String, ReporterError> {
        Ok(serde_json::to_string_pretty(&self.build_report(results))?)
    }
}

/// Writes reports to a directory.
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    /// Writes `report.json`, into the run's archive directory when there is one.
    pub fn write_json(&self, results: &RunResults) -> Result<PathBuf, ReporterError> {
        let dir = results
            .archived_to
            .clone()
            .unwrap_or_else(|| self.output_dir.clone());
        std::fs::create_dir_all(&dir)?;

        let content = JsonReporter::new().generate(results)?;
        let path = dir.join("report.json");
        std::fs::write(&path, content)?;

        Ok(path)
    }
}
