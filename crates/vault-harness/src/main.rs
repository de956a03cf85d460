//! # vault-harness
//!
//! Acceptance suite runner for the vault web client.
//!
//! Provisions one isolated vault per fixture, drives a WebDriver browser
//! through the fixture's tests, and tears everything down afterwards. A
//! login smoke check runs first; if it cannot log in, nothing else runs.
//!
//! ## Usage
//!
//! ```bash
//! # Run every built-in fixture
//! vault-harness
//!
//! # Run only the login fixture against a config file
//! vault-harness --config ci.yml --filter login
//!
//! # List fixtures
//! vault-harness --list
//! ```

use anyhow::Context;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use vault_harness::{
    ReportFormat as LibReportFormat, ReportWriter, RunConfig, RunnerError, TerminalReporter,
    TestRunner, Verbosity, builtin_fixtures, create_progress_callback,
};
use vault_harness_core::{
    CapacityGate, DiagnosticsDir, HarnessConfig, HttpProvisioningBackend, ResourceProvisioner,
    SiteMap, WebDriverLauncher,
};

/// Exit code when any test or fixture setup failed.
const EXIT_FAILURES: i32 = 1;
/// Exit code when the login smoke check was exhausted.
const EXIT_SMOKE_EXHAUSTED: i32 = 2;

/// Browser acceptance suite runner for the vault web client.
#[derive(Parser, Debug)]
#[command(name = "vault-harness")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./vault-harness.yml when present)
    #[arg(short, long, env = "VAULT_HARNESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run only fixtures matching this pattern
    #[arg(long)]
    pub filter: Option<String>,

    /// List fixtures without running them
    #[arg(long)]
    pub list: bool,

    /// Skip the login smoke check
    #[arg(long)]
    pub skip_smoke: bool,

    /// Show detailed output during the run
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show the pass/fail summary
    #[arg(short, long)]
    pub quiet: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
    pub report: ReportFormat,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    /// report.json next to the archived diagnostics
    #[default]
    Json,
    /// Terminal summary only
    None,
}

impl ReportFormat {
    fn to_lib_format(self) -> LibReportFormat {
        match self {
            ReportFormat::Json => LibReportFormat::Json,
            ReportFormat::None => LibReportFormat::None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else if cli.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };

    if cli.list {
        list_fixtures();
        return Ok(());
    }

    let code = run(&cli, verbosity).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn list_fixtures() {
    let fixtures = builtin_fixtures();
    println!("{}\n", "Available fixtures:".bold());
    for fixture in &fixtures {
        println!("    {}  {}", fixture.id().cyan(), fixture.description().dimmed());
        for test in fixture.tests() {
            println!("      {}", test.name().dimmed());
        }
    }
    println!(
        "\n  {}",
        format!(
            "Total: {} fixture{}",
            fixtures.len(),
            if fixtures.len() == 1 { "" } else { "s" }
        )
        .dimmed()
    );
}

async fn run(cli: &Cli, verbosity: Verbosity) -> anyhow::Result<i32> {
    let config = HarnessConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    if verbosity != Verbosity::Quiet {
        println!(
            "\n{} {}",
            "🧪 Vault Acceptance Harness".bold(),
            format!("v{}", vault_harness::VERSION).dimmed()
        );
        println!("{}", "━".repeat(40).dimmed());
        println!(
            "{}",
            format!(
                "Target: {} ({} backend, up to {} concurrent provisions)",
                config.deployment.base_url,
                config.backend.kind,
                config.backend.max_concurrent_provisions
            )
            .dimmed()
        );
    }

    let backend =
        HttpProvisioningBackend::new(&config.deployment.provisioning_url, config.request_timeout())
            .context("Failed to build provisioning client")?;
    let provisioner = ResourceProvisioner::new(
        Arc::new(backend),
        config.backend.kind,
        CapacityGate::new(config.backend.max_concurrent_provisions),
    );
    let launcher = WebDriverLauncher::new(
        &config.webdriver.url,
        &config.webdriver.browser,
        config.webdriver.headless,
        config.command_timeout(),
    )
    .context("Failed to build WebDriver client")?;
    let diagnostics =
        DiagnosticsDir::create(&config.diagnostics.dir).context("Failed to create diagnostics dir")?;
    tracing::info!(dir = %diagnostics.session_dir().display(), "Collecting diagnostics");

    let mut run_config = RunConfig::from_harness_config(&config).skip_smoke(cli.skip_smoke);
    if let Some(filter) = &cli.filter {
        run_config = run_config.with_filter(filter);
    }

    let runner = TestRunner::new(
        Arc::new(provisioner),
        Arc::new(launcher),
        SiteMap::new(&config.deployment.base_url),
        builtin_fixtures(),
    )
    .with_parameters(config.parameter_resolver())
    .with_diagnostics(diagnostics)
    .on_progress(create_progress_callback(verbosity));

    let results = match runner.run(&run_config).await {
        Ok(results) => results,
        Err(RunnerError::SmokeGateExhausted(err)) => {
            eprintln!("\n{} {}", "Aborted:".red().bold(), err);
            return Ok(EXIT_SMOKE_EXHAUSTED);
        }
        Err(err) => {
            eprintln!("\n{} {}", "Error:".red().bold(), err);
            return Ok(EXIT_FAILURES);
        }
    };

    if cli.report.to_lib_format() == LibReportFormat::Json {
        let writer = ReportWriter::new(config.diagnostics.reports_dir.clone());
        match writer.write_json(&results) {
            Ok(path) if verbosity != Verbosity::Quiet => {
                println!("{}", format!("Report written: {}", path.display()).dimmed());
            }
            Ok(_) => {}
            Err(err) => eprintln!("{} Failed to write report: {}", "Warning:".yellow(), err),
        }
    }

    let reporter = TerminalReporter::with_verbosity(verbosity);
    if verbosity != Verbosity::Quiet && !results.all_passed() {
        reporter.print_failures(&results);
    }
    reporter.print_summary(&results);

    Ok(if results.all_passed() { 0 } else { EXIT_FAILURES })
}
