//! Command-line surface.
//!
//! ```text
//! skimmer [--config config.toml] [--mode monitor|execute]
//!         [--health-check] [--no-dashboard]
//! ```
//!
//! Exit codes: 0 normal, 1 configuration error, 2 unrecoverable startup
//! failure, 3 emergency stop completed after a fatal risk event.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::error;

use crate::app::{self, Config, Mode, RunOutcome, Supervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliMode {
    /// Detect and gate opportunities without submitting orders.
    Monitor,
    /// Full pipeline including execution.
    Execute,
}

impl From<CliMode> for Mode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Monitor => Mode::Monitor,
            CliMode::Execute => Mode::Execute,
        }
    }
}

/// Cross-venue arbitrage detection and execution.
#[derive(Debug, Parser)]
#[command(name = "skimmer", version, about)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Run mode.
    #[arg(long, value_enum, default_value = "execute")]
    pub mode: CliMode,

    /// Probe configured venues, print one line each, and exit.
    #[arg(long)]
    pub health_check: bool,

    /// Disable the dashboard status observer.
    #[arg(long)]
    pub no_dashboard: bool,
}

impl Cli {
    /// Run the selected command to completion.
    pub async fn run(self) -> ExitCode {
        let config = match Config::load(&self.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("configuration error: {e}");
                return ExitCode::from(1);
            }
        };
        config.init_logging();

        if self.health_check {
            return run_health_check(&config).await;
        }

        match Supervisor::run(config, self.mode.into(), self.no_dashboard).await {
            Ok(RunOutcome::Clean) => ExitCode::SUCCESS,
            Ok(RunOutcome::EmergencyStopped) => ExitCode::from(3),
            Err(e) if matches!(e, crate::error::Error::Config(_)) => {
                error!(error = %e, "configuration error");
                ExitCode::from(1)
            }
            Err(e) => {
                error!(error = %e, "startup failed");
                ExitCode::from(2)
            }
        }
    }
}

async fn run_health_check(config: &Config) -> ExitCode {
    match app::health_check(config).await {
        Ok(results) => {
            let mut all_healthy = true;
            for (venue, healthy) in results {
                println!("{venue}: {}", if healthy { "ok" } else { "unreachable" });
                all_healthy &= healthy;
            }
            if all_healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("health check failed: {e}");
            ExitCode::from(1)
        }
    }
}
