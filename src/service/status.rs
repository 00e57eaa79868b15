//! Status file for the external dashboard.
//!
//! Writes a JSON snapshot that the dashboard (an external, read-only
//! observer) polls. Refreshed on every heartbeat; suppressed entirely when
//! the dashboard is disabled.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::service::perf::PerformanceSnapshot;

const STATUS_VERSION: &str = "1";

/// Top-level status file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusFile {
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
    pub config: StatusConfig,
    pub runtime: StatusRuntime,
    pub updated_at: DateTime<Utc>,
}

/// Static configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    pub mode: String,
    pub venues: Vec<String>,
    pub strategies: Vec<String>,
}

/// Live pipeline state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusRuntime {
    pub active_opportunities: usize,
    pub in_flight_executions: usize,
    pub exposure_quote: Decimal,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub cumulative_profit: Decimal,
    pub max_drawdown: Decimal,
}

/// Thread-safe writer using write-to-temp-then-rename.
pub struct StatusWriter {
    path: PathBuf,
    status: Mutex<StatusFile>,
}

impl StatusWriter {
    #[must_use]
    pub fn new(path: PathBuf, config: StatusConfig) -> Self {
        let now = Utc::now();
        Self {
            path,
            status: Mutex::new(StatusFile {
                version: STATUS_VERSION.to_string(),
                started_at: now,
                pid: std::process::id(),
                config,
                runtime: StatusRuntime::default(),
                updated_at: now,
            }),
        }
    }

    pub fn update(
        &self,
        active_opportunities: usize,
        in_flight_executions: usize,
        exposure_quote: Decimal,
        perf: &PerformanceSnapshot,
    ) {
        let mut status = self.status.lock();
        status.runtime = StatusRuntime {
            active_opportunities,
            in_flight_executions,
            exposure_quote,
            total_executions: perf.total_executions,
            successful_executions: perf.successful_executions,
            cumulative_profit: perf.cumulative_profit,
            max_drawdown: perf.max_drawdown,
        };
    }

    /// Write the current status atomically via a staging file.
    pub fn write(&self) -> Result<()> {
        let json = self.render()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let staging = self.path.with_extension("tmp");
        let swapped = stage_and_swap(&staging, &self.path, json.as_bytes());
        if swapped.is_err() {
            let _ = fs::remove_file(&staging);
        }
        swapped.map_err(Into::into)
    }

    /// Stamp the update time and serialize under the lock; I/O happens
    /// after the lock is released.
    fn render(&self) -> Result<String> {
        let mut status = self.status.lock();
        status.updated_at = Utc::now();
        Ok(serde_json::to_string_pretty(&*status)?)
    }
}

/// Flush bytes to `staging`, then swap it over `target`. The rename is the
/// atomic step; a crash leaves either the old file intact or a stray
/// staging file, never a torn target.
fn stage_and_swap(staging: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(staging)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    fs::rename(staging, target)
}
