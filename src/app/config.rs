//! Application configuration.
//!
//! Loaded from a TOML file with environment overrides for secrets and the
//! handful of knobs operators flip without editing files: log level,
//! dashboard port, demo mode, and the global risk caps. Strategy parameter
//! bags are tagged variants; unknown fields are rejected at load time.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::domain::{
    FeeSchedule, Symbol, SymbolPrecision, TradeLimits, Venue, VenueId, VenueKind, VenueRegistry,
};
use crate::error::{ConfigError, Result};
use crate::risk::RiskLimits;
use crate::strategy::{
    BasisParams, BasisStrategy, SimpleCrossVenueParams, SimpleCrossVenueStrategy, Strategy,
    StrategyRegistry, TriangularParams, TriangularStrategy,
};

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Dashboard observer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dashboard_port")]
    pub port: u16,
    #[serde(default = "default_status_file")]
    pub status_file: String,
}

fn default_true() -> bool {
    true
}

fn default_dashboard_port() -> u16 {
    8088
}

fn default_status_file() -> String {
    "skimmer-status.json".to_string()
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_dashboard_port(),
            status_file: default_status_file(),
        }
    }
}

/// Per-venue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    pub id: VenueId,
    #[serde(default)]
    pub kind: VenueKind,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub limits: TradeLimits,
    #[serde(default)]
    pub high_risk: bool,
    /// Requests per second granted to the adapter's token bucket.
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    /// Populated from the environment, never from the file.
    #[serde(skip)]
    pub credentials: Credentials,
}

fn default_rate_limit_rps() -> f64 {
    10.0
}

/// API credentials, held only in memory.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

/// One configured strategy with its typed parameter bag.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategySpec {
    Simple(SimpleCrossVenueParams),
    Triangular(TriangularParams),
    Basis(BasisParams),
}

impl StrategySpec {
    #[must_use]
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            Self::Simple(params) => Box::new(SimpleCrossVenueStrategy::new(params.clone())),
            Self::Triangular(params) => Box::new(TriangularStrategy::new(params.clone())),
            Self::Basis(params) => Box::new(BasisStrategy::new(params.clone())),
        }
    }

    fn venue_ids(&self) -> Vec<&VenueId> {
        match self {
            Self::Simple(p) => p.venues.iter().collect(),
            Self::Triangular(p) => vec![&p.venue],
            Self::Basis(p) => vec![&p.spot_venue, &p.perp_venue],
        }
    }
}

/// Execution coordinator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_queue_bound() -> usize {
    16
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_bound: default_queue_bound(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Scanner timing settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerSettings {
    #[serde(default = "default_scan_period_ms")]
    pub scan_period_ms: u64,
    #[serde(default = "default_sweep_period_ms")]
    pub sweep_period_ms: u64,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

fn default_scan_period_ms() -> u64 {
    1_000
}

fn default_sweep_period_ms() -> u64 {
    5_000
}

fn default_max_active() -> usize {
    50
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            scan_period_ms: default_scan_period_ms(),
            sweep_period_ms: default_sweep_period_ms(),
            max_active: default_max_active(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Demo mode: venues are served by the in-memory demo adapter.
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub venues: Vec<VenueConfig>,
    /// Per-symbol precision overrides, keyed by `"BASE/QUOTE"`.
    #[serde(default)]
    pub symbol_precisions: HashMap<Symbol, SymbolPrecision>,
    #[serde(default)]
    pub strategies: Vec<StrategySpec>,
    #[serde(default)]
    pub risk: RiskLimits,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub scanner: ScannerSettings,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

fn default_database() -> String {
    "skimmer.db".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    30
}

impl Config {
    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse from TOML without touching the filesystem.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("SKIMMER_LOG") {
            self.logging.level = level;
        }
        if let Ok(port) = std::env::var("SKIMMER_DASHBOARD_PORT") {
            if let Ok(port) = port.parse() {
                self.dashboard.port = port;
            }
        }
        if let Ok(flag) = std::env::var("SKIMMER_DEMO") {
            self.demo_mode = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(cap) = std::env::var("SKIMMER_MAX_TOTAL_EXPOSURE") {
            if let Ok(cap) = cap.parse() {
                self.risk.max_total_exposure_quote = cap;
            }
        }
        if let Ok(cap) = std::env::var("SKIMMER_MAX_DAILY_LOSS") {
            if let Ok(cap) = cap.parse() {
                self.risk.max_loss_per_day_quote = cap;
            }
        }
        for venue in &mut self.venues {
            let prefix = format!("SKIMMER_{}", venue.id.as_str().to_uppercase().replace('-', "_"));
            venue.credentials.api_key = std::env::var(format!("{prefix}_API_KEY")).ok();
            venue.credentials.api_secret = std::env::var(format!("{prefix}_API_SECRET")).ok();
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for venue in &self.venues {
            if !seen.insert(venue.id.clone()) {
                return Err(ConfigError::InvalidValue {
                    field: "venues",
                    reason: format!("duplicate venue id {}", venue.id),
                }
                .into());
            }
        }
        for spec in &self.strategies {
            for venue in spec.venue_ids() {
                if !seen.contains(venue) {
                    return Err(ConfigError::InvalidValue {
                        field: "strategies",
                        reason: format!("strategy references unknown venue {venue}"),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Initialize the tracing subscriber. Safe to call more than once.
    pub fn init_logging(&self) {
        let filter = EnvFilter::try_new(&self.logging.level)
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    /// Build the venue registry from configuration.
    #[must_use]
    pub fn build_venue_registry(&self) -> VenueRegistry {
        let mut registry = VenueRegistry::new();
        for venue in &self.venues {
            registry.add(
                Venue::new(
                    venue.id.clone(),
                    venue.kind,
                    venue.fees.clone(),
                    venue.limits.clone(),
                )
                .with_high_risk(venue.high_risk),
            );
        }
        for (symbol, precision) in &self.symbol_precisions {
            registry.set_precision(symbol.clone(), *precision);
        }
        registry
    }

    /// Build the strategy registry in configuration order.
    #[must_use]
    pub fn build_strategy_registry(&self) -> StrategyRegistry {
        let mut registry = StrategyRegistry::new();
        for spec in &self.strategies {
            registry.register(spec.build());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SAMPLE: &str = r#"
        demo_mode = true
        database = ":memory:"

        [logging]
        level = "debug"

        [[venues]]
        id = "demo-a"
        kind = "demo"

        [[venues]]
        id = "demo-b"
        kind = "demo"
        high_risk = true
        fees = { taker_rate = "0.002", maker_rate = "0.001" }

        [[strategies]]
        type = "simple"
        symbols = ["BTC/USDT"]
        venues = ["demo-a", "demo-b"]
        min_profit_pct = "0.2"
        max_position_quote = "100"

        [symbol_precisions."BTC/USDT"]
        amount = 4
        price = 2

        [risk]
        max_loss_per_day_quote = "500"
    "#;

    #[test]
    fn parses_sample_config() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert!(config.demo_mode);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.venues.len(), 2);
        assert!(config.venues[1].high_risk);
        assert_eq!(config.venues[1].fees.taker_rate, dec!(0.002));
        assert_eq!(config.strategies.len(), 1);
        assert_eq!(config.risk.max_loss_per_day_quote, dec!(500));
        // Untouched knobs keep their defaults.
        assert_eq!(config.execution.max_concurrent, 4);
        assert_eq!(config.scanner.max_active, 50);
        assert_eq!(config.shutdown_grace_secs, 30);
    }

    #[test]
    fn unknown_strategy_field_is_rejected() {
        let raw = r#"
            [[venues]]
            id = "demo-a"

            [[strategies]]
            type = "simple"
            symbols = ["BTC/USDT"]
            venues = ["demo-a"]
            min_profit_pct = "0.2"
            max_position_quote = "100"
            surprise_field = 1
        "#;
        assert!(Config::from_toml(raw).is_err());
    }

    #[test]
    fn strategy_referencing_unknown_venue_fails_validation() {
        let raw = r#"
            [[venues]]
            id = "demo-a"

            [[strategies]]
            type = "simple"
            symbols = ["BTC/USDT"]
            venues = ["demo-a", "ghost"]
            min_profit_pct = "0.2"
            max_position_quote = "100"
        "#;
        let config = Config::from_toml(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_venue_ids_fail_validation() {
        let raw = r#"
            [[venues]]
            id = "demo-a"

            [[venues]]
            id = "demo-a"
        "#;
        let config = Config::from_toml(raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn builds_registries_from_sample() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let venues = config.build_venue_registry();
        assert_eq!(venues.len(), 2);
        assert_eq!(venues.taker_rate(&VenueId::from("demo-b")), dec!(0.002));
        assert_eq!(venues.amount_precision(&Symbol::new("BTC", "USDT")), 4);
        // Unconfigured symbols fall back to the default precision.
        assert_eq!(venues.amount_precision(&Symbol::new("ETH", "USDT")), 8);

        let strategies = config.build_strategy_registry();
        assert_eq!(strategies.names(), vec!["simple_cross_venue"]);
    }

    #[test]
    fn triangular_and_basis_specs_parse() {
        let raw = r#"
            [[venues]]
            id = "x"

            [[venues]]
            id = "perp-x"
            kind = "perpetual"

            [[strategies]]
            type = "triangular"
            venue = "x"
            assets = ["BTC", "ETH", "USDT"]
            symbols = ["ETH/BTC", "ETH/USDT", "BTC/USDT"]
            min_profit_pct = "0.4"
            max_position_quote = "1000"

            [[strategies]]
            type = "basis"
            spot_venue = "x"
            perp_venue = "perp-x"
            symbol = "BTC/USDT"
            min_profit_pct = "5"
            max_position_quote = "10000"
        "#;
        let config = Config::from_toml(raw).unwrap();
        config.validate().unwrap();
        let strategies = config.build_strategy_registry();
        assert_eq!(strategies.names(), vec!["triangular", "basis_carry"]);
    }
}
