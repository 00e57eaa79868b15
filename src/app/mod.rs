//! Application layer: configuration, shared state, supervisor.

pub mod config;
pub mod state;
pub mod supervisor;

pub use config::{Config, StrategySpec, VenueConfig};
pub use state::AppState;
pub use supervisor::{health_check, Mode, RunOutcome, Supervisor};
