//! Skimmer - cross-venue arbitrage detection and execution.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── domain/     # Value types: venues, snapshots, opportunities, trades
//! ├── exchange/   # Venue adapter contract + demo venue, retry, breaker
//! ├── market/     # Market data cache (latest snapshot per venue/symbol)
//! ├── strategy/   # Pure candidate synthesis (simple, triangular, basis)
//! ├── scanner/    # Periodic strategy driver with dedup and expiry
//! ├── risk/       # Deterministic admission gate
//! ├── executor/   # Per-opportunity state machine and worker pool
//! ├── service/    # Event stream, notifiers, performance, status file
//! ├── db/         # Append-only SQLite audit
//! ├── app/        # Config, shared state, supervisor
//! └── cli/        # Process surface
//! ```
//!
//! Data flows adapter -> cache -> scanner -> risk gate -> coordinator ->
//! adapter, with the performance tracker and audit store observing the
//! event stream. The supervisor owns all cross-component wiring.

pub mod app;
pub mod cli;
pub mod db;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod market;
pub mod risk;
pub mod scanner;
pub mod service;
pub mod strategy;
