//! Cross-cutting services: event stream, notifications, performance, status.

mod notifier;
mod perf;
mod status;

pub use notifier::{Event, LogNotifier, Notifier, NotifierRegistry, NullNotifier};
pub use perf::{PerformanceSnapshot, PerformanceTracker};
pub use status::{StatusConfig, StatusFile, StatusRuntime, StatusWriter};
