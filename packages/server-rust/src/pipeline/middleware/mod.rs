//! Tower middleware layers around the command dispatcher.
//!
//! - [`timeout`]: Per-command handler timeout
//! - [`metrics`]: Command timing and counting via `tracing` spans and `metrics`
//! - [`pipeline`]: Composes all layers into a single service stack

pub mod metrics;
pub mod pipeline;
pub mod timeout;

pub use metrics::MetricsLayer;
pub use pipeline::{build_command_pipeline, CommandPipeline};
pub use timeout::TimeoutLayer;
