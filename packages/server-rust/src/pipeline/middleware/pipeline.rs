//! Pipeline composition: wraps the dispatcher in the middleware layers.

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use super::timeout::{TimeoutLayer, TimeoutService};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::handler::CommandDispatcher;

/// The handler stack the processor drives.
pub type CommandPipeline<S = CommandDispatcher> = MetricsService<TimeoutService<S>>;

/// Build the command pipeline by wrapping `handler` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome, timeouts included
/// 2. `TimeoutLayer` -- enforce `config.handler_timeout`
#[must_use]
pub fn build_command_pipeline<S>(handler: S, config: &PipelineConfig) -> CommandPipeline<S> {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .layer(TimeoutLayer::new(config.handler_timeout))
        .service(handler)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
