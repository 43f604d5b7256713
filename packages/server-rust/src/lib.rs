//! Dispatch Server: consumes courier commands from a broker topic, runs them
//! through the dispatcher, and publishes correlated results.

pub mod broker;
pub mod logging;
pub mod pipeline;
pub mod traits;

pub use broker::{BrokerError, BrokerMessage, MemoryTopic, OutboundMessage};
pub use pipeline::{DispatchPipeline, PipelineConfig, PipelineError};
pub use traits::{CourierUseCases, MessageSink, MessageSource, UseCaseError};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
