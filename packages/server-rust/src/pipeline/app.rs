//! Wiring of reader, handler stack, processor and writer into one pipeline.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::PipelineConfig;
use super::handler::CommandDispatcher;
use super::lifecycle::LifecycleError;
use super::middleware::{build_command_pipeline, CommandPipeline};
use super::processor::Processor;
use super::reader::CommandReader;
use super::writer::{ResultWriter, WriteError};
use crate::traits::{CourierUseCases, MessageSink, MessageSource};

/// Errors from starting or shutting down the whole pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("closing result writer: {0}")]
    Writer(#[from] WriteError),
}

/// The complete command pipeline over injected broker clients.
///
/// The pipeline never closes `source`; its owner does, after [`shutdown`](Self::shutdown).
pub struct DispatchPipeline {
    reader: Arc<CommandReader>,
    writer: Arc<ResultWriter>,
    processor: Processor<CommandPipeline>,
}

impl DispatchPipeline {
    #[must_use]
    pub fn new(
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn MessageSink>,
        couriers: Arc<dyn CourierUseCases>,
        config: &PipelineConfig,
    ) -> Self {
        let reader = Arc::new(CommandReader::new(
            source,
            config.wire_format,
            config.read_backoff,
        ));
        let writer = Arc::new(ResultWriter::new(
            sink,
            config.result_topic.clone(),
            config.wire_format,
        ));
        let handler = build_command_pipeline(CommandDispatcher::new(couriers), config);
        let processor = Processor::new(
            Arc::clone(&reader),
            Arc::clone(&writer),
            handler,
            config.publish_retry,
        )
        .with_idle_backoff(config.read_backoff);

        Self {
            reader,
            writer,
            processor,
        }
    }

    /// Starts the reader, then the processor, both under children of `root`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Lifecycle`] if either component is already
    /// running. A reader started by this call is stopped again on failure.
    pub async fn start(&self, root: &CancellationToken) -> Result<(), PipelineError> {
        self.reader.start(root)?;
        if let Err(err) = self.processor.start(root) {
            if let Err(rollback) = self.reader.stop().await {
                warn!(error = %rollback, "failed to stop reader after processor start failure");
            }
            return Err(err.into());
        }
        info!("pipeline started");
        Ok(())
    }

    /// Stops the processor, then the reader, then closes the writer.
    ///
    /// Every step runs even if an earlier one fails; the first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError`] encountered.
    pub async fn shutdown(&self) -> Result<(), PipelineError> {
        let processor = self.processor.stop().await;
        let reader = self.reader.stop().await;
        let writer = self.writer.close().await;
        info!("pipeline stopped");

        processor?;
        reader?;
        writer?;
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.processor.is_running() && self.reader.is_running()
    }
}
