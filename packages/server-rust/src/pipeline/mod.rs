//! Command-ingestion and response pipeline.
//!
//! Data flow: command topic -> [`CommandReader`] (decode) -> capacity-1 channel
//! -> [`Processor`] -> handler stack ([`CommandDispatcher`] behind the
//! [`middleware`] layers) -> [`ResultWriter`] -> result topic.
//!
//! Reader and processor each own one background task governed by a
//! [`Lifecycle`]; [`DispatchPipeline`] wires them together.

pub mod app;
pub mod config;
pub mod domain;
pub mod handler;
pub mod lifecycle;
pub mod middleware;
pub mod processor;
pub mod reader;
pub mod writer;

pub use app::{DispatchPipeline, PipelineError};
pub use config::{BackoffConfig, PipelineConfig, RetryConfig};
pub use handler::{CommandDispatcher, HandleError};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleState};
pub use processor::Processor;
pub use reader::{CommandReader, ReadError};
pub use writer::{ResultWriter, WriteError};
