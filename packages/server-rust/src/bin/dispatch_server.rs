//! Dispatch server entry point.
//!
//! Usage: dispatch-server [--courier <id>]... [--wire-format json|msgpack]
//!
//! Reads newline-delimited command envelopes from stdin and writes result
//! envelopes to stdout, one per line. Logs go to stderr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use dispatch_core::messages::CATALOGUE_VERSION;
use dispatch_core::{CourierId, WireFormat};
use dispatch_server::broker::{LineSink, LineSource};
use dispatch_server::logging::{init_tracing, LogFormat};
use dispatch_server::pipeline::domain::CourierPool;
use dispatch_server::pipeline::{BackoffConfig, DispatchPipeline, PipelineConfig, RetryConfig};
use dispatch_server::MessageSource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Upper bound on runtime teardown once the pipeline has stopped.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Command dispatcher: consumes courier commands and publishes results.
#[derive(Parser, Debug)]
#[command(name = "dispatch-server", version)]
#[command(about = "Consume courier commands and publish correlated results")]
struct Args {
    /// Topic label for consumed commands.
    #[arg(long, env = "DISPATCH_COMMAND_TOPIC", default_value = "create_order.commands")]
    command_topic: String,

    /// Topic label for published results.
    #[arg(long, env = "DISPATCH_RESULT_TOPIC", default_value = "courier.results")]
    result_topic: String,

    /// Envelope encoding on both topics (json, msgpack).
    #[arg(long, env = "DISPATCH_WIRE_FORMAT", default_value = "json")]
    wire_format: WireFormat,

    /// Log output format.
    #[arg(long, env = "DISPATCH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Default log directive when RUST_LOG is unset.
    #[arg(long, env = "DISPATCH_LOG", default_value = "info")]
    log_level: String,

    /// Per-command handler timeout in milliseconds.
    #[arg(long, env = "DISPATCH_HANDLER_TIMEOUT_MS", default_value_t = 30_000)]
    handler_timeout_ms: u64,

    /// First delay after a broker read error, in milliseconds.
    #[arg(long, env = "DISPATCH_READ_BACKOFF_INITIAL_MS", default_value_t = 50)]
    read_backoff_initial_ms: u64,

    /// Upper bound on the broker read backoff, in milliseconds.
    #[arg(long, env = "DISPATCH_READ_BACKOFF_MAX_MS", default_value_t = 5_000)]
    read_backoff_max_ms: u64,

    /// Extra publish attempts before a result is dropped.
    #[arg(long, env = "DISPATCH_PUBLISH_RETRIES", default_value_t = 0)]
    publish_retries: u32,

    /// Delay between publish attempts, in milliseconds.
    #[arg(long, env = "DISPATCH_PUBLISH_RETRY_DELAY_MS", default_value_t = 100)]
    publish_retry_delay_ms: u64,

    /// Courier available for assignment. Repeat, or comma-separate in the env var.
    #[arg(long = "courier", env = "DISPATCH_COURIERS", value_delimiter = ',')]
    couriers: Vec<String>,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            command_topic: self.command_topic.clone(),
            result_topic: self.result_topic.clone(),
            wire_format: self.wire_format,
            handler_timeout: Duration::from_millis(self.handler_timeout_ms),
            read_backoff: BackoffConfig {
                initial: Duration::from_millis(self.read_backoff_initial_ms),
                max: Duration::from_millis(self.read_backoff_max_ms),
                ..BackoffConfig::default()
            },
            publish_retry: RetryConfig {
                attempts: self.publish_retries,
                delay: Duration::from_millis(self.publish_retry_delay_ms),
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format, &args.log_level)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let outcome = runtime.block_on(run(args));
    // A pending stdin read parks a blocking thread; do not wait on it forever.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    outcome
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.pipeline_config();
    let couriers = CourierPool::new(
        args.couriers
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| CourierId::new(c.trim())),
    );
    info!(
        catalogue_version = CATALOGUE_VERSION,
        command_topic = %config.command_topic,
        result_topic = %config.result_topic,
        wire_format = %config.wire_format,
        couriers = couriers.len(),
        "dispatch server starting"
    );

    let source = Arc::new(LineSource::stdin(config.command_topic.clone()));
    let sink = Arc::new(LineSink::stdout(config.result_topic.clone()));
    let pipeline = DispatchPipeline::new(source.clone(), sink, Arc::new(couriers), &config);

    let root = CancellationToken::new();
    pipeline.start(&root).await?;

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    info!("shutdown signal received");

    root.cancel();
    let stopped = pipeline.shutdown().await;
    if let Err(err) = source.close().await {
        error!(error = %err, "closing command source");
    }
    stopped?;

    info!("dispatch server stopped");
    Ok(())
}
