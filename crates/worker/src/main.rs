//! Runs the NLP stage of a pipeline, reading extraction requests from the bus
//! and relaying processed documents to the next configured stage.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod relay;

use error::Result;
use relay::RelayProcessor;

use std::time::Duration;

use clap::Parser;
use dossier_bootable::Bootable;
use dossier_nlp::{Monitorable, NlpApp, NlpAppOptions};
use dossier_pipeline::{DEFAULT_QUEUE_NAME, Stage, Stages};
use dossier_transport::{
    DEFAULT_ADDRESS, DEFAULT_STREAM_PREFIX, PipelineConfig, Transport, TransportConfig,
    TransportFactory,
};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Bus and queue backend: memory, nats or jetstream.
    #[arg(long, env = "DOSSIER_TRANSPORT", default_value_t = Transport::Memory)]
    transport: Transport,

    #[arg(long, env = "DOSSIER_BUS_ADDRESS", default_value = DEFAULT_ADDRESS)]
    bus_address: String,

    #[arg(long, env = "DOSSIER_BUS_USER")]
    bus_user: Option<String>,

    #[arg(long, env = "DOSSIER_BUS_PASSWORD", hide_env_values = true)]
    bus_password: Option<String>,

    #[arg(long, env = "DOSSIER_CONNECT_ATTEMPTS", default_value_t = 10)]
    connect_attempts: u32,

    #[arg(long, env = "DOSSIER_CONNECT_BACKOFF_MS", default_value_t = 500)]
    connect_backoff_ms: u64,

    #[arg(long, env = "DOSSIER_STREAM_PREFIX", default_value = DEFAULT_STREAM_PREFIX)]
    stream_prefix: String,

    /// Comma separated stages run by this deployment, empty for all of them.
    #[arg(long, env = "DOSSIER_STAGES", default_value = "")]
    stages: Stages,

    #[arg(long, env = "DOSSIER_QUEUE_NAME", default_value = DEFAULT_QUEUE_NAME)]
    queue_name: String,

    #[arg(long, env = "DOSSIER_PARALLELISM", default_value_t = 1)]
    parallelism: usize,

    #[arg(long, env = "DOSSIER_QUEUE_SIZE", default_value_t = dossier_nlp::DEFAULT_QUEUE_SIZE)]
    queue_size: usize,

    #[arg(long, env = "DOSSIER_PROGRESS_INTERVAL_SECS", default_value_t = 10)]
    progress_interval_secs: u64,

    #[arg(long, env = "DOSSIER_LOG_LEVEL", default_value_t = Level::INFO)]
    log_level: Level,
}

impl Args {
    fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            transport: self.transport,
            address: self.bus_address.clone(),
            user: self.bus_user.clone(),
            password: self.bus_password.clone(),
            connect_attempts: self.connect_attempts,
            connect_backoff: Duration::from_millis(self.connect_backoff_ms),
            stream_prefix: self.stream_prefix.clone(),
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            stages: self.stages.clone(),
            queue_name: self.queue_name.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(args.log_level)
            .finish(),
    )?;

    let namer = args.pipeline_config().namer();
    let output = namer.output_queue_name(Stage::Nlp)?;
    info!(stages = %args.stages, output = %output, transport = %args.transport, "starting NLP worker");

    let factory = TransportFactory::new(args.transport_config(), "dossier-worker");
    let bus = factory.bus().await?;
    let queue = factory.queue(&output).await?;

    let app = NlpApp::new(
        bus,
        RelayProcessor::new(output, queue),
        NlpAppOptions {
            parallelism: args.parallelism,
            queue_size: args.queue_size,
            ..NlpAppOptions::default()
        },
    );
    app.start().await?;

    let mut progress = tokio::time::interval(Duration::from_secs(args.progress_interval_secs.max(1)));
    progress.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                if let Err(e) = app.shutdown().await {
                    error!(error = %e, "NLP pool did not shut down cleanly");
                    return Err(e.into());
                }
                break;
            }
            () = app.wait() => {
                info!("bus requested shutdown");
                break;
            }
            _ = progress.tick() => {
                info!(progress = app.progress_rate(), completed = app.completed(), "NLP progress");
            }
        }
    }

    info!(completed = app.completed(), "NLP worker stopped");

    Ok(())
}
