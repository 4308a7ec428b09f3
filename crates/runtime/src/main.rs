use std::env;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use hostlink_bridge::HostBridge;
use hostlink_runtime::host::DevHost;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt::time::SystemTime};

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
enum LogFormat {
    /// Human-friendly text logs suitable for local development.
    Text,
    /// JSON logs for ingestion into systems such as Loki or OTLP collectors.
    Json,
}

#[derive(Parser, Debug)]
#[command(version, about = "hostlink demo host")]
struct DemoOptions {
    /// Log output format (text or JSON) for tracing events.
    #[arg(long, env = "HOSTLINK_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
    /// Number of work items to run through the bridge.
    #[arg(long, default_value_t = 4)]
    jobs: u64,
}

fn initialise_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(env::var("RUST_LOG").unwrap_or_else(|_| "info".into())))?;

    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter.clone())
                .with_target(false)
                .with_timer(SystemTime)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(false)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = DemoOptions::parse();
    initialise_tracing(args.log_format)?;

    let host = DevHost::start(0u64);
    let dispatcher = host.dispatcher();
    let bridge = HostBridge::register(&dispatcher, "demo-counter")?;

    info!("host started; submitting {} work items", args.jobs);
    for job in 1..=args.jobs {
        let outcome = bridge.run(move |total| {
            *total += job;
            *total
        })?;
        let total = outcome.await?;
        info!("job {job} committed; running total {total}");
    }

    let outcome = bridge.run(|_total| -> u64 { panic!("demo failure") })?;
    if let Err(failure) = outcome.await {
        info!("captured failure from host thread: {failure}");
    }

    let total = host.shutdown();
    info!("host stopped with final total {total}");
    Ok(())
}
