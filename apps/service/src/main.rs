use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pulse::config::Config;
use pulse::monitoring::{CheckResult, MonitoringScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "pulse", version, about = "Periodic endpoint monitoring")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/pulse/config.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the loaded configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn log_result(result: &CheckResult) {
    let summary = format!(
        "{} [{}] {} → {} (success={}) (duration={}ms)",
        result.status.icon(),
        result.monitor_id,
        result.kind,
        result.status,
        result.success,
        result.duration.as_millis(),
    );

    match (&result.error, &result.message) {
        (Some(err), _) => warn!("{} {}", summary, err),
        (None, Some(message)) => info!("{} {}", summary, message),
        (None, None) => info!("{}", summary),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_ref()).context("failed to load config")?;
    if cli.print_config {
        print!("{}", config);
        return Ok(());
    }

    let monitors = config.build_monitors().context("invalid monitor definition")?;
    info!("🚀 Starting pulse with {} monitors", monitors.len());

    let root = CancellationToken::new();
    let (scheduler, mut results) =
        MonitoringScheduler::with_capacity(root.clone(), monitors, config.channel_capacity);

    let ctrl_c = root.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        ctrl_c.cancel();
    });

    let scheduler = std::sync::Arc::new(scheduler);
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let shutdown = scheduler.cancellation_token();
    loop {
        tokio::select! {
            result = results.recv() => match result {
                Some(result) => log_result(&result),
                None => {
                    warn!("Result channel closed");
                    break;
                }
            },
            _ = shutdown.cancelled() => {
                warn!("Scheduler context cancelled, stopping listener.");
                break;
            }
        }
    }

    runner.await.context("scheduler task failed")??;
    Ok(())
}
