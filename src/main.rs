use std::sync::{atomic::AtomicBool, Arc};

use anyhow::Result;
use depth_arb::{run, spawn_stop_watcher, Trader, TraderConfig};
use tracing::{error, info};

const CONFIG_FLAG: &str = "--config";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = trade(config).await {
        error!("{err:#}");
    }
    info!("exit");
}

fn load_config(args: &[String]) -> Result<TraderConfig> {
    match args {
        [flag, path] if flag == CONFIG_FLAG => TraderConfig::from_file(path),
        _ => TraderConfig::from_args(args),
    }
}

async fn trade(config: TraderConfig) -> Result<()> {
    let trader = Trader::connect(&config).await?;
    info!(symbol = %config.symbol, "connected, press Enter to stop");

    let stop = Arc::new(AtomicBool::new(false));
    spawn_stop_watcher(stop.clone());

    let stats = run(trader, stop).await?;
    info!(
        cycles = stats.cycles,
        buys = stats.buys,
        sells = stats.sells,
        blocked = stats.blocked,
        audit_log = %config.audit_log_path.display(),
        "stopped"
    );
    Ok(())
}

fn init_tracing() {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .finish(),
    )
    .is_err()
    {
        // Tracing already initialised elsewhere.
    }
}
