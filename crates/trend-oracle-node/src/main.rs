//! oracle-node: run the trend oracle once, continuously, or expansion only.

use std::sync::Arc;

use actix_web::{middleware::Logger, web, App, HttpServer};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use oracle_node::{bootstrap, metrics::register_metrics, routes, CycleScheduler, NodeConfig};

#[derive(Debug, Parser)]
#[command(name = "oracle-node", version, about = "Trend oracle: score, deploy, harvest, expand")]
struct Cli {
    /// Run a cycle now and then every CHECK_INTERVAL_MS until Ctrl-C
    #[arg(short, long)]
    continuous: bool,

    /// Run only the expansion check
    #[arg(short, long, conflicts_with = "continuous")]
    expand: bool,

    /// Account to check for expansion (defaults to WALLET_ADDRESS)
    #[arg(long, requires = "expand")]
    wallet: Option<String>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = NodeConfig::from_env()?;
    if cli.expand {
        config = config.for_expand_only();
    }
    for warning in config.validate()? {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        dry_run = config.dry_run,
        expansion = config.enable_expansion,
        max_deploys = config.max_deploys_per_run,
        min_score = config.min_trend_score,
        "Configuration loaded"
    );

    if let Err(e) = register_metrics() {
        tracing::warn!("Failed to register metrics: {e}");
    }

    let scheduler = Arc::new(bootstrap::build_scheduler(&config)?);

    if cli.expand {
        let account = cli
            .wallet
            .or_else(|| config.wallet_address.clone())
            .unwrap_or_default();
        let replica = scheduler.expand_only(&account).await?;
        println!("{}", serde_json::to_string_pretty(&replica)?);
        return Ok(());
    }

    if !cli.continuous {
        if let Some(report) = scheduler.tick().await {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        return Ok(());
    }

    if let Some(port) = config.port {
        let data = web::Data::from(Arc::clone(&scheduler));
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .wrap(Logger::default())
                .configure(routes::configure)
        })
        .bind(("0.0.0.0", port))?
        .run();
        tracing::info!(port, "Status server listening");
        tokio::spawn(server);
    }

    run_until_ctrl_c(scheduler, config.check_interval).await;
    Ok(())
}

async fn run_until_ctrl_c(scheduler: Arc<CycleScheduler>, interval: std::time::Duration) {
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Keep the sender alive; a dropped sender reads as a stop.
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl-C received, finishing current cycle");
        let _ = stop_tx.send(true);
    });

    scheduler.run_continuous(interval, stop_rx).await;
}
