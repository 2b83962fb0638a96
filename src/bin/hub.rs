use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use upwatch::{
    actors::DistributorHandle,
    config::read_config_file,
    probe::Prober,
    storage,
    util::get_config_path,
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to UPWATCH_CONFIG)
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("upwatch", LevelFilter::TRACE),
        ("hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    if let Err(e) = dotenv::dotenv() {
        trace!("no .env file loaded: {e}");
    }

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&get_config_path(args.file))?;

    let storage = storage::open(&config.storage.clone().unwrap_or_default())
        .await
        .context("failed to open storage")?;

    let seeded = storage::seed_monitors(storage.as_ref(), &config.monitors)
        .await
        .context("failed to seed configured monitors")?;
    if seeded > 0 {
        info!("seeded {seeded} monitors from the config file");
    }

    let prober = Prober::new().context("failed to build HTTP client")?;
    let distributor = DistributorHandle::spawn(Arc::new(prober), Arc::clone(&storage));

    let started = distributor.resume(storage.as_ref()).await?;
    info!("started {started} active monitors");

    #[cfg(feature = "api")]
    {
        use upwatch::util::get_api_token;

        let mut api_config = config.api.clone().unwrap_or_default();
        api_config.token = get_api_token(api_config.token);
        if api_config.token.is_none() {
            warn!("API is running without authentication");
        }

        let state = upwatch::api::ApiState::new(distributor.clone(), Arc::clone(&storage));
        upwatch::api::spawn_api_server(&api_config, state).await?;
    }
    #[cfg(not(feature = "api"))]
    {
        if config.api.is_some() {
            warn!("compiled without the api feature, ignoring API configuration");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    distributor.shutdown().await?;
    storage.close().await?;

    Ok(())
}
