use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use common::config::Config;
use storefront::order_storage::OrderStorage;
use storefront::payments::StripeGateway;
use storefront::server::{AppState, run_backend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "config/backend.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    println!("Loading config from: {}", args.config);
    let config = Config::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.backend.log_level)),
        )
        .init();

    tracing::info!("Starting {} backend", config.common.project_name);

    let storage = Arc::new(OrderStorage::new(&config.common.database_url).await?);
    let gateway = Arc::new(StripeGateway::new(
        config.payments.secret_key.clone(),
        config.payments.api_base.clone(),
    ));

    let state = AppState {
        storage,
        gateway,
        payments: config.payments.clone(),
    };

    run_backend(config.backend, state).await
}
