//! ForHealth - nutrition data gateway.
//!
//! # API Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /foods/search` - Search local and external foods
//! - `GET /foods/barcode/:barcode` - Look up a product by barcode
//! - `GET /foods/external/:id` - Food detail from the external database
//! - `POST /foods` - Add a food to the local catalogue
//! - `POST /foods/records` - Record an eaten portion
//! - `GET /foods/records/daily` - Daily nutrition totals
//! - `POST /recipes/nutrition` - Total nutrition of a recipe

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use forhealth::api::{AppState, router};
use forhealth::catalog::FoodCatalog;
use forhealth::config::AppConfig;
use forhealth::data_sources::BooheeClient;
use forhealth::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("forhealth=info".parse()?))
        .init();

    let config = AppConfig::from_env()?;

    info!(
        port = config.port,
        db_url = %config.database_url,
        external_api = config.external.enabled,
        accounts = config.external.accounts.len(),
        "Starting ForHealth server"
    );

    // Initialize storage
    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let client = BooheeClient::new(&config.external)?;
    let state = AppState {
        catalog: FoodCatalog::new(storage, client),
    };

    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "ForHealth is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
