use axum::serve;
use instrument_catalog::api::{create_router, CatalogState};
use instrument_catalog::config::AppConfig;
use instrument_catalog::logic::Reconciler;
use instrument_catalog::store::SqliteStore;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    println!("Instrument catalog server");

    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    let database_url = config.database_url();
    println!("Opening SQLite database {}...", database_url);
    let sqlite_store = SqliteStore::new(&database_url, config.max_connections()).await?;

    println!("Running database migrations...");
    sqlite_store.migrate().await?;

    let export_dir = config.export_dir();
    std::fs::create_dir_all(&export_dir)?;

    let reconciler =
        Reconciler::new(Arc::new(sqlite_store)).with_options(config.reconcile_options());
    let state = Arc::new(CatalogState::new(
        reconciler,
        export_dir.clone(),
        config.export.expiry_warning_days,
    ));

    run_server(create_router(&export_dir).with_state(state), &config).await?;

    Ok(())
}

async fn run_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("Instrument catalog running on http://{}", bind_address);
    println!("Exported sheets served under http://{}/exports", bind_address);

    serve(listener, app).await?;

    Ok(())
}
