use backend::config::Config;
use backend::{app, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let state = AppState::from_config(&config).await?;
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        persist = ?config.persist_path,
        strategy = ?config.strategy,
        "starting secret santa server"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
