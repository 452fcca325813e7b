use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use dataglass::{AppState, api::routes::create_router, config::Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dataglass=debug")),
        )
        .with_target(true)
        .with_line_number(true)
        .init();

    let config = Config::load()?;
    let server_addr = config.server_addr;
    if config.firecrawl_api_key.is_none() || config.llm_api_key.is_none() {
        tracing::warn!("API keys missing; extraction requests will fail until they are set");
    }

    let app_state = AppState::new(config).await?;
    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr).await?;
    tracing::info!(%server_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
