use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod pipeline;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();
    let engine = engine::spawn_engine(&config)?;

    tracing::info!("rollcalld ready");
    http::serve(&config.bind, engine).await?;

    tracing::info!("rollcalld shutting down");
    Ok(())
}
