use motormatch_support::{app, config::Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // loads .env too, so RUST_LOG may come from there
    let config = Config::from_env()?;

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .init();

    tracing::info!(port = config.port, "starting support chat server");
    app::run(config).await
}
