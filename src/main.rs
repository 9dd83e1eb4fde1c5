/// Account portal server
///
/// Registration, activation, password reset and login for a category-scoped
/// user base.
use account_portal::{config::ServerConfig, context::AppContext, server};
use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so the log format can follow it
    let config = ServerConfig::from_env().context("failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "account_portal=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting account portal");

    let ctx = AppContext::new(config)
        .await
        .context("failed to initialize application context")?;

    server::serve(ctx).await?;

    Ok(())
}
