use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use token_governor::{config::Settings, server, store::BucketStore, Limiter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,token_governor=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env().context("failed to load settings")?;

    let store = BucketStore::new(settings.max_buckets).with_stale_after(settings.stale_after);
    let limiter = match settings.sweep_interval {
        Some(every) => Limiter::init(Limiter::with_store(store), every),
        None => Arc::new(Limiter::with_store(store)),
    };

    let app = server::router(limiter);

    let listener = TcpListener::bind(settings.addr())
        .await
        .with_context(|| format!("failed to bind {}", settings.addr()))?;
    info!(
        addr = %settings.addr(),
        max_buckets = settings.max_buckets,
        sweep_interval = ?settings.sweep_interval,
        "listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
