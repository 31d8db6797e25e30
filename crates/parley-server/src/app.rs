use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::cache::{MemoryCache, RedisCache, TokenCache};
use parley_api::token::TokenIssuer;
use parley_api::{AppState, AppStateInner, routes};
use parley_db::Database;
use parley_gateway::exchange::{MemoryExchange, RedisExchange};
use parley_gateway::{ConnectionRegistry, Exchange, Fanout};

use crate::config::Config;

/// Open the store, connect the cache and broker, and declare the exchange.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let db = Database::open(&config.db_path)?;

    let (cache, exchange) = match &config.redis_url {
        Some(url) => {
            let cache: Arc<dyn TokenCache> = Arc::new(RedisCache::connect(url).await?);
            let exchange: Arc<dyn Exchange> =
                Arc::new(RedisExchange::connect(url, config.exchange.clone()).await?);
            info!("Using redis for token cache and fanout");
            (cache, exchange)
        }
        None => {
            info!("PARLEY_REDIS_URL unset, running single-node in-process cache and fanout");
            let cache: Arc<dyn TokenCache> = Arc::new(MemoryCache::new());
            let exchange: Arc<dyn Exchange> = Arc::new(MemoryExchange::new(config.exchange.clone()));
            (cache, exchange)
        }
    };

    let fanout = Fanout::new(exchange, config.publish_timeout);
    fanout.declare().await?;
    info!(exchange = %fanout.exchange_name(), "Exchange declared");

    Ok(Arc::new(AppStateInner {
        db,
        tokens: TokenIssuer::new(&config.jwt_secret, cache),
        registry: ConnectionRegistry::new(),
        fanout,
    }))
}

/// Bind the configured address. The host may be a name or a bare IPv6
/// address; the port is given separately.
pub async fn bind(config: &Config) -> anyhow::Result<TcpListener> {
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {} port {}", config.host, config.port))
}

pub fn router(state: AppState) -> Router {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `shutdown` resolves. On shutdown every live connection is
/// closed so the graceful drain does not wait on open sockets.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let registry = state.registry.clone();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            let live = registry.len().await;
            registry.close_all().await;
            info!(live, "Closed live connections");
        })
        .await?;

    Ok(())
}
