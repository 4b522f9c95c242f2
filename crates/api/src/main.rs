use std::sync::Arc;

use anyhow::Context;

use erpguard_api::app::{AppState, build_app};
use erpguard_api::bootstrap;
use erpguard_api::config::{AppConfig, Cli};
use erpguard_api::routing::RouteTable;
use erpguard_infra::{PermissionCache, PermissionStore, PostgresPermissionStore, RedisCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let config = AppConfig::load(&cli.conf)
        .with_context(|| format!("loading configuration from {}", cli.conf.display()))?;

    erpguard_observability::init(&config.logging);

    let store: Arc<dyn PermissionStore> = match &config.database {
        Some(db) => Arc::new(
            PostgresPermissionStore::connect(db)
                .await
                .context("connecting to the permission database")?,
        ),
        None => {
            let Some(seed) = &config.bootstrap else {
                anyhow::bail!(
                    "no database configured; set `database`, or `bootstrap.admin_user_id` to run on the in-memory store"
                );
            };
            tracing::warn!("no database configured; using the in-memory store");
            Arc::new(
                bootstrap::seed_in_memory(seed)
                    .await
                    .context("seeding the in-memory store")?,
            )
        }
    };

    let mut cache = PermissionCache::new(&config.cache);
    if let Some(redis) = &config.cache.redis {
        let shared = RedisCache::new(redis).context("building the redis pool")?;
        if let Err(e) = shared.warm_up(redis.min_idle_conns).await {
            tracing::warn!(error = %e, "redis warm-up failed; continuing");
        }
        cache = cache.with_shared(Arc::new(shared));
    }

    let routes = RouteTable::builtin()
        .with_overrides(&config.routes.overrides)
        .context("applying route overrides")?;

    let state = AppState::new(&config.jwt, store, Arc::new(cache));
    let app = build_app(state, routes, config.server.request_timeout());

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
