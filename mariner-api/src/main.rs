use anyhow::Context;
use mariner_api::{app, worker, AppState, AuthConfig, Repositories};
use mariner_core::{EventPublisher, TracingPublisher};
use mariner_store::app_config::{Config, StorageBackend};
use mariner_store::{DbClient, RedisClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mariner_api=debug,mariner_order=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Mariner API on port {}", config.server.port);

    let repos = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, state is lost on restart");
            Repositories::in_memory()
        }
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database.url, config.database.max_connections)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            Repositories::postgres(&db)
        }
    };

    // Redis is only needed for rate limiting
    let redis = match &config.redis {
        Some(redis) => Some(Arc::new(
            RedisClient::new(&redis.url).await.context("Failed to connect to Redis")?,
        )),
        None => None,
    };

    let events = event_publisher(&config)?;

    let state = AppState::new(
        repos,
        events,
        redis,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        config.business_rules.clone(),
    );

    tokio::spawn(worker::start_expiry_worker(
        state.orders.clone(),
        Duration::from_secs(config.business_rules.expiry_sweep_seconds.max(1)),
    ));

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(feature = "kafka")]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match &config.kafka {
        Some(kafka) => {
            let producer = mariner_store::EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?;
            Ok(Arc::new(producer))
        }
        None => Ok(Arc::new(TracingPublisher)),
    }
}

#[cfg(not(feature = "kafka"))]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    if config.kafka.is_some() {
        tracing::warn!("Kafka brokers configured but the kafka feature is disabled, logging events instead");
    }
    Ok(Arc::new(TracingPublisher))
}
