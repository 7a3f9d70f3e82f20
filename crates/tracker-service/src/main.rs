//! Tracker relay service.
//!
//! Run with: `cargo run -p tracker-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, middleware};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tracker_core::{CommandPublisher, PushGateway, SqliteStateStore, StateStore};
use tracker_service::{
    AppState, BrokerApiPublisher, Config, DisconnectedPublisher, HttpPushGateway, api,
    middleware::api_key_auth, ws,
};

/// Tracker relay: MQTT ingestion, REST API and live updates.
#[derive(Parser, Debug)]
#[command(name = "tracker-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Do not connect to the broker (webhook and API only).
    #[arg(long)]
    no_mqtt: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tracker_service=info".parse()?)
                .add_directive("tracker_core=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default().unwrap_or_default(),
    };

    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if args.no_mqtt {
        config.mqtt.enabled = false;
    }
    config.validate()?;

    info!("Opening database at {:?}", config.storage.path);
    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStateStore::open(&config.storage.path)
            .with_context(|| format!("opening {}", config.storage.path.display()))?,
    );

    let cancel = CancellationToken::new();

    #[cfg(feature = "mqtt")]
    let transport = if config.mqtt.enabled {
        Some(
            tracker_service::mqtt::MqttTransport::new(&config.mqtt)
                .map_err(|e| anyhow::anyhow!("invalid MQTT configuration: {}", e))?,
        )
    } else {
        info!("MQTT transport disabled");
        None
    };
    #[cfg(not(feature = "mqtt"))]
    if config.mqtt.enabled {
        warn!("Built without the mqtt feature; broker subscription is unavailable");
    }

    let publisher: Arc<dyn CommandPublisher> = if config.broker_api.enabled {
        info!("Publishing commands through the broker API");
        Arc::new(BrokerApiPublisher::new(&config.broker_api)?)
    } else {
        #[cfg(feature = "mqtt")]
        let mqtt_publisher: Option<Arc<dyn CommandPublisher>> = transport
            .as_ref()
            .map(|t| Arc::new(t.publisher()) as Arc<dyn CommandPublisher>);
        #[cfg(not(feature = "mqtt"))]
        let mqtt_publisher: Option<Arc<dyn CommandPublisher>> = None;

        mqtt_publisher.unwrap_or_else(|| {
            warn!("No command publisher configured; device commands will fail");
            Arc::new(DisconnectedPublisher)
        })
    };

    let push: Option<Arc<dyn PushGateway>> = if config.push.enabled {
        Some(Arc::new(HttpPushGateway::new(&config.push)?))
    } else {
        None
    };

    let security = Arc::new(config.security.clone());
    let bind = config.server.bind.clone();

    let (state, workers) = AppState::new(config, store, publisher, push);

    #[cfg(feature = "mqtt")]
    let transport_task = transport.map(|t| t.spawn(workers.ingress(), cancel.clone()));

    let mut tasks = workers.spawn(&cancel);
    #[cfg(feature = "mqtt")]
    tasks.extend(transport_task);

    let app = Router::new()
        .merge(api::router())
        .merge(ws::router())
        .layer(middleware::from_fn_with_state(security, api_key_auth))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = bind.parse()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!("Background task failed: {}", e);
        }
    }

    Ok(())
}
