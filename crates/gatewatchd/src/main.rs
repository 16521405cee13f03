use anyhow::{Context, Result};
use gatewatch_core::{CooldownTracker, Gallery, RecognitionAdapter, RemoteEngine};
use gatewatch_hw::actuator::ActuatorLink;
use gatewatch_hw::{frame, Actuator, FrameBuffer, HttpActuatorLink};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatcher;
mod engine;
mod error;
mod feed;
mod pipeline;
mod routes;
mod state;
mod store;

use config::Config;
use dispatcher::AlertDispatcher;
use engine::EngineError;
use pipeline::FramePipeline;
use state::{AppState, SharedState};
use store::{DocumentStore, ObjectStore, RestDocumentStore, RestObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gatewatchd=info,gatewatch_core=info,gatewatch_hw=info,tower_http=info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatewatchd starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        bind = %config.bind_addr,
        gallery = %config.gallery_dir.display(),
        engine = %config.engine_url,
        cooldown_secs = config.cooldown_secs,
        alert_on_known = config.alert_on_known,
        "configuration loaded"
    );
    for reason in config.degraded_reasons() {
        tracing::warn!("degraded: {reason}");
    }

    let engine = {
        let engine_url = config.engine_url.clone();
        let gallery_dir = config.gallery_dir.clone();
        let (floor, threshold) = (config.presence_floor, config.match_threshold);
        let timeout = Duration::from_secs(config.engine_timeout_secs);
        engine::spawn_engine(
            move || {
                let detector = RemoteEngine::new(&engine_url, timeout)?;
                let embedder = RemoteEngine::new(&engine_url, timeout)?;
                let gallery = Gallery::open(&gallery_dir)?;
                Ok::<_, EngineError>(
                    RecognitionAdapter::new(detector, embedder, gallery).with_thresholds(floor, threshold),
                )
            },
            timeout,
        )
        .await
        .context("starting recognition engine")?
    };

    let dispatch_timeout = Duration::from_secs(config.dispatch_timeout_secs);
    let documents = match &config.document_store_url {
        Some(url) => Some(Arc::new(RestDocumentStore::new(url, dispatch_timeout)?) as Arc<dyn DocumentStore>),
        None => None,
    };
    let objects = match &config.object_store_url {
        Some(url) => Some(Arc::new(RestObjectStore::new(
            url,
            config.object_public_url.as_deref(),
            dispatch_timeout,
        )?) as Arc<dyn ObjectStore>),
        None => None,
    };
    let dispatcher = AlertDispatcher::new(documents, objects, config.alert_source.clone(), dispatch_timeout);

    let link = match &config.actuator_url {
        Some(url) => {
            let timeout = Duration::from_millis(config.actuator_timeout_ms);
            Some(Arc::new(HttpActuatorLink::new(url, timeout)?) as Arc<dyn ActuatorLink>)
        }
        None => None,
    };

    let shared = Arc::new(SharedState::new(
        FrameBuffer::new(frame::placeholder_jpeg()?),
        CooldownTracker::new(config.cooldown_secs),
        Actuator::new(link),
        config.alert_on_known,
    ));
    let pipeline = Arc::new(FramePipeline::new(engine.clone(), shared.clone(), dispatcher));

    let bind_addr = config.bind_addr.clone();
    let app = routes::create_router(AppState {
        config: Arc::new(config),
        shared,
        engine,
        pipeline,
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "gatewatchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("gatewatchd shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
