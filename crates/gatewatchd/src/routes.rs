//! HTTP API.

use crate::error::{ApiError, Result};
use crate::feed::{FrameFeed, BOUNDARY};
use crate::pipeline::DetectResponse;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    http::header,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use gatewatch_hw::{ActuatorRequest, ActuatorState, Frame, FrameError, Provenance};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted upload (camera frames and reference images).
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Frames
        .route("/detect", post(detect))
        .route("/video_feed", get(video_feed))
        // Gallery
        .route("/register", post(register))
        // Device
        .route("/control", post(control))
        // Settings
        .route("/settings/alert-known", get(get_alert_known).post(set_alert_known))
        // Status
        .route("/stats", get(stats))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Image bytes plus any text fields sent alongside them.
#[derive(Default)]
struct Upload {
    image: Option<Bytes>,
    fields: HashMap<String, String>,
}

/// Accept either a multipart form (`image` file field) or a raw `image/*` body.
async fn read_upload(state: &AppState, request: Request) -> Result<Upload> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let mut upload = Upload::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "image" {
                let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                upload.image = Some(bytes);
            } else {
                let text = field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
                upload.fields.insert(name, text);
            }
        }
        return Ok(upload);
    }

    if content_type.starts_with("image/") || content_type == "application/octet-stream" {
        let bytes = Bytes::from_request(request, state)
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        return Ok(Upload {
            image: Some(bytes),
            ..Upload::default()
        });
    }

    Err(ApiError::BadRequest(format!(
        "expected multipart/form-data or image/* body, got {content_type:?}"
    )))
}

// ========================================
// Frames
// ========================================

#[derive(Debug, Default, Deserialize)]
pub struct DetectQuery {
    pub source: Option<String>,
}

async fn detect(
    State(state): State<AppState>,
    Query(query): Query<DetectQuery>,
    request: Request,
) -> Result<Json<DetectResponse>> {
    let mut upload = read_upload(&state, request).await?;
    let image = upload
        .image
        .take()
        .ok_or_else(|| ApiError::BadRequest("no image provided".into()))?;

    let provenance = match query.source.or_else(|| upload.fields.remove("source")) {
        Some(source) => source.parse::<Provenance>()?,
        None => Provenance::default(),
    };

    // Arrival order is fixed before any work happens. Decode and processing
    // run to completion even if the client goes away.
    let sequence = state.shared.frames.next_sequence();
    let pipeline = state.pipeline.clone();
    let detection = tokio::spawn(async move {
        let frame = tokio::task::spawn_blocking(move || Frame::decode(&image, provenance, sequence))
            .await
            .map_err(|e| ApiError::Internal(format!("decoder task failed: {e}")))??;
        tracing::debug!(sequence, ?provenance, width = frame.width(), height = frame.height(), "frame received");
        Ok::<_, ApiError>(pipeline.process(frame).await)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("pipeline task failed: {e}")))??;

    Ok(Json(detection.response()))
}

async fn video_feed(State(state): State<AppState>) -> Result<Response> {
    let period = Duration::from_millis(state.config.feed_interval_ms);
    let feed = FrameFeed::new(state.shared.clone(), period);
    Response::builder()
        .header(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={BOUNDARY}"),
        )
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(feed.into_stream()))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

// ========================================
// Gallery
// ========================================

async fn register(State(state): State<AppState>, request: Request) -> Result<Json<Value>> {
    let mut upload = read_upload(&state, request).await?;
    let name = upload
        .fields
        .remove("name")
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing name".into()))?;
    let image = upload
        .image
        .take()
        .ok_or_else(|| ApiError::BadRequest("missing image".into()))?;

    let decoded = tokio::task::spawn_blocking(move || {
        if image.is_empty() {
            return Err(FrameError::Empty);
        }
        image::load_from_memory(&image).map_err(FrameError::Decode)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("decoder task failed: {e}")))??;

    state.engine.register(name.clone(), Arc::new(decoded)).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Registered {name}"),
    })))
}

// ========================================
// Device
// ========================================

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
    pub servo_cmd: ActuatorState,
}

async fn control(
    State(state): State<AppState>,
    request: std::result::Result<Json<ActuatorRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>> {
    let Json(request) = request.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let servo_cmd = state.shared.actuator.apply(&request).await?;
    Ok(Json(ControlResponse {
        status: "success",
        servo_cmd,
    }))
}

// ========================================
// Settings
// ========================================

#[derive(Debug, Serialize, Deserialize)]
pub struct AlertKnownSetting {
    pub enabled: bool,
}

async fn get_alert_known(State(state): State<AppState>) -> Json<AlertKnownSetting> {
    Json(AlertKnownSetting {
        enabled: state.shared.alert_on_known(),
    })
}

async fn set_alert_known(
    State(state): State<AppState>,
    setting: std::result::Result<Json<AlertKnownSetting>, JsonRejection>,
) -> Result<Json<AlertKnownSetting>> {
    let Json(setting) = setting.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let previous = state.shared.set_alert_on_known(setting.enabled);
    if previous != setting.enabled {
        tracing::info!(enabled = setting.enabled, "known-subject alerting changed");
    }
    Ok(Json(AlertKnownSetting {
        enabled: setting.enabled,
    }))
}

// ========================================
// Status
// ========================================

async fn stats(State(state): State<AppState>) -> Json<Value> {
    let (known_persons, status) = match state.engine.subject_count().await {
        Ok(count) => (count, "online"),
        Err(e) => {
            tracing::warn!(error = %e, "cannot count gallery subjects");
            (0, "degraded")
        }
    };
    Json(json!({
        "known_persons": known_persons,
        "cameras": state.config.camera_count,
        "status": status,
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let dispatcher = state.pipeline.dispatcher();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "document_store": dispatcher.has_document_store(),
        "object_store": dispatcher.has_object_store(),
        "actuator": state.shared.actuator.has_device(),
    }))
}
