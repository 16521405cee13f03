//! Per-frame processing: presence, identity, cooldown, policy, dispatch,
//! live-view update.
//!
//! Every step fails soft. Whatever the engine or the stores do, a decoded
//! frame always ends in a [`Detection`] and always reaches the live view.

use crate::dispatcher::AlertDispatcher;
use crate::engine::EngineHandle;
use crate::state::SharedState;
use bytes::Bytes;
use gatewatch_core::{decide, AlertDecision, AlertKind, RecognitionOutcome, UNKNOWN_SUBJECT};
use gatewatch_hw::frame::VIEW_JPEG_QUALITY;
use gatewatch_hw::{ActuatorState, Frame, Provenance};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectStatus {
    Success,
    Alerted,
    Skipped,
}

/// `POST /detect` reply.
#[derive(Debug, Clone, Serialize)]
pub struct DetectResponse {
    pub status: DetectStatus,
    pub name: String,
    pub message: String,
    pub servo_cmd: ActuatorState,
}

/// What the pipeline concluded about one frame.
#[derive(Debug, Clone)]
pub struct Detection {
    /// `None` when no face passed the presence check.
    pub decision: Option<AlertDecision>,
    pub actuator: ActuatorState,
}

impl Detection {
    pub fn response(&self) -> DetectResponse {
        let (status, name, message) = match &self.decision {
            None => (
                DetectStatus::Success,
                UNKNOWN_SUBJECT.to_string(),
                "No face detected in frame".to_string(),
            ),
            Some(AlertDecision::Informational { subject }) => (
                DetectStatus::Success,
                subject.clone(),
                format!("Known person: {subject} (alerts disabled)"),
            ),
            Some(AlertDecision::Alerted {
                subject,
                kind: AlertKind::UnauthorizedAccess,
            }) => (
                DetectStatus::Alerted,
                subject.clone(),
                "Unauthorized access: unknown person detected".to_string(),
            ),
            Some(AlertDecision::Alerted {
                subject,
                kind: AlertKind::KnownPersonEntry,
            }) => (
                DetectStatus::Alerted,
                subject.clone(),
                format!("Known person entry: {subject}"),
            ),
            Some(AlertDecision::Suppressed { subject }) => (
                DetectStatus::Skipped,
                subject.clone(),
                format!("Alert suppressed for {subject} (cooldown active)"),
            ),
        };
        DetectResponse {
            status,
            name,
            message,
            servo_cmd: self.actuator,
        }
    }
}

pub struct FramePipeline {
    engine: EngineHandle,
    shared: Arc<SharedState>,
    dispatcher: AlertDispatcher,
}

impl FramePipeline {
    pub fn new(engine: EngineHandle, shared: Arc<SharedState>, dispatcher: AlertDispatcher) -> Self {
        Self {
            engine,
            shared,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    pub async fn process(&self, frame: Frame) -> Detection {
        self.run(frame, || chrono::Utc::now().timestamp()).await
    }

    /// Process `frame` with `now` (unix seconds) as the cooldown clock.
    #[cfg(test)]
    pub async fn process_at(&self, frame: Frame, now: i64) -> Detection {
        self.run(frame, move || now).await
    }

    async fn run(&self, frame: Frame, clock: impl FnOnce() -> i64) -> Detection {
        let jpeg = self.encode(&frame).await;
        let decision = self.evaluate(&frame, jpeg.clone(), clock).await;
        if let Some(jpeg) = jpeg {
            self.shared.frames.publish(frame.sequence, jpeg);
        }
        tracing::debug!(
            sequence = frame.sequence,
            elapsed_ms = frame.timestamp.elapsed().as_millis() as u64,
            "frame processed"
        );
        Detection {
            decision,
            actuator: self.shared.actuator.state(),
        }
    }

    /// `clock` is read only once recognition has finished, so the cooldown
    /// sees when the decision was made rather than when the frame arrived.
    async fn evaluate(
        &self,
        frame: &Frame,
        jpeg: Option<Bytes>,
        clock: impl FnOnce() -> i64,
    ) -> Option<AlertDecision> {
        let faces = match self.engine.detect_presence(frame.image.clone()).await {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "presence check unavailable; treating as no face");
                Vec::new()
            }
        };
        if faces.is_empty() {
            tracing::debug!(sequence = frame.sequence, "no face in frame");
            return None;
        }

        let outcome = match self.engine.match_identity(frame.image.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, sequence = frame.sequence, "identity match unavailable; treating as unknown");
                RecognitionOutcome::no_face()
            }
        };

        let suppressed = match frame.provenance {
            Provenance::Stream => self.shared.cooldown.should_suppress(outcome.subject(), clock()),
            Provenance::Manual => false,
        };
        let decision = decide(&outcome, suppressed, self.shared.alert_on_known());
        tracing::info!(
            sequence = frame.sequence,
            provenance = ?frame.provenance,
            subject = decision.subject(),
            confidence = outcome.confidence(),
            ?decision,
            "frame decided"
        );

        if decision.alert_kind().is_some() {
            if let Err(e) = self.dispatcher.dispatch(jpeg, &decision, &outcome).await {
                tracing::warn!(error = %e, subject = decision.subject(), "alert dispatch failed");
            }
        }
        Some(decision)
    }

    /// Encode once off the runtime; the bytes feed both the live view and
    /// any alert evidence upload.
    async fn encode(&self, frame: &Frame) -> Option<Bytes> {
        let frame = frame.clone();
        let sequence = frame.sequence;
        let encoded = tokio::task::spawn_blocking(move || frame.to_jpeg(VIEW_JPEG_QUALITY)).await;
        match encoded {
            Ok(Ok(jpeg)) => Some(Bytes::from(jpeg)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, sequence, "cannot encode frame");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame encoder task failed");
                None
            }
        }
    }
}
