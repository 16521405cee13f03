//! Alert dispatch: evidence upload plus the alert record.

use crate::store::{DocumentStore, ObjectStore, StoreError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use gatewatch_core::{AlertDecision, AlertKind, RecognitionOutcome};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Collection alert records are written to.
pub const ALERTS_COLLECTION: &str = "alerts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectStatus {
    Known,
    Unknown,
}

/// Document written for every dispatched alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AlertKind,
    pub subject_status: SubjectStatus,
    pub subject_name: String,
    pub confidence: f64,
    /// Public URL of the evidence image; empty if the upload failed.
    pub image_url: String,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("decision is not an alert")]
    NotAnAlert,
    #[error("cannot serialize alert record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("document store: {0}")]
    Document(#[source] StoreError),
    #[error("dispatch did not finish within {0:?}")]
    Timeout(Duration),
}

pub struct AlertDispatcher {
    documents: Option<Arc<dyn DocumentStore>>,
    objects: Option<Arc<dyn ObjectStore>>,
    source: String,
    timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(
        documents: Option<Arc<dyn DocumentStore>>,
        objects: Option<Arc<dyn ObjectStore>>,
        source: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            documents,
            objects,
            source: source.into(),
            timeout,
        }
    }

    pub fn has_document_store(&self) -> bool {
        self.documents.is_some()
    }

    pub fn has_object_store(&self) -> bool {
        self.objects.is_some()
    }

    /// Upload the evidence JPEG and write the alert record for an `Alerted`
    /// decision. `None` evidence records the alert without an image.
    pub async fn dispatch(
        &self,
        evidence: Option<Bytes>,
        decision: &AlertDecision,
        outcome: &RecognitionOutcome,
    ) -> Result<AlertRecord, DispatchError> {
        let kind = decision.alert_kind().ok_or(DispatchError::NotAnAlert)?;
        tokio::time::timeout(self.timeout, self.run(evidence, decision.subject(), kind, outcome))
            .await
            .map_err(|_| DispatchError::Timeout(self.timeout))?
    }

    async fn run(
        &self,
        evidence: Option<Bytes>,
        subject: &str,
        kind: AlertKind,
        outcome: &RecognitionOutcome,
    ) -> Result<AlertRecord, DispatchError> {
        let timestamp = Utc::now();
        let image_url = self.upload_evidence(evidence, timestamp).await;

        let record = AlertRecord {
            source: self.source.clone(),
            timestamp,
            kind,
            subject_status: if outcome.is_known() {
                SubjectStatus::Known
            } else {
                SubjectStatus::Unknown
            },
            subject_name: subject.to_string(),
            confidence: outcome.confidence(),
            image_url,
        };

        let Some(documents) = &self.documents else {
            tracing::warn!(kind = kind.as_str(), subject, "no document store configured; alert not persisted");
            return Ok(record);
        };

        let document = serde_json::to_value(&record)?;
        let id = documents
            .create(ALERTS_COLLECTION, document)
            .await
            .map_err(DispatchError::Document)?;
        tracing::info!(id = %id, kind = kind.as_str(), subject, image_url = %record.image_url, "alert recorded");
        Ok(record)
    }

    /// Public URL of the uploaded frame, or empty on any failure.
    async fn upload_evidence(&self, evidence: Option<Bytes>, at: DateTime<Utc>) -> String {
        let Some(objects) = &self.objects else {
            return String::new();
        };
        let Some(jpeg) = evidence else {
            tracing::warn!("no evidence image for alert");
            return String::new();
        };

        let key = object_key(at);
        match objects.upload(&key, jpeg, "image/jpeg").await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "alert image upload failed; recording alert without image");
                String::new()
            }
        }
    }
}

/// `alerts/<yyyymmddThhmmss>_<8 hex>.jpg`, timestamp in UTC.
pub fn object_key(at: DateTime<Utc>) -> String {
    format!(
        "alerts/{}_{:08x}.jpg",
        at.format("%Y%m%dT%H%M%S"),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{MemoryDocuments, MemoryObjects};
    use chrono::TimeZone;

    fn evidence() -> Option<Bytes> {
        Some(Bytes::from_static(b"\xff\xd8jpeg\xff\xd9"))
    }

    fn unknown_alert() -> (AlertDecision, RecognitionOutcome) {
        (
            AlertDecision::Alerted {
                subject: "Unknown".into(),
                kind: AlertKind::UnauthorizedAccess,
            },
            RecognitionOutcome::unknown(),
        )
    }

    #[test]
    fn test_object_key_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let key = object_key(at);
        assert!(key.starts_with("alerts/20240309T070501_"));
        assert!(key.ends_with(".jpg"));
        let suffix = &key["alerts/20240309T070501_".len()..key.len() - 4];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_dispatch_writes_record() {
        let docs = Arc::new(MemoryDocuments::default());
        let objects = Arc::new(MemoryObjects::new(false));
        let dispatcher = AlertDispatcher::new(
            Some(docs.clone() as Arc<dyn DocumentStore>),
            Some(objects.clone() as Arc<dyn ObjectStore>),
            "ESP32-CAM",
            Duration::from_secs(5),
        );

        let (decision, outcome) = unknown_alert();
        let record = dispatcher.dispatch(evidence(), &decision, &outcome).await.unwrap();
        assert_eq!(record.kind, AlertKind::UnauthorizedAccess);
        assert!(record.image_url.starts_with("https://objects.test/alerts/"));

        let (collection, doc) = docs.docs.lock().unwrap()[0].clone();
        assert_eq!(collection, ALERTS_COLLECTION);
        assert_eq!(doc["kind"], "unauthorized_access");
        assert_eq!(doc["subjectStatus"], "unknown");
        assert_eq!(doc["subjectName"], "Unknown");
        assert_eq!(doc["source"], "ESP32-CAM");
        assert_eq!(doc["imageUrl"], record.image_url.as_str());
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_alert() {
        let docs = Arc::new(MemoryDocuments::default());
        let dispatcher = AlertDispatcher::new(
            Some(docs.clone() as Arc<dyn DocumentStore>),
            Some(Arc::new(MemoryObjects::new(true)) as Arc<dyn ObjectStore>),
            "cam",
            Duration::from_secs(5),
        );

        let (decision, outcome) = unknown_alert();
        let record = dispatcher.dispatch(evidence(), &decision, &outcome).await.unwrap();
        assert_eq!(record.image_url, "");
        assert_eq!(docs.last().unwrap()["imageUrl"], "");
    }

    #[tokio::test]
    async fn test_missing_evidence_skips_upload() {
        let docs = Arc::new(MemoryDocuments::default());
        let objects = Arc::new(MemoryObjects::new(false));
        let dispatcher = AlertDispatcher::new(
            Some(docs.clone() as Arc<dyn DocumentStore>),
            Some(objects.clone() as Arc<dyn ObjectStore>),
            "cam",
            Duration::from_secs(5),
        );

        let (decision, outcome) = unknown_alert();
        let record = dispatcher.dispatch(None, &decision, &outcome).await.unwrap();
        assert_eq!(record.image_url, "");
        assert!(objects.keys.lock().unwrap().is_empty());
        assert_eq!(docs.count(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_stores_are_noop() {
        let dispatcher = AlertDispatcher::new(None, None, "cam", Duration::from_secs(5));
        let decision = AlertDecision::Alerted {
            subject: "alice".into(),
            kind: AlertKind::KnownPersonEntry,
        };
        let outcome = RecognitionOutcome::known("alice", 0.2);
        let record = dispatcher.dispatch(evidence(), &decision, &outcome).await.unwrap();
        assert_eq!(record.subject_status, SubjectStatus::Known);
        assert!((record.confidence - 80.0).abs() < 1e-9);
        assert_eq!(record.image_url, "");
    }

    #[tokio::test]
    async fn test_non_alert_is_rejected() {
        let dispatcher = AlertDispatcher::new(None, None, "cam", Duration::from_secs(5));
        let decision = AlertDecision::Informational { subject: "alice".into() };
        let outcome = RecognitionOutcome::known("alice", 0.2);
        assert!(matches!(
            dispatcher.dispatch(evidence(), &decision, &outcome).await,
            Err(DispatchError::NotAnAlert)
        ));
    }
}
