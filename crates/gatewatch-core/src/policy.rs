//! Alert decision policy.
//!
//! Unknown faces always alert (subject to cooldown). Known faces only alert
//! when `alert_on_known` is enabled.

use crate::types::RecognitionOutcome;
use serde::{Deserialize, Serialize};

/// Kind of alert written to the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    UnauthorizedAccess,
    KnownPersonEntry,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnauthorizedAccess => "unauthorized_access",
            Self::KnownPersonEntry => "known_person_entry",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision {
    /// Alert-eligible but inside the subject's cooldown window.
    Suppressed { subject: String },
    /// Known subject while known-subject alerting is off.
    Informational { subject: String },
    Alerted { subject: String, kind: AlertKind },
}

impl AlertDecision {
    pub fn subject(&self) -> &str {
        match self {
            Self::Suppressed { subject }
            | Self::Informational { subject }
            | Self::Alerted { subject, .. } => subject,
        }
    }

    pub fn alert_kind(&self) -> Option<AlertKind> {
        match self {
            Self::Alerted { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Decide what to do with a recognition outcome.
///
/// `suppressed` is the cooldown answer for the outcome's subject; callers
/// pass `false` for frames that bypass cooldown.
pub fn decide(outcome: &RecognitionOutcome, suppressed: bool, alert_on_known: bool) -> AlertDecision {
    let subject = outcome.subject().to_string();

    if !outcome.is_known() {
        return if suppressed {
            AlertDecision::Suppressed { subject }
        } else {
            AlertDecision::Alerted {
                subject,
                kind: AlertKind::UnauthorizedAccess,
            }
        };
    }

    if !alert_on_known {
        return AlertDecision::Informational { subject };
    }

    if suppressed {
        AlertDecision::Suppressed { subject }
    } else {
        AlertDecision::Alerted {
            subject,
            kind: AlertKind::KnownPersonEntry,
        }
    }
}
