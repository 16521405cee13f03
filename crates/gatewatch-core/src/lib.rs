//! gatewatch-core — recognition and alert decision logic.
//!
//! Wraps an external face engine behind fail-soft calls, keeps the gallery
//! of known subjects, and decides when a frame warrants an alert.

pub mod cooldown;
pub mod engine;
pub mod gallery;
pub mod policy;
pub mod recognition;
pub mod remote;
pub mod types;

pub use cooldown::CooldownTracker;
pub use engine::{Embedder, EngineError, PresenceDetector};
pub use gallery::Gallery;
pub use policy::{decide, AlertDecision, AlertKind};
pub use recognition::RecognitionAdapter;
pub use remote::RemoteEngine;
pub use types::{Embedding, FaceCandidate, RecognitionOutcome, UNKNOWN_SUBJECT};
