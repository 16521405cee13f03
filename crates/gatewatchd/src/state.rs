use crate::config::Config;
use crate::engine::EngineHandle;
use crate::pipeline::FramePipeline;
use gatewatch_core::CooldownTracker;
use gatewatch_hw::{Actuator, FrameBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Mutable state shared by every request. Each field guards itself.
pub struct SharedState {
    pub frames: FrameBuffer,
    pub cooldown: CooldownTracker,
    pub actuator: Actuator,
    alert_on_known: AtomicBool,
}

impl SharedState {
    pub fn new(frames: FrameBuffer, cooldown: CooldownTracker, actuator: Actuator, alert_on_known: bool) -> Self {
        Self {
            frames,
            cooldown,
            actuator,
            alert_on_known: AtomicBool::new(alert_on_known),
        }
    }

    pub fn alert_on_known(&self) -> bool {
        self.alert_on_known.load(Ordering::SeqCst)
    }

    /// Set the toggle; returns the previous value.
    pub fn set_alert_on_known(&self, enabled: bool) -> bool {
        self.alert_on_known.swap(enabled, Ordering::SeqCst)
    }
}

/// Router state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub shared: Arc<SharedState>,
    pub engine: EngineHandle,
    pub pipeline: Arc<FramePipeline>,
}
