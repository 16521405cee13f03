//! Pan/tilt servo and LED actuator bridge.
//!
//! Requests are clamped and merged into the local state first, then forwarded
//! to the device. A forwarding failure is reported to the caller but the local
//! state keeps the requested values.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Servo travel limit in degrees, for both axes.
pub const ANGLE_MAX: u8 = 180;

/// Servo center, used at startup.
pub const ANGLE_CENTER: u8 = 90;

/// Default timeout for a single device command.
pub const DEFAULT_DEVICE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorState {
    pub pan: u8,
    pub tilt: u8,
    #[serde(rename = "led")]
    pub illumination: bool,
}

impl Default for ActuatorState {
    fn default() -> Self {
        Self {
            pan: ANGLE_CENTER,
            tilt: ANGLE_CENTER,
            illumination: false,
        }
    }
}

/// A boolean as sent by loosely typed clients: `true`, `1`, `"on"`, ...
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Switch {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Switch {
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "on" | "true" | "yes"
            ),
        }
    }
}

/// `POST /control` body. Angles accept any number; they are rounded and
/// clamped to the servo range.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActuatorRequest {
    pub pan: Option<f64>,
    pub tilt: Option<f64>,
    #[serde(alias = "illumination")]
    pub led: Option<Switch>,
}

/// Clamped, validated values to send to the device. `None` = unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub pan: Option<u8>,
    pub tilt: Option<u8>,
    pub illumination: Option<bool>,
}

impl ActuatorCommand {
    pub fn from_request(request: &ActuatorRequest) -> Self {
        Self {
            pan: request.pan.map(clamp_angle),
            tilt: request.tilt.map(clamp_angle),
            illumination: request.led.as_ref().map(Switch::as_bool),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pan.is_none() && self.tilt.is_none() && self.illumination.is_none()
    }
}

impl ActuatorState {
    /// State with the command's present fields applied.
    pub fn merged(self, command: &ActuatorCommand) -> Self {
        Self {
            pan: command.pan.unwrap_or(self.pan),
            tilt: command.tilt.unwrap_or(self.tilt),
            illumination: command.illumination.unwrap_or(self.illumination),
        }
    }
}

pub fn clamp_angle(value: f64) -> u8 {
    value.round().clamp(0.0, f64::from(ANGLE_MAX)) as u8
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("device request failed: {0}")]
    Request(String),
    #[error("device returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The device did not accept the command; `state` is what was kept locally.
    #[error("actuator unreachable: {source}")]
    Forward {
        state: ActuatorState,
        #[source]
        source: LinkError,
    },
}

/// Transport to the physical actuator.
pub trait ActuatorLink: Send + Sync {
    fn send<'a>(&'a self, command: &'a ActuatorCommand) -> BoxFuture<'a, Result<(), LinkError>>;
}

/// Device speaking `GET /control?pan=&tilt=` and `GET /toggle?state=0|1`.
pub struct HttpActuatorLink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpActuatorLink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LinkError::Request(format!("client build: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<(), LinkError> {
        let url = format!("{}/{}", self.base_url, path);
        tracing::debug!(url = %url, ?query, "sending actuator command");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| LinkError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LinkError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

impl ActuatorLink for HttpActuatorLink {
    fn send<'a>(&'a self, command: &'a ActuatorCommand) -> BoxFuture<'a, Result<(), LinkError>> {
        Box::pin(async move {
            let mut query = Vec::new();
            if let Some(pan) = command.pan {
                query.push(("pan", pan.to_string()));
            }
            if let Some(tilt) = command.tilt {
                query.push(("tilt", tilt.to_string()));
            }
            if !query.is_empty() {
                self.get("control", &query).await?;
            }
            if let Some(on) = command.illumination {
                self.get("toggle", &[("state", u8::from(on).to_string())]).await?;
            }
            Ok(())
        })
    }
}

/// Shared actuator state plus an optional device link.
pub struct Actuator {
    state: Mutex<ActuatorState>,
    link: Option<Arc<dyn ActuatorLink>>,
}

impl Actuator {
    pub fn new(link: Option<Arc<dyn ActuatorLink>>) -> Self {
        Self {
            state: Mutex::new(ActuatorState::default()),
            link,
        }
    }

    pub fn has_device(&self) -> bool {
        self.link.is_some()
    }

    pub fn state(&self) -> ActuatorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clamp and apply `request`, then forward it to the device.
    pub async fn apply(&self, request: &ActuatorRequest) -> Result<ActuatorState, ActuatorError> {
        let command = ActuatorCommand::from_request(request);
        let state = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state = state.merged(&command);
            *state
        };

        if command.is_empty() {
            return Ok(state);
        }

        let Some(link) = &self.link else {
            tracing::debug!(?state, "no actuator device configured; state kept locally");
            return Ok(state);
        };

        match link.send(&command).await {
            Ok(()) => {
                tracing::info!(pan = state.pan, tilt = state.tilt, led = state.illumination, "actuator updated");
                Ok(state)
            }
            Err(source) => {
                tracing::warn!(error = %source, ?state, "actuator forward failed; keeping requested state");
                Err(ActuatorError::Forward { state, source })
            }
        }
    }
}
