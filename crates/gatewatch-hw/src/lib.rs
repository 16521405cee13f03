//! gatewatch-hw — Camera-side plumbing: frames, live view, actuator.
//!
//! Decodes frames pushed by the camera, holds the latest one for viewers,
//! and drives the pan/tilt servos and LED over the device's HTTP protocol.

pub mod actuator;
pub mod frame;

pub use actuator::{Actuator, ActuatorError, ActuatorRequest, ActuatorState, HttpActuatorLink};
pub use frame::{Frame, FrameBuffer, FrameError, Provenance};
