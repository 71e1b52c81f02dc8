//! Drone teleoperation kernel
//!
//! This crate drives a remotely piloted vehicle from a keyboard while showing the
//! vehicle's camera feed with object detections drawn on top.
//!
//! # Architecture
//!
//! One control cycle is: sense → perceive → display → act.
//!
//! 1. **Vehicle session** (`vehicle`): connection, arm/disarm, takeoff/land, frame
//!    capture and one-way motion commands.
//! 2. **Perception stage** (`detect`): detector backends plus the class/confidence
//!    filter and the annotation overlay.
//! 3. **Control loop** (`control`): the explicit state machine that owns the session
//!    and the operator surface and runs one iteration per `step()`.
//!
//! Keys are resolved to portable `KeySymbol`s at the surface boundary (`display`),
//! mapped to a `CommandIntent` (`input`) and then to a `MotionCommand` (`command`).
//!
//! # Module Structure
//!
//! - `frame`: Immutable RGB frames (scaling, ARGB conversion)
//! - `detect`: Detection types, backends, perception stage, annotation
//! - `vehicle`: Session trait, AirSim msgpack-rpc client, simulated vehicle
//! - `display`: Operator surface trait, desktop window, scripted surface
//! - `input`, `command`: Key → intent → motion command
//! - `control`: Control loop state machine
//! - `config`: File + environment configuration

use std::fmt;

pub mod command;
pub mod config;
pub mod control;
pub mod detect;
pub mod display;
pub mod frame;
pub mod input;
pub mod ui;
pub mod vehicle;

pub use command::{dispatch, CommandProfile, MotionCommand, OverlapPolicy};
pub use config::{DetectorSettings, DisplaySettings, TakeoffSettings, TeleopConfig, VehicleSettings};
pub use control::{
    launch, ControlLoop, FrameOutcome, LandingReason, LoopSettings, LoopState, LoopStats,
    TeardownReport, TeardownStep, Tick, TickReport,
};
pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionFilter, DetectionSet, DetectorBackend,
    Perception, StubBackend,
};
pub use display::{OperatorSurface, ScriptedSurface};
pub use frame::Frame;
pub use input::{CommandIntent, KeySymbol};
pub use vehicle::{AirSimSession, SessionCall, SimulatedSession, VehicleSession};

// -------------------- Errors --------------------

/// Failure classes the control loop distinguishes.
///
/// Carried inside `anyhow::Error`; use `downcast_ref::<TeleopError>()` to classify.
/// An empty capture is not an error and has no variant: sessions return `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeleopError {
    /// The vehicle link could not be established or confirmed. Fatal before takeoff.
    Connection(String),
    /// The detector failed on a frame. Costs one visual update, nothing more.
    Detection(String),
    /// The operator surface was closed or destroyed.
    SurfaceClosed,
    /// The vehicle link failed after setup.
    LinkLost(String),
    /// Configuration could not be loaded or failed validation.
    Config(String),
}

impl fmt::Display for TeleopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeleopError::Connection(msg) => write!(f, "vehicle connection failed: {}", msg),
            TeleopError::Detection(msg) => write!(f, "detection failed: {}", msg),
            TeleopError::SurfaceClosed => write!(f, "operator surface closed"),
            TeleopError::LinkLost(msg) => write!(f, "vehicle link lost: {}", msg),
            TeleopError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for TeleopError {}

/// Returns true when `err` (or anything in its chain) is a `TeleopError::Connection`.
pub fn is_connection_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<TeleopError>(),
            Some(TeleopError::Connection(_))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn connection_error_is_found_through_context() {
        let err: anyhow::Error = Err::<(), _>(TeleopError::Connection("refused".into()))
            .context("startup")
            .unwrap_err();
        assert!(is_connection_error(&err));
        assert!(!is_connection_error(&anyhow::anyhow!("other")));
    }

    #[test]
    fn display_messages_name_the_failure() {
        assert_eq!(
            TeleopError::LinkLost("eof".into()).to_string(),
            "vehicle link lost: eof"
        );
        assert_eq!(TeleopError::SurfaceClosed.to_string(), "operator surface closed");
    }
}
