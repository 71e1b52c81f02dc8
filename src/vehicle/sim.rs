//! Simulated vehicle (`stub://` addresses).
//!
//! Produces synthetic frames and records every call in order, so flights can be
//! rehearsed without a simulator and the control loop can be tested end to end.
//! `stub://offline` refuses to connect.

use anyhow::{anyhow, Result};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::config::VehicleSettings;
use crate::frame::Frame;
use crate::TeleopError;

use super::VehicleSession;

const DEFAULT_FRAME_WIDTH: u32 = 256;
const DEFAULT_FRAME_HEIGHT: u32 = 144;

/// One recorded call on the simulated vehicle.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionCall {
    EnableControl,
    Arm,
    Takeoff,
    MoveToAltitude { altitude_m: f32, velocity: f32 },
    Capture { camera: String, delivered: bool },
    MoveVelocityBody { vx: f32, vy: f32, vz: f32, duration: Duration },
    RotateYawRate { rate_deg_s: f32, duration: Duration },
    CancelLastTask,
    Land,
    Disarm,
    ReleaseControl,
}

/// Session operations that can be made to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionStep {
    Takeoff,
    MoveToAltitude,
    Capture,
    Command,
    Land,
    Disarm,
    ReleaseControl,
}

pub struct SimulatedSession {
    address: String,
    calls: Vec<SessionCall>,
    failing: HashSet<SessionStep>,
    capture_script: VecDeque<bool>,
    frame_width: u32,
    frame_height: u32,
    frames_captured: u64,
    altitude_m: f32,
    armed: bool,
    api_control: bool,
}

impl SimulatedSession {
    /// A simulated vehicle that has not been connected yet.
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            calls: Vec::new(),
            failing: HashSet::new(),
            capture_script: VecDeque::new(),
            frame_width: DEFAULT_FRAME_WIDTH,
            frame_height: DEFAULT_FRAME_HEIGHT,
            frames_captured: 0,
            altitude_m: 0.0,
            armed: false,
            api_control: false,
        }
    }

    /// Build, enable API control and arm.
    pub fn connect(settings: &VehicleSettings) -> Result<Self> {
        if settings.address == "stub://offline" {
            return Err(TeleopError::Connection(format!(
                "{} did not confirm the link",
                settings.address
            ))
            .into());
        }
        let mut session = Self::new(&settings.address);
        session.record(SessionCall::EnableControl);
        session.api_control = true;
        session.record(SessionCall::Arm);
        session.armed = true;
        log::info!("SimulatedSession: connected to {} (synthetic)", settings.address);
        Ok(session)
    }

    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Make `step` fail every time it is attempted.
    pub fn fail_on(mut self, step: SessionStep) -> Self {
        self.failing.insert(step);
        self
    }

    /// Script capture results: `false` entries produce empty captures. Once the
    /// script runs out every capture delivers a frame.
    pub fn script_captures(mut self, delivered: impl IntoIterator<Item = bool>) -> Self {
        self.capture_script.extend(delivered);
        self
    }

    /// Every call in order.
    pub fn calls(&self) -> &[SessionCall] {
        &self.calls
    }

    pub fn count(&self, pred: impl Fn(&SessionCall) -> bool) -> usize {
        self.calls.iter().filter(|call| pred(*call)).count()
    }

    /// Motion commands only, in dispatch order.
    pub fn motion_calls(&self) -> Vec<&SessionCall> {
        self.calls
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    SessionCall::MoveVelocityBody { .. } | SessionCall::RotateYawRate { .. }
                )
            })
            .collect()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn has_api_control(&self) -> bool {
        self.api_control
    }

    pub fn altitude_m(&self) -> f32 {
        self.altitude_m
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    fn record(&mut self, call: SessionCall) {
        self.calls.push(call);
    }

    fn check(&self, step: SessionStep) -> Result<()> {
        if self.failing.contains(&step) {
            return Err(anyhow!("simulated {:?} failure on {}", step, self.address));
        }
        Ok(())
    }

    /// Moving gradient plus a little sensor noise.
    fn synthetic_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.frame_width as usize, self.frame_height as usize);
        let shift = self.frames_captured as usize;
        let mut pixels = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                let noise: u8 = rand::random::<u8>() & 0x07;
                pixels.push((((x + shift) * 255 / w.max(1)) as u8).wrapping_add(noise));
                pixels.push(((y * 255 / h.max(1)) as u8).wrapping_add(noise));
                pixels.push(96u8.wrapping_add(noise));
            }
        }
        pixels
    }
}

impl VehicleSession for SimulatedSession {
    fn describe(&self) -> String {
        format!("simulated vehicle {}", self.address)
    }

    fn takeoff(&mut self) -> Result<()> {
        self.record(SessionCall::Takeoff);
        self.check(SessionStep::Takeoff)?;
        if !self.armed {
            return Err(anyhow!("cannot take off: vehicle is not armed"));
        }
        self.altitude_m = self.altitude_m.max(1.0);
        Ok(())
    }

    fn move_to_altitude(
        &mut self,
        altitude_m: f32,
        velocity: f32,
        _timeout: Duration,
    ) -> Result<()> {
        self.record(SessionCall::MoveToAltitude {
            altitude_m,
            velocity,
        });
        self.check(SessionStep::MoveToAltitude)?;
        self.altitude_m = altitude_m;
        Ok(())
    }

    fn capture_frame(&mut self, camera: &str) -> Result<Option<Frame>> {
        self.check(SessionStep::Capture)?;
        let delivered = self.capture_script.pop_front().unwrap_or(true);
        self.record(SessionCall::Capture {
            camera: camera.to_string(),
            delivered,
        });
        if !delivered {
            return Ok(None);
        }
        let pixels = self.synthetic_pixels();
        self.frames_captured += 1;
        Frame::from_rgb(pixels, self.frame_width, self.frame_height).map(Some)
    }

    fn move_velocity_body(
        &mut self,
        vx: f32,
        vy: f32,
        vz: f32,
        duration: Duration,
    ) -> Result<()> {
        self.check(SessionStep::Command)?;
        self.record(SessionCall::MoveVelocityBody {
            vx,
            vy,
            vz,
            duration,
        });
        Ok(())
    }

    fn rotate_yaw_rate(&mut self, rate_deg_s: f32, duration: Duration) -> Result<()> {
        self.check(SessionStep::Command)?;
        self.record(SessionCall::RotateYawRate {
            rate_deg_s,
            duration,
        });
        Ok(())
    }

    fn cancel_last_task(&mut self) -> Result<()> {
        self.check(SessionStep::Command)?;
        self.record(SessionCall::CancelLastTask);
        Ok(())
    }

    fn land(&mut self) -> Result<()> {
        self.record(SessionCall::Land);
        self.check(SessionStep::Land)?;
        self.altitude_m = 0.0;
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.record(SessionCall::Disarm);
        self.check(SessionStep::Disarm)?;
        self.armed = false;
        Ok(())
    }

    fn release_control(&mut self) -> Result<()> {
        self.record(SessionCall::ReleaseControl);
        self.check(SessionStep::ReleaseControl)?;
        self.api_control = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> SimulatedSession {
        SimulatedSession::connect(&VehicleSettings {
            address: "stub://sim".to_string(),
            ..VehicleSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn connect_enables_control_then_arms() {
        let session = connected();
        assert_eq!(session.calls(), &[SessionCall::EnableControl, SessionCall::Arm]);
        assert!(session.is_armed());
        assert!(session.has_api_control());
    }

    #[test]
    fn scripted_captures_then_frames() {
        let mut session = connected().with_frame_size(8, 6).script_captures([false]);
        assert!(session.capture_frame("front_center").unwrap().is_none());
        let frame = session.capture_frame("front_center").unwrap().unwrap();
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(session.frames_captured(), 1);
    }

    #[test]
    fn failing_step_still_records_attempt() {
        let mut session = connected().fail_on(SessionStep::Disarm);
        assert!(session.disarm().is_err());
        assert!(session.is_armed());
        assert_eq!(session.count(|c| matches!(c, SessionCall::Disarm)), 1);
    }

    #[test]
    fn takeoff_requires_arming() {
        let mut session = SimulatedSession::new("stub://cold");
        assert!(session.takeoff().is_err());
    }
}
