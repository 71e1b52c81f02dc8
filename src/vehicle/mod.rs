//! Vehicle sessions.
//!
//! This module provides different vehicles behind one `VehicleSession` trait:
//! - AirSim multirotors over msgpack-rpc (`host:port` addresses)
//! - Simulated in-process vehicle (`stub://` addresses)
//!
//! A session is single-owner: the control loop holds it for the whole flight.
//! Motion commands are one-way. Implementations MUST return from
//! `move_velocity_body` and `rotate_yaw_rate` without waiting for the vehicle
//! to finish executing the command.

use anyhow::Result;
use std::time::Duration;

use crate::config::VehicleSettings;
use crate::frame::Frame;
use crate::TeleopError;

pub mod airsim;
pub mod sim;

pub use airsim::AirSimSession;
pub use sim::{SessionCall, SessionStep, SimulatedSession};

/// Control surface of a connected, API-controlled, armed vehicle.
pub trait VehicleSession {
    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;

    /// Blocking takeoff; returns once the vehicle acknowledges.
    fn takeoff(&mut self) -> Result<()>;

    /// Blocking climb (or descent) to `altitude_m` above the start point.
    fn move_to_altitude(&mut self, altitude_m: f32, velocity: f32, timeout: Duration)
        -> Result<()>;

    /// Fetch one frame from `camera`. `Ok(None)` is an empty capture, not an error.
    fn capture_frame(&mut self, camera: &str) -> Result<Option<Frame>>;

    /// One-way body-frame velocity command.
    fn move_velocity_body(&mut self, vx: f32, vy: f32, vz: f32, duration: Duration)
        -> Result<()>;

    /// One-way yaw-rate command in deg/s.
    fn rotate_yaw_rate(&mut self, rate_deg_s: f32, duration: Duration) -> Result<()>;

    /// Cancel whatever task the vehicle is currently executing.
    fn cancel_last_task(&mut self) -> Result<()>;

    fn land(&mut self) -> Result<()>;

    fn disarm(&mut self) -> Result<()>;

    /// Hand control back (disable external API control).
    fn release_control(&mut self) -> Result<()>;
}

impl<T: VehicleSession + ?Sized> VehicleSession for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn takeoff(&mut self) -> Result<()> {
        (**self).takeoff()
    }

    fn move_to_altitude(
        &mut self,
        altitude_m: f32,
        velocity: f32,
        timeout: Duration,
    ) -> Result<()> {
        (**self).move_to_altitude(altitude_m, velocity, timeout)
    }

    fn capture_frame(&mut self, camera: &str) -> Result<Option<Frame>> {
        (**self).capture_frame(camera)
    }

    fn move_velocity_body(
        &mut self,
        vx: f32,
        vy: f32,
        vz: f32,
        duration: Duration,
    ) -> Result<()> {
        (**self).move_velocity_body(vx, vy, vz, duration)
    }

    fn rotate_yaw_rate(&mut self, rate_deg_s: f32, duration: Duration) -> Result<()> {
        (**self).rotate_yaw_rate(rate_deg_s, duration)
    }

    fn cancel_last_task(&mut self) -> Result<()> {
        (**self).cancel_last_task()
    }

    fn land(&mut self) -> Result<()> {
        (**self).land()
    }

    fn disarm(&mut self) -> Result<()> {
        (**self).disarm()
    }

    fn release_control(&mut self) -> Result<()> {
        (**self).release_control()
    }
}

/// Connect, enable API control and arm.
///
/// `stub://` addresses select the simulated vehicle; anything else is treated as
/// an AirSim `host:port`. Every failure is reported as `TeleopError::Connection`.
pub fn connect(settings: &VehicleSettings) -> Result<Box<dyn VehicleSession>> {
    let session: Box<dyn VehicleSession> = if settings.address.starts_with("stub://") {
        Box::new(SimulatedSession::connect(settings)?)
    } else {
        Box::new(AirSimSession::connect(settings)?)
    };
    log::info!("connected to {} and armed", session.describe());
    Ok(session)
}

pub(crate) fn connection_error(err: anyhow::Error) -> anyhow::Error {
    if crate::is_connection_error(&err) {
        return err;
    }
    anyhow::Error::new(TeleopError::Connection(format!("{:#}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_address_selects_simulated_vehicle() {
        let settings = VehicleSettings {
            address: "stub://unit".to_string(),
            ..VehicleSettings::default()
        };
        let session = connect(&settings).unwrap();
        assert!(session.describe().contains("stub://unit"));
    }

    #[test]
    fn unreachable_vehicle_is_a_connection_error() {
        let settings = VehicleSettings {
            address: "stub://offline".to_string(),
            ..VehicleSettings::default()
        };
        let err = connect(&settings).err().expect("offline stub must fail");
        assert!(crate::is_connection_error(&err));
    }
}
