//! Motion commands and one-way dispatch.
//!
//! A `MotionCommand` is what an intent turns into once the configured speed, yaw
//! rate and duration are applied. Dispatch hands it to the session and returns
//! immediately; nothing in this crate waits for a command to finish.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::input::CommandIntent;
use crate::vehicle::VehicleSession;

/// Parameterised instruction for the vehicle, in the body frame (forward, right, down).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MotionCommand {
    /// Body-frame velocity in m/s held for `duration`.
    VelocityBody {
        vx: f32,
        vy: f32,
        vz: f32,
        duration: Duration,
    },
    /// Yaw rate in deg/s (positive turns right) held for `duration`.
    YawRate { rate_deg_s: f32, duration: Duration },
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionCommand::VelocityBody {
                vx,
                vy,
                vz,
                duration,
            } => write!(
                f,
                "velocity ({:+.2}, {:+.2}, {:+.2}) m/s for {:.2}s",
                vx,
                vy,
                vz,
                duration.as_secs_f32()
            ),
            MotionCommand::YawRate {
                rate_deg_s,
                duration,
            } => write!(
                f,
                "yaw rate {:+.1} deg/s for {:.2}s",
                rate_deg_s,
                duration.as_secs_f32()
            ),
        }
    }
}

/// Magnitudes applied to intents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CommandProfile {
    /// Linear speed in m/s.
    pub speed: f32,
    /// Rotation rate in deg/s.
    pub yaw_rate: f32,
    /// How long each dispatched command is held.
    pub duration: Duration,
}

impl Default for CommandProfile {
    fn default() -> Self {
        Self {
            speed: 5.0,
            yaw_rate: 30.0,
            duration: Duration::from_millis(500),
        }
    }
}

impl CommandProfile {
    /// Motion command for an intent. `Quit` and `None` produce no command.
    pub fn command_for(&self, intent: CommandIntent) -> Option<MotionCommand> {
        let s = self.speed;
        let velocity = |vx: f32, vy: f32, vz: f32| MotionCommand::VelocityBody {
            vx,
            vy,
            vz,
            duration: self.duration,
        };
        let yaw = |rate_deg_s: f32| MotionCommand::YawRate {
            rate_deg_s,
            duration: self.duration,
        };
        match intent {
            CommandIntent::MoveForward => Some(velocity(s, 0.0, 0.0)),
            CommandIntent::MoveBackward => Some(velocity(-s, 0.0, 0.0)),
            CommandIntent::SlideLeft => Some(velocity(0.0, -s, 0.0)),
            CommandIntent::SlideRight => Some(velocity(0.0, s, 0.0)),
            // Body frame z points down: ascending is negative vz.
            CommandIntent::Ascend => Some(velocity(0.0, 0.0, -s)),
            CommandIntent::Descend => Some(velocity(0.0, 0.0, s)),
            CommandIntent::RotateLeft => Some(yaw(-self.yaw_rate)),
            CommandIntent::RotateRight => Some(yaw(self.yaw_rate)),
            CommandIntent::Quit | CommandIntent::None => None,
        }
    }
}

/// How a new command relates to one that may still be executing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Send and let the session's own queue resolve overlap (observed: newest wins).
    #[default]
    LatestWins,
    /// Cancel the session's last task before sending the new command.
    CancelPrevious,
}

impl FromStr for OverlapPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "latest-wins" => Ok(OverlapPolicy::LatestWins),
            "cancel-previous" => Ok(OverlapPolicy::CancelPrevious),
            other => Err(anyhow!(
                "unknown overlap policy '{}'; expected latest-wins or cancel-previous",
                other
            )),
        }
    }
}

/// Send a command to the vehicle without waiting for it to execute.
///
/// Errors are transport failures only; there is no completion result to consume.
pub fn dispatch<S: VehicleSession + ?Sized>(
    session: &mut S,
    command: MotionCommand,
    policy: OverlapPolicy,
) -> Result<()> {
    if policy == OverlapPolicy::CancelPrevious {
        session.cancel_last_task()?;
    }
    match command {
        MotionCommand::VelocityBody {
            vx,
            vy,
            vz,
            duration,
        } => session.move_velocity_body(vx, vy, vz, duration),
        MotionCommand::YawRate {
            rate_deg_s,
            duration,
        } => session.rotate_yaw_rate(rate_deg_s, duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::KeySymbol;
    use crate::vehicle::{SessionCall, SimulatedSession};

    fn bits(cmd: MotionCommand) -> (u32, u32, u32, u128) {
        match cmd {
            MotionCommand::VelocityBody {
                vx,
                vy,
                vz,
                duration,
            } => (vx.to_bits(), vy.to_bits(), vz.to_bits(), duration.as_nanos()),
            MotionCommand::YawRate {
                rate_deg_s,
                duration,
            } => (rate_deg_s.to_bits(), 0, 0, duration.as_nanos()),
        }
    }

    fn command_for_key(profile: &CommandProfile, key: KeySymbol) -> Option<MotionCommand> {
        profile.command_for(CommandIntent::from_key(Some(key)))
    }

    #[test]
    fn forward_at_speed_five() {
        let profile = CommandProfile::default();
        assert_eq!(
            command_for_key(&profile, KeySymbol::Char('w')),
            Some(MotionCommand::VelocityBody {
                vx: 5.0,
                vy: 0.0,
                vz: 0.0,
                duration: Duration::from_millis(500),
            })
        );
    }

    #[test]
    fn rotate_right_is_positive_thirty() {
        let profile = CommandProfile::default();
        assert_eq!(
            command_for_key(&profile, KeySymbol::Char('e')),
            Some(MotionCommand::YawRate {
                rate_deg_s: 30.0,
                duration: Duration::from_millis(500),
            })
        );
        assert_eq!(
            command_for_key(&profile, KeySymbol::Char('q')),
            Some(MotionCommand::YawRate {
                rate_deg_s: -30.0,
                duration: Duration::from_millis(500),
            })
        );
    }

    #[test]
    fn directional_table_matches_body_frame() {
        let profile = CommandProfile {
            speed: 2.0,
            ..CommandProfile::default()
        };
        let expect = |key: char, v: (f32, f32, f32)| {
            let Some(MotionCommand::VelocityBody { vx, vy, vz, .. }) =
                command_for_key(&profile, KeySymbol::Char(key))
            else {
                panic!("expected a velocity command for {key}");
            };
            assert_eq!((vx, vy, vz), v, "key {key}");
        };
        expect('w', (2.0, 0.0, 0.0));
        expect('s', (-2.0, 0.0, 0.0));
        expect('a', (0.0, -2.0, 0.0));
        expect('d', (0.0, 2.0, 0.0));
        expect('z', (0.0, 0.0, -2.0));
        expect('x', (0.0, 0.0, 2.0));
    }

    #[test]
    fn alias_pairs_are_bit_identical() {
        let profile = CommandProfile {
            speed: 3.7,
            ..CommandProfile::default()
        };
        let up_a = command_for_key(&profile, KeySymbol::Char('z')).unwrap();
        let up_b = command_for_key(&profile, KeySymbol::ArrowUp).unwrap();
        assert_eq!(bits(up_a), bits(up_b));
        let down_a = command_for_key(&profile, KeySymbol::Char('x')).unwrap();
        let down_b = command_for_key(&profile, KeySymbol::ArrowDown).unwrap();
        assert_eq!(bits(down_a), bits(down_b));
    }

    #[test]
    fn quit_and_none_produce_no_command() {
        let profile = CommandProfile::default();
        assert_eq!(profile.command_for(CommandIntent::Quit), None);
        assert_eq!(profile.command_for(CommandIntent::None), None);
    }

    #[test]
    fn cancel_previous_cancels_before_sending() {
        let mut session = SimulatedSession::new("stub://test");
        let cmd = CommandProfile::default()
            .command_for(CommandIntent::RotateLeft)
            .unwrap();
        dispatch(&mut session, cmd, OverlapPolicy::CancelPrevious).unwrap();
        dispatch(&mut session, cmd, OverlapPolicy::LatestWins).unwrap();
        let calls = session.calls();
        assert!(matches!(calls[0], SessionCall::CancelLastTask));
        assert!(matches!(calls[1], SessionCall::RotateYawRate { .. }));
        assert!(matches!(calls[2], SessionCall::RotateYawRate { .. }));
        assert_eq!(calls.len(), 3);
    }

    #[test]
    fn overlap_policy_parses() {
        assert_eq!(
            "cancel-previous".parse::<OverlapPolicy>().unwrap(),
            OverlapPolicy::CancelPrevious
        );
        assert!("newest".parse::<OverlapPolicy>().is_err());
    }
}
