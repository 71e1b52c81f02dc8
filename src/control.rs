//! Control loop state machine.
//!
//! `Initializing → Looping → Landing → Terminated`. One `step()` is one pass of
//! capture → detect → annotate → scale/render → poll key → dispatch. The bounded
//! key poll is the only place the loop waits.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::command::{dispatch, CommandProfile, MotionCommand, OverlapPolicy};
use crate::config::{TakeoffSettings, TeleopConfig};
use crate::detect::{DetectionFilter, Perception};
use crate::display::OperatorSurface;
use crate::frame::Frame;
use crate::input::CommandIntent;
use crate::vehicle::VehicleSession;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Looping,
    Landing,
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Initializing => "initializing",
            LoopState::Looping => "looping",
            LoopState::Landing => "landing",
            LoopState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why the loop left `Looping`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LandingReason {
    Quit,
    Interrupted,
    SurfaceClosed,
    LinkLost(String),
    IterationLimit,
}

impl fmt::Display for LandingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LandingReason::Quit => f.write_str("operator quit"),
            LandingReason::Interrupted => f.write_str("interrupted"),
            LandingReason::SurfaceClosed => f.write_str("display surface closed"),
            LandingReason::LinkLost(msg) => write!(f, "vehicle link lost: {}", msg),
            LandingReason::IterationLimit => f.write_str("iteration limit reached"),
        }
    }
}

/// What happened to the visual half of an iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered { detections: usize },
    /// No frame this tick; the previous image stays on screen.
    Empty,
    /// Perception failed; nothing was rendered.
    DetectionFailed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TickReport {
    pub frame: FrameOutcome,
    pub intent: CommandIntent,
    pub dispatched: Option<MotionCommand>,
}

/// Result of one `step()`.
#[derive(Clone, Debug, PartialEq)]
pub enum Tick {
    Continue(TickReport),
    /// The loop just moved to `Landing`. Returned exactly once per flight.
    Landing(LandingReason),
    /// Not looping; nothing was done.
    Idle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub frames_rendered: u64,
    pub empty_captures: u64,
    pub detection_failures: u64,
    pub commands_dispatched: u64,
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iterations={} rendered={} empty={} detect_failures={} commands={}",
            self.iterations,
            self.frames_rendered,
            self.empty_captures,
            self.detection_failures,
            self.commands_dispatched
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    Land,
    Disarm,
    ReleaseControl,
    CloseSurface,
}

/// Outcome of the shutdown sequence. Every step is attempted in order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TeardownReport {
    pub attempted: Vec<TeardownStep>,
    pub failures: Vec<(TeardownStep, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Per-flight knobs the loop reads on every iteration.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub camera: String,
    pub filter: DetectionFilter,
    pub profile: CommandProfile,
    pub display_scale: f32,
    pub poll_interval: Duration,
    pub overlap: OverlapPolicy,
    pub health_log_interval: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &TeleopConfig) -> Self {
        Self {
            camera: config.camera.clone(),
            filter: config.detection_filter(),
            profile: config.command_profile(),
            display_scale: config.display_scale,
            poll_interval: config.poll_interval,
            overlap: config.overlap_policy,
            health_log_interval: config.health_log_interval,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&TeleopConfig::default())
    }
}

/// Owns the vehicle session and operator surface for the whole flight.
pub struct ControlLoop<S: VehicleSession, U: OperatorSurface> {
    session: S,
    surface: U,
    perception: Perception,
    settings: LoopSettings,
    state: LoopState,
    stats: LoopStats,
    interrupt: Option<Arc<AtomicBool>>,
    landing_reason: Option<LandingReason>,
    teardown: Option<TeardownReport>,
    last_health_log: Instant,
}

impl<S: VehicleSession, U: OperatorSurface> ControlLoop<S, U> {
    /// `session` must already be connected and armed.
    pub fn new(session: S, surface: U, perception: Perception, settings: LoopSettings) -> Self {
        Self {
            session,
            surface,
            perception,
            settings,
            state: LoopState::Initializing,
            stats: LoopStats::default(),
            interrupt: None,
            landing_reason: None,
            teardown: None,
            last_health_log: Instant::now(),
        }
    }

    /// A flag that, once set, makes the next iteration land as if Quit was pressed.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Take off and climb to the configured altitude, then start looping.
    ///
    /// On failure the teardown sequence runs before the error is returned and the
    /// loop ends in `Terminated`.
    pub fn initialize(&mut self, takeoff: &TakeoffSettings) -> Result<()> {
        if self.state != LoopState::Initializing {
            return Err(anyhow!("initialize called in state {}", self.state));
        }
        let climb = self.session.takeoff().and_then(|_| {
            self.session
                .move_to_altitude(takeoff.altitude_m, takeoff.velocity, takeoff.timeout)
        });
        if let Err(err) = climb {
            log::error!("takeoff failed: {:#}", err);
            self.state = LoopState::Landing;
            let report = self.land();
            if !report.is_clean() {
                log::warn!("teardown after failed takeoff left {} failures", report.failures.len());
            }
            return Err(err.context("takeoff failed"));
        }
        log::info!(
            "airborne at {:.1} m via {} (detector: {})",
            takeoff.altitude_m,
            self.session.describe(),
            self.perception.backend_name()
        );
        self.state = LoopState::Looping;
        self.last_health_log = Instant::now();
        Ok(())
    }

    /// Run one iteration. Outside `Looping` this does nothing and returns `Tick::Idle`.
    pub fn step(&mut self) -> Tick {
        if self.state != LoopState::Looping {
            return Tick::Idle;
        }
        self.stats.iterations += 1;

        if self
            .interrupt
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
        {
            return self.begin_landing(LandingReason::Interrupted);
        }
        if !self.surface.is_open() {
            return self.begin_landing(LandingReason::SurfaceClosed);
        }

        let frame = match self.session.capture_frame(&self.settings.camera) {
            Ok(Some(frame)) => match self.show(&frame) {
                Ok(outcome) => outcome,
                Err(reason) => return self.begin_landing(reason),
            },
            Ok(None) => {
                self.stats.empty_captures += 1;
                log::trace!("empty capture from '{}'", self.settings.camera);
                FrameOutcome::Empty
            }
            Err(err) => return self.begin_landing(LandingReason::LinkLost(format!("{:#}", err))),
        };

        let key = match self.surface.poll_key(self.settings.poll_interval) {
            Ok(key) => key,
            Err(err) => {
                log::warn!("input poll failed: {:#}", err);
                return self.begin_landing(LandingReason::SurfaceClosed);
            }
        };
        let intent = CommandIntent::from_key(key);
        if intent == CommandIntent::Quit {
            return self.begin_landing(LandingReason::Quit);
        }

        let mut dispatched = None;
        if let Some(command) = self.settings.profile.command_for(intent) {
            if let Err(err) = dispatch(&mut self.session, command, self.settings.overlap) {
                return self.begin_landing(LandingReason::LinkLost(format!("{:#}", err)));
            }
            log::debug!("{}: {}", intent.label(), command);
            self.stats.commands_dispatched += 1;
            dispatched = Some(command);
        }

        self.maybe_log_health();
        Tick::Continue(TickReport {
            frame,
            intent,
            dispatched,
        })
    }

    /// Step until landing (or `max_iterations`), then tear down.
    pub fn run(&mut self, max_iterations: Option<u64>) -> Result<LandingReason> {
        if self.state != LoopState::Looping {
            return Err(anyhow!("run called in state {}", self.state));
        }
        let reason = loop {
            if let Some(limit) = max_iterations {
                if self.stats.iterations >= limit {
                    break match self.begin_landing(LandingReason::IterationLimit) {
                        Tick::Landing(reason) => reason,
                        _ => LandingReason::IterationLimit,
                    };
                }
            }
            match self.step() {
                Tick::Landing(reason) => break reason,
                Tick::Continue(_) => {}
                Tick::Idle => {
                    break self
                        .landing_reason
                        .clone()
                        .unwrap_or(LandingReason::IterationLimit)
                }
            }
        };
        let report = self.land();
        if !report.is_clean() {
            log::warn!("teardown finished with {} failures", report.failures.len());
        }
        Ok(reason)
    }

    /// Land, disarm, release control and close the surface, each attempted even
    /// when an earlier one fails. Runs once; later calls return the first report.
    pub fn land(&mut self) -> TeardownReport {
        if let Some(report) = &self.teardown {
            return report.clone();
        }
        self.state = LoopState::Landing;
        let mut report = TeardownReport::default();

        let steps: [(TeardownStep, fn(&mut S) -> Result<()>); 3] = [
            (TeardownStep::Land, |s: &mut S| s.land()),
            (TeardownStep::Disarm, |s: &mut S| s.disarm()),
            (TeardownStep::ReleaseControl, |s: &mut S| s.release_control()),
        ];
        for (step, action) in steps {
            report.attempted.push(step);
            if let Err(err) = action(&mut self.session) {
                log::warn!("{:?} failed: {:#}", step, err);
                report.failures.push((step, format!("{:#}", err)));
            }
        }
        report.attempted.push(TeardownStep::CloseSurface);
        self.surface.close();

        self.state = LoopState::Terminated;
        log::info!("terminated: {}", self.stats);
        self.teardown = Some(report.clone());
        report
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn landing_reason(&self) -> Option<&LandingReason> {
        self.landing_reason.as_ref()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn surface(&self) -> &U {
        &self.surface
    }

    pub fn into_parts(self) -> (S, U) {
        (self.session, self.surface)
    }

    /// Detect, annotate, scale and render. Only a render failure is fatal.
    fn show(&mut self, frame: &Frame) -> std::result::Result<FrameOutcome, LandingReason> {
        let annotated = self
            .perception
            .detect(frame, &self.settings.filter)
            .and_then(|detections| {
                if !detections.is_empty() {
                    log::debug!("detections: {}", detections.summary());
                }
                let annotated = self.perception.annotate(frame, &detections)?;
                Ok((annotated, detections.len()))
            })
            .and_then(|(annotated, count)| {
                Ok((annotated.scaled(self.settings.display_scale)?, count))
            });
        let (scaled, count) = match annotated {
            Ok(out) => out,
            Err(err) => {
                self.stats.detection_failures += 1;
                log::warn!("no visual update this tick: {:#}", err);
                return Ok(FrameOutcome::DetectionFailed);
            }
        };
        if let Err(err) = self.surface.render(&scaled) {
            log::warn!("render failed: {:#}", err);
            return Err(LandingReason::SurfaceClosed);
        }
        self.stats.frames_rendered += 1;
        Ok(FrameOutcome::Rendered { detections: count })
    }

    fn begin_landing(&mut self, reason: LandingReason) -> Tick {
        match &reason {
            LandingReason::LinkLost(_) | LandingReason::SurfaceClosed => {
                log::error!("aborting flight: {}", reason)
            }
            _ => log::info!("landing: {}", reason),
        }
        self.state = LoopState::Landing;
        self.landing_reason = Some(reason.clone());
        Tick::Landing(reason)
    }

    fn maybe_log_health(&mut self) {
        if self.settings.health_log_interval.is_zero() {
            return;
        }
        if self.last_health_log.elapsed() >= self.settings.health_log_interval {
            log::info!("health: {}", self.stats);
            self.last_health_log = Instant::now();
        }
    }
}

/// Connect, take off and return a loop that is ready to run.
///
/// A connect failure closes `surface` and returns before any takeoff is
/// attempted. A takeoff failure runs the full teardown first.
pub fn launch<S, U, F>(
    connect: F,
    mut surface: U,
    perception: Perception,
    settings: LoopSettings,
    takeoff: &TakeoffSettings,
    interrupt: Option<Arc<AtomicBool>>,
) -> Result<ControlLoop<S, U>>
where
    S: VehicleSession,
    U: OperatorSurface,
    F: FnOnce() -> Result<S>,
{
    let session = match connect() {
        Ok(session) => session,
        Err(err) => {
            log::error!("not taking off: {:#}", err);
            surface.close();
            return Err(err);
        }
    };
    let mut control = ControlLoop::new(session, surface, perception, settings);
    if let Some(flag) = interrupt {
        control = control.with_interrupt(flag);
    }
    control.initialize(takeoff)?;
    Ok(control)
}
