//! teleop - keyboard flight with a live detection overlay
//!
//! 1. Loads configuration (file, environment, then flags)
//! 2. Installs the Ctrl-C handler
//! 3. Loads the detector backend and opens the window
//! 4. Connects, arms, takes off and climbs to the configured altitude
//! 5. Runs the control loop until Escape, Ctrl-C or an abort
//! 6. Lands, disarms, releases control and closes the window

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use drone_teleop::config::parse_class_list;
use drone_teleop::input::controls_banner;
use drone_teleop::ui::Ui;
use drone_teleop::{
    launch, vehicle, BackendRegistry, LoopSettings, OperatorSurface, Perception, ScriptedSurface,
    TeleopConfig,
};

/// AirSim's default scene camera resolution, used to size the window before the
/// first frame arrives.
#[cfg(feature = "display-minifb")]
const INITIAL_FRAME_SIZE: (f32, f32) = (256.0, 144.0);

#[derive(Parser, Debug)]
#[command(author, version, about = "Fly a drone from the keyboard with object detection overlay")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "TELEOP_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
    /// Vehicle endpoint `host:port`, or `stub://name` for the simulated vehicle.
    #[arg(long, value_name = "ADDR")]
    vehicle: Option<String>,
    /// Run without a window, reading keys from --keys.
    #[arg(long)]
    headless: bool,
    /// Headless key script, comma separated (e.g. `w,w,,e,esc`).
    #[arg(long, value_name = "SCRIPT", default_value = "")]
    keys: String,
    /// Detector backend name.
    #[arg(long)]
    backend: Option<String>,
    /// Detector model path.
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,
    /// Linear command speed in m/s.
    #[arg(long)]
    speed: Option<f32>,
    /// Relevant class ids, comma separated.
    #[arg(long, value_name = "IDS")]
    classes: Option<String>,
    /// Land after this many loop iterations.
    #[arg(long)]
    max_iterations: Option<u64>,
    /// Output mode: auto, plain, pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_flag(Some(&args.ui), std::io::stderr().is_terminal());

    let cfg = {
        let mut stage = ui.stage("Load configuration");
        let loaded = load_config(&args);
        if let Err(err) = &loaded {
            stage.fail(format!("{:#}", err));
        }
        loaded?
    };

    // Before anything is opened or armed.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("error setting Ctrl-C handler")?;
    }

    let perception = {
        let mut stage = ui.stage("Load detector");
        let registry = BackendRegistry::with_builtin();
        match registry.build(&cfg.detector) {
            Ok(backend) => Perception::new(backend),
            Err(err) => {
                stage.fail(format!("{:#}", err));
                return Err(err);
            }
        }
    };

    let surface = open_surface(&args, &cfg)?;

    let mut control = {
        let mut stage = ui.stage("Connect and take off");
        let launched = launch(
            || vehicle::connect(&cfg.vehicle),
            surface,
            perception,
            LoopSettings::from_config(&cfg),
            &cfg.takeoff,
            Some(interrupted),
        );
        match launched {
            Ok(control) => control,
            Err(err) => {
                stage.fail(format!("{:#}", err));
                return Err(err);
            }
        }
    };

    ui.controls(controls_banner());
    let reason = control.run(args.max_iterations)?;
    let report = control.land();
    ui.summary(&reason, &control.stats(), &report);
    log::info!("flight finished: {}", reason);
    Ok(())
}

fn load_config(args: &Args) -> Result<TeleopConfig> {
    let mut cfg = TeleopConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = &args.vehicle {
        cfg.vehicle.address = addr.clone();
    }
    if let Some(backend) = &args.backend {
        cfg.detector.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        cfg.detector.model_path = model.clone();
    }
    if let Some(speed) = args.speed {
        cfg.speed = speed;
    }
    if let Some(classes) = &args.classes {
        cfg.relevant_classes = parse_class_list(classes)?;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn open_surface(args: &Args, cfg: &TeleopConfig) -> Result<Box<dyn OperatorSurface>> {
    if args.headless {
        let surface = ScriptedSurface::from_script(&args.keys)
            .context("invalid --keys script")?
            .quit_when_exhausted()
            .honor_wait();
        return Ok(Box::new(surface));
    }
    open_window(cfg)
}

#[cfg(feature = "display-minifb")]
fn open_window(cfg: &TeleopConfig) -> Result<Box<dyn OperatorSurface>> {
    use drone_teleop::display::MinifbSurface;

    let width = (INITIAL_FRAME_SIZE.0 * cfg.display_scale).round() as usize;
    let height = (INITIAL_FRAME_SIZE.1 * cfg.display_scale).round() as usize;
    Ok(Box::new(MinifbSurface::open(&cfg.display.title, width, height)?))
}

#[cfg(not(feature = "display-minifb"))]
fn open_window(_cfg: &TeleopConfig) -> Result<Box<dyn OperatorSurface>> {
    Err(anyhow::anyhow!(
        "this build has no window support; rebuild with --features display-minifb or pass --headless"
    ))
}
