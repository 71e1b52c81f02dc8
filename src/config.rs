use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::{CommandProfile, OverlapPolicy};
use crate::detect::DetectionFilter;
use crate::TeleopError;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
/// COCO ids: person, bicycle, car, motorcycle, bus, truck.
const DEFAULT_RELEVANT_CLASSES: [u32; 6] = [0, 1, 2, 3, 5, 7];
const DEFAULT_SPEED: f32 = 5.0;
const DEFAULT_DISPLAY_SCALE: f32 = 2.5;
const DEFAULT_COMMAND_DURATION_SECS: f32 = 0.5;
const DEFAULT_YAW_RATE: f32 = 30.0;
const DEFAULT_POLL_INTERVAL_MS: u64 = 20;
const MAX_POLL_INTERVAL_MS: u64 = 100;
const MAX_DISPLAY_SCALE: f32 = 16.0;
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;
const DEFAULT_VEHICLE_ADDR: &str = "127.0.0.1:41451";
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CAMERA: &str = "front_center";
const DEFAULT_TAKEOFF_ALTITUDE_M: f32 = 5.0;
const DEFAULT_TAKEOFF_VELOCITY: f32 = 5.0;
const DEFAULT_TAKEOFF_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_WINDOW_TITLE: &str = "Drone Control Center";

#[cfg(feature = "backend-tract")]
const DEFAULT_BACKEND: &str = "tract";
#[cfg(not(feature = "backend-tract"))]
const DEFAULT_BACKEND: &str = "stub";

#[derive(Debug, Deserialize, Default)]
struct TeleopConfigFile {
    confidence_threshold: Option<f32>,
    relevant_classes: Option<Vec<u32>>,
    speed: Option<f32>,
    display_scale: Option<f32>,
    command_duration: Option<f32>,
    yaw_rate: Option<f32>,
    poll_interval_ms: Option<u64>,
    health_log_secs: Option<u64>,
    overlap_policy: Option<OverlapPolicy>,
    vehicle: Option<VehicleConfigFile>,
    camera: Option<CameraConfigFile>,
    takeoff: Option<TakeoffConfigFile>,
    detector: Option<DetectorConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct VehicleConfigFile {
    address: Option<String>,
    name: Option<String>,
    rpc_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TakeoffConfigFile {
    altitude_m: Option<f32>,
    velocity: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    title: Option<String>,
}

/// Static configuration, fixed for the whole flight.
#[derive(Debug, Clone)]
pub struct TeleopConfig {
    /// Detection acceptance floor in [0, 1].
    pub confidence_threshold: f32,
    /// Detector class ids kept after filtering.
    pub relevant_classes: BTreeSet<u32>,
    /// Linear command magnitude, m/s.
    pub speed: f32,
    /// Render magnification factor.
    pub display_scale: f32,
    /// How long each dispatched motion command is held.
    pub command_duration: Duration,
    /// Rotation command rate, deg/s.
    pub yaw_rate: f32,
    /// Bounded wait for operator input; the loop's only scheduling point.
    pub poll_interval: Duration,
    pub health_log_interval: Duration,
    pub overlap_policy: OverlapPolicy,
    pub vehicle: VehicleSettings,
    pub camera: String,
    pub takeoff: TakeoffSettings,
    pub detector: DetectorSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct VehicleSettings {
    /// `host:port` of the AirSim rpc endpoint, or `stub://...` for the simulated vehicle.
    pub address: String,
    /// AirSim vehicle name; empty selects the default vehicle.
    pub name: String,
    pub rpc_timeout: Duration,
}

impl Default for VehicleSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_VEHICLE_ADDR.to_string(),
            name: String::new(),
            rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TakeoffSettings {
    pub altitude_m: f32,
    pub velocity: f32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    /// Square model input edge in pixels.
    pub input_size: u32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub title: String,
}

impl Default for TeleopConfig {
    fn default() -> Self {
        // Defaults alone always validate.
        Self::from_file(TeleopConfigFile::default())
    }
}

impl TeleopConfig {
    /// File named by `TELEOP_CONFIG` (if set), then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TELEOP_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TeleopConfigFile) -> Self {
        let vehicle = file.vehicle.unwrap_or_default();
        let takeoff = file.takeoff.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        Self {
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            relevant_classes: file
                .relevant_classes
                .map(|classes| classes.into_iter().collect())
                .unwrap_or_else(|| DEFAULT_RELEVANT_CLASSES.into_iter().collect()),
            speed: file.speed.unwrap_or(DEFAULT_SPEED),
            display_scale: file.display_scale.unwrap_or(DEFAULT_DISPLAY_SCALE),
            command_duration: secs_f32(
                file.command_duration
                    .unwrap_or(DEFAULT_COMMAND_DURATION_SECS),
            ),
            yaw_rate: file.yaw_rate.unwrap_or(DEFAULT_YAW_RATE),
            poll_interval: Duration::from_millis(
                file.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            health_log_interval: Duration::from_secs(
                file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
            ),
            overlap_policy: file.overlap_policy.unwrap_or_default(),
            vehicle: VehicleSettings {
                address: vehicle
                    .address
                    .unwrap_or_else(|| DEFAULT_VEHICLE_ADDR.to_string()),
                name: vehicle.name.unwrap_or_default(),
                rpc_timeout: Duration::from_secs(
                    vehicle.rpc_timeout_secs.unwrap_or(DEFAULT_RPC_TIMEOUT_SECS),
                ),
            },
            camera: file
                .camera
                .and_then(|camera| camera.name)
                .unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
            takeoff: TakeoffSettings {
                altitude_m: takeoff.altitude_m.unwrap_or(DEFAULT_TAKEOFF_ALTITUDE_M),
                velocity: takeoff.velocity.unwrap_or(DEFAULT_TAKEOFF_VELOCITY),
                timeout: Duration::from_secs(
                    takeoff.timeout_secs.unwrap_or(DEFAULT_TAKEOFF_TIMEOUT_SECS),
                ),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            },
            display: DisplaySettings {
                title: file
                    .display
                    .and_then(|display| display.title)
                    .unwrap_or_else(|| DEFAULT_WINDOW_TITLE.to_string()),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("TELEOP_VEHICLE_ADDR") {
            if !addr.trim().is_empty() {
                self.vehicle.address = addr.trim().to_string();
            }
        }
        if let Ok(camera) = std::env::var("TELEOP_CAMERA") {
            if !camera.trim().is_empty() {
                self.camera = camera.trim().to_string();
            }
        }
        if let Ok(speed) = std::env::var("TELEOP_SPEED") {
            self.speed = speed
                .trim()
                .parse()
                .map_err(|_| config_error("TELEOP_SPEED must be a number of m/s"))?;
        }
        if let Ok(conf) = std::env::var("TELEOP_CONFIDENCE") {
            self.confidence_threshold = conf
                .trim()
                .parse()
                .map_err(|_| config_error("TELEOP_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(classes) = std::env::var("TELEOP_CLASSES") {
            let parsed = parse_class_list(&classes)?;
            if !parsed.is_empty() {
                self.relevant_classes = parsed;
            }
        }
        if let Ok(path) = std::env::var("TELEOP_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path.trim());
            }
        }
        if let Ok(backend) = std::env::var("TELEOP_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        Ok(())
    }

    /// Check every invariant the control loop relies on.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(config_error("confidence_threshold must be within [0, 1]"));
        }
        if self.relevant_classes.is_empty() {
            return Err(config_error("relevant_classes must not be empty"));
        }
        for (name, value) in [
            ("speed", self.speed),
            ("display_scale", self.display_scale),
            ("yaw_rate", self.yaw_rate),
            ("takeoff.altitude_m", self.takeoff.altitude_m),
            ("takeoff.velocity", self.takeoff.velocity),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(config_error(&format!("{} must be greater than zero", name)));
            }
        }
        if self.display_scale > MAX_DISPLAY_SCALE {
            return Err(config_error(&format!(
                "display_scale must be at most {}",
                MAX_DISPLAY_SCALE
            )));
        }
        if self.command_duration.is_zero() {
            return Err(config_error("command_duration must be greater than zero"));
        }
        let poll_ms = self.poll_interval.as_millis() as u64;
        if poll_ms == 0 || poll_ms > MAX_POLL_INTERVAL_MS {
            return Err(config_error(&format!(
                "poll_interval_ms must be within 1..={}",
                MAX_POLL_INTERVAL_MS
            )));
        }
        if !(self.detector.iou_threshold > 0.0 && self.detector.iou_threshold <= 1.0) {
            return Err(config_error("detector.iou_threshold must be within (0, 1]"));
        }
        if self.detector.input_size == 0 {
            return Err(config_error("detector.input_size must be greater than zero"));
        }
        if self.vehicle.address.trim().is_empty() {
            return Err(config_error("vehicle.address must not be empty"));
        }
        if self.camera.trim().is_empty() {
            return Err(config_error("camera.name must not be empty"));
        }
        Ok(())
    }

    pub fn detection_filter(&self) -> DetectionFilter {
        DetectionFilter::new(
            self.relevant_classes.iter().copied(),
            self.confidence_threshold,
        )
    }

    pub fn command_profile(&self) -> CommandProfile {
        CommandProfile {
            speed: self.speed,
            yaw_rate: self.yaw_rate,
            duration: self.command_duration,
        }
    }
}

fn read_config_file(path: &Path) -> Result<TeleopConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Comma-separated class ids, e.g. `0,2,7`.
pub fn parse_class_list(value: &str) -> Result<BTreeSet<u32>> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<u32>()
                .map_err(|_| config_error(&format!("invalid class id '{}'", entry)))
        })
        .collect()
}

fn secs_f32(secs: f32) -> Duration {
    // Negative or NaN durations collapse to zero and are rejected by validate().
    Duration::try_from_secs_f32(secs).unwrap_or(Duration::ZERO)
}

fn config_error(msg: &str) -> anyhow::Error {
    TeleopError::Config(msg.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_flight() {
        let cfg = TeleopConfig::default();
        assert_eq!(cfg.confidence_threshold, 0.5);
        assert_eq!(
            cfg.relevant_classes.iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 5, 7]
        );
        assert_eq!(cfg.speed, 5.0);
        assert_eq!(cfg.display_scale, 2.5);
        assert_eq!(cfg.command_duration, Duration::from_millis(500));
        assert_eq!(cfg.yaw_rate, 30.0);
        assert_eq!(cfg.camera, "front_center");
        assert_eq!(cfg.takeoff.altitude_m, 5.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut cfg = TeleopConfig::default();
        cfg.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = TeleopConfig::default();
        cfg.poll_interval = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = TeleopConfig::default();
        cfg.poll_interval = Duration::from_millis(250);
        assert!(cfg.validate().is_err());

        let mut cfg = TeleopConfig::default();
        cfg.relevant_classes.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = TeleopConfig::default();
        cfg.display_scale = 1e6;
        assert!(cfg.validate().is_err());
        cfg.display_scale = 16.0;
        cfg.validate().unwrap();

        let mut cfg = TeleopConfig::default();
        cfg.speed = f32::NAN;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TeleopError>(),
            Some(TeleopError::Config(_))
        ));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let cfg = TeleopConfig::from_file(TeleopConfigFile {
            command_duration: Some(-1.0),
            ..TeleopConfigFile::default()
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn class_list_parsing() {
        let classes = parse_class_list(" 7, 0,,2 ").unwrap();
        assert_eq!(classes.into_iter().collect::<Vec<_>>(), vec![0, 2, 7]);
        assert!(parse_class_list("car").is_err());
    }
}
