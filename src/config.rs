//! Configuration loading for the pick-and-place cell

use crate::motion::{CoordinateFrame, Pose, SpeedProfile};
use crate::sdk::{Endian, OperationMode};
use crate::{CycleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Connect timeout when none is configured.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub robot: RobotConfig,
    pub poses: PoseTable,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub gripper: GripperConfig,
    #[serde(default)]
    pub soak: SoakConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotConfig {
    pub host: String,
    pub script_port: Option<u16>,
    pub sdk_port: Option<u16>,
    pub connect_timeout_seconds: Option<f64>,
    #[serde(default)]
    pub operation_mode: OperationMode,
    pub speed_override: Option<f64>,
}

/// Taught joint positions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoseTable {
    pub home: Pose,
    /// Pick position above the fixed origin; `home` when absent.
    pub origin: Option<Pose>,
    pub targets: BTreeMap<u32, Pose>,
}

impl PoseTable {
    pub fn origin(&self) -> &Pose {
        self.origin.as_ref().unwrap_or(&self.home)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotionConfig {
    pub joint: SpeedProfile,
    pub home: SpeedProfile,
    pub linear: SpeedProfile,
    pub approach_distance_mm: f64,
    pub frame_index: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub move_start_seconds: f64,
    pub notification_seconds: f64,
}

/// What to do when a relative move's completion event never shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionTimeoutPolicy {
    /// Log and carry on with the cycle.
    #[default]
    Warn,
    /// Fail the cycle.
    Abort,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub on_completion_timeout: CompletionTimeoutPolicy,
}

/// Whether an output pattern is held or reset to neutral after settling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Pulse,
    Hold,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GripperConfig {
    pub first_bit: u8,
    pub last_bit: u8,
    #[serde(default)]
    pub endian: Endian,
    pub grab_code: u32,
    pub release_code: u32,
    pub neutral_code: u32,
    pub settle_ms: u64,
    pub close_mode: OutputMode,
    pub open_mode: OutputMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SoakConfig {
    pub delay_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            joint: SpeedProfile::new(150.0, 150.0),
            home: SpeedProfile::new(30.0, 30.0),
            linear: SpeedProfile::new(300.0, 300.0),
            approach_distance_mm: 40.0,
            frame_index: 2,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            move_start_seconds: 5.0,
            notification_seconds: 10.0,
        }
    }
}

impl Default for GripperConfig {
    fn default() -> Self {
        Self {
            first_bit: 0,
            last_bit: 3,
            endian: Endian::Little,
            grab_code: 2,
            release_code: 1,
            neutral_code: 0,
            settle_ms: 100,
            close_mode: OutputMode::Pulse,
            open_mode: OutputMode::Hold,
        }
    }
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self { delay_ms: 5000 }
    }
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| CycleError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::load_from_str(&contents)
    }

    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.robot.host.trim().is_empty() {
            return Err(CycleError::Config("robot.host must not be empty".to_string()));
        }
        let ratio = self.robot.speed_override();
        if !(0.0..=1.0).contains(&ratio) {
            return Err(CycleError::Config(format!(
                "robot.speed_override must be within 0.0..=1.0, got {}",
                ratio
            )));
        }

        for (name, profile) in [
            ("motion.joint", self.motion.joint),
            ("motion.home", self.motion.home),
            ("motion.linear", self.motion.linear),
        ] {
            if !(profile.speed > 0.0 && profile.acceleration > 0.0) {
                return Err(CycleError::Config(format!(
                    "{} speed and acceleration must be positive",
                    name
                )));
            }
        }
        if !self.motion.approach_distance_mm.is_finite() || self.motion.approach_distance_mm <= 0.0 {
            return Err(CycleError::Config(
                "motion.approach_distance_mm must be a positive distance".to_string(),
            ));
        }

        check_seconds("timeouts.move_start_seconds", self.timeouts.move_start_seconds)?;
        check_seconds("timeouts.notification_seconds", self.timeouts.notification_seconds)?;
        if let Some(seconds) = self.robot.connect_timeout_seconds {
            check_seconds("robot.connect_timeout_seconds", seconds)?;
        }

        if self.gripper.first_bit > self.gripper.last_bit {
            return Err(CycleError::Config(format!(
                "gripper.first_bit ({}) must not exceed gripper.last_bit ({})",
                self.gripper.first_bit, self.gripper.last_bit
            )));
        }
        Ok(())
    }

    pub fn target_pose(&self, index: u32) -> Result<&Pose> {
        self.poses
            .targets
            .get(&index)
            .ok_or(CycleError::UnknownPose(index))
    }
}

/// A timeout must be positive and representable as a `Duration`.
fn check_seconds(name: &str, seconds: f64) -> Result<()> {
    match Duration::try_from_secs_f64(seconds) {
        Ok(d) if !d.is_zero() => Ok(()),
        _ => Err(CycleError::Config(format!(
            "{} must be a positive number of seconds, got {}",
            name, seconds
        ))),
    }
}

/// Seconds to `Duration`, with `fallback` for values that cannot convert.
fn seconds_or(seconds: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(fallback)
}

impl RobotConfig {
    /// Get script port with default fallback
    pub fn script_port(&self) -> u16 {
        self.script_port.unwrap_or(crate::channel::SCRIPT_PORT)
    }

    /// Get SDK port with default fallback
    pub fn sdk_port(&self) -> u16 {
        self.sdk_port.unwrap_or(crate::channel::SCRIPT_PORT)
    }

    /// Get connect timeout with default fallback
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout_seconds
            .map_or(DEFAULT_CONNECT_TIMEOUT, |s| seconds_or(s, DEFAULT_CONNECT_TIMEOUT))
    }

    /// Get speed override with default fallback
    pub fn speed_override(&self) -> f64 {
        self.speed_override.unwrap_or(1.0)
    }
}

impl MotionConfig {
    pub fn frame(&self) -> CoordinateFrame {
        CoordinateFrame::from_index(self.frame_index)
    }
}

impl TimeoutConfig {
    pub fn move_start(&self) -> Duration {
        seconds_or(self.move_start_seconds, crate::driver::DEFAULT_START_TIMEOUT)
    }

    pub fn notification(&self) -> Duration {
        seconds_or(
            self.notification_seconds,
            crate::completion::DEFAULT_NOTIFICATION_TIMEOUT,
        )
    }
}

impl GripperConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl SoakConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
