//! Motion data model
//!
//! Poses, relative displacements, coordinate frames and the per-request
//! outcome reported back to the sequencer.

use crate::error::{CycleError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Six joint angles in degrees, as taught on the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Pose([f64; 6]);

impl Pose {
    pub fn new(joints: [f64; 6]) -> Result<Self> {
        if let Some(bad) = joints.iter().find(|v| !v.is_finite()) {
            return Err(CycleError::InvalidCommand(format!(
                "joint angle must be finite, got {}",
                bad
            )));
        }
        Ok(Self(joints))
    }

    pub fn joints(&self) -> &[f64; 6] {
        &self.0
    }
}

impl TryFrom<Vec<f64>> for Pose {
    type Error = CycleError;

    fn try_from(values: Vec<f64>) -> Result<Self> {
        let joints: [f64; 6] = values.try_into().map_err(|v: Vec<f64>| {
            CycleError::Config(format!("pose needs exactly 6 joint angles, got {}", v.len()))
        })?;
        Pose::new(joints)
    }
}

impl From<Pose> for Vec<f64> {
    fn from(pose: Pose) -> Self {
        pose.0.to_vec()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join_fields(&self.0))
    }
}

/// Cartesian displacement `[dx, dy, dz, drx, dry, drz]` in mm and degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeDisplacement([f64; 6]);

impl RelativeDisplacement {
    pub fn new(delta: [f64; 6]) -> Result<Self> {
        if let Some(bad) = delta.iter().find(|v| !v.is_finite()) {
            return Err(CycleError::InvalidCommand(format!(
                "displacement must be finite, got {}",
                bad
            )));
        }
        Ok(Self(delta))
    }

    /// Pure translation along the working (Z) axis of the frame.
    pub fn along_z(dz: f64) -> Result<Self> {
        Self::new([0.0, 0.0, dz, 0.0, 0.0, 0.0])
    }

    pub fn components(&self) -> &[f64; 6] {
        &self.0
    }
}

/// Reference frame a relative move is interpreted in.
///
/// Indices follow the controller convention: 0 base, 1 tool, 2.. user frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateFrame {
    Base,
    Tool,
    User(u32),
}

impl CoordinateFrame {
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => CoordinateFrame::Base,
            1 => CoordinateFrame::Tool,
            n => CoordinateFrame::User(n - 2),
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            CoordinateFrame::Base => 0,
            CoordinateFrame::Tool => 1,
            CoordinateFrame::User(n) => n.saturating_add(2),
        }
    }
}

/// Speed and acceleration pair for one move.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedProfile {
    pub speed: f64,
    pub acceleration: f64,
}

impl SpeedProfile {
    pub const fn new(speed: f64, acceleration: f64) -> Self {
        Self { speed, acceleration }
    }
}

/// A single motion intent. Only one is ever in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionRequest {
    JointMove {
        pose: Pose,
        profile: SpeedProfile,
    },
    RelativeLinearMove {
        displacement: RelativeDisplacement,
        profile: SpeedProfile,
        frame: CoordinateFrame,
    },
}

/// What happened to one motion request. Never retried.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionOutcome {
    Started,
    StartTimeout(Duration),
    Completed,
    CompletionTimeout(Duration),
    TransportError(String),
    ControllerError(String),
}

impl MotionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, MotionOutcome::Started | MotionOutcome::Completed)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            MotionOutcome::Started | MotionOutcome::Completed => Ok(()),
            MotionOutcome::StartTimeout(t) => Err(CycleError::StartTimeout(t)),
            MotionOutcome::CompletionTimeout(t) => Err(CycleError::CompletionTimeout(t)),
            MotionOutcome::TransportError(detail) => Err(CycleError::Transport(detail)),
            MotionOutcome::ControllerError(detail) => Err(CycleError::Controller(detail)),
        }
    }
}

/// Requested gripper action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripIntent {
    Open,
    Closed,
}

impl GripIntent {
    /// Parse an operator-facing name. Unrecognized names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "open" | "release" => Some(GripIntent::Open),
            "close" | "closed" | "grab" => Some(GripIntent::Closed),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            GripIntent::Open => GripIntent::Closed,
            GripIntent::Closed => GripIntent::Open,
        }
    }
}

/// Advisory gripper state. Never read back from hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GripperState {
    Open,
    Closed,
    #[default]
    Unknown,
}

impl From<GripIntent> for GripperState {
    fn from(intent: GripIntent) -> Self {
        match intent {
            GripIntent::Open => GripperState::Open,
            GripIntent::Closed => GripperState::Closed,
        }
    }
}

/// Render a float so it always carries a decimal point and never uses
/// exponent notation; `Display` for f64 is already shortest-round-trip.
pub fn render_number(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || !value.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}

pub(crate) fn join_fields(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| render_number(*v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_rejects_wrong_arity() {
        let err = Pose::try_from(vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(err.to_string().contains("exactly 6"));
    }

    #[test]
    fn test_pose_rejects_non_finite() {
        assert!(Pose::new([0.0, f64::NAN, 0.0, 0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_render_number_keeps_precision_and_point() {
        assert_eq!(render_number(40.0), "40.0");
        assert_eq!(render_number(-40.0), "-40.0");
        assert_eq!(render_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(render_number(1e-7), "0.0000001");
        assert!(!render_number(1e21).contains('e'));
    }

    #[test]
    fn test_coordinate_frame_index_round_trip() {
        assert_eq!(CoordinateFrame::from_index(0), CoordinateFrame::Base);
        assert_eq!(CoordinateFrame::from_index(1), CoordinateFrame::Tool);
        assert_eq!(CoordinateFrame::from_index(2), CoordinateFrame::User(0));
        assert_eq!(CoordinateFrame::User(3).index(), 5);
        assert_eq!(CoordinateFrame::User(u32::MAX).index(), u32::MAX);
        assert_eq!(CoordinateFrame::User(u32::MAX - 1).index(), u32::MAX);
    }

    #[test]
    fn test_grip_intent_names() {
        assert_eq!(GripIntent::from_name("grab"), Some(GripIntent::Closed));
        assert_eq!(GripIntent::from_name(" Release "), Some(GripIntent::Open));
        assert_eq!(GripIntent::from_name("squeeze"), None);
        assert_eq!(GripIntent::Closed.opposite(), GripIntent::Open);
    }

    #[test]
    fn test_outcome_maps_to_error() {
        assert!(MotionOutcome::Completed.into_result().is_ok());
        let err = MotionOutcome::StartTimeout(Duration::from_secs(5))
            .into_result()
            .unwrap_err();
        assert!(matches!(err, CycleError::StartTimeout(_)));
        assert!(!MotionOutcome::TransportError("reset".into()).is_success());
    }
}
