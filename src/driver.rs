//! Joint-space motion driver
//!
//! Runs the start/finish handshake for one joint move through the SDK.
//! Separating "started" from "finished" catches a command that was
//! accepted but never executed, which a finished-wait alone cannot tell
//! apart from a zero-length move.

use crate::motion::{MotionOutcome, Pose, SpeedProfile};
use crate::sdk::MotionSdk;
use std::time::Duration;
use tracing::{error, info};

/// Bound on the wait for motion to start.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress of the joint move currently or last handled by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointPhase {
    Idle,
    Submitted,
    Started,
    Completed,
    Failed,
}

pub struct MotionDriver {
    start_timeout: Duration,
    phase: JointPhase,
}

impl MotionDriver {
    pub fn new(start_timeout: Duration) -> Self {
        Self {
            start_timeout,
            phase: JointPhase::Idle,
        }
    }

    pub fn phase(&self) -> JointPhase {
        self.phase
    }

    /// Move to `pose` and block until the controller reports the move done.
    ///
    /// Returns `Completed`, `StartTimeout`, `ControllerError` or
    /// `TransportError`; nothing is retried.
    pub fn move_joint<D: MotionSdk>(
        &mut self,
        sdk: &mut D,
        pose: &Pose,
        profile: SpeedProfile,
    ) -> MotionOutcome {
        info!(
            "Joint move to [{}] (speed {}, acceleration {})",
            pose, profile.speed, profile.acceleration
        );
        let outcome = self.run_handshake(sdk, pose, profile);
        self.phase = if outcome == MotionOutcome::Completed {
            JointPhase::Completed
        } else {
            error!("Joint move failed: {:?}", outcome);
            JointPhase::Failed
        };
        outcome
    }

    fn run_handshake<D: MotionSdk>(
        &mut self,
        sdk: &mut D,
        pose: &Pose,
        profile: SpeedProfile,
    ) -> MotionOutcome {
        // Joint moves are flushed on their own, never batched with later
        // instructions.
        if let Err(e) = sdk.move_j(pose, profile).and_then(|_| sdk.flush()) {
            return MotionOutcome::TransportError(e.to_string());
        }
        self.phase = JointPhase::Submitted;

        let errors = sdk.take_errors();
        if !errors.is_empty() {
            return MotionOutcome::ControllerError(errors.join("; "));
        }

        match sdk.wait_for_move_started(self.start_timeout) {
            Ok(true) => {}
            Ok(false) => {
                let errors = sdk.take_errors();
                return if errors.is_empty() {
                    MotionOutcome::StartTimeout(self.start_timeout)
                } else {
                    MotionOutcome::ControllerError(errors.join("; "))
                };
            }
            Err(e) => return MotionOutcome::TransportError(e.to_string()),
        }
        self.phase = JointPhase::Started;
        info!("Joint move started, waiting for completion");

        if let Err(e) = sdk.wait_for_move_finished() {
            return MotionOutcome::TransportError(e.to_string());
        }

        let errors = sdk.take_errors();
        if !errors.is_empty() {
            return MotionOutcome::ControllerError(errors.join("; "));
        }
        info!("Joint move complete");
        MotionOutcome::Completed
    }
}

impl Default for MotionDriver {
    fn default() -> Self {
        Self::new(DEFAULT_START_TIMEOUT)
    }
}
