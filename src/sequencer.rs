//! Pick-and-place cycle sequencer
//!
//! Composes joint moves, relative linear moves and gripper actuation into
//! one repeatable unit cycle:
//!
//! ```text
//! Idle -> ApproachOrigin -> DescendToPose -> Grip(Closed) -> AscendFromPose
//!      -> Travel(target) -> DescendAtTarget -> Grip(Open) -> AscendAtTarget -> Idle
//! ```
//!
//! A step only advances once its outcome is a success. Joint move failures
//! are always fatal; a missing completion event on a linear move follows
//! the configured `CompletionTimeoutPolicy`. A failed cycle returns to
//! `Idle` and must be started again from the beginning.

use crate::completion::CompletionMonitor;
use crate::config::{CompletionTimeoutPolicy, Config};
use crate::context::CycleContext;
use crate::driver::MotionDriver;
use crate::error::{CycleError, Result};
use crate::events::{CycleEvent, CycleObserver, NoOpObserver, StepStatus};
use crate::gripper::GripperActuator;
use crate::motion::{
    GripIntent, GripperState, MotionOutcome, MotionRequest, Pose, RelativeDisplacement, SpeedProfile,
};
use crate::sdk::MotionSdk;
use crate::transport::TimedStream;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Grip applied at the origin; the opposite one releases at the target.
const PICK_GRIP: GripIntent = GripIntent::Closed;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Home,
    ApproachOrigin,
    DescendToPose,
    Grip(GripIntent),
    AscendFromPose,
    Travel(u32),
    DescendAtTarget,
    AscendAtTarget,
}

/// Summary of one completed unit cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub target: u32,
    /// Linear moves whose completion event never arrived.
    pub completion_warnings: u32,
    pub duration: Duration,
}

pub struct CycleSequencer<S: TimedStream, D: MotionSdk> {
    ctx: CycleContext<S, D>,
    config: Config,
    driver: MotionDriver,
    monitor: CompletionMonitor,
    gripper: GripperActuator,
    observer: Box<dyn CycleObserver>,
    state: CycleState,
    cycle: u64,
    completion_warnings: u32,
}

impl<S: TimedStream, D: MotionSdk> CycleSequencer<S, D> {
    pub fn new(ctx: CycleContext<S, D>, config: Config) -> Self {
        Self {
            driver: MotionDriver::new(config.timeouts.move_start()),
            gripper: GripperActuator::new(config.gripper.clone()),
            monitor: CompletionMonitor::new(),
            observer: Box::new(NoOpObserver),
            state: CycleState::Idle,
            cycle: 0,
            completion_warnings: 0,
            ctx,
            config,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn CycleObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn gripper_state(&self) -> GripperState {
        self.gripper.state()
    }

    pub fn context(&self) -> &CycleContext<S, D> {
        &self.ctx
    }

    pub fn into_context(self) -> CycleContext<S, D> {
        self.ctx
    }

    /// Joint move to the configured home pose at the home speed profile.
    pub fn move_home(&mut self) -> Result<()> {
        let pose = self.config.poses.home;
        let profile = self.config.motion.home;
        self.guarded(|seq| {
            seq.step(CycleState::Home, |seq| seq.joint_move(&pose, profile))
        })
    }

    /// Single gripper command by name. Unrecognized names leave the
    /// gripper untouched and return its last commanded state.
    pub fn grip_named(&mut self, name: &str) -> Result<GripperState> {
        let Some(intent) = GripIntent::from_name(name) else {
            return self.gripper.actuate_named(&mut self.ctx.sdk, name);
        };
        self.guarded(|seq| seq.grip_step(intent))?;
        Ok(self.gripper.state())
    }

    /// Run one full pick-and-place cycle to target pose `target`.
    pub fn run_cycle(&mut self, target: u32) -> Result<CycleReport> {
        // Unknown targets fail before anything moves.
        let target_pose = *self.config.target_pose(target)?;
        let origin = *self.config.poses.origin();

        self.cycle += 1;
        self.completion_warnings = 0;
        let started = Instant::now();
        info!("Starting cycle {} to target pose {}", self.cycle, target);

        self.guarded(|seq| seq.unit_steps(&origin, target, &target_pose))?;

        let report = CycleReport {
            cycle: self.cycle,
            target,
            completion_warnings: self.completion_warnings,
            duration: started.elapsed(),
        };
        info!(
            "Cycle {} complete in {:.2?} ({} completion warnings)",
            report.cycle, report.duration, report.completion_warnings
        );
        Ok(report)
    }

    /// Run `repeat` cycles to the same target, stopping at the first failure.
    pub fn run_cycles(&mut self, target: u32, repeat: u32) -> Result<Vec<CycleReport>> {
        self.config.target_pose(target)?;
        let mut reports = Vec::new();
        for _ in 0..repeat {
            reports.push(self.run_cycle(target)?);
        }
        Ok(reports)
    }

    /// Gripper endurance test: close, wait, open, wait. Runs forever when
    /// `iterations` is `None`. Returns the number of completed pairs.
    pub fn run_soak(&mut self, iterations: Option<u64>) -> Result<u64> {
        let delay = self.config.soak.delay();
        match iterations {
            Some(n) => info!("Starting gripper soak: {} iterations, {:?} delay", n, delay),
            None => info!("Starting gripper soak: unbounded, {:?} delay", delay),
        }

        let mut completed = 0;
        self.guarded(|seq| {
            while iterations.map_or(true, |n| completed < n) {
                seq.cycle += 1;
                seq.grip_step(GripIntent::Closed)?;
                thread::sleep(delay);
                seq.grip_step(GripIntent::Open)?;
                thread::sleep(delay);
                completed += 1;
                debug!("Soak iteration {} done", completed);
            }
            Ok(())
        })?;

        info!("Gripper soak finished after {} iterations", completed);
        Ok(completed)
    }

    fn unit_steps(&mut self, origin: &Pose, target: u32, target_pose: &Pose) -> Result<()> {
        let joint = self.config.motion.joint;
        let distance = self.config.motion.approach_distance_mm;

        self.step(CycleState::ApproachOrigin, |seq| seq.joint_move(origin, joint))?;
        self.linear_step(CycleState::DescendToPose, -distance)?;
        self.grip_step(PICK_GRIP)?;
        self.linear_step(CycleState::AscendFromPose, distance)?;
        self.step(CycleState::Travel(target), |seq| seq.joint_move(target_pose, joint))?;
        self.linear_step(CycleState::DescendAtTarget, -distance)?;
        self.grip_step(PICK_GRIP.opposite())?;
        self.linear_step(CycleState::AscendAtTarget, distance)?;
        Ok(())
    }

    /// Run `body`; on success or failure the sequencer ends in `Idle`.
    fn guarded<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let result = body(self);
        if let Err(e) = &result {
            let failed_in = self.state;
            error!("Cycle {} failed in {:?}: {}", self.cycle, failed_in, e);
            self.emit(failed_in, StepStatus::Failed, Some(e.to_string()));
        }
        self.enter(CycleState::Idle);
        result
    }

    fn step<F>(&mut self, state: CycleState, body: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.enter(state);
        body(self)?;
        self.emit(state, StepStatus::Completed, None);
        Ok(())
    }

    fn linear_step(&mut self, state: CycleState, dz: f64) -> Result<()> {
        self.step(state, |seq| {
            let request = MotionRequest::RelativeLinearMove {
                displacement: RelativeDisplacement::along_z(dz)?,
                profile: seq.config.motion.linear,
                frame: seq.config.motion.frame(),
            };
            match seq.dispatch(&request) {
                MotionOutcome::CompletionTimeout(timeout) => seq.on_completion_timeout(state, timeout),
                outcome => outcome.into_result(),
            }
        })
    }

    fn grip_step(&mut self, intent: GripIntent) -> Result<()> {
        self.step(CycleState::Grip(intent), |seq| {
            seq.gripper.actuate(&mut seq.ctx.sdk, intent)?;
            Ok(())
        })
    }

    fn joint_move(&mut self, pose: &Pose, profile: SpeedProfile) -> Result<()> {
        let request = MotionRequest::JointMove { pose: *pose, profile };
        self.dispatch(&request).into_result()
    }

    /// Issue one motion request on its channel and wait for its outcome.
    fn dispatch(&mut self, request: &MotionRequest) -> MotionOutcome {
        match request {
            MotionRequest::JointMove { pose, profile } => {
                self.driver.move_joint(&mut self.ctx.sdk, pose, *profile)
            }
            MotionRequest::RelativeLinearMove {
                displacement,
                profile,
                frame,
            } => {
                info!(
                    "Relative move {:?} in frame {} (speed {}, acceleration {})",
                    displacement.components(),
                    frame.index(),
                    profile.speed,
                    profile.acceleration
                );
                match self.ctx.channel.send_relative_move(displacement, *profile, *frame) {
                    Ok(reply) => debug!("Relative move accepted: {}", reply.trim()),
                    Err(CycleError::Transport(detail)) => return MotionOutcome::TransportError(detail),
                    Err(e) => return MotionOutcome::TransportError(e.to_string()),
                }

                let timeout = self.config.timeouts.notification();
                if self.monitor.await_motion_changed(&mut self.ctx.channel, timeout) {
                    MotionOutcome::Completed
                } else {
                    MotionOutcome::CompletionTimeout(timeout)
                }
            }
        }
    }

    fn on_completion_timeout(&mut self, state: CycleState, timeout: Duration) -> Result<()> {
        match self.config.policy.on_completion_timeout {
            CompletionTimeoutPolicy::Warn => {
                warn!(
                    "{:?}: completion not observed within {:?}, continuing",
                    state, timeout
                );
                self.completion_warnings += 1;
                self.emit(
                    state,
                    StepStatus::Warning,
                    Some(format!("completion not observed within {:?}", timeout)),
                );
                Ok(())
            }
            CompletionTimeoutPolicy::Abort => Err(CycleError::CompletionTimeout(timeout)),
        }
    }

    fn enter(&mut self, state: CycleState) {
        if self.state != state {
            debug!("{:?} -> {:?}", self.state, state);
        }
        self.state = state;
        self.emit(state, StepStatus::Entered, None);
    }

    fn emit(&mut self, state: CycleState, status: StepStatus, message: Option<String>) {
        let event = CycleEvent::new(self.cycle, state, status, message);
        self.observer.on_event(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommandChannel;
    use crate::sdk::fake::{RecordingSdk, SdkCall};
    use crate::transport::fake::{Chunk, FakeStream};
    use std::cell::RefCell;
    use std::rc::Rc;

    const CONFIG: &str = r#"
robot:
  host: 127.0.0.1
poses:
  home: [-135.0, 0.0, 90.0, 0.0, 90.0, 45.0]
  targets:
    1: [-166.67, 37.03, 94.11, -41.15, 89.96, 76.46]
timeouts:
  move_start_seconds: 0.05
  notification_seconds: 0.05
gripper:
  first_bit: 0
  last_bit: 3
  grab_code: 2
  release_code: 1
  neutral_code: 0
  settle_ms: 1
  close_mode: pulse
  open_mode: hold
soak:
  delay_ms: 5
"#;

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<CycleEvent>>>);

    impl CycleObserver for Recorder {
        fn on_event(&mut self, event: &CycleEvent) {
            self.0.borrow_mut().push(event.clone());
        }
    }

    impl Recorder {
        fn entered(&self) -> Vec<CycleState> {
            self.0
                .borrow()
                .iter()
                .filter(|e| e.status == StepStatus::Entered)
                .map(|e| e.state)
                .collect()
        }

        fn with_status(&self, status: StepStatus) -> Vec<CycleEvent> {
            self.0
                .borrow()
                .iter()
                .filter(|e| e.status == status)
                .cloned()
                .collect()
        }
    }

    /// Script stream that acknowledges `moves` relative moves and reports
    /// each one finished.
    fn acknowledging_stream(moves: usize) -> FakeStream {
        let mut stream = FakeStream::new();
        for _ in 0..moves {
            stream.push_text("ok").push_text("info[motion_changed][0]\n");
        }
        stream
    }

    fn sequencer(
        yaml: &str,
        stream: FakeStream,
        sdk: RecordingSdk,
    ) -> (CycleSequencer<FakeStream, RecordingSdk>, Recorder) {
        let config = Config::load_from_str(yaml).unwrap();
        let recorder = Recorder::default();
        let ctx = CycleContext::new(CommandChannel::new(stream), sdk);
        let seq = CycleSequencer::new(ctx, config).with_observer(Box::new(recorder.clone()));
        (seq, recorder)
    }

    #[test]
    fn test_full_cycle_returns_to_idle() {
        let (mut seq, recorder) = sequencer(CONFIG, acknowledging_stream(4), RecordingSdk::new());

        let report = seq.run_cycle(1).unwrap();
        assert_eq!(report.cycle, 1);
        assert_eq!(report.completion_warnings, 0);
        assert_eq!(seq.state(), CycleState::Idle);
        assert_eq!(seq.gripper_state(), GripperState::Open);
        assert_eq!(
            recorder.entered(),
            vec![
                CycleState::ApproachOrigin,
                CycleState::DescendToPose,
                CycleState::Grip(GripIntent::Closed),
                CycleState::AscendFromPose,
                CycleState::Travel(1),
                CycleState::DescendAtTarget,
                CycleState::Grip(GripIntent::Open),
                CycleState::AscendAtTarget,
                CycleState::Idle,
            ]
        );

        let ctx = seq.into_context();
        let written = ctx.channel.get_ref().written_text();
        assert_eq!(written.matches("move_l_rel(").count(), 4);
        assert!(written.starts_with("move_l_rel(pnt[0.0, 0.0, -40.0, 0.0, 0.0, 0.0], 300.0, 300.0, 2)"));
        assert_eq!(ctx.sdk.joint_moves(), 2);
        assert_eq!(ctx.sdk.dout_values(), vec![2, 0, 1]);
        assert_eq!(ctx.channel.get_ref().timeout, None);
    }

    #[test]
    fn test_start_timeout_fails_before_any_relative_move_or_grip() {
        let mut sdk = RecordingSdk::new();
        sdk.starts = false;
        let (mut seq, recorder) = sequencer(CONFIG, acknowledging_stream(4), sdk);

        let err = seq.run_cycle(1).unwrap_err();
        assert!(matches!(err, CycleError::StartTimeout(_)));
        assert_eq!(seq.state(), CycleState::Idle);

        let failed = recorder.with_status(StepStatus::Failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].state, CycleState::ApproachOrigin);

        let ctx = seq.into_context();
        assert!(ctx.channel.get_ref().written.is_empty());
        assert!(ctx.sdk.dout_values().is_empty());
        assert!(!ctx.sdk.calls.contains(&SdkCall::WaitFinished));
    }

    #[test]
    fn test_unknown_target_fails_before_motion() {
        let (mut seq, _) = sequencer(CONFIG, acknowledging_stream(4), RecordingSdk::new());
        assert!(matches!(seq.run_cycle(7), Err(CycleError::UnknownPose(7))));
        assert!(seq.context().sdk.calls.is_empty());
    }

    #[test]
    fn test_repeat_run_to_unknown_target_fails_up_front() {
        let (mut seq, recorder) = sequencer(CONFIG, FakeStream::new(), RecordingSdk::new());
        assert!(matches!(
            seq.run_cycles(9, u32::MAX),
            Err(CycleError::UnknownPose(9))
        ));
        assert!(seq.context().sdk.calls.is_empty());
        assert!(recorder.0.borrow().is_empty());
    }

    #[test]
    fn test_repeat_runs_each_cycle_from_idle() {
        let (mut seq, _) = sequencer(CONFIG, acknowledging_stream(8), RecordingSdk::new());
        let reports = seq.run_cycles(1, 2).unwrap();
        assert_eq!(reports.iter().map(|r| r.cycle).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(seq.state(), CycleState::Idle);
        assert_eq!(seq.into_context().sdk.joint_moves(), 4);
    }

    #[test]
    fn test_missing_completion_warns_by_default() {
        // Every reply arrives but each completion wait times out.
        let mut stream = FakeStream::new();
        for _ in 0..4 {
            stream.push_text("ok").push(Chunk::Timeout);
        }
        let (mut seq, recorder) = sequencer(CONFIG, stream, RecordingSdk::new());

        let report = seq.run_cycle(1).unwrap();
        assert_eq!(report.completion_warnings, 4);
        assert_eq!(recorder.with_status(StepStatus::Warning).len(), 4);
        assert_eq!(seq.context().channel.get_ref().timeout, None);
    }

    #[test]
    fn test_missing_completion_aborts_when_configured() {
        let yaml = format!("{}policy:\n  on_completion_timeout: abort\n", CONFIG);
        let mut stream = FakeStream::new();
        stream.push_text("ok");
        let (mut seq, recorder) = sequencer(&yaml, stream, RecordingSdk::new());

        let err = seq.run_cycle(1).unwrap_err();
        assert!(matches!(err, CycleError::CompletionTimeout(_)));
        assert_eq!(
            recorder.with_status(StepStatus::Failed)[0].state,
            CycleState::DescendToPose
        );
        // Nothing was gripped.
        assert!(seq.context().sdk.dout_values().is_empty());
    }

    #[test]
    fn test_script_transport_error_aborts_step() {
        let mut stream = FakeStream::new();
        stream.fail_writes = true;
        let (mut seq, _) = sequencer(CONFIG, stream, RecordingSdk::new());

        let err = seq.run_cycle(1).unwrap_err();
        assert!(matches!(err, CycleError::Transport(_)));
        assert_eq!(seq.state(), CycleState::Idle);
    }

    #[test]
    fn test_cycle_can_restart_after_failure() {
        let mut stream = FakeStream::new();
        stream.fail_writes = true;
        let (mut seq, _) = sequencer(CONFIG, stream, RecordingSdk::new());
        assert!(seq.run_cycle(1).is_err());

        let mut ctx = seq.into_context();
        let mut stream = ctx.channel.into_inner();
        stream.fail_writes = false;
        stream.reads = acknowledging_stream(4).reads;
        ctx.channel = CommandChannel::new(stream);

        let config = Config::load_from_str(CONFIG).unwrap();
        let mut seq = CycleSequencer::new(ctx, config);
        assert!(seq.run_cycle(1).is_ok());
    }

    #[test]
    fn test_soak_alternates_close_and_open() {
        let (mut seq, recorder) = sequencer(CONFIG, FakeStream::new(), RecordingSdk::new());

        let started = Instant::now();
        let done = seq.run_soak(Some(3)).unwrap();
        assert_eq!(done, 3);
        // Two delays per iteration.
        assert!(started.elapsed() >= Duration::from_millis(5 * 2 * 3));

        let grips: Vec<CycleState> = recorder
            .entered()
            .into_iter()
            .filter(|s| matches!(s, CycleState::Grip(_)))
            .collect();
        let expected: Vec<CycleState> = (0..3)
            .flat_map(|_| {
                [
                    CycleState::Grip(GripIntent::Closed),
                    CycleState::Grip(GripIntent::Open),
                ]
            })
            .collect();
        assert_eq!(grips, expected);

        let ctx = seq.into_context();
        assert_eq!(ctx.sdk.dout_values(), vec![2, 0, 1, 2, 0, 1, 2, 0, 1]);
        assert_eq!(ctx.sdk.joint_moves(), 0);
        assert!(ctx.channel.get_ref().written.is_empty());
    }

    #[test]
    fn test_grip_by_name() {
        let (mut seq, recorder) = sequencer(CONFIG, FakeStream::new(), RecordingSdk::new());

        assert_eq!(seq.grip_named("grab").unwrap(), GripperState::Closed);
        assert_eq!(seq.grip_named("wiggle").unwrap(), GripperState::Closed);
        assert_eq!(seq.grip_named("release").unwrap(), GripperState::Open);
        assert_eq!(seq.state(), CycleState::Idle);
        assert_eq!(
            recorder.entered(),
            vec![
                CycleState::Grip(GripIntent::Closed),
                CycleState::Idle,
                CycleState::Grip(GripIntent::Open),
                CycleState::Idle,
            ]
        );
        assert_eq!(seq.into_context().sdk.dout_values(), vec![2, 0, 1]);
    }

    #[test]
    fn test_move_home_uses_home_profile() {
        let (mut seq, _) = sequencer(CONFIG, FakeStream::new(), RecordingSdk::new());
        seq.move_home().unwrap();

        let ctx = seq.into_context();
        let home = Pose::new([-135.0, 0.0, 90.0, 0.0, 90.0, 45.0]).unwrap();
        assert_eq!(ctx.sdk.calls[0], SdkCall::MoveJ(home, SpeedProfile::new(30.0, 30.0)));
    }
}
