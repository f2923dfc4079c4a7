//! Pickplace - dual-channel pick-and-place control for a 6-axis cobot
//!
//! Drives a collaborative arm through a repeatable pick-and-place cycle
//! over two independent controller connections: a structured motion SDK
//! for joint moves and digital outputs, and a raw script channel for
//! relative linear moves whose completion is detected from pushed
//! notifications.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pickplace::{Config, CycleSequencer, TcpCycleContext};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_from_path("config/default_config.yaml")?;
//!
//!     let mut ctx = TcpCycleContext::connect(&config)?;
//!     ctx.prepare(&config)?;
//!
//!     let mut sequencer = CycleSequencer::new(ctx, config);
//!     let report = sequencer.run_cycle(1)?;
//!     println!("Cycle {} done in {:?}", report.cycle, report.duration);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **CommandChannel**: script command encoding and request/reply round trips
//! - **CompletionMonitor**: waits for the motion-stopped notification
//! - **MotionDriver**: joint moves with start/finish handshake
//! - **GripperActuator**: digital-output gripper with pulse/hold policy
//! - **CycleSequencer**: the pick-and-place state machine
//! - **CycleContext**: single owner of both controller connections

pub mod channel;
pub mod completion;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod events;
pub mod gripper;
pub mod motion;
pub mod notification;
pub mod sdk;
pub mod sequencer;
pub mod transport;

// High-level exports for easy usage
pub use config::{CompletionTimeoutPolicy, Config, GripperConfig, OutputMode};
pub use context::{CycleContext, TcpCycleContext};
pub use error::{CycleError, Result};
pub use sequencer::{CycleReport, CycleSequencer, CycleState};

// Core component exports for advanced usage
pub use channel::{move_l_rel_command, CommandChannel};
pub use completion::CompletionMonitor;
pub use driver::{JointPhase, MotionDriver};
pub use events::{CycleEvent, CycleObserver, JsonLinesObserver, NoOpObserver, StepStatus};
pub use gripper::GripperActuator;
pub use motion::{
    CoordinateFrame, GripIntent, GripperState, MotionOutcome, MotionRequest, Pose,
    RelativeDisplacement, SpeedProfile,
};
pub use notification::{Notification, NotificationDecoder};
pub use sdk::{Endian, MotionSdk, OperationMode, ScriptSdk};
pub use transport::{ReadDeadline, TimedStream};
