//! Motion SDK interface
//!
//! `MotionSdk` is the structured command surface of the controller: joint
//! moves, instruction-queue flush, the error collector, start/finish waits,
//! digital outputs and global settings. `ScriptSdk` implements it over its
//! own script connection, queueing instructions until `flush` and sorting
//! every notification it reads into a response collector.

use crate::error::{CycleError, Result};
use crate::motion::{join_fields, render_number, Pose, SpeedProfile};
use crate::notification::{Notification, NotificationDecoder};
use crate::transport::{is_timeout, ReadDeadline, TimedStream};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Window spent collecting acknowledgements after a flush.
const ACK_WINDOW: Duration = Duration::from_millis(20);

/// Byte order for multi-bit digital output writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    fn code(self) -> u8 {
        match self {
            Endian::Little => 0,
            Endian::Big => 1,
        }
    }
}

/// Controller operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Real,
    #[default]
    Simulation,
}

/// Structured controller command surface used by the motion driver and
/// the gripper.
pub trait MotionSdk {
    /// Queue a joint move. Nothing is sent until `flush`.
    fn move_j(&mut self, pose: &Pose, profile: SpeedProfile) -> Result<()>;

    /// Transmit every queued instruction.
    fn flush(&mut self) -> Result<()>;

    /// Drain the error collector.
    fn take_errors(&mut self) -> Vec<String>;

    /// Wait until the controller reports that motion started.
    fn wait_for_move_started(&mut self, timeout: Duration) -> Result<bool>;

    /// Block until the controller reports that motion finished.
    fn wait_for_move_finished(&mut self) -> Result<()>;

    fn set_dout_bit_combination(
        &mut self,
        first: u8,
        last: u8,
        value: u32,
        endian: Endian,
    ) -> Result<()>;

    fn set_operation_mode(&mut self, mode: OperationMode) -> Result<()>;

    /// Global speed override, 0.0 to 1.0.
    fn set_speed_bar(&mut self, ratio: f64) -> Result<()>;
}

/// Decoded notifications not yet consumed, plus reported errors.
#[derive(Default)]
struct ResponseCollector {
    decoder: NotificationDecoder,
    inbox: VecDeque<Notification>,
    errors: Vec<String>,
}

impl ResponseCollector {
    fn ingest(&mut self, bytes: &[u8]) {
        for frame in self.decoder.push(bytes) {
            match frame {
                Notification::Error(detail) => {
                    warn!("Controller error: {}", detail);
                    self.errors.push(detail);
                }
                other => self.inbox.push_back(other),
            }
        }
    }

    /// Pop notifications until one satisfies `wanted`.
    fn take_first(&mut self, wanted: fn(&Notification) -> bool) -> bool {
        while let Some(frame) = self.inbox.pop_front() {
            if wanted(&frame) {
                return true;
            }
        }
        false
    }
}

pub struct ScriptSdk<S: TimedStream> {
    stream: S,
    queued: Vec<String>,
    responses: ResponseCollector,
}

impl<S: TimedStream> ScriptSdk<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            queued: Vec::new(),
            responses: ResponseCollector::default(),
        }
    }

    fn write_command(&mut self, command: &str) -> Result<()> {
        debug!("SDK command: {}", command);
        self.stream
            .write_all(command.as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(|e| CycleError::Transport(format!("SDK send failed: {}", e)))
    }

    /// Send a command that starts no motion and collect its reply. An error
    /// the controller reports within the acknowledgement window fails the
    /// command itself.
    fn send_acknowledged(&mut self, command: &str) -> Result<()> {
        self.write_command(command)?;
        self.poll(ACK_WINDOW)?;
        let errors = self.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CycleError::Controller(format!(
                "{} rejected: {}",
                command,
                errors.join("; ")
            )))
        }
    }

    /// Read whatever arrives within `window` into the collector.
    fn poll(&mut self, window: Duration) -> Result<()> {
        let started = Instant::now();
        let mut buffer = [0u8; 1024];
        let mut deadline = ReadDeadline::new(&mut self.stream);
        loop {
            let remaining = match window.checked_sub(started.elapsed()) {
                Some(r) if !r.is_zero() => r,
                _ => return Ok(()),
            };
            match deadline.recv(&mut buffer, remaining) {
                Ok(0) => {
                    return Err(CycleError::Transport(
                        "SDK connection closed by controller".to_string(),
                    ))
                }
                Ok(n) => self.responses.ingest(&buffer[..n]),
                Err(e) if is_timeout(&e) => return Ok(()),
                Err(e) => return Err(CycleError::Transport(format!("SDK receive failed: {}", e))),
            }
        }
    }

    /// Wait for a notification matching `wanted`.
    ///
    /// `Ok(false)` means the timeout elapsed or the controller reported an
    /// error first; the error stays in the collector.
    fn wait_for(
        &mut self,
        timeout: Option<Duration>,
        wanted: fn(&Notification) -> bool,
    ) -> Result<bool> {
        let started = Instant::now();
        let mut buffer = [0u8; 1024];
        loop {
            if !self.responses.errors.is_empty() {
                return Ok(false);
            }
            if self.responses.take_first(wanted) {
                return Ok(true);
            }

            let read = match timeout {
                Some(limit) => {
                    let remaining = match limit.checked_sub(started.elapsed()) {
                        Some(r) if !r.is_zero() => r,
                        _ => return Ok(false),
                    };
                    match ReadDeadline::new(&mut self.stream).recv(&mut buffer, remaining) {
                        Err(e) if is_timeout(&e) => return Ok(false),
                        other => other,
                    }
                }
                None => self.stream.read(&mut buffer),
            };

            match read {
                Ok(0) => {
                    return Err(CycleError::Transport(
                        "SDK connection closed by controller".to_string(),
                    ))
                }
                Ok(n) => self.responses.ingest(&buffer[..n]),
                Err(e) => return Err(CycleError::Transport(format!("SDK receive failed: {}", e))),
            }
        }
    }
}

impl<S: TimedStream> MotionSdk for ScriptSdk<S> {
    fn move_j(&mut self, pose: &Pose, profile: SpeedProfile) -> Result<()> {
        // Motion events left over from earlier moves must not satisfy the
        // waits of this one.
        self.poll(Duration::from_millis(1))?;
        self.responses.inbox.clear();

        self.queued.push(format!(
            "move_j(jnt[{}], {}, {})",
            join_fields(pose.joints()),
            render_number(profile.speed),
            render_number(profile.acceleration)
        ));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for command in std::mem::take(&mut self.queued) {
            self.write_command(&command)?;
        }
        self.poll(ACK_WINDOW)
    }

    fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.responses.errors)
    }

    fn wait_for_move_started(&mut self, timeout: Duration) -> Result<bool> {
        self.wait_for(Some(timeout), Notification::is_motion_started)
    }

    fn wait_for_move_finished(&mut self) -> Result<()> {
        self.wait_for(None, Notification::is_motion_stopped)?;
        Ok(())
    }

    fn set_dout_bit_combination(
        &mut self,
        first: u8,
        last: u8,
        value: u32,
        endian: Endian,
    ) -> Result<()> {
        self.send_acknowledged(&format!(
            "set_dout_bit_combination({}, {}, {}, {})",
            first,
            last,
            value,
            endian.code()
        ))
    }

    fn set_operation_mode(&mut self, mode: OperationMode) -> Result<()> {
        info!("Setting operation mode: {:?}", mode);
        let command = match mode {
            OperationMode::Real => "pgmode real",
            OperationMode::Simulation => "pgmode simulation",
        };
        self.send_acknowledged(command)
    }

    fn set_speed_bar(&mut self, ratio: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(CycleError::InvalidCommand(format!(
                "speed override must be within 0.0..=1.0, got {}",
                ratio
            )));
        }
        info!("Setting speed override: {:.0}%", ratio * 100.0);
        self.send_acknowledged(&format!("sdw default_speed {}", render_number(ratio)))
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! Recording SDK for unit tests.

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub enum SdkCall {
        MoveJ(Pose, SpeedProfile),
        Flush,
        TakeErrors,
        WaitStarted(Duration),
        WaitFinished,
        Dout { first: u8, last: u8, value: u32, endian: Endian },
        OperationMode(OperationMode),
        SpeedBar(f64),
    }

    pub struct RecordingSdk {
        pub calls: Vec<SdkCall>,
        /// Result of every start wait.
        pub starts: bool,
        /// Errors reported once the queue is flushed.
        pub errors_on_flush: Vec<String>,
        /// Errors reported once the start wait gives up.
        pub errors_on_start_failure: Vec<String>,
        pub fail_dout: bool,
        errors: Vec<String>,
    }

    impl RecordingSdk {
        pub fn new() -> Self {
            Self {
                calls: Vec::new(),
                starts: true,
                errors_on_flush: Vec::new(),
                errors_on_start_failure: Vec::new(),
                fail_dout: false,
                errors: Vec::new(),
            }
        }

        pub fn dout_values(&self) -> Vec<u32> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    SdkCall::Dout { value, .. } => Some(*value),
                    _ => None,
                })
                .collect()
        }

        pub fn joint_moves(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, SdkCall::MoveJ(..)))
                .count()
        }
    }

    impl MotionSdk for RecordingSdk {
        fn move_j(&mut self, pose: &Pose, profile: SpeedProfile) -> Result<()> {
            self.calls.push(SdkCall::MoveJ(*pose, profile));
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            self.calls.push(SdkCall::Flush);
            self.errors.append(&mut self.errors_on_flush);
            Ok(())
        }

        fn take_errors(&mut self) -> Vec<String> {
            self.calls.push(SdkCall::TakeErrors);
            std::mem::take(&mut self.errors)
        }

        fn wait_for_move_started(&mut self, timeout: Duration) -> Result<bool> {
            self.calls.push(SdkCall::WaitStarted(timeout));
            if !self.starts {
                self.errors.append(&mut self.errors_on_start_failure);
            }
            Ok(self.starts)
        }

        fn wait_for_move_finished(&mut self) -> Result<()> {
            self.calls.push(SdkCall::WaitFinished);
            Ok(())
        }

        fn set_dout_bit_combination(
            &mut self,
            first: u8,
            last: u8,
            value: u32,
            endian: Endian,
        ) -> Result<()> {
            if self.fail_dout {
                return Err(CycleError::Transport("dout write failed".to_string()));
            }
            self.calls.push(SdkCall::Dout { first, last, value, endian });
            Ok(())
        }

        fn set_operation_mode(&mut self, mode: OperationMode) -> Result<()> {
            self.calls.push(SdkCall::OperationMode(mode));
            Ok(())
        }

        fn set_speed_bar(&mut self, ratio: f64) -> Result<()> {
            self.calls.push(SdkCall::SpeedBar(ratio));
            Ok(())
        }
    }
}
