//! Script command channel
//!
//! Persistent connection to the controller's script interpreter. Each
//! request is one write followed by exactly one bounded read; concurrent
//! requests are never multiplexed. The same connection also carries the
//! asynchronous notifications consumed by the completion monitor.

use crate::error::{CycleError, Result};
use crate::motion::{join_fields, render_number, CoordinateFrame, RelativeDisplacement, SpeedProfile};
use crate::transport::{ReadDeadline, TimedStream};
use std::io::{Read, Write};
use tracing::{debug, warn};

/// Default script interpreter port on the controller.
pub const SCRIPT_PORT: u16 = 5000;

/// Upper bound of one reply read.
pub const REPLY_BUFFER_SIZE: usize = 1024;

/// Build the `move_l_rel` script command for a relative linear move.
pub fn move_l_rel_command(
    displacement: &RelativeDisplacement,
    profile: SpeedProfile,
    frame: CoordinateFrame,
) -> String {
    format!(
        "move_l_rel(pnt[{}], {}, {}, {})",
        join_fields(displacement.components()),
        render_number(profile.speed),
        render_number(profile.acceleration),
        frame.index()
    )
}

pub struct CommandChannel<S: TimedStream> {
    stream: S,
}

impl<S: TimedStream> CommandChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Send one command and return whatever the single reply read yields.
    ///
    /// The reply is raw text and may be partial or hold several messages.
    pub fn send(&mut self, command: &str) -> Result<String> {
        debug!("Sending script command: {}", command);

        self.stream
            .write_all(command.as_bytes())
            .and_then(|_| self.stream.flush())
            .map_err(|e| {
                warn!("Script command send failed: {}", e);
                CycleError::Transport(format!("send failed: {}", e))
            })?;

        let mut buffer = [0u8; REPLY_BUFFER_SIZE];
        let n = self.stream.read(&mut buffer).map_err(|e| {
            warn!("Script reply read failed: {}", e);
            CycleError::Transport(format!("receive failed: {}", e))
        })?;
        if n == 0 {
            return Err(CycleError::Transport(
                "connection closed by controller".to_string(),
            ));
        }

        let reply = String::from_utf8_lossy(&buffer[..n]).into_owned();
        debug!("Script reply: {}", reply.trim());
        Ok(reply)
    }

    /// Encode and send a relative linear move. Completion is not awaited.
    pub fn send_relative_move(
        &mut self,
        displacement: &RelativeDisplacement,
        profile: SpeedProfile,
        frame: CoordinateFrame,
    ) -> Result<String> {
        let command = move_l_rel_command(displacement, profile, frame);
        self.send(&command)
    }

    /// Borrow the connection for reads bounded by a deadline. The timeout
    /// is removed when the returned guard is dropped.
    pub fn read_deadline(&mut self) -> ReadDeadline<'_, S> {
        ReadDeadline::new(&mut self.stream)
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
