//! Completion monitor for relative moves
//!
//! Watches the notification stream on the script channel for the
//! motion-stopped event (`info[motion_changed][0]`). This is best effort:
//! the event marks a motion state transition and is used as a proxy for
//! "the relative move finished", not as a guaranteed acknowledgement.

use crate::channel::CommandChannel;
use crate::notification::{Notification, NotificationDecoder};
use crate::transport::{is_timeout, TimedStream};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default wait for the motion-stopped event.
pub const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CompletionMonitor {
    decoder: NotificationDecoder,
}

impl CompletionMonitor {
    pub fn new() -> Self {
        Self {
            decoder: NotificationDecoder::new(),
        }
    }

    /// Block until the motion-stopped event arrives or `timeout` elapses.
    ///
    /// Returns `false` on timeout, on a socket timeout and on any read
    /// failure. The channel's read timeout is cleared on every exit path.
    pub fn await_motion_changed<S: TimedStream>(
        &mut self,
        channel: &mut CommandChannel<S>,
        timeout: Duration,
    ) -> bool {
        info!("Waiting up to {:?} for motion completion", timeout);
        self.decoder.reset();

        let started = Instant::now();
        let mut deadline = channel.read_deadline();
        let mut buffer = [0u8; 1024];

        loop {
            let remaining = match timeout.checked_sub(started.elapsed()) {
                Some(r) if !r.is_zero() => r,
                _ => {
                    warn!("Motion completion not observed within {:?}", timeout);
                    return false;
                }
            };

            let n = match deadline.recv(&mut buffer, remaining) {
                Ok(0) => {
                    warn!("Script connection closed while waiting for motion completion");
                    return false;
                }
                Ok(n) => n,
                Err(e) if is_timeout(&e) => {
                    warn!("Socket receive timed out after {:?}", timeout);
                    return false;
                }
                Err(e) => {
                    warn!("Socket error while waiting for motion completion: {}", e);
                    return false;
                }
            };

            for frame in self.decoder.push(&buffer[..n]) {
                match frame {
                    Notification::MotionChanged(0) => {
                        debug!("Motion completion observed after {:?}", started.elapsed());
                        return true;
                    }
                    Notification::Error(detail) => {
                        warn!("Controller error while waiting for motion: {}", detail);
                    }
                    Notification::Unknown(text) => {
                        debug!("Ignoring unrecognized notification: {}", text);
                    }
                    other => debug!("Notification: {:?}", other),
                }
            }
        }
    }
}

impl Default for CompletionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
