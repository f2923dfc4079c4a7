//! Cycle context: the single owner of both controller connections
//!
//! The script channel and the SDK handle live here and nowhere else. The
//! context is moved into the sequencer, which lends `&mut` access to one
//! component at a time, so no second thread or second cycle can touch a
//! connection while a read timeout is installed on it.

use crate::channel::CommandChannel;
use crate::config::Config;
use crate::error::{CycleError, Result};
use crate::sdk::{MotionSdk, ScriptSdk};
use crate::transport::{connect_tcp, TimedStream};
use std::net::TcpStream;
use tracing::{error, info};

pub struct CycleContext<S: TimedStream, D: MotionSdk> {
    pub channel: CommandChannel<S>,
    pub sdk: D,
}

/// Context over live TCP connections.
pub type TcpCycleContext = CycleContext<TcpStream, ScriptSdk<TcpStream>>;

impl<S: TimedStream, D: MotionSdk> CycleContext<S, D> {
    pub fn new(channel: CommandChannel<S>, sdk: D) -> Self {
        Self { channel, sdk }
    }

    /// Apply operation mode and global speed override before any motion.
    pub fn prepare(&mut self, config: &Config) -> Result<()> {
        info!(
            "Preparing controller: mode {:?}, speed override {:.0}%",
            config.robot.operation_mode,
            config.robot.speed_override() * 100.0
        );
        self.sdk.set_operation_mode(config.robot.operation_mode)?;
        self.sdk.set_speed_bar(config.robot.speed_override())?;

        let errors = self.sdk.take_errors();
        if !errors.is_empty() {
            return Err(CycleError::Controller(errors.join("; ")));
        }
        Ok(())
    }
}

impl TcpCycleContext {
    /// Open the SDK and script connections to the configured controller.
    pub fn connect(config: &Config) -> Result<Self> {
        let host = config.robot.host.as_str();
        let timeout = config.robot.connect_timeout();

        info!("Connecting to controller SDK at {}:{}", host, config.robot.sdk_port());
        let sdk_stream = connect_tcp(host, config.robot.sdk_port(), timeout).map_err(|e| {
            error!("SDK connection failed: {}", e);
            CycleError::Transport(format!(
                "failed to connect to {}:{}: {}",
                host,
                config.robot.sdk_port(),
                e
            ))
        })?;

        info!("Connecting to script channel at {}:{}", host, config.robot.script_port());
        let script_stream = connect_tcp(host, config.robot.script_port(), timeout).map_err(|e| {
            error!("Script channel connection failed: {}", e);
            CycleError::Transport(format!(
                "failed to connect to {}:{}: {}",
                host,
                config.robot.script_port(),
                e
            ))
        })?;

        info!("Controller connections established");
        Ok(Self::new(
            CommandChannel::new(script_stream),
            ScriptSdk::new(sdk_stream),
        ))
    }
}
