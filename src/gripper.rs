//! Digital-output gripper actuation
//!
//! The gripper is driven by a bit pattern on the controller's digital
//! outputs. Nothing is read back: the resulting `GripperState` is advisory.

use crate::config::{GripperConfig, OutputMode};
use crate::error::Result;
use crate::motion::{GripIntent, GripperState};
use crate::sdk::MotionSdk;
use std::thread;
use tracing::{info, warn};

pub struct GripperActuator {
    config: GripperConfig,
    state: GripperState,
}

impl GripperActuator {
    pub fn new(config: GripperConfig) -> Self {
        Self {
            config,
            state: GripperState::Unknown,
        }
    }

    /// Last commanded state; `Unknown` until the first actuation.
    pub fn state(&self) -> GripperState {
        self.state
    }

    /// Write the pattern for `intent`. In pulse mode the pattern is held
    /// for the settle delay and then reset to neutral.
    pub fn actuate<D: MotionSdk>(&mut self, sdk: &mut D, intent: GripIntent) -> Result<GripperState> {
        let (code, mode) = match intent {
            GripIntent::Closed => (self.config.grab_code, self.config.close_mode),
            GripIntent::Open => (self.config.release_code, self.config.open_mode),
        };
        info!("Gripper {:?} (output pattern {})", intent, code);

        // The commanded state is unknown until the write goes through.
        self.state = GripperState::Unknown;
        self.write(sdk, code)?;
        if mode == OutputMode::Pulse {
            thread::sleep(self.config.settle());
            self.write(sdk, self.config.neutral_code)?;
        }

        self.state = intent.into();
        Ok(self.state)
    }

    /// Actuate by operator-facing name. Unrecognized names do nothing.
    pub fn actuate_named<D: MotionSdk>(&mut self, sdk: &mut D, name: &str) -> Result<GripperState> {
        match GripIntent::from_name(name) {
            Some(intent) => self.actuate(sdk, intent),
            None => {
                warn!("Ignoring unrecognized gripper command '{}'", name);
                Ok(self.state)
            }
        }
    }

    fn write<D: MotionSdk>(&self, sdk: &mut D, value: u32) -> Result<()> {
        sdk.set_dout_bit_combination(
            self.config.first_bit,
            self.config.last_bit,
            value,
            self.config.endian,
        )
    }
}
