// core/safety.rs

// Emergency-stop latch in front of the actuation boundary. Every motion command
// from any thread passes through the gate; once engaged, the gate substitutes a
// zero command until it is released, and engaging issues `stop_all` exactly once.
// The latch is checked under the actuator lock, so no command that was decided
// before the latch can reach the motors after `engage` returns.

// Dependencies
use log::{error, warn};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::lock;
use crate::hal::{BoxedActuation, HalError};
use crate::navigation::VelocityCommand;

pub struct SafetyGate {
    engaged: AtomicBool,
    actuation: Mutex<BoxedActuation>,
}

impl SafetyGate {
    pub fn new(actuation: BoxedActuation) -> Self {
        SafetyGate {
            engaged: AtomicBool::new(false),
            actuation: Mutex::new(actuation),
        }
    }

    /// Latches the gate and stops every motor. Returns `false` (and issues
    /// nothing) when the gate was already engaged.
    pub fn engage(&self) -> bool {
        if self.engaged.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut actuation = lock(&self.actuation);
        if let Err(e) = actuation.stop_all() {
            error!("stop_all failed while engaging the emergency stop: {}", e);
        }
        true
    }

    /// Releases the latch. Returns `false` when it was not engaged.
    pub fn release(&self) -> bool {
        self.engaged.swap(false, Ordering::SeqCst)
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }

    /// Sends `command` to the drive motors, or a zero command while engaged.
    /// Returns what was actually sent.
    pub fn drive(&self, command: VelocityCommand) -> Result<VelocityCommand, HalError> {
        let mut actuation = lock(&self.actuation);
        let command = if self.is_engaged() { VelocityCommand::zero() } else { command };
        actuation.set_drive_speed(command.linear, command.angular)?;
        Ok(command)
    }

    /// Zero drive command
    pub fn halt(&self) -> Result<(), HalError> {
        self.drive(VelocityCommand::zero()).map(|_| ())
    }

    /// Stops every motor without latching (used on shutdown).
    pub fn stop_all(&self) -> Result<(), HalError> {
        lock(&self.actuation).stop_all()
    }

    /// Starts the blade unless engaged. Returns whether it was started.
    pub fn start_blade(&self, rpm: f64) -> Result<bool, HalError> {
        let mut actuation = lock(&self.actuation);
        if self.is_engaged() {
            warn!("Blade start refused: emergency stop engaged");
            return Ok(false);
        }
        actuation.start_blade(rpm)?;
        Ok(true)
    }

    pub fn stop_blade(&self) -> Result<(), HalError> {
        lock(&self.actuation).stop_blade()
    }

    pub fn set_cutting_height(&self, height_cm: f64) -> Result<(), HalError> {
        lock(&self.actuation).set_cutting_height(height_cm)
    }
}
