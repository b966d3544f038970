// src/vehicle/mod.rs
//
// External collaborator boundary: the frame source and the command actuator.
// The control loop and navigator only see these traits.

pub mod camera;
pub mod dryrun;
#[cfg(test)]
pub mod mock;

use crate::types::{CapturedFrame, VehicleKinematics};
use anyhow::Result;

/// Velocity command in meters/second for `duration_s` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityCommand {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub duration_s: f64,
    pub mode: DriveMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    Free,
    ForwardOnly,
}

impl VelocityCommand {
    pub fn new(vx: f64, vy: f64, vz: f64, duration_s: f64) -> Self {
        Self {
            vx,
            vy,
            vz,
            duration_s,
            mode: DriveMode::Free,
        }
    }

    /// Sustained forward cruise, yaw locked to the direction of travel.
    pub fn cruise(speed: f64, duration_s: f64) -> Self {
        Self {
            vx: speed,
            vy: 0.0,
            vz: 0.0,
            duration_s,
            mode: DriveMode::ForwardOnly,
        }
    }

    pub fn stop(duration_s: f64) -> Self {
        Self::new(0.0, 0.0, 0.0, duration_s)
    }
}

/// Handle for an issued motion command. Brief maneuvers wait for completion;
/// sustained cruising detaches and lets the next cycle take over.
pub struct MotionHandle {
    waiter: Option<Box<dyn FnOnce() -> Result<()> + Send>>,
}

impl MotionHandle {
    /// A command that has already completed (or needs no waiting).
    pub fn ready() -> Self {
        Self { waiter: None }
    }

    pub fn deferred(waiter: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            waiter: Some(Box::new(waiter)),
        }
    }

    /// Block until the command finishes. Bounded by the command's own
    /// duration, never indefinite.
    pub fn wait(self) -> Result<()> {
        match self.waiter {
            Some(waiter) => waiter(),
            None => Ok(()),
        }
    }

    /// Fire-and-forget.
    pub fn detach(self) {}
}

/// Actuator/sensor boundary for the vehicle itself.
pub trait VehicleControl: Send + Sync {
    fn command_velocity(&self, command: VelocityCommand) -> Result<MotionHandle>;

    fn kinematics(&self) -> Result<VehicleKinematics>;

    fn collision(&self) -> Result<bool>;

    /// Reposition/re-arm for a fresh run. Failures are logged by the caller,
    /// never fatal.
    fn reset(&self) -> Result<()>;

    /// Safe stop used during teardown.
    fn land(&self) -> Result<()>;
}

/// Frame acquisition boundary. `Ok(None)` means a zero-size or undecodable
/// frame: a recoverable degraded cycle, not an error.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Option<CapturedFrame>>;
}
