// src/vehicle/dryrun.rs

use crate::types::VehicleKinematics;
use crate::vehicle::{MotionHandle, VehicleControl, VelocityCommand};
use anyhow::Result;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Stand-in actuator that integrates commanded velocities into a kinematic
/// state. Lets the binary fly a recorded video end to end without a live
/// vehicle link, with realistic command timing.
pub struct DryRunVehicle {
    state: Mutex<DryRunState>,
}

struct DryRunState {
    pos: [f64; 3],
    vel: [f64; 3],
    deadline: Option<Instant>,
    last_update: Instant,
}

impl DryRunState {
    fn new() -> Self {
        Self {
            pos: [0.0; 3],
            vel: [0.0; 3],
            deadline: None,
            last_update: Instant::now(),
        }
    }

    /// Integrate position up to `now`, zeroing velocity once the active
    /// command's duration has elapsed.
    fn advance(&mut self, now: Instant) {
        let until = match self.deadline {
            Some(deadline) => now.min(deadline),
            None => self.last_update,
        };
        if until > self.last_update {
            let dt = until.duration_since(self.last_update).as_secs_f64();
            for (pos, vel) in self.pos.iter_mut().zip(&self.vel) {
                *pos += vel * dt;
            }
        }
        if matches!(self.deadline, Some(deadline) if now >= deadline) {
            self.vel = [0.0; 3];
            self.deadline = None;
        }
        self.last_update = now;
    }

    fn speed(&self) -> f64 {
        self.vel.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

impl DryRunVehicle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DryRunState::new()),
        }
    }
}

impl VehicleControl for DryRunVehicle {
    fn command_velocity(&self, command: VelocityCommand) -> Result<MotionHandle> {
        let now = Instant::now();
        {
            let mut state = self.state.lock().unwrap();
            state.advance(now);
            state.vel = [command.vx, command.vy, command.vz];
            state.deadline = Some(now + Duration::from_secs_f64(command.duration_s));
        }
        debug!(
            "dry-run velocity ({:.2}, {:.2}, {:.2}) for {:.2}s",
            command.vx, command.vy, command.vz, command.duration_s
        );
        let duration = command.duration_s;
        Ok(MotionHandle::deferred(move || {
            std::thread::sleep(Duration::from_secs_f64(duration));
            Ok(())
        }))
    }

    fn kinematics(&self) -> Result<VehicleKinematics> {
        let mut state = self.state.lock().unwrap();
        state.advance(Instant::now());
        Ok(VehicleKinematics {
            pos_x: state.pos[0],
            pos_y: state.pos[1],
            pos_z: state.pos[2],
            yaw: 0.0,
            speed: state.speed(),
        })
    }

    fn collision(&self) -> Result<bool> {
        Ok(false)
    }

    fn reset(&self) -> Result<()> {
        *self.state.lock().unwrap() = DryRunState::new();
        Ok(())
    }

    fn land(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.advance(Instant::now());
        state.vel = [0.0; 3];
        state.deadline = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_integrates_into_position() -> Result<()> {
        let vehicle = DryRunVehicle::new();
        vehicle
            .command_velocity(VelocityCommand::new(100.0, 0.0, 0.0, 0.05))?
            .wait()?;
        let kin = vehicle.kinematics()?;
        assert!(kin.pos_x > 1.0, "pos_x was {}", kin.pos_x);
        // Command expired, vehicle coasts to a stop.
        assert_eq!(kin.speed, 0.0);
        Ok(())
    }

    #[test]
    fn test_reset_zeroes_state() -> Result<()> {
        let vehicle = DryRunVehicle::new();
        vehicle
            .command_velocity(VelocityCommand::new(100.0, 0.0, 0.0, 0.05))?
            .wait()?;
        vehicle.reset()?;
        let kin = vehicle.kinematics()?;
        assert_eq!(kin.pos_x, 0.0);
        assert_eq!(kin.speed, 0.0);
        Ok(())
    }
}
