// src/vehicle/mock.rs
//
// Test double for the actuator boundary: records every issued command and
// serves scripted kinematics. Handles complete immediately.

use crate::types::VehicleKinematics;
use crate::vehicle::{MotionHandle, VehicleControl, VelocityCommand};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockVehicle {
    pub commands: Mutex<Vec<VelocityCommand>>,
    pub kin: Mutex<VehicleKinematics>,
    pub collided: AtomicBool,
    pub resets: AtomicU32,
    pub landed: AtomicBool,
}

impl MockVehicle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_speed(&self, speed: f64) {
        self.kin.lock().unwrap().speed = speed;
    }

    pub fn command_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    pub fn command(&self, index: usize) -> VelocityCommand {
        self.commands.lock().unwrap()[index]
    }

    pub fn last_command(&self) -> VelocityCommand {
        *self.commands.lock().unwrap().last().expect("no commands issued")
    }
}

impl VehicleControl for MockVehicle {
    fn command_velocity(&self, command: VelocityCommand) -> Result<MotionHandle> {
        self.commands.lock().unwrap().push(command);
        Ok(MotionHandle::ready())
    }

    fn kinematics(&self) -> Result<VehicleKinematics> {
        Ok(*self.kin.lock().unwrap())
    }

    fn collision(&self) -> Result<bool> {
        Ok(self.collided.load(Ordering::SeqCst))
    }

    fn reset(&self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn land(&self) -> Result<()> {
        self.landed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
