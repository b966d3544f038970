// src/navigation/navigator.rs
//
// Maneuver state machine. Converts smoothed zone flows plus vehicle speed
// into one decision per cycle and issues the matching velocity commands.

use crate::navigation::{should_flat_wall_dodge, Decision, DecisionOutcome};
use crate::types::{Config, FlowObservation, NavigationConfig, VehicleKinematics};
use crate::vehicle::{VehicleControl, VelocityCommand};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MIN_FEATURES_FOR_DECISION: usize = 5;
const SEVERE_BRAKE_FACTOR: f64 = 1.5;
const SIDE_DIFF_FRACTION: f64 = 0.3;
const SIDE_FLOW_CAP: f64 = 100.0;
const STUCK_SPEED: f64 = 0.2;

pub struct Navigator<V: VehicleControl> {
    vehicle: Arc<V>,
    nav: NavigationConfig,
    min_probe_features: usize,
    flow_std_max: f64,

    pub braked: bool,
    pub dodging: bool,
    pub settling: bool,
    pub last_movement_time: f64,
    pub grace_period_end: f64,
    pub settle_end: f64,
    last_creep_time: f64,

    recent_actions: VecDeque<(Decision, (f64, f64))>,
}

impl<V: VehicleControl> Navigator<V> {
    pub fn new(vehicle: Arc<V>, config: &Config, now: f64) -> Self {
        Self {
            vehicle,
            nav: config.navigation.clone(),
            min_probe_features: config.flow.min_probe_features,
            flow_std_max: config.flow.flow_std_max,
            braked: false,
            dodging: false,
            settling: false,
            last_movement_time: now,
            grace_period_end: 0.0,
            settle_end: 0.0,
            // First settle cycle creeps immediately.
            last_creep_time: f64::NEG_INFINITY,
            recent_actions: VecDeque::new(),
        }
    }

    /// Evaluate one cycle. `now` is the monotonic loop clock in seconds; all
    /// grace/settle/stall windows compare against it, never wall-clock reads.
    pub fn decide(
        &mut self,
        obs: &FlowObservation,
        kin: &VehicleKinematics,
        now: f64,
    ) -> Result<DecisionOutcome> {
        let (l, c, r) = (obs.smooth_left, obs.smooth_center, obs.smooth_right);
        let pos = (kin.pos_x, kin.pos_y);

        // Too few tracked points to localize an obstacle. Symmetric strong
        // flow with a quiet center still means something is directly ahead.
        if obs.feature_count < MIN_FEATURES_FOR_DECISION {
            let decision = if l > 1.5 && r > 1.5 && c < 0.2 {
                self.brake()?
            } else {
                self.blind_forward(now)?
            };
            self.note_action(decision, pos);
            return Ok(DecisionOutcome {
                decision,
                brake_threshold: 0.0,
                dodge_threshold: 0.0,
            });
        }

        // Faster vehicle, earlier reaction.
        let brake_threshold = self.nav.brake_base + self.nav.brake_speed_gain * kin.speed;
        let dodge_threshold = self.nav.dodge_base + self.nav.dodge_speed_gain * kin.speed;

        let center_high = c > dodge_threshold || c > 2.0 * l.min(r);
        let side_safe = (l - r).abs() > SIDE_DIFF_FRACTION * c && (l < SIDE_FLOW_CAP || r < SIDE_FLOW_CAP);
        let in_grace = now < self.grace_period_end;

        let mut decision = Decision::None;
        if c > brake_threshold * SEVERE_BRAKE_FACTOR {
            decision = self.brake()?;
            self.grace_period_end = now + self.nav.grace_period_s;
        } else if !in_grace {
            if c > brake_threshold {
                decision = self.brake()?;
                self.grace_period_end = now + self.nav.grace_period_s;
            } else if center_high && side_safe {
                decision = self.dodge(l, c, r, pos, now)?;
                self.grace_period_end = now + self.nav.grace_period_s;
            } else if obs.probe_magnitude < 0.5
                && should_flat_wall_dodge(
                    c,
                    obs.probe_magnitude,
                    obs.probe_count,
                    self.min_probe_features,
                    obs.flow_std,
                    self.flow_std_max,
                )
            {
                info!("🟥 Flat wall suspected — fallback dodge");
                decision = self.dodge(l, c, r, pos, now)?;
                self.grace_period_end = now + self.nav.grace_period_s;
            }
        }

        if decision == Decision::None {
            decision = self.recovery(obs, kin, now)?;
        }
        if decision != Decision::None {
            self.note_action(decision, pos);
        }

        Ok(DecisionOutcome {
            decision,
            brake_threshold,
            dodge_threshold,
        })
    }

    /// Maintenance transitions, allowed regardless of the grace period.
    fn recovery(
        &mut self,
        obs: &FlowObservation,
        kin: &VehicleKinematics,
        now: f64,
    ) -> Result<Decision> {
        let (l, c, r) = (obs.smooth_left, obs.smooth_center, obs.smooth_right);
        let floor = self.nav.low_flow_floor;
        let ceiling = self.nav.nudge_flow_ceiling;

        if (self.braked || self.dodging) && c < floor && l < floor && r < floor {
            return self.resume_forward(now);
        }
        if !self.braked
            && !self.dodging
            && now - self.last_movement_time > self.nav.stall_timeout_s
        {
            return self.reinforce(now);
        }
        if (self.braked || self.dodging)
            && kin.speed < STUCK_SPEED
            && c < ceiling
            && l < ceiling
            && r < ceiling
        {
            return self.nudge(now);
        }
        if now - self.last_movement_time > self.nav.recovery_timeout_s {
            return self.timeout_recover(now);
        }
        Ok(Decision::None)
    }

    /// Stop the vehicle immediately.
    pub fn brake(&mut self) -> Result<Decision> {
        info!("🛑 Braking");
        self.vehicle
            .command_velocity(VelocityCommand::stop(1.0))?
            .wait()?;
        self.braked = true;
        self.dodging = false;
        Ok(Decision::Brake)
    }

    /// Brief full stop, then a lateral escape leg toward the quieter side.
    pub fn dodge(
        &mut self,
        l: f64,
        c: f64,
        r: f64,
        pos: (f64, f64),
        now: f64,
    ) -> Result<Decision> {
        debug!("Dodge decision — L: {l:.1}, C: {c:.1}, R: {r:.1}");

        let left_safe = l < 0.8 * c;
        let right_safe = r < 0.8 * c;
        let go_left = if left_safe && !right_safe {
            true
        } else if right_safe && !left_safe {
            false
        } else {
            // Both or neither side reads safe: take the lower-flow side,
            // ties resolve left.
            let go_left = l <= r;
            warn!(
                "⚠️ Ambiguous sides — {} {}",
                if left_safe { "picking" } else { "forcing" },
                if go_left { "left" } else { "right" }
            );
            go_left
        };
        let decision = if go_left {
            Decision::DodgeLeft
        } else {
            Decision::DodgeRight
        };

        let mut duration = self.nav.dodge_duration_s;
        if self.dodge_is_stuck(decision, pos) {
            duration *= self.nav.dodge_escalation;
            warn!("🔁 Repeated ineffective dodge — escalating to {duration:.1}s");
        }

        let lateral = if go_left { -1.0 } else { 1.0 };
        let strength = if l.max(r) > SIDE_FLOW_CAP { 0.5 } else { 1.0 };
        let forward = if c > 1.0 { 0.0 } else { 0.3 };

        self.vehicle
            .command_velocity(VelocityCommand::stop(0.2))?
            .wait()?;

        info!(
            "🔀 Dodging {} (strength {strength:.1}, forward {forward:.1})",
            if go_left { "left" } else { "right" }
        );
        self.vehicle
            .command_velocity(VelocityCommand::new(
                forward,
                lateral * strength,
                0.0,
                duration,
            ))?
            .wait()?;

        self.dodging = true;
        self.braked = false;
        self.settling = true;
        self.settle_end = now + self.nav.settle_duration_s;
        self.last_movement_time = now;
        Ok(decision)
    }

    /// Resume normal forward cruising after the path clears.
    pub fn resume_forward(&mut self, now: f64) -> Result<Decision> {
        info!("✅ Resuming forward motion");
        self.vehicle
            .command_velocity(VelocityCommand::cruise(self.nav.cruise_speed, 3.0))?
            .detach();
        self.braked = false;
        self.dodging = false;
        self.last_movement_time = now;
        Ok(Decision::Resume)
    }

    /// Keep moving when tracking is too sparse to say anything.
    pub fn blind_forward(&mut self, now: f64) -> Result<Decision> {
        warn!("⚠️ No features — continuing blind forward motion");
        self.vehicle
            .command_velocity(VelocityCommand::cruise(self.nav.cruise_speed, 2.0))?
            .detach();
        self.last_movement_time = now;
        Ok(Decision::BlindForward)
    }

    /// Gentle push when stopped against low flow.
    pub fn nudge(&mut self, now: f64) -> Result<Decision> {
        warn!("⚠️ Low flow + zero velocity — nudging forward");
        self.vehicle
            .command_velocity(VelocityCommand::new(self.nav.creep_speed, 0.0, 0.0, 1.0))?
            .wait()?;
        self.last_movement_time = now;
        Ok(Decision::Nudge)
    }

    /// Reissue the cruise command when nothing has moved for a while.
    pub fn reinforce(&mut self, now: f64) -> Result<Decision> {
        info!("🔁 Reinforcing forward motion");
        self.vehicle
            .command_velocity(VelocityCommand::cruise(self.nav.cruise_speed, 3.0))?
            .detach();
        self.last_movement_time = now;
        Ok(Decision::Reinforce)
    }

    /// Last-resort creep after a long command drought.
    pub fn timeout_recover(&mut self, now: f64) -> Result<Decision> {
        warn!("⏳ Timeout — forcing recovery motion");
        self.vehicle
            .command_velocity(VelocityCommand::new(self.nav.creep_speed, 0.0, 0.0, 1.0))?
            .wait()?;
        self.last_movement_time = now;
        Ok(Decision::TimeoutRecover)
    }

    /// True while the post-dodge settle window is active. Clears the flag the
    /// first time it is observed expired.
    pub fn in_settle(&mut self, now: f64) -> bool {
        if self.settling && now >= self.settle_end {
            self.settling = false;
            debug!("settle window complete");
        }
        self.settling
    }

    /// Periodic slow creep during the settle window, on its own sub-interval.
    pub fn settle_tick(&mut self, now: f64) -> Result<()> {
        if now - self.last_creep_time >= self.nav.settle_creep_interval_s {
            self.vehicle
                .command_velocity(VelocityCommand::new(self.nav.creep_speed, 0.0, 0.0, 1.0))?
                .detach();
            self.last_creep_time = now;
            self.last_movement_time = now;
            debug!("settling creep");
        }
        Ok(())
    }

    fn note_action(&mut self, decision: Decision, pos: (f64, f64)) {
        self.recent_actions.push_back((decision, pos));
        if self.recent_actions.len() > self.nav.oscillation_window {
            self.recent_actions.pop_front();
        }
    }

    /// Repeated identical dodges with no net displacement mean the vehicle is
    /// pinned against the same obstacle.
    fn dodge_is_stuck(&self, candidate: Decision, pos: (f64, f64)) -> bool {
        let needed = self.nav.oscillation_window - 1;
        if needed == 0 || self.recent_actions.len() < needed {
            return false;
        }
        let mut prior = self.recent_actions.iter().rev().take(needed);
        if !prior.all(|(action, _)| *action == candidate && action.is_dodge()) {
            return false;
        }
        let (_, start) = self.recent_actions[self.recent_actions.len() - needed];
        let displacement = ((pos.0 - start.0).powi(2) + (pos.1 - start.1).powi(2)).sqrt();
        displacement < self.nav.min_dodge_displacement_m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::mock::MockVehicle;
    use crate::vehicle::DriveMode;

    fn navigator() -> (Arc<MockVehicle>, Navigator<MockVehicle>) {
        let vehicle = Arc::new(MockVehicle::new());
        let nav = Navigator::new(vehicle.clone(), &Config::default(), 0.0);
        (vehicle, nav)
    }

    fn obs(l: f64, c: f64, r: f64, count: usize) -> FlowObservation {
        FlowObservation {
            feature_count: count,
            smooth_left: l,
            smooth_center: c,
            smooth_right: r,
            ..FlowObservation::default()
        }
    }

    fn kin() -> VehicleKinematics {
        VehicleKinematics::default()
    }

    #[test]
    fn test_low_feature_brake() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let outcome = nav.decide(&obs(2.0, 0.1, 2.0, 0), &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::Brake);
        assert!(nav.braked);
        assert_eq!(vehicle.last_command(), VelocityCommand::stop(1.0));
        Ok(())
    }

    #[test]
    fn test_low_feature_blind_forward() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let outcome = nav.decide(&obs(0.0, 0.0, 0.0, 0), &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::BlindForward);
        assert_eq!(nav.last_movement_time, 1.0);
        let command = vehicle.last_command();
        assert_eq!(command.vx, 2.0);
        assert_eq!(command.mode, DriveMode::ForwardOnly);
        Ok(())
    }

    #[test]
    fn test_high_center_brakes_and_starts_grace() -> Result<()> {
        let (_, mut nav) = navigator();
        let outcome = nav.decide(&obs(0.0, 40.0, 0.0, 10), &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::Brake);
        assert_eq!(outcome.brake_threshold, 20.0);
        assert_eq!(nav.grace_period_end, 3.5);
        Ok(())
    }

    #[test]
    fn test_thresholds_grow_with_speed() -> Result<()> {
        let (_, mut nav) = navigator();
        let mut fast = kin();
        fast.speed = 2.0;
        let outcome = nav.decide(&obs(0.0, 0.0, 0.0, 10), &fast, 1.0)?;
        assert_eq!(outcome.brake_threshold, 40.0);
        assert_eq!(outcome.dodge_threshold, 3.0);
        Ok(())
    }

    #[test]
    fn test_plain_brake_respects_grace() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        nav.grace_period_end = 10.0;
        let outcome = nav.decide(&obs(0.0, 25.0, 0.0, 10), &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::None);
        assert_eq!(vehicle.command_count(), 0);
        Ok(())
    }

    #[test]
    fn test_severe_brake_bypasses_grace() -> Result<()> {
        let (_, mut nav) = navigator();
        nav.grace_period_end = 10.0;
        let outcome = nav.decide(&obs(0.0, 45.0, 0.0, 10), &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::Brake);
        assert_eq!(nav.grace_period_end, 3.5);
        Ok(())
    }

    #[test]
    fn test_dodge_left_on_quiet_left() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let decision = nav.dodge(0.0, 0.0, 20.0, (0.0, 0.0), 1.0)?;
        assert_eq!(decision, Decision::DodgeLeft);
        assert!(nav.dodging);
        assert!(!nav.braked);
        assert!(nav.settling);
        assert_eq!(nav.settle_end, 3.0);
        assert_eq!(nav.last_movement_time, 1.0);

        assert_eq!(vehicle.command_count(), 2);
        assert_eq!(vehicle.command(0), VelocityCommand::stop(0.2));
        // Quiet center keeps a small forward component.
        assert_eq!(vehicle.command(1), VelocityCommand::new(0.3, -1.0, 0.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_ambiguous_dodge_forces_lower_flow_side() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let decision = nav.dodge(10.0, 10.5, 11.0, (0.0, 0.0), 1.0)?;
        assert_eq!(decision, Decision::DodgeLeft);
        // High center flow zeroes the forward component.
        assert_eq!(vehicle.command(1), VelocityCommand::new(0.0, -1.0, 0.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_dodge_scales_down_under_heavy_side_flow() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let decision = nav.dodge(150.0, 10.0, 120.0, (0.0, 0.0), 1.0)?;
        assert_eq!(decision, Decision::DodgeRight);
        assert_eq!(vehicle.command(1), VelocityCommand::new(0.0, 0.5, 0.0, 2.0));
        Ok(())
    }

    #[test]
    fn test_brake_clears_dodging() -> Result<()> {
        let (_, mut nav) = navigator();
        nav.dodging = true;
        let prev = nav.last_movement_time;
        nav.brake()?;
        assert!(nav.braked);
        assert!(!nav.dodging);
        assert_eq!(nav.last_movement_time, prev);
        Ok(())
    }

    #[test]
    fn test_decide_dodge_extends_grace() -> Result<()> {
        let (_, mut nav) = navigator();
        let outcome = nav.decide(&obs(1.0, 10.0, 8.0, 10), &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::DodgeLeft);
        assert_eq!(nav.grace_period_end, 3.5);
        Ok(())
    }

    #[test]
    fn test_flat_wall_fallback_dodges() -> Result<()> {
        let (_, mut nav) = navigator();
        let mut observation = obs(0.9, 1.0, 1.0, 10);
        observation.probe_magnitude = 0.2;
        observation.probe_count = 5;
        let outcome = nav.decide(&observation, &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::DodgeLeft);
        Ok(())
    }

    #[test]
    fn test_flat_wall_needs_reliable_probe() -> Result<()> {
        let (_, mut nav) = navigator();
        let mut observation = obs(0.9, 1.0, 1.0, 10);
        observation.probe_magnitude = 0.2;
        observation.probe_count = 3;
        let outcome = nav.decide(&observation, &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::None);
        Ok(())
    }

    #[test]
    fn test_resume_when_path_clears() -> Result<()> {
        let (_, mut nav) = navigator();
        nav.braked = true;
        let outcome = nav.decide(&obs(1.0, 0.2, 1.0, 10), &kin(), 1.0)?;
        assert_eq!(outcome.decision, Decision::Resume);
        assert!(!nav.braked);
        assert!(!nav.dodging);
        Ok(())
    }

    #[test]
    fn test_reinforce_when_stalled() -> Result<()> {
        let (_, mut nav) = navigator();
        // Flow high enough that resume cannot trigger, no maneuver pending.
        let outcome = nav.decide(&obs(12.0, 1.0, 12.0, 10), &kin(), 3.0)?;
        assert_eq!(outcome.decision, Decision::Reinforce);
        assert_eq!(nav.last_movement_time, 3.0);
        Ok(())
    }

    #[test]
    fn test_timeout_recovery_when_braked_against_flow() -> Result<()> {
        let (_, mut nav) = navigator();
        nav.braked = true;
        let outcome = nav.decide(&obs(20.0, 15.0, 20.0, 10), &kin(), 5.0)?;
        assert_eq!(outcome.decision, Decision::TimeoutRecover);
        Ok(())
    }

    #[test]
    fn test_nudge_command_shape() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let decision = nav.nudge(1.0)?;
        assert_eq!(decision, Decision::Nudge);
        assert_eq!(vehicle.last_command(), VelocityCommand::new(0.5, 0.0, 0.0, 1.0));
        assert_eq!(nav.last_movement_time, 1.0);
        Ok(())
    }

    #[test]
    fn test_repeated_stuck_dodge_escalates() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let observation = obs(1.0, 10.0, 8.0, 10);
        for now in [0.0, 3.0, 6.0] {
            let outcome = nav.decide(&observation, &kin(), now)?;
            assert_eq!(outcome.decision, Decision::DodgeLeft);
        }
        // Three dodges, two commands each; the third lateral leg runs longer.
        assert_eq!(vehicle.command_count(), 6);
        assert_eq!(vehicle.command(3).duration_s, 2.0);
        assert_eq!(vehicle.command(5).duration_s, 4.0);
        Ok(())
    }

    #[test]
    fn test_dodge_streak_broken_by_displacement() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        let observation = obs(1.0, 10.0, 8.0, 10);
        nav.decide(&observation, &kin(), 0.0)?;
        nav.decide(&observation, &kin(), 3.0)?;
        let mut moved = kin();
        moved.pos_x = 5.0;
        nav.decide(&observation, &moved, 6.0)?;
        assert_eq!(vehicle.command(5).duration_s, 2.0);
        Ok(())
    }

    #[test]
    fn test_settle_window_expires() {
        let (_, mut nav) = navigator();
        nav.settling = true;
        nav.settle_end = 2.0;
        assert!(nav.in_settle(1.0));
        assert!(!nav.in_settle(2.5));
        assert!(!nav.settling);
    }

    #[test]
    fn test_settle_tick_creeps_on_sub_interval() -> Result<()> {
        let (vehicle, mut nav) = navigator();
        nav.settling = true;
        nav.settle_end = 10.0;
        nav.settle_tick(1.0)?;
        nav.settle_tick(1.1)?;
        nav.settle_tick(1.6)?;
        assert_eq!(vehicle.command_count(), 2);
        assert_eq!(vehicle.command(0).vx, 0.5);
        Ok(())
    }
}
