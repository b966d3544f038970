use crate::types::Config;
use anyhow::{bail, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Reject invalid parameters before the control loop starts. Configuration
    /// faults are fatal; every other fault class is handled per cycle.
    pub fn validate(&self) -> Result<()> {
        if self.flow.window_size == 0 {
            bail!("flow.window_size must be at least 1");
        }
        if self.flow.probe_fraction <= 0.0 || self.flow.probe_fraction > 1.0 {
            bail!("flow.probe_fraction must be in (0, 1]");
        }
        if self.flow.flow_std_max <= 0.0 {
            bail!("flow.flow_std_max must be positive");
        }
        if self.flow.max_corners <= 0 {
            bail!("flow.max_corners must be positive");
        }
        if self.flow.quality_level <= 0.0 || self.flow.quality_level >= 1.0 {
            bail!("flow.quality_level must be in (0, 1)");
        }
        if self.flow.lk_win_size < 3 || self.flow.lk_max_level < 0 {
            bail!("flow LK parameters out of range");
        }

        let nav = &self.navigation;
        if nav.brake_base <= 0.0 || nav.dodge_base <= 0.0 {
            bail!("navigation threshold bases must be positive");
        }
        if nav.brake_speed_gain < 0.0 || nav.dodge_speed_gain < 0.0 {
            bail!("navigation speed gains must be non-negative");
        }
        for (name, value) in [
            ("grace_period_s", nav.grace_period_s),
            ("settle_duration_s", nav.settle_duration_s),
            ("settle_creep_interval_s", nav.settle_creep_interval_s),
            ("stall_timeout_s", nav.stall_timeout_s),
            ("recovery_timeout_s", nav.recovery_timeout_s),
            ("dodge_duration_s", nav.dodge_duration_s),
            ("cruise_speed", nav.cruise_speed),
            ("creep_speed", nav.creep_speed),
        ] {
            if value <= 0.0 {
                bail!("navigation.{name} must be positive");
            }
        }
        if nav.dodge_escalation < 1.0 {
            bail!("navigation.dodge_escalation must be at least 1.0");
        }
        if nav.oscillation_window < 2 {
            bail!("navigation.oscillation_window must be at least 2");
        }
        if nav.recovery_timeout_s <= nav.stall_timeout_s {
            bail!("navigation.recovery_timeout_s must exceed stall_timeout_s");
        }

        if self.control.target_fps <= 0.0 {
            bail!("control.target_fps must be positive");
        }
        if matches!(self.control.max_duration_s, Some(d) if d <= 0.0) {
            bail!("control.max_duration_s must be positive when set");
        }

        if self.video.record_fps <= 0.0 {
            bail!("video.record_fps must be positive");
        }
        if self.video.queue_capacity == 0 {
            bail!("video.queue_capacity must be at least 1");
        }

        if self.telemetry.flush_every == 0 {
            bail!("telemetry.flush_every must be at least 1");
        }
        Ok(())
    }
}
