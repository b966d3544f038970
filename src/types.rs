use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub flow: FlowConfig,
    pub navigation: NavigationConfig,
    pub control: ControlConfig,
    pub video: VideoConfig,
    pub telemetry: TelemetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub window_size: usize,
    pub probe_fraction: f64,
    pub min_probe_features: usize,
    pub flow_std_max: f64,
    pub max_corners: i32,
    pub quality_level: f64,
    pub min_distance: f64,
    pub block_size: i32,
    pub lk_win_size: i32,
    pub lk_max_level: i32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            probe_fraction: 1.0 / 3.0,
            min_probe_features: 5,
            flow_std_max: 25.0,
            max_corners: 75,
            quality_level: 0.1,
            min_distance: 5.0,
            block_size: 5,
            lk_win_size: 15,
            lk_max_level: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub brake_base: f64,
    pub brake_speed_gain: f64,
    pub dodge_base: f64,
    pub dodge_speed_gain: f64,
    pub grace_period_s: f64,
    pub settle_duration_s: f64,
    pub settle_creep_interval_s: f64,
    pub stall_timeout_s: f64,
    pub recovery_timeout_s: f64,
    pub dodge_duration_s: f64,
    pub dodge_escalation: f64,
    pub oscillation_window: usize,
    pub min_dodge_displacement_m: f64,
    pub cruise_speed: f64,
    pub creep_speed: f64,
    pub low_flow_floor: f64,
    pub nudge_flow_ceiling: f64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            brake_base: 20.0,
            brake_speed_gain: 10.0,
            dodge_base: 2.0,
            dodge_speed_gain: 0.5,
            grace_period_s: 2.5,
            settle_duration_s: 2.0,
            settle_creep_interval_s: 0.5,
            stall_timeout_s: 2.0,
            recovery_timeout_s: 4.0,
            dodge_duration_s: 2.0,
            dodge_escalation: 2.0,
            oscillation_window: 3,
            min_dodge_displacement_m: 0.5,
            cruise_speed: 2.0,
            creep_speed: 0.5,
            low_flow_floor: 10.0,
            nudge_flow_ceiling: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub target_fps: f64,
    pub max_duration_s: Option<f64>,
    pub goal_forward_m: Option<f64>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            target_fps: 20.0,
            max_duration_s: None,
            goal_forward_m: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub source: String,
    pub record_path: String,
    pub record_fps: f64,
    pub queue_capacity: usize,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            source: "0".to_string(),
            record_path: "flow_output.avi".to_string(),
            record_fps: 8.0,
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_dir: String,
    pub flush_every: u32,
    pub keep_logs: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_dir: "flow_logs".to_string(),
            flush_every: 5,
            keep_logs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One frame as delivered by the sensor boundary: BGR bytes plus how long the
/// fetch and decode stages took.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub capture_time_s: f64,
    pub decode_time_s: f64,
}

/// Point-in-time vehicle state fetched from the actuator boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct VehicleKinematics {
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub yaw: f64,
    pub speed: f64,
}

/// Everything the navigator needs from one processed frame: smoothed zone
/// magnitudes plus the raw per-frame probe and reliability signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowObservation {
    pub feature_count: usize,
    pub smooth_left: f64,
    pub smooth_center: f64,
    pub smooth_right: f64,
    pub probe_magnitude: f64,
    pub probe_count: usize,
    pub flow_std: f64,
}
