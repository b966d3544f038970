// src/pipeline/controller.rs
//
// The primary control loop: capture → track → zone extraction → smoothing →
// decision → recording → telemetry, under soft real-time pacing. Per-cycle
// faults are isolated to their cycle; only cancellation, max-duration, or
// goal-reached end the loop.

use crate::navigation::Navigator;
use crate::perception::{extract_zones, FlowHistory, FlowTracker, TrackedFlow};
use crate::pipeline::{DecisionRecord, FlightLog, Recorder};
use crate::signals::ControlSignals;
use crate::types::{CapturedFrame, Config, FlowObservation, VehicleKinematics};
use crate::vehicle::{FrameSource, VehicleControl, VelocityCommand};
use anyhow::Result;
use opencv::{
    core::{Mat, Point, Scalar, Size, CV_8UC3},
    imgproc,
    prelude::*,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// All tracking runs on frames downscaled to this size.
pub const PROC_WIDTH: i32 = 640;
pub const PROC_HEIGHT: i32 = 480;

const MAX_FLOW_ARROWS: usize = 50;

pub struct ControlLoop<S: FrameSource, V: VehicleControl> {
    config: Config,
    source: S,
    vehicle: Arc<V>,
    navigator: Navigator<V>,
    tracker: FlowTracker,
    history: FlowHistory,
    signals: Arc<ControlSignals>,
    log: FlightLog,
    recorder: Option<Recorder>,
    frame_count: u64,
    started: Instant,
    prev_cycle_start: Option<Instant>,
    last_vis: Mat,
    last_kin: VehicleKinematics,
    bootstrap: bool,
}

impl<S: FrameSource, V: VehicleControl> ControlLoop<S, V> {
    pub fn new(
        config: Config,
        source: S,
        vehicle: Arc<V>,
        signals: Arc<ControlSignals>,
    ) -> Result<Self> {
        let log = FlightLog::create(
            config.telemetry.log_dir.as_str(),
            config.telemetry.keep_logs,
            config.telemetry.flush_every,
        )?;
        let recorder = Recorder::spawn(
            &config.video.record_path,
            config.video.record_fps,
            PROC_WIDTH,
            PROC_HEIGHT,
            config.video.queue_capacity,
        )?;
        let navigator = Navigator::new(vehicle.clone(), &config, 0.0);
        let tracker = FlowTracker::new(config.flow.clone());
        let history = FlowHistory::new(config.flow.window_size);
        let last_vis = Mat::zeros(PROC_HEIGHT, PROC_WIDTH, CV_8UC3)?.to_mat()?;

        Ok(Self {
            config,
            source,
            vehicle,
            navigator,
            tracker,
            history,
            signals,
            log,
            recorder: Some(recorder),
            frame_count: 0,
            started: Instant::now(),
            prev_cycle_start: None,
            last_vis,
            last_kin: VehicleKinematics::default(),
            bootstrap: true,
        })
    }

    /// Run until the exit signal, the max duration, or the goal trips, then
    /// tear down. Teardown failures are logged, never propagated.
    pub fn run(&mut self) -> Result<()> {
        info!(
            "Control loop starting ({:.0} FPS target)",
            self.config.control.target_fps
        );
        let outcome = self.run_loop();
        self.teardown();
        outcome
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            if self.signals.exit_requested() {
                info!("Exit requested");
                return Ok(());
            }
            if let Some(max) = self.config.control.max_duration_s {
                if self.elapsed_s() >= max {
                    info!("Max flight duration reached ({max:.0}s)");
                    return Ok(());
                }
            }
            if let Some(goal) = self.config.control.goal_forward_m {
                let kin = self.query_kinematics();
                if kin.pos_x >= goal {
                    info!("🏁 Goal reached at {:.1} m", kin.pos_x);
                    return Ok(());
                }
            }
            if self.signals.take_reset() {
                if let Err(e) = self.handle_reset() {
                    error!("Reset failed: {e:#}");
                }
                continue;
            }
            if let Err(e) = self.step() {
                warn!("Cycle {} fault: {e:#}", self.frame_count);
            }
        }
    }

    /// One full control cycle, including pacing and the telemetry row.
    fn step(&mut self) -> Result<()> {
        let loop_start = Instant::now();
        let achieved_fps = match self.prev_cycle_start {
            Some(prev) => {
                let dt = loop_start.duration_since(prev).as_secs_f64();
                if dt > 0.0 {
                    1.0 / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.prev_cycle_start = Some(loop_start);
        self.frame_count += 1;
        let now = self.elapsed_s();

        let frame = self
            .source
            .capture()?
            .filter(|f| f.width > 0 && f.height > 0 && !f.data.is_empty())
            .filter(|f| f.data.len() == (f.width * f.height * 3) as usize);
        let Some(frame) = frame else {
            return self.degraded_cycle(now, achieved_fps, loop_start);
        };

        let t_convert = Instant::now();
        let (gray, mut vis) = prepare_frame(&frame)?;
        let decode_time_s = frame.decode_time_s + t_convert.elapsed().as_secs_f64();

        if self.bootstrap {
            self.tracker.initialize(&gray)?;
            self.bootstrap = false;
            info!("Initialized optical flow tracker");
            let kin = self.query_kinematics();
            self.annotate(&mut vis, &TrackedFlow::default(), "init", &kin, now)?;
            self.finish_cycle(
                vis,
                CycleReport {
                    now,
                    achieved_fps,
                    state_label: "init",
                    observation: FlowObservation::default(),
                    kin,
                    brake_threshold: 0.0,
                    dodge_threshold: 0.0,
                    obstacle: false,
                    capture_time_s: frame.capture_time_s,
                    decode_time_s,
                    processing_time_s: 0.0,
                },
                loop_start,
            )?;
            return Ok(());
        }

        let t_processing = Instant::now();
        let flow = self.tracker.process(&gray)?;
        let zones = extract_zones(
            &flow.points,
            &flow.vectors,
            flow.dt,
            PROC_WIDTH as f32,
            PROC_HEIGHT as f32,
            self.config.flow.probe_fraction,
        );
        self.history.update(zones.left, zones.center, zones.right);
        let (smooth_left, smooth_center, smooth_right) = self.history.average();
        let observation = FlowObservation {
            feature_count: zones.feature_count,
            smooth_left,
            smooth_center,
            smooth_right,
            probe_magnitude: zones.probe.magnitude,
            probe_count: zones.probe.feature_count,
            flow_std: zones.flow_std,
        };
        let kin = self.query_kinematics();

        // Settling suppresses the decision, never the pipeline: the cycle
        // still records, logs, and keeps a slow creep going.
        let (state_label, brake_threshold, dodge_threshold, obstacle) =
            if self.navigator.in_settle(now) {
                self.navigator.settle_tick(now)?;
                ("settling", 0.0, 0.0, false)
            } else {
                let outcome = self.navigator.decide(&observation, &kin, now)?;
                (
                    outcome.decision.as_str(),
                    outcome.brake_threshold,
                    outcome.dodge_threshold,
                    outcome.decision.is_obstacle_response(),
                )
            };
        let processing_time_s = t_processing.elapsed().as_secs_f64();

        self.annotate(&mut vis, &flow, state_label, &kin, now)?;
        self.finish_cycle(
            vis,
            CycleReport {
                now,
                achieved_fps,
                state_label,
                observation,
                kin,
                brake_threshold,
                dodge_threshold,
                obstacle,
                capture_time_s: frame.capture_time_s,
                decode_time_s,
                processing_time_s,
            },
            loop_start,
        )?;
        Ok(())
    }

    /// Zero-size or undecodable frame: reuse the last visualization frame and
    /// log the cycle as degraded instead of aborting.
    fn degraded_cycle(&mut self, now: f64, achieved_fps: f64, loop_start: Instant) -> Result<()> {
        debug!("Degraded cycle: no usable frame");
        let vis = self.last_vis.try_clone()?;
        let kin = self.query_kinematics();
        self.finish_cycle(
            vis,
            CycleReport {
                now,
                achieved_fps,
                state_label: "degraded",
                observation: FlowObservation::default(),
                kin,
                brake_threshold: 0.0,
                dodge_threshold: 0.0,
                obstacle: false,
                capture_time_s: 0.0,
                decode_time_s: 0.0,
                processing_time_s: 0.0,
            },
            loop_start,
        )
    }

    /// Shared tail of every cycle: enqueue the frame, append the telemetry
    /// row, and sleep out the remainder of the cycle budget.
    fn finish_cycle(&mut self, vis: Mat, report: CycleReport, loop_start: Instant) -> Result<()> {
        self.last_vis = vis.try_clone()?;
        if let Some(recorder) = &self.recorder {
            recorder.enqueue(vis);
        }

        let collided = self.vehicle.collision().unwrap_or_else(|e| {
            warn!("Collision query failed: {e}");
            false
        });

        let record = DecisionRecord {
            frame: self.frame_count,
            time: report.now,
            tracked_feature_count: report.observation.feature_count,
            flow_left: report.observation.smooth_left,
            flow_center: report.observation.smooth_center,
            flow_right: report.observation.smooth_right,
            flow_std: report.observation.flow_std,
            pos_x: report.kin.pos_x,
            pos_y: report.kin.pos_y,
            pos_z: report.kin.pos_z,
            yaw: report.kin.yaw,
            speed: report.kin.speed,
            state_label: report.state_label.to_string(),
            collided,
            obstacle_flag: report.obstacle,
            brake_threshold: report.brake_threshold,
            dodge_threshold: report.dodge_threshold,
            probe_requirement: self.config.flow.min_probe_features as f64,
            achieved_fps: report.achieved_fps,
            capture_time_s: report.capture_time_s,
            decode_time_s: report.decode_time_s,
            processing_time_s: report.processing_time_s,
            loop_time_s: loop_start.elapsed().as_secs_f64(),
        };
        self.log.append(&record)?;

        self.pace(loop_start);
        Ok(())
    }

    /// Soft real-time pacing: sleep out the remainder of the cycle budget.
    fn pace(&self, loop_start: Instant) {
        let budget = Duration::from_secs_f64(1.0 / self.config.control.target_fps);
        let elapsed = loop_start.elapsed();
        if elapsed < budget {
            std::thread::sleep(budget - elapsed);
        }
    }

    fn query_kinematics(&mut self) -> VehicleKinematics {
        match self.vehicle.kinematics() {
            Ok(kin) => {
                self.last_kin = kin;
                kin
            }
            Err(e) => {
                warn!("Kinematics query failed: {e}");
                self.last_kin
            }
        }
    }

    /// Drain and rotate everything, then start over with fresh state.
    fn handle_reset(&mut self) -> Result<()> {
        info!("🔄 Reset requested");
        if let Err(e) = self.vehicle.reset() {
            warn!("Vehicle reset failed: {e}");
        }
        self.log.rotate()?;
        if let Some(recorder) = self.recorder.take() {
            recorder.shutdown();
        }
        self.recorder = Some(Recorder::spawn(
            &self.config.video.record_path,
            self.config.video.record_fps,
            PROC_WIDTH,
            PROC_HEIGHT,
            self.config.video.queue_capacity,
        )?);
        let now = self.elapsed_s();
        self.navigator = Navigator::new(self.vehicle.clone(), &self.config, now);
        self.history = FlowHistory::new(self.config.flow.window_size);
        self.tracker = FlowTracker::new(self.config.flow.clone());
        self.bootstrap = true;
        self.frame_count = 0;
        self.prev_cycle_start = None;
        Ok(())
    }

    /// Flush the log, drain the recorder, and bring the vehicle down. Every
    /// failure here is logged and swallowed so cleanup always completes.
    fn teardown(&mut self) {
        info!("Landing and cleaning up");
        if let Err(e) = self.log.finish() {
            warn!("Flight log flush failed: {e}");
        }
        if let Some(recorder) = self.recorder.take() {
            recorder.shutdown();
        }
        match self.vehicle.command_velocity(VelocityCommand::stop(1.0)) {
            Ok(handle) => {
                if let Err(e) = handle.wait() {
                    warn!("Stop command failed: {e}");
                }
            }
            Err(e) => warn!("Stop command failed: {e}"),
        }
        if let Err(e) = self.vehicle.land() {
            warn!("Landing failed: {e}");
        }
    }

    fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn annotate(
        &self,
        vis: &mut Mat,
        flow: &TrackedFlow,
        state: &str,
        kin: &VehicleKinematics,
        now: f64,
    ) -> Result<()> {
        let green = Scalar::new(0.0, 255.0, 0.0, 0.0);
        for (i, (&(x, y), &(dx, dy))) in flow.points.iter().zip(&flow.vectors).enumerate() {
            if i >= MAX_FLOW_ARROWS {
                break;
            }
            let from = Point::new(x as i32, y as i32);
            let to = Point::new((x + dx) as i32, (y + dy) as i32);
            imgproc::arrowed_line(vis, from, to, green, 1, imgproc::LINE_8, 0, 0.3)?;
        }

        let white = Scalar::new(255.0, 255.0, 255.0, 0.0);
        let lines = [
            format!("Frame: {}", self.frame_count),
            format!("Speed: {:.2}", kin.speed),
            format!("State: {state}"),
            format!("Time: {now:.2}s"),
        ];
        for (row, text) in lines.iter().enumerate() {
            imgproc::put_text(
                vis,
                text,
                Point::new(10, 25 + 30 * row as i32),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.7,
                white,
                2,
                imgproc::LINE_8,
                false,
            )?;
        }
        Ok(())
    }
}

struct CycleReport {
    now: f64,
    achieved_fps: f64,
    state_label: &'static str,
    observation: FlowObservation,
    kin: VehicleKinematics,
    brake_threshold: f64,
    dodge_threshold: f64,
    obstacle: bool,
    capture_time_s: f64,
    decode_time_s: f64,
    processing_time_s: f64,
}

/// Downscale to the processing size and split into (gray, visualization).
fn prepare_frame(frame: &CapturedFrame) -> Result<(Mat, Mat)> {
    let flat = Mat::from_slice(&frame.data)?;
    let shaped = flat.reshape(3, frame.height)?;
    let mut resized = Mat::default();
    imgproc::resize(
        &shaped,
        &mut resized,
        Size::new(PROC_WIDTH, PROC_HEIGHT),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    let mut gray = Mat::default();
    imgproc::cvt_color(&resized, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
    Ok((gray, resized))
}
