// src/perception/tracker.rs

use crate::perception::zones::magnitude_std;
use crate::types::FlowConfig;
use anyhow::Result;
use opencv::{
    core::{self, Mat, Point2f, Size, TermCriteria, Vector},
    imgproc,
    prelude::*,
    video,
};
use std::time::Instant;
use tracing::debug;

/// Status-filtered tracking result for one frame pair. `vectors` are raw pixel
/// displacements; `std` is over rate-normalized magnitudes.
#[derive(Debug, Clone, Default)]
pub struct TrackedFlow {
    pub points: Vec<(f32, f32)>,
    pub vectors: Vec<(f32, f32)>,
    pub std: f64,
    pub dt: f64,
}

impl TrackedFlow {
    fn empty(dt: f64) -> Self {
        Self {
            dt,
            ..Self::default()
        }
    }
}

/// Sparse Lucas-Kanade feature tracker. Seeds corners on one frame, tracks
/// them into the next, then re-seeds from the new frame for the following
/// call. Tracking failure degrades to an empty result and re-initializes.
pub struct FlowTracker {
    config: FlowConfig,
    prev_gray: Option<Mat>,
    prev_points: Vector<Point2f>,
    prev_time: Instant,
}

impl FlowTracker {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            prev_gray: None,
            prev_points: Vector::new(),
            prev_time: Instant::now(),
        }
    }

    /// Seed a fresh corner set from `gray`, discarding any prior state.
    pub fn initialize(&mut self, gray: &Mat) -> Result<()> {
        self.prev_points = self.detect_corners(gray)?;
        self.prev_gray = Some(gray.try_clone()?);
        self.prev_time = Instant::now();
        debug!("tracker seeded with {} corners", self.prev_points.len());
        Ok(())
    }

    /// Track the previously seeded corners into `gray` and re-seed for the
    /// next call.
    pub fn process(&mut self, gray: &Mat) -> Result<TrackedFlow> {
        let Some(prev_gray) = self.prev_gray.take() else {
            self.initialize(gray)?;
            return Ok(TrackedFlow::default());
        };
        if self.prev_points.is_empty() {
            self.initialize(gray)?;
            return Ok(TrackedFlow::default());
        }

        let mut next_points = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut errors = Vector::<f32>::new();
        let win = self.config.lk_win_size;
        video::calc_optical_flow_pyr_lk(
            &prev_gray,
            gray,
            &self.prev_points,
            &mut next_points,
            &mut status,
            &mut errors,
            Size::new(win, win),
            self.config.lk_max_level,
            TermCriteria::new(core::TermCriteria_COUNT + core::TermCriteria_EPS, 10, 0.03)?,
            0,
            1e-4,
        )?;

        let now = Instant::now();
        let dt = now.duration_since(self.prev_time).as_secs_f64().max(1e-6);

        let mut points = Vec::new();
        let mut vectors = Vec::new();
        for i in 0..status.len() {
            if status.get(i)? != 1 {
                continue;
            }
            let old = self.prev_points.get(i)?;
            let new = next_points.get(i)?;
            points.push((old.x, old.y));
            vectors.push((new.x - old.x, new.y - old.y));
        }

        // Re-seed from the new frame so the next call tracks fresh corners.
        self.prev_points = self.detect_corners(gray)?;
        self.prev_gray = Some(gray.try_clone()?);
        self.prev_time = now;

        if points.is_empty() {
            return Ok(TrackedFlow::empty(dt));
        }

        let magnitudes: Vec<f64> = vectors
            .iter()
            .map(|&(dx, dy)| ((dx as f64).powi(2) + (dy as f64).powi(2)).sqrt() / dt)
            .collect();

        Ok(TrackedFlow {
            points,
            vectors,
            std: magnitude_std(&magnitudes),
            dt,
        })
    }

    fn detect_corners(&self, gray: &Mat) -> Result<Vector<Point2f>> {
        let mut corners = Vector::<Point2f>::new();
        imgproc::good_features_to_track(
            gray,
            &mut corners,
            self.config.max_corners,
            self.config.quality_level,
            self.config.min_distance,
            &core::no_array(),
            self.config.block_size,
            false,
            0.04,
        )?;
        Ok(corners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Rect, Scalar, CV_8UC1};

    fn blank_frame() -> Mat {
        Mat::zeros(480, 640, CV_8UC1).unwrap().to_mat().unwrap()
    }

    fn textured_frame(offset: i32) -> Mat {
        let mut frame = blank_frame();
        for i in 0..6 {
            for j in 0..6 {
                let rect = Rect::new(60 + offset + i * 90, 60 + j * 60, 14, 14);
                imgproc::rectangle(
                    &mut frame,
                    rect,
                    Scalar::all(255.0),
                    imgproc::FILLED,
                    imgproc::LINE_8,
                    0,
                )
                .unwrap();
            }
        }
        frame
    }

    #[test]
    fn test_first_frame_initializes_and_returns_empty() {
        let mut tracker = FlowTracker::new(FlowConfig::default());
        let flow = tracker.process(&textured_frame(0)).unwrap();
        assert!(flow.points.is_empty());
        assert_eq!(flow.std, 0.0);
    }

    #[test]
    fn test_featureless_frames_degrade_to_empty() {
        let mut tracker = FlowTracker::new(FlowConfig::default());
        tracker.process(&blank_frame()).unwrap();
        let flow = tracker.process(&blank_frame()).unwrap();
        assert!(flow.points.is_empty());
        assert!(flow.vectors.is_empty());
    }

    #[test]
    fn test_translation_is_tracked() {
        let mut tracker = FlowTracker::new(FlowConfig::default());
        tracker.initialize(&textured_frame(0)).unwrap();
        let flow = tracker.process(&textured_frame(4)).unwrap();
        assert!(!flow.points.is_empty());
        assert_eq!(flow.points.len(), flow.vectors.len());

        let mean_dx: f32 =
            flow.vectors.iter().map(|v| v.0).sum::<f32>() / flow.vectors.len() as f32;
        assert!((mean_dx - 4.0).abs() < 1.5, "mean dx was {mean_dx}");
    }
}
