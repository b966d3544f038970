// src/vehicle/camera.rs

use crate::types::CapturedFrame;
use crate::vehicle::FrameSource;
use anyhow::Result;
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::time::Instant;
use tracing::info;

/// Frame source backed by a camera device index or a video file path.
pub struct VideoFrameSource {
    capture: VideoCapture,
}

impl VideoFrameSource {
    pub fn open(source: &str) -> Result<Self> {
        let capture = match source.parse::<i32>() {
            Ok(index) => {
                info!("Opening camera device {index}");
                VideoCapture::new(index, videoio::CAP_ANY)?
            }
            Err(_) => {
                info!("Opening video source: {source}");
                VideoCapture::from_file(source, videoio::CAP_ANY)?
            }
        };
        if !capture.is_opened()? {
            anyhow::bail!("failed to open frame source {source}");
        }
        Ok(Self { capture })
    }
}

impl FrameSource for VideoFrameSource {
    fn capture(&mut self) -> Result<Option<CapturedFrame>> {
        let t0 = Instant::now();
        let mut mat = Mat::default();
        let grabbed = self.capture.read(&mut mat)?;
        let capture_time_s = t0.elapsed().as_secs_f64();

        if !grabbed || mat.empty() {
            return Ok(None);
        }

        let t1 = Instant::now();
        let data = mat.data_bytes()?.to_vec();
        let decode_time_s = t1.elapsed().as_secs_f64();

        Ok(Some(CapturedFrame {
            data,
            width: mat.cols(),
            height: mat.rows(),
            capture_time_s,
            decode_time_s,
        }))
    }
}
