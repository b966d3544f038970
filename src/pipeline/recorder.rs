// src/pipeline/recorder.rs
//
// Asynchronous recording sink. A worker thread consumes annotated frames from
// a bounded queue and encodes them, so encoder latency never stalls the
// control cycle. A full queue drops the frame instead of blocking.

use anyhow::Result;
use crossbeam_channel::{bounded, Sender, TrySendError};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::VideoWriter,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub struct Recorder {
    tx: Option<Sender<Mat>>,
    worker: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
    path: String,
}

impl Recorder {
    pub fn spawn(path: &str, fps: f64, width: i32, height: i32, capacity: usize) -> Result<Self> {
        let fourcc = VideoWriter::fourcc('M', 'J', 'P', 'G')?;
        let mut writer = VideoWriter::new(path, fourcc, fps, Size::new(width, height), true)?;
        if !writer.is_opened()? {
            anyhow::bail!("failed to open recording sink {path}");
        }
        info!("Recording to {path} ({width}x{height} @ {fps:.1} FPS)");

        let (tx, rx) = bounded::<Mat>(capacity);
        let worker = std::thread::Builder::new()
            .name("recorder".to_string())
            .spawn(move || {
                // Drains naturally: recv keeps yielding queued frames after
                // the sender side disconnects.
                for frame in rx.iter() {
                    if let Err(e) = writer.write(&frame) {
                        warn!("Recording write failed: {e}");
                    }
                }
                if let Err(e) = writer.release() {
                    warn!("Recording release failed: {e}");
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            dropped: Arc::new(AtomicU64::new(0)),
            path: path.to_string(),
        })
    }

    /// Non-blocking enqueue. Recording completeness loses to loop timing.
    pub fn enqueue(&self, frame: Mat) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Recording queue full, dropped frame ({dropped} total)");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Recording worker gone, frame discarded");
            }
        }
    }

    /// Disconnect, let the worker drain the queue, and join it.
    pub fn shutdown(mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Recording worker panicked");
            }
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            info!("Recording finished ({}, {dropped} frames dropped)", self.path);
        } else {
            info!("Recording finished ({})", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_8UC3;

    fn frame() -> Mat {
        Mat::zeros(480, 640, CV_8UC3).unwrap().to_mat().unwrap()
    }

    #[test]
    fn test_enqueue_and_shutdown_drain() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("out.avi");
        let recorder = Recorder::spawn(path.to_str().unwrap(), 8.0, 640, 480, 4)?;
        for _ in 0..3 {
            recorder.enqueue(frame());
        }
        recorder.shutdown();
        assert!(path.exists());
        assert!(std::fs::metadata(&path)?.len() > 0);
        Ok(())
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("out.avi");
        let recorder = Recorder::spawn(path.to_str().unwrap(), 8.0, 640, 480, 1)?;
        // Far more frames than the queue holds; enqueue must never block.
        for _ in 0..50 {
            recorder.enqueue(frame());
        }
        recorder.shutdown();
        Ok(())
    }
}
