// src/pipeline/telemetry.rs
//
// Per-cycle CSV flight log. One timestamp-named file per run, buffered writes
// flushed every few cycles, and a retention sweep that keeps only the most
// recent files.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const LOG_PREFIX: &str = "full_log_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One telemetry row per control cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub frame: u64,
    pub time: f64,
    pub tracked_feature_count: usize,
    pub flow_left: f64,
    pub flow_center: f64,
    pub flow_right: f64,
    pub flow_std: f64,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub yaw: f64,
    pub speed: f64,
    pub state_label: String,
    pub collided: bool,
    pub obstacle_flag: bool,
    pub brake_threshold: f64,
    pub dodge_threshold: f64,
    pub probe_requirement: f64,
    pub achieved_fps: f64,
    pub capture_time_s: f64,
    pub decode_time_s: f64,
    pub processing_time_s: f64,
    pub loop_time_s: f64,
}

/// Buffered CSV log owned by the control loop. No concurrent writers.
pub struct FlightLog {
    dir: PathBuf,
    keep: usize,
    flush_every: u32,
    writer: Option<csv::Writer<File>>,
    path: PathBuf,
    pending: u32,
    rows: u64,
}

impl FlightLog {
    pub fn create(dir: impl Into<PathBuf>, keep: usize, flush_every: u32) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating log directory {}", dir.display()))?;
        retain_recent_logs(&dir, keep)?;
        let (writer, path) = Self::open_writer(&dir)?;
        info!("Flight log: {}", path.display());
        Ok(Self {
            dir,
            keep,
            flush_every,
            writer: Some(writer),
            path,
            pending: 0,
            rows: 0,
        })
    }

    fn open_writer(dir: &Path) -> Result<(csv::Writer<File>, PathBuf)> {
        let stamp = Local::now().format(TIMESTAMP_FORMAT);
        let mut path = dir.join(format!("{LOG_PREFIX}{stamp}.csv"));
        // Resets within the same second would collide; suffix the name.
        let mut attempt = 1;
        while path.exists() {
            path = dir.join(format!("{LOG_PREFIX}{stamp}_{attempt}.csv"));
            attempt += 1;
        }
        let file = File::create(&path)
            .with_context(|| format!("creating flight log {}", path.display()))?;
        Ok((csv::Writer::from_writer(file), path))
    }

    /// Append one row, flushing once `flush_every` rows have accumulated.
    pub fn append(&mut self, record: &DecisionRecord) -> Result<()> {
        let flush_every = self.flush_every;
        let writer = self
            .writer
            .as_mut()
            .context("flight log already finished")?;
        writer.serialize(record)?;
        self.rows += 1;
        self.pending += 1;
        if self.pending >= flush_every {
            writer.flush()?;
            self.pending = 0;
        }
        Ok(())
    }

    /// Close the current file and start a fresh timestamped one.
    pub fn rotate(&mut self) -> Result<()> {
        self.close_current()?;
        retain_recent_logs(&self.dir, self.keep)?;
        let (writer, path) = Self::open_writer(&self.dir)?;
        info!("Flight log rotated: {}", path.display());
        self.writer = Some(writer);
        self.path = path;
        self.rows = 0;
        Ok(())
    }

    /// Flush and close for good, then apply retention.
    pub fn finish(&mut self) -> Result<()> {
        self.close_current()?;
        retain_recent_logs(&self.dir, self.keep)
    }

    fn close_current(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("{} rows written to {}", self.rows, self.path.display());
        }
        self.pending = 0;
        Ok(())
    }

    pub fn rows_logged(&self) -> u64 {
        self.rows
    }

    pub fn current_path(&self) -> &Path {
        &self.path
    }
}

/// Keep the `keep` most recent flight logs by the timestamp parsed from the
/// file name, removing the rest. Files that do not parse are left alone. A
/// missing directory is a no-op.
pub fn retain_recent_logs(dir: &Path, keep: usize) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut logs: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(stamp) = parse_log_timestamp(path) {
            logs.push((stamp, path.to_path_buf()));
        }
    }

    if logs.len() <= keep {
        return Ok(());
    }

    logs.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in logs.drain(keep..) {
        debug!("Removing old flight log {}", path.display());
        if let Err(e) = fs::remove_file(&path) {
            warn!("Could not remove {}: {e}", path.display());
        }
    }
    Ok(())
}

fn parse_log_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    if !name.ends_with(".csv") {
        return None;
    }
    let stem = name.strip_prefix(LOG_PREFIX)?.strip_suffix(".csv")?;
    // Rotation suffixes ("_1") trail the 15-char timestamp.
    let stamp = stem.get(..15)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(frame: u64, state: &str) -> DecisionRecord {
        DecisionRecord {
            frame,
            time: frame as f64 * 0.05,
            tracked_feature_count: 42,
            flow_left: 1.0,
            flow_center: 2.0,
            flow_right: 3.0,
            flow_std: 0.5,
            pos_x: 0.0,
            pos_y: 0.0,
            pos_z: -2.0,
            yaw: 0.0,
            speed: 1.5,
            state_label: state.to_string(),
            collided: false,
            obstacle_flag: false,
            brake_threshold: 20.0,
            dodge_threshold: 2.0,
            probe_requirement: 5.0,
            achieved_fps: 19.7,
            capture_time_s: 0.01,
            decode_time_s: 0.002,
            processing_time_s: 0.008,
            loop_time_s: 0.02,
        }
    }

    #[test]
    fn test_retention_keeps_most_recent_by_parsed_timestamp() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dir = tmp.path();
        // Written shuffled so order cannot come from creation time.
        for stamp in [
            "20240101_000004",
            "20240101_000001",
            "20240101_000006",
            "20240101_000003",
            "20240101_000005",
            "20240101_000002",
        ] {
            fs::write(dir.join(format!("full_log_{stamp}.csv")), "data")?;
        }

        retain_recent_logs(dir, 3)?;

        let mut remaining: Vec<String> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "full_log_20240101_000004.csv",
                "full_log_20240101_000005.csv",
                "full_log_20240101_000006.csv",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_retention_missing_dir_is_noop() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let missing = tmp.path().join("missing");
        retain_recent_logs(&missing, 3)?;
        assert!(!missing.exists());
        Ok(())
    }

    #[test]
    fn test_retention_ignores_unparseable_names() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let dir = tmp.path();
        fs::write(dir.join("full_log_20240101_000001.csv"), "data")?;
        fs::write(dir.join("full_log_20240101_000002.csv"), "data")?;
        fs::write(dir.join("notes.txt"), "keep me")?;

        retain_recent_logs(dir, 1)?;

        assert!(dir.join("notes.txt").exists());
        assert!(dir.join("full_log_20240101_000002.csv").exists());
        assert!(!dir.join("full_log_20240101_000001.csv").exists());
        Ok(())
    }

    #[test]
    fn test_flush_interval_bounds_buffered_rows() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut log = FlightLog::create(tmp.path(), 5, 2)?;
        log.append(&record(1, "none"))?;
        log.append(&record(2, "brake"))?;

        let contents = fs::read_to_string(log.current_path())?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3, "header plus two flushed rows");
        assert!(lines[0].starts_with("frame,time,tracked_feature_count,flow_left"));
        assert!(lines[2].contains("brake"));
        Ok(())
    }

    #[test]
    fn test_finish_flushes_remaining_rows() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut log = FlightLog::create(tmp.path(), 5, 100)?;
        log.append(&record(1, "none"))?;
        let path = log.current_path().to_path_buf();
        log.finish()?;

        let contents = fs::read_to_string(path)?;
        assert_eq!(contents.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn test_rotate_starts_a_new_file() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let mut log = FlightLog::create(tmp.path(), 5, 1)?;
        log.append(&record(1, "none"))?;
        let first = log.current_path().to_path_buf();
        log.rotate()?;
        log.append(&record(1, "none"))?;

        assert_ne!(first, log.current_path());
        assert!(first.exists());
        assert_eq!(log.rows_logged(), 1);
        Ok(())
    }
}
