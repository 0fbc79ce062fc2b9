//! Asynchronous persistence of relocalised poses.
//!
//! Poses are queued on an unbounded channel and written by a dedicated
//! thread, so relocalisation never waits on the filesystem. Write failures
//! are logged on the writer thread and never reach the caller.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use nalgebra::Matrix4;
use tracing::{debug, info, warn};

use crate::geometry::SE3;

/// One pose file to write. `None` marks an invalid pose.
#[derive(Debug, Clone)]
pub struct PoseRecord {
    pub path: PathBuf,
    pub pose: Option<SE3>,
}

/// Destination of persisted poses.
pub trait PoseSink: Send {
    /// Queue a record; must not block on I/O.
    fn submit(&self, record: PoseRecord);
}

/// Writes each record to its own text file on a background thread.
pub struct AsyncPoseWriter {
    sender: Option<Sender<PoseRecord>>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncPoseWriter {
    /// Spawn the writer thread.
    pub fn spawn() -> Result<Self> {
        let (sender, receiver) = unbounded::<PoseRecord>();
        let handle = thread::Builder::new()
            .name("pose-writer".into())
            .spawn(move || run_writer(receiver))
            .context("Failed to spawn pose writer thread")?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Write every queued record and stop the thread.
    pub fn shutdown(&mut self) {
        // Closing the channel ends the writer loop once the queue drains.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Pose writer thread panicked");
            }
        }
    }
}

impl PoseSink for AsyncPoseWriter {
    fn submit(&self, record: PoseRecord) {
        match &self.sender {
            Some(sender) => {
                if sender.send(record).is_err() {
                    warn!("Pose writer thread has stopped; dropping pose");
                }
            }
            None => warn!("Pose writer already shut down; dropping pose"),
        }
    }
}

impl Drop for AsyncPoseWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer(receiver: Receiver<PoseRecord>) {
    info!("Pose writer started");
    let mut written = 0usize;
    for record in receiver {
        match write_pose_file(&record.path, record.pose.as_ref()) {
            Ok(()) => {
                written += 1;
                debug!("Wrote {}", record.path.display());
            }
            Err(e) => warn!("Failed to write pose {}: {:#}", record.path.display(), e),
        }
    }
    info!("Pose writer stopped after {} files", written);
}

/// Write a pose as a 4x4 row-major matrix, one row per line. An invalid
/// pose is written as a matrix of NaNs.
pub fn write_pose_file(path: &Path, pose: Option<&SE3>) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    let matrix = pose.map_or_else(|| Matrix4::from_element(f64::NAN), SE3::to_matrix);
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    for r in 0..4 {
        writeln!(
            file,
            "{} {} {} {}",
            matrix[(r, 0)],
            matrix[(r, 1)],
            matrix[(r, 2)],
            matrix[(r, 3)]
        )?;
    }
    Ok(())
}

/// Read a file written by [`write_pose_file`]. Returns `Ok(None)` for the
/// invalid-pose sentinel.
pub fn read_pose_file(path: &Path) -> Result<Option<SE3>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let values: Vec<f64> = text
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("Invalid number in {}", path.display()))?;
    anyhow::ensure!(
        values.len() == 16,
        "Expected 16 values in {}, found {}",
        path.display(),
        values.len()
    );

    if values.iter().any(|v| v.is_nan()) {
        return Ok(None);
    }
    Ok(Some(SE3::from_matrix(&Matrix4::from_row_slice(&values))))
}
