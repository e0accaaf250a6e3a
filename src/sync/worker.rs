use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task;
use tracing::{debug, warn};

use crate::sync::preview::ensure_previews;
use crate::sync::reconcile::reconcile;

/// Progress is reported in fixed steps of four percent
const PROGRESS_STEP: u8 = 4;

/// Smallest copy chunk between progress ticks and cancel checks
const MIN_CHUNK: u64 = 64 * 1024;

/// One unit of background file work, always tied to a single asset
#[derive(Debug, Clone)]
pub enum Job {
    /// Diff a directory against its desired contents and copy what's missing
    Reconcile {
        asset_id: i64,
        desired: Vec<PathBuf>,
        destination: PathBuf,
        preview_dir: Option<PathBuf>,
    },
    /// Generate missing gallery previews into the info directory
    Previews {
        asset_id: i64,
        gallery_dir: PathBuf,
        info_dir: PathBuf,
    },
    /// Rename content files after the asset that owns them
    RenameContent {
        asset_id: i64,
        content_dir: PathBuf,
        asset_name: String,
    },
}

impl Job {
    pub fn asset_id(&self) -> i64 {
        match self {
            Job::Reconcile { asset_id, .. }
            | Job::Previews { asset_id, .. }
            | Job::RenameContent { asset_id, .. } => *asset_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Job::Reconcile { .. } => "reconcile",
            Job::Previews { .. } => "previews",
            Job::RenameContent { .. } => "rename-content",
        }
    }
}

/// Emitted by the worker so frontends can follow background work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Started { asset_id: i64, job: &'static str },
    /// Per-file copy progress, 0 to 100
    Progress { asset_id: i64, percent: u8 },
    FileDone { asset_id: i64, file: PathBuf },
    Finished { asset_id: i64, job: &'static str },
    /// The job was dropped: its asset was cancelled or its target
    /// folder no longer exists
    Skipped { asset_id: i64, job: &'static str },
    Failed { asset_id: i64, job: &'static str, message: String },
}

/// Handle to the single background sync worker.
///
/// Jobs run strictly in submission order on one task, so two jobs never
/// touch the filesystem at the same time. File copies happen on the
/// blocking pool to keep the runtime responsive.
#[derive(Clone)]
pub struct SyncWorker {
    jobs: UnboundedSender<Job>,
    cancelled: Arc<Mutex<HashSet<i64>>>,
}

impl SyncWorker {
    /// Start the worker task; the receiver carries its progress events
    pub fn spawn() -> (SyncWorker, UnboundedReceiver<SyncEvent>) {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(Mutex::new(HashSet::new()));

        tokio::spawn(run(jobs_rx, events_tx, cancelled.clone()));

        (
            SyncWorker {
                jobs: jobs_tx,
                cancelled,
            },
            events_rx,
        )
    }

    pub fn enqueue(&self, job: Job) {
        debug!(asset_id = job.asset_id(), kind = job.kind(), "job queued");
        if self.jobs.send(job).is_err() {
            warn!("sync worker is gone, job dropped");
        }
    }

    /// Mark an asset so its queued and in-flight jobs are abandoned
    pub fn cancel_asset(&self, asset_id: i64) {
        if let Ok(mut set) = self.cancelled.lock() {
            set.insert(asset_id);
        }
        debug!(asset_id, "asset cancelled");
    }

    /// Clear an earlier cancellation so fresh jobs for the asset run again
    pub fn resume_asset(&self, asset_id: i64) {
        if let Ok(mut set) = self.cancelled.lock() {
            if set.remove(&asset_id) {
                debug!(asset_id, "asset cancellation cleared");
            }
        }
    }
}

fn is_cancelled(cancelled: &Mutex<HashSet<i64>>, asset_id: i64) -> bool {
    cancelled
        .lock()
        .map(|set| set.contains(&asset_id))
        .unwrap_or(false)
}

async fn run(
    mut jobs: UnboundedReceiver<Job>,
    events: UnboundedSender<SyncEvent>,
    cancelled: Arc<Mutex<HashSet<i64>>>,
) {
    while let Some(job) = jobs.recv().await {
        let asset_id = job.asset_id();
        let kind = job.kind();

        if is_cancelled(&cancelled, asset_id) {
            debug!(asset_id, kind, "job skipped, asset cancelled");
            let _ = events.send(SyncEvent::Skipped { asset_id, job: kind });
            continue;
        }

        let _ = events.send(SyncEvent::Started { asset_id, job: kind });
        let task_events = events.clone();
        let task_cancelled = cancelled.clone();
        let outcome =
            task::spawn_blocking(move || run_blocking(job, &task_events, &task_cancelled)).await;

        match outcome {
            Ok(Ok(true)) => {
                debug!(asset_id, kind, "job finished");
                let _ = events.send(SyncEvent::Finished { asset_id, job: kind });
            }
            Ok(Ok(false)) => {
                debug!(asset_id, kind, "job abandoned");
                let _ = events.send(SyncEvent::Skipped { asset_id, job: kind });
            }
            Ok(Err(message)) => {
                warn!(asset_id, kind, message, "job failed");
                let _ = events.send(SyncEvent::Failed {
                    asset_id,
                    job: kind,
                    message,
                });
            }
            Err(e) => {
                warn!(asset_id, kind, error = %e, "job panicked");
                let _ = events.send(SyncEvent::Failed {
                    asset_id,
                    job: kind,
                    message: e.to_string(),
                });
            }
        }
    }
    debug!("sync worker stopped");
}

/// Runs one job to completion on the blocking pool.
/// `Ok(false)` means the job stopped early: its asset was cancelled or
/// its destination folder is gone.
fn run_blocking(
    job: Job,
    events: &UnboundedSender<SyncEvent>,
    cancelled: &Mutex<HashSet<i64>>,
) -> Result<bool, String> {
    match job {
        Job::Reconcile {
            asset_id,
            desired,
            destination,
            preview_dir,
        } => {
            // Folders are provisioned before jobs queue, so a missing
            // destination means the asset was renamed or deleted since
            if !destination.is_dir() {
                debug!(asset_id, path = %destination.display(), "destination is gone, job dropped");
                return Ok(false);
            }
            let plan = reconcile(&desired, &destination, preview_dir.as_deref())
                .map_err(|e| e.to_string())?;
            let total = plan.pending.len();
            let mut failures = Vec::new();
            for (source, target) in plan.pending {
                if is_cancelled(cancelled, asset_id) {
                    return Ok(false);
                }
                match copy_with_progress(&source, &target, asset_id, events, cancelled) {
                    Ok(true) => {
                        let _ = events.send(SyncEvent::FileDone {
                            asset_id,
                            file: target,
                        });
                    }
                    Ok(false) => return Ok(false),
                    Err(e) => {
                        warn!(asset_id, file = %source.display(), error = %e, "copy failed, rest of the batch continues");
                        let _ = fs::remove_file(&target);
                        failures.push(format!("{}: {}", source.display(), e));
                    }
                }
            }
            if failures.is_empty() {
                Ok(true)
            } else {
                Err(format!(
                    "{} of {} copies failed: {}",
                    failures.len(),
                    total,
                    failures.join("; ")
                ))
            }
        }
        Job::Previews {
            asset_id,
            gallery_dir,
            info_dir,
        } => {
            let generated = ensure_previews(&gallery_dir, &info_dir).map_err(|e| e.to_string())?;
            debug!(asset_id, generated, "previews ensured");
            Ok(true)
        }
        Job::RenameContent {
            asset_id,
            content_dir,
            asset_name,
        } => {
            let renamed = apply_content_naming(&content_dir, &asset_name);
            debug!(asset_id, renamed, "content files renamed");
            Ok(true)
        }
    }
}

/// Chunked file copy with progress events and a cancel check per chunk.
/// Returns `Ok(false)` and removes the partial target when cancelled.
fn copy_with_progress(
    source: &Path,
    target: &Path,
    asset_id: i64,
    events: &UnboundedSender<SyncEvent>,
    cancelled: &Mutex<HashSet<i64>>,
) -> io::Result<bool> {
    let size = fs::metadata(source)?.len();
    let chunk = (size / 25).max(MIN_CHUNK);

    let mut src = File::open(source)?;
    let mut dst = File::create(target)?;
    let mut buf = vec![0u8; MIN_CHUNK as usize];
    let mut copied: u64 = 0;
    let mut next_tick = chunk;
    let mut percent: u8 = 0;

    loop {
        if is_cancelled(cancelled, asset_id) {
            drop(dst);
            if let Err(e) = fs::remove_file(target) {
                warn!(path = %target.display(), error = %e, "could not remove partial copy");
            }
            return Ok(false);
        }

        let read = src.read(&mut buf)?;
        if read == 0 {
            break;
        }
        dst.write_all(&buf[..read])?;
        copied += read as u64;

        while copied >= next_tick && percent < 100 {
            percent = (percent + PROGRESS_STEP).min(100);
            let _ = events.send(SyncEvent::Progress { asset_id, percent });
            next_tick += chunk;
        }
    }

    if percent < 100 {
        let _ = events.send(SyncEvent::Progress {
            asset_id,
            percent: 100,
        });
    }
    Ok(true)
}

/// Rename every content file after the asset, grouped by extension.
///
/// A lone file of its extension becomes `<name>.<ext>`; several share a
/// numbered scheme `<name>_01.<ext>` in sorted order. Files already in
/// place are left alone, and a name that is somehow taken is skipped
/// rather than overwritten. Returns how many files were renamed.
pub fn apply_content_naming(content_dir: &Path, asset_name: &str) -> usize {
    let mut by_extension: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let entries = match fs::read_dir(content_dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %content_dir.display(), error = %e, "could not list content files");
            return 0;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => by_extension
                .entry(ext.to_lowercase())
                .or_default()
                .push(path),
            None => debug!(path = %path.display(), "content file has no extension, left alone"),
        }
    }

    let mut renamed = 0;
    for (ext, mut files) in by_extension {
        files.sort();
        let solo = files.len() == 1;
        for (i, path) in files.iter().enumerate() {
            let file_name = if solo {
                format!("{}.{}", asset_name, ext)
            } else {
                format!("{}_{:02}.{}", asset_name, i + 1, ext)
            };
            let target = content_dir.join(file_name);
            if target == *path {
                continue;
            }
            if target.exists() {
                warn!(path = %target.display(), "target name taken, content file kept as-is");
                continue;
            }
            match fs::rename(path, &target) {
                Ok(()) => renamed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not rename content file");
                }
            }
        }
    }
    renamed
}
