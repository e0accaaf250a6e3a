use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::paths::preview_file_name;

/// Result of diffing a destination directory against its desired contents
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// (source, destination) pairs still to be copied
    pub pending: Vec<(PathBuf, PathBuf)>,
    /// Stale files deleted from the destination
    pub removed: Vec<PathBuf>,
}

/// Bring a destination directory in line with a desired file list.
///
/// Files are matched by basename only. Matching files are left alone,
/// missing ones are returned as pending copies, and stale ones are
/// deleted right away. When `preview_dir` is given, the derived preview
/// of every stale file is deleted alongside it.
///
/// The destination must already exist; reconcile never creates it, so a
/// folder that was renamed or deleted after the job was queued stays
/// gone.
pub fn reconcile(
    desired: &[PathBuf],
    destination: &Path,
    preview_dir: Option<&Path>,
) -> Result<SyncPlan> {
    let mut existing = list_files(destination)?;
    let mut plan = SyncPlan::default();

    for source in desired {
        let basename = match source.file_name() {
            Some(name) => name,
            None => {
                warn!(path = %source.display(), "desired entry has no file name, skipping");
                continue;
            }
        };
        match existing.iter().position(|f| {
            f.file_name().map(|name| name == basename).unwrap_or(false)
        }) {
            Some(at) => {
                existing.swap_remove(at);
            }
            None => plan.pending.push((source.clone(), destination.join(basename))),
        }
    }

    for stale in existing {
        match fs::remove_file(&stale) {
            Ok(()) => {
                debug!(path = %stale.display(), "stale file removed");
                if let Some(preview_dir) = preview_dir {
                    remove_paired_preview(&stale, preview_dir);
                }
                plan.removed.push(stale);
            }
            Err(e) => warn!(path = %stale.display(), error = %e, "could not remove stale file"),
        }
    }

    Ok(plan)
}

/// Delete the preview derived from a gallery file, if one exists
fn remove_paired_preview(gallery_file: &Path, preview_dir: &Path) {
    let Some(name) = preview_file_name(gallery_file) else {
        return;
    };
    let preview = preview_dir.join(name);
    if !preview.is_file() {
        return;
    }
    if let Err(e) = fs::remove_file(&preview) {
        warn!(path = %preview.display(), error = %e, "could not remove orphaned preview");
    } else {
        debug!(path = %preview.display(), "orphaned preview removed");
    }
}

/// Plain files directly inside a directory, subdirectories ignored
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    Ok(files)
}
