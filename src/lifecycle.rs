use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::{LibrarySettings, ASSET_SUFFIX, QUARANTINE_DIR};
use crate::error::{Error, Result};
use crate::interface::Notifier;
use crate::paths::{asset_dir_name, is_image_path, is_valid_name, rebase, rewrite_asset_segment, AssetDirs};
use crate::state::data::{normalize_tags, parse_terms, Asset, AssetInput, AssetRecord, Sidecar};
use crate::state::index::{AssetKey, AssetUpdate, TagIndex};
use crate::sync::preview::{image_files, save_icon};
use crate::sync::reconcile::list_files;
use crate::sync::worker::{Job, SyncEvent, SyncWorker};

/// The asset library: one root folder, its index database, and the
/// background worker that keeps asset folders in sync.
///
/// Create, edit and delete run their validation, folder setup, database
/// and sidecar writes synchronously before returning. File copying,
/// preview generation and content renaming are queued on the worker and
/// reported through the event stream returned by [`AssetLibrary::open`].
pub struct AssetLibrary {
    settings: LibrarySettings,
    index: TagIndex,
    worker: SyncWorker,
    notifier: Box<dyn Notifier + Send + Sync>,
}

impl AssetLibrary {
    /// Open a library rooted at the configured folder, creating the root
    /// and index database on first use. Must run inside a tokio runtime,
    /// which hosts the background worker.
    pub fn open(
        settings: LibrarySettings,
        notifier: Box<dyn Notifier + Send + Sync>,
    ) -> Result<(Self, UnboundedReceiver<SyncEvent>)> {
        settings.ensure_root()?;
        let index = TagIndex::open(settings.root())?;
        let (worker, events) = SyncWorker::spawn();
        info!(root = %settings.root().display(), "library opened");

        Ok((
            AssetLibrary {
                settings,
                index,
                worker,
                notifier,
            },
            events,
        ))
    }

    pub fn root(&self) -> &Path {
        self.settings.root()
    }

    pub fn asset_count(&self) -> Result<i64> {
        self.index.asset_count()
    }

    pub fn find_asset(&self, key: AssetKey<'_>) -> Result<Option<AssetRecord>> {
        self.index.find_asset(key)
    }

    /// Create a new asset from form input.
    ///
    /// Validation and the duplicate check run first, so a rejected input
    /// leaves no trace. Folders, icon, index row and sidecar are written
    /// before this returns; file copies and previews are queued and
    /// finish in the background.
    pub fn create(&mut self, input: AssetInput) -> Result<AssetRecord> {
        if !is_valid_name(&input.name) {
            return Err(Error::InvalidName { name: input.name });
        }
        if self.index.find_asset(AssetKey::Name(&input.name))?.is_some() {
            return Err(Error::DuplicateName { name: input.name });
        }

        let parent = if input.parent.as_os_str().is_empty() {
            self.settings.root().to_path_buf()
        } else {
            input.parent.clone()
        };
        let root = parent.join(asset_dir_name(&input.name));
        let dirs = AssetDirs::new(&root);
        dirs.ensure()?;

        let icon = self.refresh_icon(&dirs, input.icon.as_deref(), None)?;
        let tags = normalize_tags(&input.tags);
        let id = self
            .index
            .add_asset(&input.name, &root, icon.as_deref(), &tags)?;

        let sidecar = Sidecar {
            name: input.name.clone(),
            asset_id: Some(id),
            tags,
            description: input.description.clone(),
        };
        sidecar.save(&dirs.sidecar)?;

        info!(name = %input.name, id, path = %root.display(), "asset created");
        self.notifier.asset_created(&input.name, icon.as_deref(), &root);
        self.queue_file_sync(id, &input.name, input.scenes, input.gallery, &dirs, input.rename_content);

        Ok(AssetRecord {
            id,
            name: input.name,
            path: root,
            icon,
        })
    }

    /// Apply form input to an existing asset: rename, move, icon change,
    /// tag replacement and file sync, in that order.
    ///
    /// Renames and moves commit to the index before touching the
    /// filesystem; when the folder operation then fails the library is
    /// flagged inconsistent instead of guessing.
    pub fn edit(&mut self, input: AssetInput) -> Result<AssetRecord> {
        let id = input.asset_id.ok_or_else(|| Error::MissingAsset {
            key: format!("edit of {} without an asset id", input.name),
        })?;
        let mut record = self
            .index
            .find_asset(AssetKey::Id(id))?
            .ok_or_else(|| Error::MissingAsset {
                key: format!("asset id {}", id),
            })?;

        if !is_valid_name(&input.name) {
            return Err(Error::InvalidName { name: input.name });
        }
        if input.name != record.name {
            if let Some(other) = self.index.find_asset(AssetKey::Name(&input.name))? {
                if other.id != id {
                    return Err(Error::DuplicateName { name: input.name });
                }
            }
        }

        let mut scenes = input.scenes;
        let mut gallery = input.gallery;
        let mut icon_paths: Vec<PathBuf> = input.icon.into_iter().collect();

        // Rename: index first, folder last
        if input.name != record.name {
            let new_root = match record.path.parent() {
                Some(parent) => parent.join(asset_dir_name(&input.name)),
                None => {
                    return Err(Error::InvalidName { name: input.name });
                }
            };
            if new_root.exists() {
                return Err(Error::DuplicateName { name: input.name });
            }
            rewrite_asset_segment(&mut scenes, &record.name, &input.name);
            rewrite_asset_segment(&mut gallery, &record.name, &input.name);
            rewrite_asset_segment(&mut icon_paths, &record.name, &input.name);

            self.index.edit_asset(
                id,
                AssetUpdate {
                    name: Some(input.name.clone()),
                    path: Some(new_root.clone()),
                    ..AssetUpdate::default()
                },
            )?;
            if let Err(e) = fs::rename(&record.path, &new_root) {
                error!(name = %input.name, path = %new_root.display(), error = %e, "folder rename failed after the index committed");
                return Err(Error::Inconsistent {
                    detail: format!(
                        "index now lists {} at {} but the folder rename failed: {}",
                        input.name,
                        new_root.display(),
                        e
                    ),
                });
            }
            info!(from = %record.name, to = %input.name, "asset renamed");
            record.name = input.name.clone();
            record.path = new_root;
        }

        // Move to a different parent folder
        if !input.parent.as_os_str().is_empty()
            && record.path.parent() != Some(input.parent.as_path())
        {
            let old_root = record.path.clone();
            let new_root = self.move_asset(id, &input.parent)?;
            rebase(&mut scenes, &old_root, &new_root);
            rebase(&mut gallery, &old_root, &new_root);
            rebase(&mut icon_paths, &old_root, &new_root);
            record.path = new_root;
        }

        let dirs = AssetDirs::new(&record.path);
        dirs.ensure()?;

        let current_icon = dirs.icon.is_file().then(|| dirs.icon.clone());
        let icon = self.refresh_icon(&dirs, icon_paths.first().map(PathBuf::as_path), current_icon)?;

        let tags = normalize_tags(&input.tags);
        let sidecar = Sidecar {
            name: record.name.clone(),
            asset_id: Some(id),
            tags: tags.clone(),
            description: input.description.clone(),
        };
        sidecar.save(&dirs.sidecar)?;
        self.index.edit_asset(
            id,
            AssetUpdate {
                icon: Some(icon.clone()),
                tags: Some(tags),
                ..AssetUpdate::default()
            },
        )?;
        record.icon = icon;

        info!(name = %record.name, id, "asset updated");
        self.queue_file_sync(id, &record.name, scenes, gallery, &dirs, input.rename_content);
        Ok(record)
    }

    /// Soft-delete an asset: its folder moves to the quarantine area with
    /// a timestamp suffix, then the index row and tags are removed.
    ///
    /// The folder moves first. If the index cleanup then fails the asset
    /// folder is already quarantined and the error says so, rather than
    /// leaving a row that points into the quarantine.
    pub fn delete(&mut self, id: i64) -> Result<()> {
        let record = self
            .index
            .find_asset(AssetKey::Id(id))?
            .ok_or_else(|| Error::MissingAsset {
                key: format!("asset id {}", id),
            })?;

        // Stop queued and in-flight file work for this asset
        self.worker.cancel_asset(id);

        let folder_name = record
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| asset_dir_name(&record.name));

        if record.path.exists() {
            let moved = self.quarantine_target(&folder_name).and_then(|target| {
                fs::rename(&record.path, &target)?;
                Ok(target)
            });
            let target = match moved {
                Ok(target) => target,
                Err(e) => {
                    // quarantine failed, the asset stays live with its queued work
                    self.worker.resume_asset(id);
                    return Err(e);
                }
            };
            info!(name = %record.name, to = %target.display(), "asset folder quarantined");

            match self.index.delete_asset(&record.name) {
                Ok(true) => {}
                Ok(false) => warn!(name = %record.name, "no index row found while deleting"),
                Err(e) => {
                    error!(name = %record.name, quarantine = %target.display(), error = %e, "index cleanup failed after the folder was quarantined");
                    return Err(Error::Inconsistent {
                        detail: format!(
                            "folder for {} was moved to {} but its index row could not be \
                             removed ({}); the asset folder may be in an undefined location",
                            record.name,
                            target.display(),
                            e
                        ),
                    });
                }
            }
        } else {
            warn!(name = %record.name, path = %record.path.display(), "asset folder already gone, removing index row only");
            self.index.delete_asset(&record.name)?;
        }

        info!(name = %record.name, id, "asset deleted");
        Ok(())
    }

    /// Rebuild an asset view from its folder.
    ///
    /// The index is authoritative for identity; the sidecar fills in the
    /// description and serves as fallback when the folder was copied in
    /// from elsewhere and has no row yet.
    pub fn recognize(&self, folder: &Path) -> Result<Asset> {
        // "a/b/" and "a/b" name the same folder, the index stores the latter
        let folder: PathBuf = folder.components().collect();
        let dirs = AssetDirs::new(&folder);
        let record = self.index.find_asset(AssetKey::Path(&folder))?;
        let sidecar = match Sidecar::load(&dirs.sidecar) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                debug!(path = %dirs.sidecar.display(), error = %e, "no readable sidecar");
                None
            }
        };

        if record.is_none() && sidecar.is_none() {
            return Err(Error::MissingAsset {
                key: folder.display().to_string(),
            });
        }
        if let (Some(r), Some(s)) = (&record, &sidecar) {
            if s.name != r.name {
                warn!(index = %r.name, sidecar = %s.name, "sidecar disagrees with the index, index wins");
            }
        }

        let id = record
            .as_ref()
            .map(|r| r.id)
            .or_else(|| sidecar.as_ref().and_then(|s| s.asset_id));
        let name = record
            .as_ref()
            .map(|r| r.name.clone())
            .or_else(|| sidecar.as_ref().map(|s| s.name.clone()))
            .unwrap_or_default();

        let mut tags = match &record {
            Some(r) => self.index.tags_for_assets(&[r.id])?,
            None => sidecar.as_ref().map(|s| s.tags.clone()).unwrap_or_default(),
        };
        tags.sort();
        let description = sidecar.map(|s| s.description).unwrap_or_default();

        let mut scenes = if dirs.content.is_dir() {
            list_files(&dirs.content)?
        } else {
            Vec::new()
        };
        scenes.sort();
        let gallery = if dirs.gallery.is_dir() {
            image_files(&dirs.gallery)?
        } else {
            Vec::new()
        };

        Ok(Asset {
            id,
            name,
            path: folder,
            icon: dirs.icon.is_file().then(|| dirs.icon.clone()),
            description,
            tags,
            scenes,
            gallery,
        })
    }

    /// Free-text search over asset names and tags, see
    /// [`TagIndex::find_assets_by_terms`] for the matching rules
    pub fn search(&self, query: &str) -> Result<Vec<AssetRecord>> {
        let terms = parse_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let found = self.index.find_assets_by_terms(&terms)?;
        debug!(query, count = found.len(), "search finished");
        Ok(found)
    }

    /// Tag cloud for a result set: the distinct tags across the first
    /// few matched assets, sorted
    pub fn related_tags(&self, assets: &[AssetRecord]) -> Result<Vec<String>> {
        let ids: Vec<i64> = assets.iter().map(|a| a.id).collect();
        let mut tags = self.index.tags_for_assets(&ids)?;
        tags.sort();
        Ok(tags)
    }

    /// Assets whose stored path contains the given folder path
    pub fn assets_in_folder(&self, folder: &Path) -> Result<Vec<AssetRecord>> {
        self.index.assets_in_folder(folder)
    }

    /// Rename a plain library folder, carrying every asset path under it
    /// along in the index. Index first, folder last, like asset renames.
    pub fn rename_folder(&mut self, folder: &Path, new_name: &str) -> Result<PathBuf> {
        if !is_valid_name(new_name) {
            return Err(Error::InvalidName {
                name: new_name.to_string(),
            });
        }
        let parent = folder.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "folder has no parent")
        })?;
        let target = parent.join(new_name);
        if target.exists() {
            return Err(Error::DuplicateName {
                name: new_name.to_string(),
            });
        }

        let touched = self.index.rename_directory(folder, &target)?;
        if let Err(e) = fs::rename(folder, &target) {
            error!(from = %folder.display(), to = %target.display(), error = %e, "folder rename failed after the index committed");
            return Err(Error::Inconsistent {
                detail: format!(
                    "index paths were moved under {} but the folder rename failed: {}",
                    target.display(),
                    e
                ),
            });
        }
        info!(from = %folder.display(), to = %target.display(), assets = touched.len(), "folder renamed");
        Ok(target)
    }

    /// Quarantine a whole library folder and drop the index rows of every
    /// asset inside it. Returns how many rows were removed.
    pub fn delete_folder(&mut self, folder: &Path) -> Result<usize> {
        let mut records = self.index.assets_in_folder(folder)?;
        records.retain(|r| r.path.starts_with(folder));
        for record in &records {
            self.worker.cancel_asset(record.id);
        }

        let folder_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "folder".to_string());
        let moved = self.quarantine_target(&folder_name).and_then(|target| {
            fs::rename(folder, &target)?;
            Ok(target)
        });
        let target = match moved {
            Ok(target) => target,
            Err(e) => {
                // quarantine failed, the assets stay live with their queued work
                for record in &records {
                    self.worker.resume_asset(record.id);
                }
                return Err(e);
            }
        };
        info!(from = %folder.display(), to = %target.display(), "folder quarantined");

        let mut removed = 0;
        let mut stuck = Vec::new();
        for record in &records {
            match self.index.delete_asset(&record.name) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => stuck.push(format!("{}: {}", record.name, e)),
            }
        }
        if !stuck.is_empty() {
            error!(quarantine = %target.display(), rows = %stuck.join(", "), "index rows survived a folder delete");
            return Err(Error::Inconsistent {
                detail: format!(
                    "folder was moved to {} but index rows remain for {}",
                    target.display(),
                    stuck.join(", ")
                ),
            });
        }
        Ok(removed)
    }

    /// Move an asset folder under a different parent.
    /// The index is updated first; a failed folder move flags the library
    /// inconsistent.
    pub fn move_asset(&mut self, id: i64, new_parent: &Path) -> Result<PathBuf> {
        let record = self
            .index
            .find_asset(AssetKey::Id(id))?
            .ok_or_else(|| Error::MissingAsset {
                key: format!("asset id {}", id),
            })?;
        let folder_name = record
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| asset_dir_name(&record.name));
        let target = new_parent.join(folder_name);
        if target == record.path {
            return Ok(target);
        }
        if target.exists() {
            return Err(Error::DuplicateName {
                name: record.name,
            });
        }

        self.index.edit_asset(
            id,
            AssetUpdate {
                path: Some(target.clone()),
                ..AssetUpdate::default()
            },
        )?;
        let moved = fs::create_dir_all(new_parent).and_then(|_| fs::rename(&record.path, &target));
        if let Err(e) = moved {
            error!(name = %record.name, to = %target.display(), error = %e, "folder move failed after the index committed");
            return Err(Error::Inconsistent {
                detail: format!(
                    "index lists {} at {} but the folder move failed: {}",
                    record.name,
                    target.display(),
                    e
                ),
            });
        }
        info!(name = %record.name, to = %target.display(), "asset moved");
        Ok(target)
    }

    /// All plain folders under the library root, sorted, skipping asset
    /// folders themselves and the quarantine area
    pub fn folder_tree(&self) -> Vec<PathBuf> {
        WalkDir::new(self.settings.root())
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.file_type().is_dir()
                    && entry
                        .file_name()
                        .to_str()
                        .map(|name| !name.ends_with(ASSET_SUFFIX) && name != QUARANTINE_DIR)
                        .unwrap_or(false)
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.into_path()),
                Err(e) => {
                    warn!(error = %e, "unreadable folder skipped");
                    None
                }
            })
            .collect()
    }

    /// Cancel any queued or running background work for an asset.
    /// Cleared again the next time work is queued for it.
    pub fn cancel_sync(&self, id: i64) {
        self.worker.cancel_asset(id);
    }

    fn quarantine_target(&self, folder_name: &str) -> Result<PathBuf> {
        let quarantine = self.settings.quarantine_dir();
        fs::create_dir_all(&quarantine)?;
        let stamp = Local::now().format("%d-%m-%Y_%H-%M");
        let base = format!("{}_{}", folder_name, stamp);
        let mut target = quarantine.join(&base);
        // the stamp has minute resolution, same-name deletes can collide
        let mut attempt = 2;
        while target.exists() {
            target = quarantine.join(format!("{}_{}", base, attempt));
            attempt += 1;
        }
        Ok(target)
    }

    /// Queue the standard post-commit file work for one asset: content
    /// sync, gallery sync with preview cleanup, preview generation, and
    /// optionally the content renaming pass
    fn queue_file_sync(
        &self,
        id: i64,
        name: &str,
        scenes: Vec<PathBuf>,
        gallery: Vec<PathBuf>,
        dirs: &AssetDirs,
        rename_content: bool,
    ) {
        // fresh work supersedes any earlier cancellation of this asset
        self.worker.resume_asset(id);
        self.worker.enqueue(Job::Reconcile {
            asset_id: id,
            desired: scenes,
            destination: dirs.content.clone(),
            preview_dir: None,
        });
        self.worker.enqueue(Job::Reconcile {
            asset_id: id,
            desired: gallery,
            destination: dirs.gallery.clone(),
            preview_dir: Some(dirs.info.clone()),
        });
        self.worker.enqueue(Job::Previews {
            asset_id: id,
            gallery_dir: dirs.gallery.clone(),
            info_dir: dirs.info.clone(),
        });
        if rename_content {
            self.worker.enqueue(Job::RenameContent {
                asset_id: id,
                content_dir: dirs.content.clone(),
                asset_name: name.to_string(),
            });
        }
    }

    /// Bring the stored icon in line with the requested source image.
    /// `None` clears, the current icon path keeps, a fresh source gets
    /// scaled and saved. Unsupported formats keep the previous icon.
    fn refresh_icon(
        &self,
        dirs: &AssetDirs,
        source: Option<&Path>,
        current: Option<PathBuf>,
    ) -> Result<Option<PathBuf>> {
        match source {
            None => {
                if dirs.icon.is_file() {
                    if let Err(e) = fs::remove_file(&dirs.icon) {
                        warn!(path = %dirs.icon.display(), error = %e, "could not remove icon");
                    }
                }
                Ok(None)
            }
            Some(src) if src == dirs.icon => Ok(current),
            Some(src) if !is_image_path(src) => {
                warn!(path = %src.display(), "unsupported icon format, keeping previous icon");
                Ok(current)
            }
            Some(src) => {
                save_icon(src, &dirs.icon)?;
                Ok(Some(dirs.icon.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::LogNotifier;
    use image::RgbImage;
    use tempfile::TempDir;

    fn open_library(tmp: &TempDir) -> (AssetLibrary, UnboundedReceiver<SyncEvent>) {
        let settings = LibrarySettings::new(tmp.path().join("library"));
        AssetLibrary::open(settings, Box::new(LogNotifier)).unwrap()
    }

    async fn wait_settled(events: &mut UnboundedReceiver<SyncEvent>, jobs: usize) {
        let mut settled = 0;
        while settled < jobs {
            match events.recv().await {
                Some(
                    SyncEvent::Finished { .. }
                    | SyncEvent::Skipped { .. }
                    | SyncEvent::Failed { .. },
                ) => settled += 1,
                Some(_) => {}
                None => break,
            }
        }
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_pixel(width, height, image::Rgb([10, 200, 90]));
        img.save(path).unwrap();
    }

    fn plain_input(name: &str) -> AssetInput {
        AssetInput {
            name: name.to_string(),
            ..AssetInput::default()
        }
    }

    #[tokio::test]
    async fn test_create_provisions_folders_index_and_files() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let sources = tmp.path().join("sources");
        fs::create_dir_all(&sources).unwrap();
        let scene = sources.join("chair.blend");
        fs::write(&scene, b"scene bytes").unwrap();
        let shot = sources.join("shot.png");
        write_png(&shot, 610, 200);

        let record = library
            .create(AssetInput {
                name: "chair".to_string(),
                tags: vec!["Furniture".to_string(), "furniture".to_string()],
                description: "a chair".to_string(),
                scenes: vec![scene],
                gallery: vec![shot],
                ..AssetInput::default()
            })
            .unwrap();
        wait_settled(&mut events, 3).await;

        let dirs = AssetDirs::new(&record.path);
        assert!(dirs.info.is_dir());
        assert!(dirs.content.is_dir());
        assert!(dirs.gallery.is_dir());
        assert!(dirs.content.join("chair.blend").is_file());
        assert!(dirs.gallery.join("shot.png").is_file());

        let preview = image::open(dirs.info.join("shot_light.png")).unwrap();
        assert_eq!(preview.width(), 305);

        let sidecar = Sidecar::load(&dirs.sidecar).unwrap();
        assert_eq!(sidecar.name, "chair");
        assert_eq!(sidecar.asset_id, Some(record.id));
        assert_eq!(sidecar.tags, vec!["furniture"]);

        let found = library.find_asset(AssetKey::Name("chair")).unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.path, record.path);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_bad_names() {
        let tmp = TempDir::new().unwrap();
        let (mut library, _events) = open_library(&tmp);

        library.create(plain_input("fox")).unwrap();
        let err = library.create(plain_input("fox")).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));
        assert_eq!(library.asset_count().unwrap(), 1);

        let err = library.create(plain_input("no spaces!")).unwrap_err();
        assert!(matches!(err, Error::InvalidName { .. }));
        assert!(!library.root().join("no spaces!_ast").exists());
    }

    #[tokio::test]
    async fn test_create_scales_the_icon() {
        let tmp = TempDir::new().unwrap();
        let (mut library, _events) = open_library(&tmp);

        let source = tmp.path().join("portrait.png");
        write_png(&source, 300, 300);

        let record = library
            .create(AssetInput {
                name: "fox".to_string(),
                icon: Some(source),
                ..AssetInput::default()
            })
            .unwrap();

        let icon = record.icon.unwrap();
        assert_eq!(icon, AssetDirs::new(&record.path).icon);
        assert_eq!(image::open(&icon).unwrap().width(), 150);
    }

    #[tokio::test]
    async fn test_rename_updates_folder_index_and_sidecar() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let sources = tmp.path().join("sources");
        fs::create_dir_all(&sources).unwrap();
        let scene = sources.join("body.blend");
        fs::write(&scene, b"x").unwrap();

        let record = library
            .create(AssetInput {
                name: "fox".to_string(),
                tags: vec!["animal".to_string()],
                scenes: vec![scene],
                ..AssetInput::default()
            })
            .unwrap();
        wait_settled(&mut events, 3).await;

        let old_path = record.path.clone();
        let updated = library
            .edit(AssetInput {
                name: "wolf".to_string(),
                asset_id: Some(record.id),
                tags: vec!["animal".to_string()],
                scenes: vec![old_path.join("content/body.blend")],
                ..AssetInput::default()
            })
            .unwrap();
        wait_settled(&mut events, 3).await;

        assert_eq!(updated.name, "wolf");
        assert!(updated.path.ends_with("wolf_ast"));
        assert!(updated.path.is_dir());
        assert!(!old_path.exists());
        assert!(updated.path.join("content/body.blend").is_file());

        let view = library.recognize(&updated.path).unwrap();
        assert_eq!(view.name, "wolf");
        assert_eq!(view.tags, vec!["animal"]);
        assert_eq!(
            Sidecar::load(&AssetDirs::new(&updated.path).sidecar).unwrap().name,
            "wolf"
        );
        assert!(library
            .find_asset(AssetKey::Path(&old_path))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_rename_before_the_queue_drains_leaves_no_ghost_folder() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let sources = tmp.path().join("sources");
        fs::create_dir_all(&sources).unwrap();
        let scene = sources.join("body.blend");
        fs::write(&scene, b"x").unwrap();

        let record = library
            .create(AssetInput {
                name: "fox".to_string(),
                scenes: vec![scene.clone()],
                ..AssetInput::default()
            })
            .unwrap();
        // rename right away, while the create jobs may still be queued
        let updated = library
            .edit(AssetInput {
                name: "wolf".to_string(),
                asset_id: Some(record.id),
                scenes: vec![scene],
                ..AssetInput::default()
            })
            .unwrap();
        wait_settled(&mut events, 6).await;

        assert!(!record.path.exists());
        assert!(updated.path.join("content/body.blend").is_file());
    }

    #[tokio::test]
    async fn test_edit_rejects_taking_another_assets_name() {
        let tmp = TempDir::new().unwrap();
        let (mut library, _events) = open_library(&tmp);

        library.create(plain_input("fox")).unwrap();
        let second = library.create(plain_input("wolf")).unwrap();

        let err = library
            .edit(AssetInput {
                name: "fox".to_string(),
                asset_id: Some(second.id),
                ..AssetInput::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName { .. }));

        // Keeping your own name is not a collision
        let kept = library
            .edit(AssetInput {
                name: "wolf".to_string(),
                asset_id: Some(second.id),
                ..AssetInput::default()
            })
            .unwrap();
        assert_eq!(kept.name, "wolf");
    }

    #[tokio::test]
    async fn test_move_asset_updates_index_and_disk() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let record = library.create(plain_input("fox")).unwrap();
        wait_settled(&mut events, 3).await;
        let props = library.root().join("props");

        let new_path = library.move_asset(record.id, &props).unwrap();
        assert_eq!(new_path, props.join("fox_ast"));
        assert!(new_path.is_dir());
        assert!(!record.path.exists());

        let found = library.find_asset(AssetKey::Id(record.id)).unwrap().unwrap();
        assert_eq!(found.path, new_path);
    }

    #[tokio::test]
    async fn test_delete_quarantines_folder_and_clears_index() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let record = library.create(plain_input("fox")).unwrap();
        wait_settled(&mut events, 3).await;
        library.delete(record.id).unwrap();

        assert!(!record.path.exists());
        assert!(library.find_asset(AssetKey::Name("fox")).unwrap().is_none());
        assert_eq!(library.asset_count().unwrap(), 0);

        let quarantine = library.root().join(QUARANTINE_DIR);
        let moved: Vec<_> = fs::read_dir(&quarantine)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(moved.len(), 1);
        assert!(moved[0].starts_with("fox_ast_"));

        let err = library.delete(record.id).unwrap_err();
        assert!(matches!(err, Error::MissingAsset { .. }));
    }

    #[tokio::test]
    async fn test_delete_recreate_delete_lands_in_separate_quarantine_slots() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let first = library.create(plain_input("fox")).unwrap();
        wait_settled(&mut events, 3).await;
        library.delete(first.id).unwrap();

        let second = library.create(plain_input("fox")).unwrap();
        wait_settled(&mut events, 3).await;
        library.delete(second.id).unwrap();

        let quarantine = library.root().join(QUARANTINE_DIR);
        let slots: Vec<String> = fs::read_dir(&quarantine)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.starts_with("fox_ast_")));
        assert_eq!(library.asset_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_delete_leaves_the_asset_functional() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let sources = tmp.path().join("sources");
        fs::create_dir_all(&sources).unwrap();
        let scene = sources.join("burrow.blend");
        fs::write(&scene, b"x").unwrap();

        let record = library.create(plain_input("fox")).unwrap();
        wait_settled(&mut events, 3).await;

        // a file squatting on the quarantine path makes the move fail
        fs::write(library.root().join(QUARANTINE_DIR), b"").unwrap();
        let err = library.delete(record.id).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(record.path.is_dir());
        assert!(library.find_asset(AssetKey::Id(record.id)).unwrap().is_some());

        // the asset is still live, so a later edit must sync its files
        library
            .edit(AssetInput {
                name: "fox".to_string(),
                asset_id: Some(record.id),
                scenes: vec![scene],
                ..AssetInput::default()
            })
            .unwrap();
        wait_settled(&mut events, 3).await;
        assert!(record.path.join("content/burrow.blend").is_file());

        fs::remove_file(library.root().join(QUARANTINE_DIR)).unwrap();
        library.delete(record.id).unwrap();
        assert!(!record.path.exists());
    }

    #[tokio::test]
    async fn test_recognize_prefers_index_over_sidecar() {
        let tmp = TempDir::new().unwrap();
        let (mut library, _events) = open_library(&tmp);

        let record = library
            .create(AssetInput {
                name: "fox".to_string(),
                description: "red one".to_string(),
                ..AssetInput::default()
            })
            .unwrap();

        let dirs = AssetDirs::new(&record.path);
        let mut sidecar = Sidecar::load(&dirs.sidecar).unwrap();
        sidecar.name = "impostor".to_string();
        sidecar.save(&dirs.sidecar).unwrap();

        let view = library.recognize(&record.path).unwrap();
        assert_eq!(view.name, "fox");
        assert_eq!(view.description, "red one");
        assert_eq!(view.id, Some(record.id));

        let err = library
            .recognize(&tmp.path().join("nowhere_ast"))
            .unwrap_err();
        assert!(matches!(err, Error::MissingAsset { .. }));
    }

    #[tokio::test]
    async fn test_recognize_accepts_a_trailing_slash() {
        let tmp = TempDir::new().unwrap();
        let (mut library, _events) = open_library(&tmp);

        let record = library.create(plain_input("fox")).unwrap();
        let dirs = AssetDirs::new(&record.path);
        let mut sidecar = Sidecar::load(&dirs.sidecar).unwrap();
        sidecar.name = "impostor".to_string();
        sidecar.save(&dirs.sidecar).unwrap();

        let slashed = PathBuf::from(format!("{}/", record.path.display()));
        let view = library.recognize(&slashed).unwrap();
        assert_eq!(view.name, "fox");
        assert_eq!(view.id, Some(record.id));
        assert_eq!(view.path, record.path);
    }

    #[tokio::test]
    async fn test_recognize_falls_back_to_sidecar_only() {
        let tmp = TempDir::new().unwrap();
        let (library, _events) = open_library(&tmp);

        // a folder copied in from another machine: sidecar but no row
        let foreign = library.root().join("import_ast");
        let dirs = AssetDirs::new(&foreign);
        dirs.ensure().unwrap();
        Sidecar {
            name: "import".to_string(),
            asset_id: None,
            tags: vec!["loose".to_string()],
            description: String::new(),
        }
        .save(&dirs.sidecar)
        .unwrap();

        let view = library.recognize(&foreign).unwrap();
        assert_eq!(view.name, "import");
        assert_eq!(view.id, None);
        assert_eq!(view.tags, vec!["loose"]);
    }

    #[tokio::test]
    async fn test_search_union_and_require_all() {
        let tmp = TempDir::new().unwrap();
        let (mut library, _events) = open_library(&tmp);

        library
            .create(AssetInput {
                name: "knight".to_string(),
                tags: vec!["sword".to_string(), "shield".to_string()],
                ..AssetInput::default()
            })
            .unwrap();
        library
            .create(AssetInput {
                name: "squire".to_string(),
                tags: vec!["sword".to_string()],
                ..AssetInput::default()
            })
            .unwrap();

        assert_eq!(library.search("sword, shield").unwrap().len(), 2);

        let both = library.search("sword and shield").unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].name, "knight");

        let by_name = library.search("Squire").unwrap();
        assert_eq!(by_name.len(), 1);

        let cloud = library.related_tags(&library.search("sword").unwrap()).unwrap();
        assert_eq!(cloud, vec!["shield", "sword"]);

        assert!(library.search("   ").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_folder_carries_assets_along() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let animals = library.root().join("animals");
        fs::create_dir_all(&animals).unwrap();
        let record = library
            .create(AssetInput {
                name: "fox".to_string(),
                parent: animals.clone(),
                ..AssetInput::default()
            })
            .unwrap();
        wait_settled(&mut events, 3).await;

        let beasts = library.rename_folder(&animals, "beasts").unwrap();
        assert!(beasts.join("fox_ast").is_dir());
        assert!(!animals.exists());

        let found = library.find_asset(AssetKey::Id(record.id)).unwrap().unwrap();
        assert_eq!(found.path, beasts.join("fox_ast"));
    }

    #[tokio::test]
    async fn test_delete_folder_quarantines_everything_inside() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        let props = library.root().join("props");
        fs::create_dir_all(&props).unwrap();
        library
            .create(AssetInput {
                name: "chair".to_string(),
                parent: props.clone(),
                ..AssetInput::default()
            })
            .unwrap();
        library
            .create(AssetInput {
                name: "table".to_string(),
                parent: props.clone(),
                ..AssetInput::default()
            })
            .unwrap();
        library.create(plain_input("fox")).unwrap();
        wait_settled(&mut events, 9).await;

        let removed = library.delete_folder(&props).unwrap();
        assert_eq!(removed, 2);
        assert!(!props.exists());
        assert_eq!(library.asset_count().unwrap(), 1);
        assert!(library.find_asset(AssetKey::Name("fox")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_folder_tree_skips_asset_folders_and_quarantine() {
        let tmp = TempDir::new().unwrap();
        let (mut library, mut events) = open_library(&tmp);

        fs::create_dir_all(library.root().join("animals/small")).unwrap();
        fs::create_dir_all(library.root().join("props")).unwrap();
        let record = library.create(plain_input("fox")).unwrap();
        wait_settled(&mut events, 3).await;
        library.delete(record.id).unwrap();

        let tree = library.folder_tree();
        assert_eq!(
            tree,
            vec![
                library.root().join("animals"),
                library.root().join("animals/small"),
                library.root().join("props"),
            ]
        );
    }

    #[tokio::test]
    async fn test_edit_can_clear_the_icon() {
        let tmp = TempDir::new().unwrap();
        let (mut library, _events) = open_library(&tmp);

        let source = tmp.path().join("portrait.png");
        write_png(&source, 300, 300);
        let record = library
            .create(AssetInput {
                name: "fox".to_string(),
                icon: Some(source),
                ..AssetInput::default()
            })
            .unwrap();
        let icon_path = record.icon.clone().unwrap();
        assert!(icon_path.is_file());

        let updated = library
            .edit(AssetInput {
                name: "fox".to_string(),
                asset_id: Some(record.id),
                icon: None,
                ..AssetInput::default()
            })
            .unwrap();
        assert_eq!(updated.icon, None);
        assert!(!icon_path.exists());
    }
}
