//! Path conventions for asset folders
//!
//! Every subpath of an asset is derived from its root folder here, so the
//! rest of the crate never builds these paths by hand.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::config::{
    ASSET_SUFFIX, CONTENT_DIR, GALLERY_DIR, ICON_FILE, IMAGE_EXTENSIONS, INFO_DIR, PREVIEW_SUFFIX,
    SIDECAR_FILE,
};

/// The fixed subpaths of one asset folder.
///
/// Pure derivation from the root path; nothing here touches the disk
/// except [`AssetDirs::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDirs {
    pub root: PathBuf,
    pub info: PathBuf,
    pub content: PathBuf,
    pub gallery: PathBuf,
    /// JSON metadata file inside the info folder
    pub sidecar: PathBuf,
    /// Icon file inside the info folder (may not exist)
    pub icon: PathBuf,
}

impl AssetDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let info = root.join(INFO_DIR);
        AssetDirs {
            sidecar: info.join(SIDECAR_FILE),
            icon: info.join(ICON_FILE),
            content: root.join(CONTENT_DIR),
            gallery: root.join(GALLERY_DIR),
            info,
            root,
        }
    }

    /// Create the root and its three subfolders if absent
    pub fn ensure(&self) -> io::Result<()> {
        for dir in [&self.root, &self.info, &self.content, &self.gallery] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Asset names are plain identifiers: letters, digits, '_' and '-'
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Folder name of an asset: `<name>_ast`
pub fn asset_dir_name(name: &str) -> String {
    format!("{}{}", name, ASSET_SUFFIX)
}

/// Recover the display name from an asset folder path, stripping the suffix
pub fn display_name(folder: &Path) -> Option<&str> {
    folder.file_name()?.to_str()?.strip_suffix(ASSET_SUFFIX)
}

/// Whether the file has one of the accepted image extensions
pub fn is_image_path(path: &Path) -> bool {
    match path.extension() {
        Some(ext) => {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

/// Name of the derived preview for a gallery file: `<stem>_light.<ext>`.
/// Returns None for files without a stem or extension.
pub fn preview_file_name(gallery_file: &Path) -> Option<String> {
    let stem = gallery_file.file_stem()?.to_str()?;
    let ext = gallery_file.extension()?.to_str()?;
    Some(format!("{}{}.{}", stem, PREVIEW_SUFFIX, ext))
}

/// Replace the `<old>_ast` component with `<new>_ast` in every path that
/// contains it. Used when an asset is renamed so that file lists collected
/// before the rename keep pointing at real files.
pub fn rewrite_asset_segment(paths: &mut [PathBuf], old_name: &str, new_name: &str) {
    let old_dir = asset_dir_name(old_name);
    let new_dir = asset_dir_name(new_name);
    for path in paths.iter_mut() {
        let rebuilt: PathBuf = path
            .components()
            .map(|component| match component {
                Component::Normal(part) if part == OsStr::new(&old_dir) => {
                    OsString::from(&new_dir)
                }
                other => other.as_os_str().to_os_string(),
            })
            .collect();
        *path = rebuilt;
    }
}

/// Re-parent every path under `old_root` to live under `new_root` instead.
/// Paths outside `old_root` are left alone.
pub fn rebase(paths: &mut [PathBuf], old_root: &Path, new_root: &Path) {
    for path in paths.iter_mut() {
        let rebased = match path.strip_prefix(old_root) {
            Ok(rest) => new_root.join(rest),
            Err(_) => continue,
        };
        *path = rebased;
    }
}
