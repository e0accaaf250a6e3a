use std::io;
use std::path::{Path, PathBuf};

/// Subfolder of an asset holding the sidecar, icon and derived previews
pub const INFO_DIR: &str = "info";
/// Subfolder of an asset holding the primary content files
pub const CONTENT_DIR: &str = "content";
/// Subfolder of an asset holding reference images
pub const GALLERY_DIR: &str = "gallery";
/// Suffix marking a folder as an asset root
pub const ASSET_SUFFIX: &str = "_ast";
/// Name of the per-asset JSON metadata file inside the info folder
pub const SIDECAR_FILE: &str = "data.txt";
/// Name of the per-asset icon file inside the info folder
pub const ICON_FILE: &str = "icon.png";
/// Name of the index database file under the library root
pub const DATABASE_FILE: &str = "database.db";
/// Folder under the library root holding soft-deleted assets
pub const QUARANTINE_DIR: &str = "deleted_assets";
/// Filename suffix of derived gallery previews
pub const PREVIEW_SUFFIX: &str = "_light";

/// Width of generated asset icons, in pixels
pub const ICON_WIDTH: u32 = 150;
/// Width of generated gallery previews, in pixels
pub const PREVIEW_WIDTH: u32 = 305;

/// Image file extensions accepted for icons, gallery entries and previews
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg"];

/// Where the library lives.
///
/// Passed explicitly to everything that needs it; there is no process-wide
/// settings object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySettings {
    root: PathBuf,
}

impl LibrarySettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LibrarySettings { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the index database file
    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    /// Path of the quarantine folder for deleted assets
    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE_DIR)
    }

    /// Create the library root if it does not exist yet
    pub fn ensure_root(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let settings = LibrarySettings::new("/srv/assets");
        assert_eq!(settings.root(), Path::new("/srv/assets"));
        assert_eq!(settings.database_path(), PathBuf::from("/srv/assets/database.db"));
        assert_eq!(settings.quarantine_dir(), PathBuf::from("/srv/assets/deleted_assets"));
    }
}
