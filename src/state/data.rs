//! Shared data structures for the library state
//!
//! These structs represent the data model that flows between the index,
//! the filesystem and the interface layer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One asset row as stored in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRecord {
    /// Unique database ID
    pub id: i64,
    /// Display name, unique within the library
    pub name: String,
    /// Absolute path of the asset folder (`<parent>/<name>_ast`)
    pub path: PathBuf,
    /// Stored icon path, if one was generated
    pub icon: Option<PathBuf>,
}

/// Full view of one asset, rebuilt from disk and index by `recognize`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// None for folders that were never indexed
    pub id: Option<i64>,
    pub name: String,
    pub path: PathBuf,
    pub icon: Option<PathBuf>,
    pub description: String,
    pub tags: Vec<String>,
    /// Content files currently inside `content/`
    pub scenes: Vec<PathBuf>,
    /// Reference images currently inside `gallery/`
    pub gallery: Vec<PathBuf>,
}

/// Form payload collected by the interface for create and edit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetInput {
    pub name: String,
    /// Folder the asset lives under; the asset root is derived from it
    pub parent: PathBuf,
    /// Set in edit mode, None when creating
    pub asset_id: Option<i64>,
    /// Source image for the icon; None clears any existing icon
    pub icon: Option<PathBuf>,
    pub description: String,
    pub tags: Vec<String>,
    /// Source files that should end up in `content/`
    pub scenes: Vec<PathBuf>,
    /// Source images that should end up in `gallery/`
    pub gallery: Vec<PathBuf>,
    /// Apply the content naming convention after syncing files
    pub rename_content: bool,
}

/// Per-asset metadata stored as JSON at `info/data.txt`.
///
/// Redundant with the index on purpose; the index wins when they disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    pub name: String,
    pub asset_id: Option<i64>,
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Sidecar {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

/// Case-fold tags and drop duplicates, keeping first-occurrence order
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let folded = tag.to_lowercase();
        if !folded.is_empty() && !out.contains(&folded) {
            out.push(folded);
        }
    }
    out
}

/// Split a raw search string into lowercased terms.
///
/// A term is a run of letters, digits, '_' or '-'; a standalone `&` is kept
/// as its own term because the index treats it as a require-all marker.
pub fn parse_terms(query: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    for ch in query.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            current.push(ch.to_ascii_lowercase());
        } else {
            if !current.is_empty() {
                terms.push(std::mem::take(&mut current));
            }
            if ch == '&' {
                terms.push("&".to_string());
            }
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}
