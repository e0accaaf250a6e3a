use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// All the ways a library operation can fail.
///
/// `DuplicateName` and `InvalidName` are raised during validation, before
/// anything was touched. `Inconsistent` means the index and the filesystem
/// no longer agree and the user has to be told so.
#[derive(Debug, Error)]
pub enum Error {
    #[error("an asset named '{name}' already exists")]
    DuplicateName { name: String },

    #[error("'{name}' is not a valid name (letters, digits, '_' and '-' only)")]
    InvalidName { name: String },

    #[error("no asset matches {key}")]
    MissingAsset { key: String },

    #[error("index storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("sidecar error: {0}")]
    Sidecar(#[from] serde_json::Error),

    #[error("library state is inconsistent: {detail}")]
    Inconsistent { detail: String },
}
