//! A local digital-asset library: named asset folders on disk, a SQLite
//! tag index for search, and a background worker that keeps folder
//! contents, previews and icons in sync with what the index says.
//!
//! [`AssetLibrary`] is the entry point; frontends implement
//! [`interface::FrontEnd`] and drive create / edit / delete / search
//! through it while following [`sync::worker::SyncEvent`]s for
//! background progress.

pub mod config;
pub mod error;
pub mod interface;
pub mod lifecycle;
pub mod paths;
pub mod state;
pub mod sync;

pub use config::LibrarySettings;
pub use error::{Error, Result};
pub use lifecycle::AssetLibrary;
pub use state::data::{Asset, AssetInput, AssetRecord};
pub use state::index::{AssetKey, TagIndex};
pub use sync::worker::SyncEvent;
