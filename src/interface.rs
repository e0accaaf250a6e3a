use std::path::Path;
use tracing::info;

use crate::state::data::{AssetInput, AssetRecord};

/// Styling hint for user-facing status messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// What the library expects from a user interface.
///
/// The library never draws anything itself; a frontend collects form
/// input, shows results and relays status lines. Anything implementing
/// this can drive the full asset lifecycle.
pub trait FrontEnd {
    fn display_assets(&mut self, assets: &[AssetRecord]);
    /// Collect a complete asset form; `None` means the user backed out
    fn form_input(&mut self) -> Option<AssetInput>;
    fn show_status(&mut self, message: &str, level: StatusLevel);
}

/// One-way, best-effort announcement channel for new assets.
/// Implementations must swallow their own failures.
pub trait Notifier {
    fn asset_created(&self, name: &str, icon: Option<&Path>, folder: &Path);
}

/// Default notifier that just writes to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn asset_created(&self, name: &str, _icon: Option<&Path>, folder: &Path) {
        info!(name, folder = %folder.display(), "new asset available");
    }
}
