use image::imageops::FilterType;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{ICON_WIDTH, PREVIEW_WIDTH};
use crate::error::Result;
use crate::paths::{is_image_path, preview_file_name};
use crate::sync::reconcile::list_files;

/// Scale to an exact target width, height following the aspect ratio
fn scale_to_width(img: &DynamicImage, width: u32) -> DynamicImage {
    img.resize(width, u32::MAX, FilterType::Lanczos3)
}

/// Generate the missing previews for every gallery image.
///
/// Previews land next to the icon in the info directory, named after the
/// source file with a `_light` suffix. Existing previews are kept as-is,
/// so repeated runs settle into doing nothing. A file that fails to
/// decode is logged and skipped.
pub fn ensure_previews(gallery_dir: &Path, info_dir: &Path) -> Result<usize> {
    if !gallery_dir.is_dir() {
        return Ok(0);
    }

    let mut generated = 0;
    for source in image_files(gallery_dir)? {
        let Some(name) = preview_file_name(&source) else {
            continue;
        };
        let preview = info_dir.join(name);
        if preview.is_file() {
            continue;
        }

        match image::open(&source) {
            Ok(img) => {
                let scaled = scale_to_width(&img, PREVIEW_WIDTH);
                if let Err(e) = scaled.save(&preview) {
                    warn!(path = %preview.display(), error = %e, "could not save preview");
                    continue;
                }
                debug!(path = %preview.display(), "preview generated");
                generated += 1;
            }
            Err(e) => {
                warn!(path = %source.display(), error = %e, "could not decode gallery image");
            }
        }
    }
    Ok(generated)
}

/// Scale a picked image down to the fixed icon size and store it
pub fn save_icon(source: &Path, destination: &Path) -> Result<()> {
    let img = image::open(source)?;
    let scaled = scale_to_width(&img, ICON_WIDTH);
    scaled.save(destination)?;
    debug!(path = %destination.display(), "icon stored");
    Ok(())
}

/// Each gallery image paired with its preview, if one exists on disk
pub fn preview_pairs(
    gallery_dir: &Path,
    info_dir: &Path,
) -> Result<Vec<(PathBuf, Option<PathBuf>)>> {
    if !gallery_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut pairs = Vec::new();
    for source in image_files(gallery_dir)? {
        let preview = preview_file_name(&source)
            .map(|name| info_dir.join(name))
            .filter(|p| p.is_file());
        pairs.push((source, preview));
    }
    Ok(pairs)
}

/// Image files directly inside a directory, sorted by name
pub fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = list_files(dir)?;
    files.retain(|f| is_image_path(f));
    files.sort();
    Ok(files)
}
