//! Overlay persistence.

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::{InferError, Result};

/// Prefix of every overlay file name.
pub const OVERLAY_PREFIX: &str = "gradcam_";

/// Extensions kept as-is when naming an overlay.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Where rendered overlays go.
pub trait ArtifactStore: Send + Sync {
    /// Persist `overlay` under `file_name` and return the URL it is served at.
    fn save_overlay(&self, file_name: &str, overlay: &RgbImage) -> Result<String>;
}

/// Overlay file name for the input at `path`, `index` in its batch.
///
/// The name is `gradcam_<basename>`. Inputs without a usable basename fall
/// back to `gradcam_<index>.jpg`; basenames without an image extension get
/// `.jpg` appended so the encoder is always known.
pub fn overlay_file_name(path: &Path, index: usize) -> String {
    let Some(base) = path.file_name().and_then(|n| n.to_str()) else {
        return format!("{OVERLAY_PREFIX}{index}.jpg");
    };
    let has_image_extension = Path::new(base)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(e))
        });
    if has_image_extension {
        format!("{OVERLAY_PREFIX}{base}")
    } else {
        format!("{OVERLAY_PREFIX}{base}.jpg")
    }
}

/// Writes overlays into a local directory.
///
/// A later overlay with the same file name replaces the earlier one.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
    url_prefix: String,
}

impl DirectoryStore {
    /// Store writing to `dir`, served under `url_prefix`.
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into(),
        }
    }

    /// Like [`DirectoryStore::new`], creating `dir` if needed.
    pub fn create(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Result<Self> {
        let store = Self::new(dir, url_prefix);
        std::fs::create_dir_all(&store.dir)?;
        Ok(store)
    }

    /// Target directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// URL of `file_name`, percent-encoded as one path segment.
    pub fn url_for(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.url_prefix.trim_end_matches('/'),
            urlencoding::encode(file_name)
        )
    }
}

impl ArtifactStore for DirectoryStore {
    fn save_overlay(&self, file_name: &str, overlay: &RgbImage) -> Result<String> {
        let path = self.dir.join(file_name);
        overlay
            .save(&path)
            .map_err(|e| InferError::Artifact(format!("cannot write {}: {e}", path.display())))?;
        tracing::debug!(path = %path.display(), "Wrote overlay");
        Ok(self.url_for(file_name))
    }
}
