use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

use crate::naming::authority;

/// Subdirectory of the output directory holding every downloaded asset.
pub const ASSETS_DIR: &str = "assets";

/// Directory name used when the seed URL has no host (e.g. `file://`).
pub const FALLBACK_DIR: &str = "output";

/// Name of the directory a clone of `seed` is written to: the seed's
/// authority, or [`FALLBACK_DIR`].
pub fn output_dir_name(seed: &Url) -> String {
    authority(seed).unwrap_or_else(|| FALLBACK_DIR.to_string())
}

/// Owns the on-disk layout of one clone:
///
/// ```text
/// <base_dir>/
///   index.html
///   <page>.html
///   assets/<file>
/// ```
#[derive(Clone, Debug)]
pub struct FileManager {
    base_dir: PathBuf,
    assets_dir: PathBuf,
}

impl FileManager {
    pub fn new(base_dir: &Path) -> Result<Self> {
        let base_dir = base_dir.to_path_buf();
        let assets_dir = base_dir.join(ASSETS_DIR);
        fs::create_dir_all(&assets_dir)
            .with_context(|| format!("Failed to create directory: {:?}", assets_dir))?;

        Ok(Self {
            base_dir,
            assets_dir,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn assets_dir(&self) -> &Path {
        &self.assets_dir
    }

    pub fn asset_path(&self, filename: &str) -> PathBuf {
        self.assets_dir.join(filename)
    }

    /// How a saved page refers to an asset: relative to the output directory
    /// and always with `/` separators, whatever the host platform uses.
    pub fn asset_href(&self, filename: &str) -> String {
        pathdiff::diff_paths(self.asset_path(filename), &self.base_dir)
            .map(|relative| relative.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|| format!("{}/{}", ASSETS_DIR, filename))
    }

    /// Writes a page as UTF-8 to `<base_dir>/<filename>`.
    pub fn save_page(&self, filename: &str, html: &str) -> Result<PathBuf> {
        let file_path = self.base_dir.join(filename);

        let mut file = fs::File::create(&file_path)
            .with_context(|| format!("Failed to create file: {:?}", file_path))?;

        file.write_all(html.as_bytes())
            .with_context(|| format!("Failed to write to file: {:?}", file_path))?;

        Ok(file_path)
    }

    /// Deletes the whole output tree.
    pub fn remove_all(&self) -> Result<()> {
        if !self.base_dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to remove directory: {:?}", self.base_dir))
    }

    pub fn get_relative_path(&self, file_path: &Path) -> Result<PathBuf> {
        file_path
            .strip_prefix(&self.base_dir)
            .map(|p| p.to_path_buf())
            .with_context(|| format!("Failed to get relative path from {:?}", file_path))
    }
}
