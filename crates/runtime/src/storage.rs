//! On-disk tile layout: `{root}/{z}/{x}/{y}.{ext}`.

use std::io;
use std::path::{Path, PathBuf};

use foundation::{TileAddress, TileRange};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    root: PathBuf,
    extension: String,
}

impl TileLayout {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn column_dir(&self, zoom: u8, x: u32) -> PathBuf {
        self.root.join(zoom.to_string()).join(x.to_string())
    }

    pub fn tile_path(&self, address: TileAddress) -> PathBuf {
        self.column_dir(address.zoom, address.x)
            .join(format!("{}.{}", address.y, self.extension))
    }

    /// Relative path template recorded in tileset metadata.
    pub fn path_template(&self) -> String {
        format!("{{z}}/{{x}}/{{y}}.{}", self.extension)
    }
}

/// Creates the `{z}/{x}` directories a zoom level writes into.
#[derive(Debug, Clone)]
pub struct DirectoryProvisioner {
    layout: TileLayout,
}

impl DirectoryProvisioner {
    pub fn new(layout: TileLayout) -> Self {
        Self { layout }
    }

    /// Ensures one directory per `x` in the range exists. Existing
    /// directories are left alone; returns how many columns were checked.
    pub async fn provision(&self, range: &TileRange) -> io::Result<u64> {
        let mut columns = 0u64;
        for x in range.xs() {
            tokio::fs::create_dir_all(self.layout.column_dir(range.zoom, x)).await?;
            columns += 1;
        }
        debug!(zoom = range.zoom, columns, "provisioned tile directories");
        Ok(columns)
    }
}

/// Persists encoded tiles at their address.
///
/// Writes go through a sibling `.tmp` file and a rename, so a reader never
/// sees a partially written tile and an interrupted run leaves only complete
/// files behind.
#[derive(Debug, Clone)]
pub struct TileWriter {
    layout: TileLayout,
}

impl TileWriter {
    pub fn new(layout: TileLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Writes `bytes` for `address`, replacing any earlier tile there.
    pub async fn write(&self, address: TileAddress, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.layout.tile_path(address);
        let tmp = path.with_extension(format!("{}.tmp", self.layout.extension));

        tokio::fs::write(&tmp, bytes).await?;
        if let Err(err) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(err);
        }
        Ok(path)
    }

    /// Removes a tile left at `address` by an earlier run.
    ///
    /// Used for "no data" results, which are never written. Returns `true`
    /// when a stale file was removed.
    pub async fn clear(&self, address: TileAddress) -> io::Result<bool> {
        match tokio::fs::remove_file(self.layout.tile_path(address)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}
