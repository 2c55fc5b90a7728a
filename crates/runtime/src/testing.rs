//! Instrumented fake engine shared by the dispatcher and pipeline tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use foundation::{Extent, HALF_EXTENT, TileAddress};

use crate::source::{BoxFuture, SourceError, TileRequest, TileSource};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Behavior {
    Encode,
    Empty,
    Fail,
}

pub(crate) struct FakeSource {
    behavior: Behavior,
    delay: Duration,
    extent: Result<Option<String>, String>,
    provisioned_root: Option<PathBuf>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    missing_dirs: AtomicUsize,
}

impl FakeSource {
    pub(crate) fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: Duration::ZERO,
            extent: Ok(Some(format!(
                "BOX({} {},{} {})",
                -HALF_EXTENT, -HALF_EXTENT, HALF_EXTENT, HALF_EXTENT
            ))),
            provisioned_root: None,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            missing_dirs: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_extent(mut self, extent: Result<Option<String>, String>) -> Self {
        self.extent = extent;
        self
    }

    /// Counts requests whose `{root}/{z}/{x}` directory did not exist yet.
    pub(crate) fn checking_dirs_under(mut self, root: &Path) -> Self {
        self.provisioned_root = Some(root.to_path_buf());
        self
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn missing_dirs(&self) -> usize {
        self.missing_dirs.load(Ordering::SeqCst)
    }
}

pub(crate) fn tile_bytes(address: TileAddress) -> Vec<u8> {
    format!("tile {address}").into_bytes()
}

pub(crate) fn world() -> Extent {
    Extent::new(-HALF_EXTENT, -HALF_EXTENT, HALF_EXTENT, HALF_EXTENT)
}

/// Counts one request as in flight until dropped, including when the
/// request future is abandoned by a timeout or cancellation.
struct InFlight<'a> {
    count: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TileSource for FakeSource {
    fn extent_text<'a>(
        &'a self,
        _table_name: &'a str,
        _geometry_column: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, SourceError>> {
        Box::pin(async move { self.extent.clone().map_err(SourceError::new) })
    }

    fn render_tile(
        &self,
        request: TileRequest,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, SourceError>> {
        Box::pin(async move {
            let _in_flight = InFlight::enter(&self.in_flight, &self.peak);
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(root) = &self.provisioned_root {
                let address = request.address;
                let dir = root.join(address.zoom.to_string()).join(address.x.to_string());
                if !dir.is_dir() {
                    self.missing_dirs.fetch_add(1, Ordering::SeqCst);
                }
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.behavior {
                Behavior::Encode => Ok(Some(tile_bytes(request.address))),
                Behavior::Empty => Ok(None),
                Behavior::Fail => Err(SourceError::new("relation \"water\" does not exist")),
            }
        })
    }
}

/// Every regular file under `dir`, keyed by relative path.
pub(crate) fn read_tree(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).expect("read_dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).expect("prefix").to_path_buf();
                out.insert(rel, std::fs::read(&path).expect("read"));
            }
        }
    }

    let mut out = BTreeMap::new();
    walk(dir, dir, &mut out);
    out
}
