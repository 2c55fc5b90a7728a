use std::path::{Path, PathBuf};
use std::time::Duration;

use foundation::{Extent, TileAddress};
use runtime::{DispatchSummary, PyramidRun};
use serde::Serialize;

use crate::config::Config;
use crate::error::CliError;

pub const TILESET_FILE: &str = "tileset.json";

pub const EXIT_OK: u8 = 0;
pub const EXIT_TILES_FAILED: u8 = 3;
pub const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Serialize)]
pub struct Tileset {
    pub version: u32,
    pub name: String,
    pub zoom_min: u8,
    pub zoom_max: u8,
    pub srid: i32,
    pub bounds: Bounds,
    pub tile_path_template: String,
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl From<Extent> for Bounds {
    fn from(extent: Extent) -> Self {
        Self {
            x_min: extent.x_min,
            y_min: extent.y_min,
            x_max: extent.x_max,
            y_max: extent.y_max,
        }
    }
}

impl Tileset {
    pub fn new(config: &Config, data_extent: Extent) -> Self {
        Self {
            version: 1,
            name: config.layer_name.clone(),
            zoom_min: config.zoom_start,
            zoom_max: config.zoom_end,
            srid: config.dispatch.srid,
            bounds: data_extent.into(),
            tile_path_template: format!("{{z}}/{{x}}/{{y}}.{}", config.extension),
            format: config.extension.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTile {
    pub z: u8,
    pub x: u32,
    pub y: u32,
    pub reason: String,
}

impl FailedTile {
    pub fn address(&self) -> TileAddress {
        TileAddress::new(self.z, self.x, self.y)
    }
}

/// Outcome of one run, as printed and optionally saved with `--report`.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub table: String,
    pub zoom_start: u8,
    pub zoom_end: u8,
    pub total: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub empty: u64,
    pub bytes_written: u64,
    pub cancelled: bool,
    pub elapsed_secs: f64,
    pub failures: Vec<FailedTile>,
}

impl RunReport {
    pub fn new(config: &Config, run: &PyramidRun) -> Self {
        Self::from_summary(config, &run.summary)
    }

    pub fn from_summary(config: &Config, summary: &DispatchSummary) -> Self {
        let counters = summary.counters;
        Self {
            table: config.layer.table_name.to_string(),
            zoom_start: config.zoom_start,
            zoom_end: config.zoom_end,
            total: counters.total,
            completed: counters.completed,
            succeeded: counters.succeeded(),
            failed: counters.failed,
            empty: counters.empty,
            bytes_written: counters.bytes_written,
            cancelled: summary.cancelled,
            elapsed_secs: summary.elapsed.as_secs_f64(),
            failures: summary
                .failures
                .iter()
                .map(|f| FailedTile {
                    z: f.address.zoom,
                    x: f.address.x,
                    y: f.address.y,
                    reason: f.reason.clone(),
                })
                .collect(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            EXIT_CANCELLED
        } else if self.failed > 0 {
            EXIT_TILES_FAILED
        } else {
            EXIT_OK
        }
    }

    /// Human-readable summary for stdout.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{table} z{start}-{end}: {completed}/{total} tiles, {failed} failed, {empty} empty, {bytes} bytes in {elapsed:.1?}",
            table = self.table,
            start = self.zoom_start,
            end = self.zoom_end,
            completed = self.completed,
            total = self.total,
            failed = self.failed,
            empty = self.empty,
            bytes = self.bytes_written,
            elapsed = Duration::from_secs_f64(self.elapsed_secs),
        );
        if self.cancelled {
            out.push_str(" (cancelled)");
        }
        for failure in &self.failures {
            out.push_str(&format!("\n  failed {}: {}", failure.address(), failure.reason));
        }
        out
    }
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    let report_err = |error: String| CliError::Report {
        path: path.to_path_buf(),
        error,
    };
    let body = serde_json::to_vec_pretty(value).map_err(|e| report_err(e.to_string()))?;
    std::fs::write(path, body).map_err(|e| report_err(e.to_string()))
}

pub fn write_tileset(config: &Config, data_extent: Extent) -> Result<PathBuf, CliError> {
    std::fs::create_dir_all(&config.out).map_err(|e| CliError::Report {
        path: config.out.clone(),
        error: e.to_string(),
    })?;
    let path = config.out.join(TILESET_FILE);
    write_json(&path, &Tileset::new(config, data_extent))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use clap::Parser;
    use foundation::TileAddress;
    use pretty_assertions::assert_eq;
    use runtime::{ProgressCounters, TileFailure};

    fn config(out: &Path) -> Config {
        Args::try_parse_from([
            "pyramid", "-d", "host=db", "-t", "water", "-g", "geom", "-s", "0", "-e", "2",
            "--ext", "mvt",
        ])
        .expect("args")
        .into_config()
        .map(|mut c| {
            c.out = out.to_path_buf();
            c
        })
        .expect("config")
    }

    fn summary(failed: u64, cancelled: bool) -> DispatchSummary {
        let failures = (0..failed)
            .map(|x| TileFailure {
                address: TileAddress::new(2, x as u32, 1),
                reason: "tile query failed".to_string(),
            })
            .collect();
        DispatchSummary {
            counters: ProgressCounters {
                total: 21,
                completed: if cancelled { 5 } else { 21 },
                failed,
                empty: 4,
                bytes_written: 2048,
            },
            failures,
            cancelled,
            elapsed: Duration::from_millis(1500),
            peak_tasks: 3,
        }
    }

    #[test]
    fn exit_codes_follow_outcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        assert_eq!(RunReport::from_summary(&config, &summary(0, false)).exit_code(), 0);
        assert_eq!(RunReport::from_summary(&config, &summary(2, false)).exit_code(), 3);
        assert_eq!(RunReport::from_summary(&config, &summary(2, true)).exit_code(), 130);
    }

    #[test]
    fn render_lists_failed_addresses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = RunReport::from_summary(&config(dir.path()), &summary(2, false));
        let text = report.render();
        assert!(text.starts_with("water z0-2: 21/21 tiles, 2 failed, 4 empty"), "{text}");
        assert!(text.contains("\n  failed 2/0/1: tile query failed"));
        assert!(text.contains("\n  failed 2/1/1: tile query failed"));
        assert_eq!(report.succeeded, 19);
    }

    #[test]
    fn report_is_written_as_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let report = RunReport::from_summary(&config(dir.path()), &summary(1, false));
        let path = dir.path().join("run.json");
        write_json(&path, &report).expect("write");

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
        assert_eq!(value["total"], 21);
        assert_eq!(value["failed"], 1);
        assert_eq!(value["cancelled"], false);
        assert_eq!(
            value["failures"][0],
            serde_json::json!({"z": 2, "x": 0, "y": 1, "reason": "tile query failed"})
        );
    }

    #[test]
    fn tileset_describes_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let extent = Extent::new(-100.0, -50.0, 100.0, 50.0);
        let path = write_tileset(&config, extent).expect("write");
        assert_eq!(path, dir.path().join("tileset.json"));

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).expect("read")).expect("json");
        assert_eq!(value["name"], "water");
        assert_eq!(value["zoom_min"], 0);
        assert_eq!(value["zoom_max"], 2);
        assert_eq!(value["srid"], 3857);
        assert_eq!(value["tile_path_template"], "{z}/{x}/{y}.mvt");
        assert_eq!(value["bounds"]["x_max"], 100.0);
    }

    #[test]
    fn unwritable_report_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing").join("run.json");
        let err = write_json(&path, &serde_json::json!({})).expect_err("missing parent");
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("run.json"));
    }
}
