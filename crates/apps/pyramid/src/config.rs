use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use foundation::{MAX_ZOOM, WEB_MERCATOR_SRID};
use runtime::{DEFAULT_CONCURRENCY, DispatchConfig, LayerSource, PyramidRequest};

use crate::error::CliError;
use crate::postgis::PoolConfig;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Generate a vector tile pyramid from a PostGIS table"
)]
pub struct Args {
    /// PostgreSQL connection string, e.g. "host=localhost user=postgres dbname=osm"
    #[arg(short = 'd', long, env = "PYRAMID_DSN", hide_env_values = true)]
    pub dsn: String,

    /// Source table, optionally schema-qualified (geometry must be EPSG:3857)
    #[arg(short = 't', long, env = "PYRAMID_TABLE")]
    pub table: String,

    /// Geometry column of the source table
    #[arg(short = 'g', long, env = "PYRAMID_GEOM")]
    pub geom: String,

    /// First zoom level to generate
    #[arg(short = 's', long = "start", env = "PYRAMID_ZOOM_START")]
    pub zoom_start: u8,

    /// Last zoom level to generate (inclusive)
    #[arg(short = 'e', long = "end", env = "PYRAMID_ZOOM_END")]
    pub zoom_end: u8,

    /// Output root; tiles land in {out}/{z}/{x}/{y}.{ext}
    #[arg(short = 'o', long, env = "PYRAMID_OUT", default_value = ".")]
    pub out: PathBuf,

    /// Tile file extension
    #[arg(long, env = "PYRAMID_EXT", default_value = "pbf")]
    pub ext: String,

    /// Layer name encoded into tiles (default: table name)
    #[arg(long, env = "PYRAMID_LAYER")]
    pub layer: Option<String>,

    /// Maximum tiles generated concurrently
    #[arg(short = 'c', long, env = "PYRAMID_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Maximum open database connections
    #[arg(long, env = "PYRAMID_MAX_OPEN", default_value_t = 50)]
    pub max_open: usize,

    /// Maximum idle database connections kept in the pool
    #[arg(long, env = "PYRAMID_MAX_IDLE", default_value_t = 5)]
    pub max_idle: usize,

    /// Per-tile query timeout in seconds
    #[arg(long, env = "PYRAMID_QUERY_TIMEOUT_SECS", default_value_t = 60)]
    pub query_timeout_secs: u64,

    /// Connection attempts after the first before giving up
    #[arg(long, env = "PYRAMID_CONNECT_RETRIES", default_value_t = 3)]
    pub connect_retries: u32,

    /// Write a JSON run report (counts and failed tiles) to this path
    #[arg(long, env = "PYRAMID_REPORT")]
    pub report: Option<PathBuf>,
}

/// Validated run configuration, built once and passed by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub dsn: String,
    pub layer: LayerSource,
    pub layer_name: String,
    pub zoom_start: u8,
    pub zoom_end: u8,
    pub out: PathBuf,
    pub extension: String,
    pub dispatch: DispatchConfig,
    pub pool: PoolConfig,
    pub report: Option<PathBuf>,
}

impl Config {
    pub fn request(&self) -> PyramidRequest {
        PyramidRequest {
            layer: self.layer.clone(),
            zoom_start: self.zoom_start,
            zoom_end: self.zoom_end,
        }
    }
}

impl Args {
    pub fn into_config(self) -> Result<Config, CliError> {
        let required = [
            ("dsn", &self.dsn),
            ("table", &self.table),
            ("geom", &self.geom),
            ("ext", &self.ext),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(CliError::Config(format!("--{name} must not be empty")));
            }
        }
        let extension = self.ext.trim().trim_start_matches('.');
        if extension.is_empty() || extension.contains(['/', '\\']) {
            return Err(CliError::Config(format!(
                "--ext must be a bare extension, got {:?}",
                self.ext
            )));
        }
        if self.zoom_start > self.zoom_end {
            return Err(CliError::Config(format!(
                "--start ({}) must be <= --end ({})",
                self.zoom_start, self.zoom_end
            )));
        }
        if self.zoom_end > MAX_ZOOM {
            return Err(CliError::Config(format!(
                "--end must be <= {MAX_ZOOM}, got {}",
                self.zoom_end
            )));
        }
        if self.concurrency == 0 {
            return Err(CliError::Config("--concurrency must be > 0".to_string()));
        }
        if self.max_open == 0 {
            return Err(CliError::Config("--max-open must be > 0".to_string()));
        }
        if self.max_idle > self.max_open {
            return Err(CliError::Config(format!(
                "--max-idle ({}) must be <= --max-open ({})",
                self.max_idle, self.max_open
            )));
        }
        if self.query_timeout_secs == 0 {
            return Err(CliError::Config(
                "--query-timeout-secs must be > 0".to_string(),
            ));
        }

        let query_timeout = Duration::from_secs(self.query_timeout_secs);
        let layer_name = self.layer.unwrap_or_else(|| {
            self.table
                .rsplit('.')
                .next()
                .unwrap_or(&self.table)
                .to_string()
        });
        let extension = extension.to_string();

        Ok(Config {
            dsn: self.dsn,
            layer: LayerSource::new(self.table.as_str(), self.geom.as_str()),
            layer_name,
            zoom_start: self.zoom_start,
            zoom_end: self.zoom_end,
            out: self.out,
            extension,
            dispatch: DispatchConfig {
                concurrency: self.concurrency,
                query_timeout,
                srid: WEB_MERCATOR_SRID,
            },
            pool: PoolConfig {
                max_open: self.max_open,
                max_idle: self.max_idle,
                connect_retries: self.connect_retries,
                statement_timeout: query_timeout,
            },
            report: self.report,
        })
    }
}
