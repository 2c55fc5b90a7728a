//! PostGIS-backed [`TileSource`].
//!
//! Connections come from a `deadpool-postgres` pool. The database does all
//! geometry work: clipping, union, MVT encoding.

use std::time::Duration;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use runtime::{BoxFuture, SourceError, TileRequest, TileSource};
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const APPLICATION_NAME: &str = "pyramid";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_open: usize,
    pub max_idle: usize,
    /// Attempts after the first before `connect` gives up.
    pub connect_retries: u32,
    /// Server-side bound on every statement.
    pub statement_timeout: Duration,
}

pub struct PostGisSource {
    pool: Pool,
    max_idle: usize,
    layer_name: String,
}

impl PostGisSource {
    /// Build the pool and make sure the server answers.
    pub async fn connect(
        dsn: &str,
        pool_config: &PoolConfig,
        layer_name: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let mut pg_config: tokio_postgres::Config = dsn
            .parse()
            .map_err(|e| SourceError::with_source("invalid connection string", e))?;
        pg_config.application_name(APPLICATION_NAME);
        pg_config.options(&format!(
            "-c statement_timeout={}",
            pool_config.statement_timeout.as_millis()
        ));

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(pool_config.max_open)
            .build()
            .map_err(|e| SourceError::with_source("pool creation failed", e))?;

        let source = Self {
            pool,
            max_idle: pool_config.max_idle,
            layer_name: layer_name.into(),
        };
        source.ping_with_retry(pool_config.connect_retries).await?;
        info!(
            max_open = pool_config.max_open,
            max_idle = pool_config.max_idle,
            "connected to PostGIS"
        );
        Ok(source)
    }

    async fn ping(&self) -> Result<(), SourceError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SourceError::with_source("could not acquire connection", e))?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| SourceError::with_source("ping failed", e))?;
        Ok(())
    }

    async fn ping_with_retry(&self, retries: u32) -> Result<(), SourceError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.ping().await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    warn!(attempt, retries, ?backoff, "database not reachable: {err}");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Drop idle connections above the configured limit.
    fn trim_idle(&self) {
        let available = self.pool.status().available;
        if available <= self.max_idle {
            return;
        }
        let mut excess = available - self.max_idle;
        let dropped = self
            .pool
            .retain(|_, _| {
                if excess == 0 {
                    true
                } else {
                    excess -= 1;
                    false
                }
            })
            .removed
            .len();
        debug!(dropped, "trimmed idle connections");
    }

    async fn query_extent(&self, table: &str, geometry: &str) -> Result<Option<String>, SourceError> {
        let sql = extent_sql(table, geometry);
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SourceError::with_source("could not acquire connection", e))?;
        let row = client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| SourceError::with_source(format!("extent query on {table} failed"), e))?;
        drop(client);
        self.trim_idle();
        let text: Option<String> = row
            .try_get(0)
            .map_err(|e| SourceError::with_source("unexpected extent column", e))?;
        Ok(text.filter(|t| !t.trim().is_empty()))
    }

    async fn query_tile(&self, request: TileRequest) -> Result<Option<Vec<u8>>, SourceError> {
        let sql = tile_sql(&request.table_name, &request.geometry_column);
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| SourceError::with_source("could not acquire connection", e))?;
        let statement = client
            .prepare_cached(&sql)
            .await
            .map_err(|e| SourceError::with_source("could not prepare tile query", e))?;
        let extent = request.extent;
        let params: [&(dyn ToSql + Sync); 6] = [
            &extent.x_min,
            &extent.y_min,
            &extent.x_max,
            &extent.y_max,
            &request.srid,
            &self.layer_name,
        ];
        let row = client
            .query_one(&statement, &params)
            .await
            .map_err(|e| {
                SourceError::with_source(format!("tile query for {} failed", request.address), e)
            })?;
        drop(client);
        self.trim_idle();
        let bytes: Option<Vec<u8>> = row
            .try_get(0)
            .map_err(|e| SourceError::with_source("unexpected tile column", e))?;
        Ok(bytes.filter(|b| !b.is_empty()))
    }
}

impl TileSource for PostGisSource {
    fn extent_text<'a>(
        &'a self,
        table_name: &'a str,
        geometry_column: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, SourceError>> {
        Box::pin(self.query_extent(table_name, geometry_column))
    }

    fn render_tile(
        &self,
        request: TileRequest,
    ) -> BoxFuture<'_, Result<Option<Vec<u8>>, SourceError>> {
        Box::pin(self.query_tile(request))
    }
}

/// Quote one SQL identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name.
pub fn qualified_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

pub fn extent_sql(table: &str, geometry: &str) -> String {
    format!(
        "SELECT ST_Extent({})::text FROM {}",
        quote_ident(geometry),
        qualified_table(table)
    )
}

/// Parameters: `$1..$4` envelope bounds, `$5` SRID, `$6` layer name.
pub fn tile_sql(table: &str, geometry: &str) -> String {
    let geom = quote_ident(geometry);
    let table = qualified_table(table);
    format!(
        "WITH bounds AS (\
            SELECT ST_MakeEnvelope($1::float8, $2::float8, $3::float8, $4::float8, $5::int4) AS geom\
        ), \
        clipped AS (\
            SELECT ST_AsMVTGeom(ST_Union(ST_Intersection(t.{geom}, bounds.geom)), bounds.geom) AS geom \
            FROM {table} t, bounds \
            WHERE t.{geom} && bounds.geom AND ST_Intersects(t.{geom}, bounds.geom) \
            GROUP BY bounds.geom\
        ) \
        SELECT ST_AsMVT(clipped.*, $6::text) FROM clipped WHERE clipped.geom IS NOT NULL"
    )
}
