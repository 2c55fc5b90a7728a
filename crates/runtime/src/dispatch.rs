//! Bounded-concurrency fan-out of tile jobs.
//!
//! The dispatcher walks a [`JobPlan`] level by level. Each level's directories
//! are provisioned before its first job is admitted; jobs are then admitted
//! as semaphore permits free up, so at most `concurrency` units are ever in
//! flight. Per-tile failures are recorded and never stop sibling work.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use foundation::{TileAddress, WEB_MERCATOR_SRID};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::{JobPlan, TileJob};
use crate::progress::{GenerationResult, ProgressCounters, ProgressTracker, TileFailure};
use crate::source::{SourceError, TileRequest, TileSource};
use crate::storage::{DirectoryProvisioner, TileLayout, TileWriter};

pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Dispatching,
    Draining,
    Done,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum tile units in flight.
    pub concurrency: usize,
    /// Upper bound on one tile's engine request.
    pub query_timeout: Duration,
    pub srid: i32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            srid: WEB_MERCATOR_SRID,
        }
    }
}

/// Why a single tile failed. Recorded, never propagated.
#[derive(Debug)]
pub enum TileError {
    Query(SourceError),
    Io(io::Error),
    Timeout(Duration),
    Cancelled,
}

impl fmt::Display for TileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileError::Query(err) => write!(f, "query failed: {err}"),
            TileError::Io(err) => write!(f, "write failed: {err}"),
            TileError::Timeout(limit) => write!(f, "query timed out after {limit:?}"),
            TileError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for TileError {}

impl From<io::Error> for TileError {
    fn from(err: io::Error) -> Self {
        TileError::Io(err)
    }
}

/// A zoom level whose directories could not be created. Fatal for the run.
#[derive(Debug)]
pub struct ProvisionError {
    pub zoom: u8,
    pub error: io::Error,
}

impl fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to provision directories for zoom {}: {}",
            self.zoom, self.error
        )
    }
}

impl std::error::Error for ProvisionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSummary {
    pub counters: ProgressCounters,
    pub failures: Vec<TileFailure>,
    /// Admission was stopped by the cancellation token.
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Most spawned units held at once, finished or not.
    pub peak_tasks: usize,
}

pub struct TileDispatcher {
    source: Arc<dyn TileSource>,
    provisioner: DirectoryProvisioner,
    writer: Arc<TileWriter>,
    config: DispatchConfig,
    state: Mutex<DispatchState>,
}

impl TileDispatcher {
    /// # Panics
    ///
    /// Panics if `config.concurrency` is 0.
    pub fn new(source: Arc<dyn TileSource>, layout: TileLayout, config: DispatchConfig) -> Self {
        assert!(config.concurrency > 0, "concurrency must be > 0");
        Self {
            source,
            provisioner: DirectoryProvisioner::new(layout.clone()),
            writer: Arc::new(TileWriter::new(layout)),
            config,
            state: Mutex::new(DispatchState::Idle),
        }
    }

    pub fn source(&self) -> &dyn TileSource {
        self.source.as_ref()
    }

    pub fn layout(&self) -> &TileLayout {
        self.writer.layout()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn state(&self) -> DispatchState {
        *self.state.lock()
    }

    fn transition(&self, next: DispatchState) {
        let mut state = self.state.lock();
        let from = *state;
        debug!(?from, to = ?next, "dispatcher state");
        *state = next;
    }

    /// Generates every tile in `plan`.
    ///
    /// Returns `Err` only when a zoom level cannot be provisioned; in that
    /// case admission stops and in-flight units are drained first. Cancelling
    /// `cancel` stops admission and aborts in-flight engine requests; the
    /// summary then has `cancelled` set and `completed < total`.
    pub async fn run(
        &self,
        plan: &JobPlan,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary, ProvisionError> {
        let started = Instant::now();
        let progress = Arc::new(ProgressTracker::new(plan.total()));
        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut in_flight = JoinSet::new();
        let mut provision_error = None;
        let mut peak_tasks = 0;

        self.transition(DispatchState::Dispatching);
        info!(
            total = plan.total(),
            concurrency = self.config.concurrency,
            "dispatching tile jobs"
        );

        'levels: for level in plan.levels() {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(error) = self.provisioner.provision(&level.range).await {
                error!(zoom = level.zoom(), "directory provisioning failed: {error}");
                provision_error = Some(ProvisionError {
                    zoom: level.zoom(),
                    error,
                });
                break;
            }
            debug!(zoom = level.zoom(), jobs = level.tile_count(), "admitting zoom level");

            for job in level.jobs() {
                // Finished units are reaped while waiting for a permit, so the
                // set never holds much more than `concurrency` tasks.
                let permit = loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break None,
                        Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                            log_join(joined);
                        }
                        permit = Arc::clone(&permits).acquire_owned() => break permit.ok(),
                    }
                };
                let Some(permit) = permit else {
                    break 'levels;
                };

                let reporter = Reporter::new(&job, Arc::clone(&progress));
                let unit = TileUnit {
                    job,
                    source: Arc::clone(&self.source),
                    writer: Arc::clone(&self.writer),
                    srid: self.config.srid,
                    query_timeout: self.config.query_timeout,
                    cancel: cancel.clone(),
                };
                in_flight.spawn(async move {
                    let _permit = permit;
                    reporter.report(unit.run().await);
                });
                peak_tasks = peak_tasks.max(in_flight.len());
            }
        }

        self.transition(DispatchState::Draining);
        while let Some(joined) = in_flight.join_next().await {
            log_join(joined);
        }
        self.transition(DispatchState::Done);

        if let Some(err) = provision_error {
            return Err(err);
        }

        let summary = DispatchSummary {
            counters: progress.snapshot(),
            failures: progress.failures(),
            cancelled: cancel.is_cancelled(),
            elapsed: started.elapsed(),
            peak_tasks,
        };
        info!(
            completed = summary.counters.completed,
            failed = summary.counters.failed,
            empty = summary.counters.empty,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "dispatch finished"
        );
        Ok(summary)
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        error!("tile unit aborted: {err}");
    }
}

/// Everything one spawned unit needs to generate its tile.
struct TileUnit {
    job: TileJob,
    source: Arc<dyn TileSource>,
    writer: Arc<TileWriter>,
    srid: i32,
    query_timeout: Duration,
    cancel: CancellationToken,
}

impl TileUnit {
    async fn run(self) -> GenerationResult {
        let address = self.job.address;
        match self.generate().await {
            Ok(byte_length) => GenerationResult::success(address, byte_length),
            Err(err) => {
                warn!(tile = %address, "tile failed: {err}");
                GenerationResult::failure(address, err.to_string())
            }
        }
    }

    /// Returns the number of bytes written; 0 when the engine had no data.
    async fn generate(&self) -> Result<usize, TileError> {
        let address = self.job.address;
        let request = TileRequest {
            address,
            table_name: Arc::clone(&self.job.table_name),
            geometry_column: Arc::clone(&self.job.geometry_column),
            extent: address.extent(),
            srid: self.srid,
        };

        let rendered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(TileError::Cancelled),
            rendered = tokio::time::timeout(self.query_timeout, self.source.render_tile(request)) => rendered,
        };
        let bytes = rendered
            .map_err(|_| TileError::Timeout(self.query_timeout))?
            .map_err(TileError::Query)?;

        match bytes {
            Some(bytes) if !bytes.is_empty() => {
                self.writer.write(address, &bytes).await?;
                Ok(bytes.len())
            }
            _ => {
                if self.writer.clear(address).await? {
                    debug!(tile = %address, "removed stale tile");
                }
                Ok(0)
            }
        }
    }
}

/// Reports a unit's result exactly once, even if the unit panics.
struct Reporter {
    job_address: TileAddress,
    progress: Arc<ProgressTracker>,
    done: bool,
}

impl Reporter {
    fn new(job: &TileJob, progress: Arc<ProgressTracker>) -> Self {
        Self {
            job_address: job.address,
            progress,
            done: false,
        }
    }

    fn report(mut self, result: GenerationResult) {
        self.done = true;
        self.progress.report(result);
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if !self.done {
            self.progress.report(GenerationResult::failure(
                self.job_address,
                "tile unit panicked",
            ));
        }
    }
}
