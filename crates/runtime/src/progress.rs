use foundation::TileAddress;
use parking_lot::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// Completion record for one tile job.
///
/// A successful result with `byte_length == 0` means the engine had no data
/// for the tile and nothing was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub address: TileAddress,
    pub byte_length: usize,
    pub outcome: Outcome,
}

impl GenerationResult {
    pub fn success(address: TileAddress, byte_length: usize) -> Self {
        Self {
            address,
            byte_length,
            outcome: Outcome::Success,
        }
    }

    pub fn failure(address: TileAddress, reason: impl Into<String>) -> Self {
        Self {
            address,
            byte_length: 0,
            outcome: Outcome::Failure(reason.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ProgressCounters {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    /// Successful tiles the engine returned no data for.
    pub empty: u64,
    pub bytes_written: u64,
}

impl ProgressCounters {
    pub fn succeeded(&self) -> u64 {
        self.completed - self.failed
    }

    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileFailure {
    pub address: TileAddress,
    pub reason: String,
}

#[derive(Debug, Default)]
struct ProgressState {
    counters: ProgressCounters,
    failures: Vec<TileFailure>,
}

/// Run-wide completion accounting shared by every worker.
///
/// Each `report` is applied under one lock, so snapshots never observe a
/// half-applied result.
#[derive(Debug)]
pub struct ProgressTracker {
    state: Mutex<ProgressState>,
    log_every: u64,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                counters: ProgressCounters {
                    total,
                    ..ProgressCounters::default()
                },
                failures: Vec::new(),
            }),
            // Roughly one progress line per percent.
            log_every: (total / 100).max(1),
        }
    }

    pub fn report(&self, result: GenerationResult) {
        let counters = {
            let mut state = self.state.lock();
            let counters = &mut state.counters;
            counters.completed += 1;
            match &result.outcome {
                Outcome::Success if result.byte_length == 0 => counters.empty += 1,
                Outcome::Success => counters.bytes_written += result.byte_length as u64,
                Outcome::Failure(_) => counters.failed += 1,
            }
            let counters = *counters;
            if let Outcome::Failure(reason) = result.outcome {
                state.failures.push(TileFailure {
                    address: result.address,
                    reason,
                });
            }
            counters
        };

        debug!(
            tile = %result.address,
            bytes = result.byte_length,
            "tile {}/{}",
            counters.completed,
            counters.total
        );
        if counters.completed % self.log_every == 0 || counters.completed == counters.total {
            info!(
                failed = counters.failed,
                "progress {}/{}",
                counters.completed,
                counters.total
            );
        }
    }

    pub fn snapshot(&self) -> ProgressCounters {
        self.state.lock().counters
    }

    /// Failed tiles, sorted by address for stable reports.
    pub fn failures(&self) -> Vec<TileFailure> {
        let mut failures = self.state.lock().failures.clone();
        failures.sort_by_key(|f| f.address);
        failures
    }
}
