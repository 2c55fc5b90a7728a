//! End-to-end pyramid generation: one extent query, then the whole zoom
//! range is enumerated and handed to the dispatcher.

use std::fmt;

use foundation::{Extent, ParseError, parse_box};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatch::{DispatchSummary, ProvisionError, TileDispatcher};
use crate::job::{JobPlan, LayerSource, RangeError, enumerate};
use crate::source::{SourceError, TileSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidRequest {
    pub layer: LayerSource,
    pub zoom_start: u8,
    pub zoom_end: u8,
}

/// Dataset-wide failures. Any of these ends the run.
#[derive(Debug)]
pub enum PipelineError {
    /// The extent query itself failed.
    Source(SourceError),
    /// The layer has no geometry to tile.
    NoData { table_name: String },
    Parse(ParseError),
    Range(RangeError),
    Provision(ProvisionError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Source(err) => write!(f, "data extent query failed: {err}"),
            PipelineError::NoData { table_name } => {
                write!(f, "table {table_name} has no geometry to tile")
            }
            PipelineError::Parse(err) => write!(f, "malformed data extent: {err}"),
            PipelineError::Range(err) => write!(f, "invalid zoom range: {err}"),
            PipelineError::Provision(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Source(err) => Some(err),
            PipelineError::NoData { .. } => None,
            PipelineError::Parse(err) => Some(err),
            PipelineError::Range(err) => Some(err),
            PipelineError::Provision(err) => Some(err),
        }
    }
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        PipelineError::Parse(err)
    }
}

impl From<RangeError> for PipelineError {
    fn from(err: RangeError) -> Self {
        PipelineError::Range(err)
    }
}

impl From<ProvisionError> for PipelineError {
    fn from(err: ProvisionError) -> Self {
        PipelineError::Provision(err)
    }
}

#[derive(Debug, Clone)]
pub struct PyramidPlan {
    pub data_extent: Extent,
    pub jobs: JobPlan,
}

#[derive(Debug, Clone)]
pub struct PyramidRun {
    pub data_extent: Extent,
    pub summary: DispatchSummary,
}

/// Fetches the layer's extent and enumerates every job for the zoom range.
pub async fn plan_pyramid(
    source: &dyn TileSource,
    request: &PyramidRequest,
) -> Result<PyramidPlan, PipelineError> {
    let layer = &request.layer;
    let text = source
        .extent_text(&layer.table_name, &layer.geometry_column)
        .await
        .map_err(PipelineError::Source)?
        .ok_or_else(|| PipelineError::NoData {
            table_name: layer.table_name.to_string(),
        })?;

    let data_extent = parse_box(&text)?;
    let jobs = enumerate(&data_extent, request.zoom_start, request.zoom_end, layer)?;
    info!(
        table = %layer.table_name,
        zoom_start = request.zoom_start,
        zoom_end = request.zoom_end,
        total = jobs.total(),
        "planned pyramid over {data_extent:?}"
    );
    Ok(PyramidPlan { data_extent, jobs })
}

pub async fn run_pyramid(
    dispatcher: &TileDispatcher,
    request: &PyramidRequest,
    cancel: &CancellationToken,
) -> Result<PyramidRun, PipelineError> {
    let plan = plan_pyramid(dispatcher.source(), request).await?;
    let summary = dispatcher.run(&plan.jobs, cancel).await?;
    Ok(PyramidRun {
        data_extent: plan.data_extent,
        summary,
    })
}
