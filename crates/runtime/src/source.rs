//! Contract for the external spatial query engine.
//!
//! The engine clips, unions and encodes geometry on its side; this crate only
//! asks for an envelope of the whole layer and for the encoded bytes of one
//! tile at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use foundation::{Extent, TileAddress};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Cause = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by the engine: what was being attempted, plus the
/// driver error when there is one.
#[derive(Debug)]
pub struct SourceError {
    context: String,
    cause: Option<Cause>,
}

impl SourceError {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            cause: None,
        }
    }

    pub fn with_source(
        context: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            context: context.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.context)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as _)
    }
}

/// One tile-generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    pub address: TileAddress,
    pub table_name: Arc<str>,
    pub geometry_column: Arc<str>,
    pub extent: Extent,
    pub srid: i32,
}

/// Trait for spatial query engines.
///
/// Implementations must be `Send + Sync` for use across async tasks.
/// Methods return boxed futures for dyn-compatibility.
pub trait TileSource: Send + Sync {
    /// Envelope of every geometry in the layer, in the engine's textual box
    /// format (`BOX(x_min y_min,x_max y_max)`).
    ///
    /// Returns `Ok(None)` when the layer holds no geometry.
    fn extent_text<'a>(
        &'a self,
        table_name: &'a str,
        geometry_column: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, SourceError>>;

    /// Encoded tile bytes for the request's extent.
    ///
    /// Returns `Ok(None)` when nothing intersects the tile.
    fn render_tile(&self, request: TileRequest)
    -> BoxFuture<'_, Result<Option<Vec<u8>>, SourceError>>;
}
