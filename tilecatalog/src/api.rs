//! Contracts of the external collaborators.
//!
//! HTTP transport, payload parsing and token acquisition live outside this
//! crate. The engine consumes them through [`CatalogApi`] and
//! [`TokenProvider`]; every call is callback-based and returns a
//! [`CancellationToken`] that aborts the call.
//!
//! Implementations should not invoke the callback after a cancel has taken
//! effect, but callers guard delivery with their own once-only flag anyway.

use bytes::Bytes;

use crate::client::{Callback, CancellationToken};
use crate::error::ApiError;
use crate::geo::TileKey;
use crate::model::{Catalog, Partitions, QuadTreeIndex};

/// Per-call request metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub billing_tag: Option<String>,
    pub bearer_token: Option<String>,
}

/// Supplies bearer tokens on demand.
pub trait TokenProvider: Send + Sync {
    /// Returns a valid token or an `AuthenticationError`.
    fn token(&self) -> Result<String, ApiError>;
}

/// The remote catalog service.
///
/// Failures are reported as [`ApiError`] values carrying the HTTP status
/// when one was received, so that 403 responses can drive cache
/// invalidation.
pub trait CatalogApi: Send + Sync {
    fn get_catalog(
        &self,
        catalog: &str,
        context: &RequestContext,
        callback: Callback<Catalog>,
    ) -> CancellationToken;

    fn get_latest_version(
        &self,
        catalog: &str,
        context: &RequestContext,
        callback: Callback<i64>,
    ) -> CancellationToken;

    /// All partitions of a layer.
    fn get_partitions(
        &self,
        catalog: &str,
        layer: &str,
        version: Option<i64>,
        context: &RequestContext,
        callback: Callback<Partitions>,
    ) -> CancellationToken;

    /// Selected partitions of a layer.
    fn get_partitions_by_id(
        &self,
        catalog: &str,
        layer: &str,
        partition_ids: &[String],
        version: Option<i64>,
        context: &RequestContext,
        callback: Callback<Partitions>,
    ) -> CancellationToken;

    fn get_blob(
        &self,
        catalog: &str,
        layer: &str,
        data_handle: &str,
        context: &RequestContext,
        callback: Callback<Bytes>,
    ) -> CancellationToken;

    /// Index of the sub-tree of `depth` levels below `root`.
    #[allow(clippy::too_many_arguments)]
    fn quad_tree_index(
        &self,
        catalog: &str,
        layer: &str,
        root: TileKey,
        depth: u32,
        version: Option<i64>,
        context: &RequestContext,
        callback: Callback<QuadTreeIndex>,
    ) -> CancellationToken;
}
