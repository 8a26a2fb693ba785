//! Tile-tree decomposition and sub-tree index queries.
//!
//! The backend answers quad-tree index queries at most [`MAX_QUERY_DEPTH`]
//! levels deep. [`effective_tile_keys`] turns a set of tiles and a level
//! range into the minimal set of `(root, depth)` queries covering it:
//!
//! - a tile above `max` contributes its ancestors in `[min, max]`, depth 0
//! - a tile below `min` is replaced by its descendants at `min`
//! - a tile inside the range is queried with depth `max - level`, capped at
//!   [`MAX_QUERY_DEPTH`]; the remaining levels are covered by recursing
//!   into its descendants `MAX_QUERY_DEPTH + 1` levels down
//!
//! Top-level inputs also contribute their ancestors in range, so a prefetch
//! of a tile loads the tiles that contain it. When the same root is reached
//! twice the larger depth wins.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::blocking::blocking_call;
use super::keys;
use super::partitions_cache::PartitionsCacheRepository;
use crate::client::{CancellationContext, ClientSettings};
use crate::error::{ApiError, ApiResponse};
use crate::geo::TileKey;
use crate::model::{LayerType, Partitions, QuadTreeIndex};
use crate::request::PrefetchTilesRequest;

/// Deepest sub-tree a single index query may cover.
pub const MAX_QUERY_DEPTH: u32 = 4;

/// Index queries keyed by root tile string: `(root, depth)`.
pub type SubQuadsRequest = BTreeMap<String, (TileKey, u32)>;

/// Tiles with data, paired with their data handles.
pub type SubTilesResult = Vec<(TileKey, String)>;

fn merge_query(queries: &mut SubQuadsRequest, tile: TileKey, depth: u32) {
    queries
        .entry(tile.to_here_tile())
        .and_modify(|(_, existing)| *existing = (*existing).max(depth))
        .or_insert((tile, depth));
}

/// Decomposes `tiles` and `[min_level, max_level]` into index queries.
pub fn effective_tile_keys(tiles: &[TileKey], min_level: u32, max_level: u32) -> SubQuadsRequest {
    let mut queries = SubQuadsRequest::new();
    for tile in tiles {
        for (tile, depth) in tile_queries(tile, min_level, max_level, true).into_values() {
            merge_query(&mut queries, tile, depth);
        }
    }
    queries
}

fn tile_queries(tile: &TileKey, min_level: u32, max_level: u32, add_ancestors: bool) -> SubQuadsRequest {
    let mut queries = SubQuadsRequest::new();
    let level = tile.level();

    let add_parents = |queries: &mut SubQuadsRequest| {
        let mut current = tile.parent();
        while let Some(parent) = current {
            if parent.level() < min_level {
                break;
            }
            if parent.level() <= max_level {
                merge_query(queries, parent, 0);
            }
            current = parent.parent();
        }
    };

    let add_children = |queries: &mut SubQuadsRequest, children: Vec<TileKey>| {
        for child in children {
            for (tile, depth) in tile_queries(&child, min_level, max_level, false).into_values() {
                merge_query(queries, tile, depth);
            }
        }
    };

    if level > max_level {
        add_parents(&mut queries);
    } else if level < min_level {
        add_children(&mut queries, child_tiles_at_level(tile, min_level));
    } else {
        if add_ancestors {
            add_parents(&mut queries);
        }
        let remaining = max_level - level;
        if remaining <= MAX_QUERY_DEPTH {
            merge_query(&mut queries, *tile, remaining);
        } else {
            merge_query(&mut queries, *tile, MAX_QUERY_DEPTH);
            add_children(
                &mut queries,
                child_tiles_at_level(tile, level + MAX_QUERY_DEPTH + 1),
            );
        }
    }

    queries
}

/// Every descendant of `tile` at `level`, or `tile` itself when it is
/// already at or below `level`.
pub fn child_tiles_at_level(tile: &TileKey, level: u32) -> Vec<TileKey> {
    if tile.level() >= level {
        return vec![*tile];
    }
    tile.children()
        .iter()
        .flat_map(|child| child_tiles_at_level(child, level))
        .collect()
}

/// Keeps tiles inside the requested level range, each tile once.
pub fn filter_skipped_tiles(request: &PrefetchTilesRequest, tiles: SubTilesResult) -> SubTilesResult {
    let mut seen = BTreeSet::new();
    tiles
        .into_iter()
        .filter(|(tile, _)| (request.min_level..=request.max_level).contains(&tile.level()))
        .filter(|(tile, _)| seen.insert(*tile))
        .collect()
}

/// Runs the index queries of a prefetch.
pub struct PrefetchTilesRepository {
    hrn: String,
    layer: String,
    layer_type: LayerType,
    settings: Arc<ClientSettings>,
    cache: PartitionsCacheRepository,
}

impl PrefetchTilesRepository {
    pub fn new(
        hrn: impl Into<String>,
        layer: impl Into<String>,
        layer_type: LayerType,
        settings: Arc<ClientSettings>,
    ) -> Self {
        let hrn = hrn.into();
        let cache = PartitionsCacheRepository::new(
            hrn.clone(),
            settings.cache.clone(),
            settings.default_cache_expiration,
        );
        Self {
            hrn,
            layer: layer.into(),
            layer_type,
            settings,
            cache,
        }
    }

    /// Runs every query of `sub_quads` and collects the tiles with data.
    ///
    /// Queries answered with 404 contribute nothing; any other failure
    /// aborts. Versioned layers require `request.version`.
    pub fn get_sub_tiles(
        &self,
        request: &PrefetchTilesRequest,
        sub_quads: &SubQuadsRequest,
        expiry: Option<Duration>,
        context: &CancellationContext,
    ) -> ApiResponse<SubTilesResult> {
        let version = match self.layer_type {
            LayerType::Versioned => match request.version {
                Some(version) => Some(version),
                None => {
                    warn!(key = %request.create_key(&self.layer), "Catalog version missing");
                    return Err(ApiError::invalid_argument("Catalog version invalid"));
                }
            },
            LayerType::Volatile => None,
        };

        info!(
            catalog = %self.hrn,
            layer = %self.layer,
            quads = sub_quads.len(),
            "Querying sub tiles"
        );

        let mut result = SubTilesResult::new();
        for (tile, depth) in sub_quads.values() {
            if context.is_cancelled() {
                return Err(ApiError::cancelled());
            }
            match self.get_sub_quads(*tile, *depth, version, request.billing_tag.as_deref(), expiry, context) {
                Ok(tiles) => result.extend(tiles),
                Err(e) if e.is_not_found_status() => {
                    debug!(tile = %tile, depth, "No index below tile");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }

    fn get_sub_quads(
        &self,
        root: TileKey,
        depth: u32,
        version: Option<i64>,
        billing_tag: Option<&str>,
        expiry: Option<Duration>,
        context: &CancellationContext,
    ) -> ApiResponse<SubTilesResult> {
        let index = match self.cache.get_quad_tree(&self.layer, &root, version, depth) {
            Some(index) => {
                debug!(tile = %root, depth, "Quad tree cache hit");
                index
            }
            None => self.fetch_quad_tree(root, depth, version, billing_tag, expiry, context)?,
        };

        Ok(index
            .sub_quads
            .iter()
            .filter_map(|quad| {
                root.added_sub_here_tile(&quad.sub_quad_key)
                    .map(|tile| (tile, quad.data_handle.clone()))
            })
            .collect())
    }

    fn fetch_quad_tree(
        &self,
        root: TileKey,
        depth: u32,
        version: Option<i64>,
        billing_tag: Option<&str>,
        expiry: Option<Duration>,
        context: &CancellationContext,
    ) -> ApiResponse<QuadTreeIndex> {
        let request_context = self.settings.request_context(billing_tag)?;
        let key = keys::quad_tree_key(&self.hrn, &self.layer, &root, version, depth);
        let api = self.settings.api.clone();
        let cache = self.cache.clone();
        let hrn = self.hrn.clone();
        let layer = self.layer.clone();

        blocking_call(
            &self.settings,
            &self.settings.coalescers.quad_tree,
            &key,
            context,
            move |completion| {
                let layer_id = layer.clone();
                api.quad_tree_index(
                    &hrn,
                    &layer_id,
                    root,
                    depth,
                    version,
                    &request_context,
                    Box::new(move |response: ApiResponse<QuadTreeIndex>| {
                        match &response {
                            Ok(index) => {
                                cache.put_quad_tree(&layer, version, index, expiry);
                                let partitions = Partitions::new(index.partitions());
                                cache.put(&layer, version, &partitions, expiry, false);
                            }
                            Err(e) if e.is_forbidden() => {
                                if let Err(e) = cache.clear_quad_tree(&layer, &root, version, depth) {
                                    warn!(layer = %layer, error = %e, "Failed to clear quad tree");
                                }
                            }
                            Err(_) => {}
                        }
                        completion(response);
                    }),
                )
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Partition;
    use crate::testing::MockCatalogApi;
    use proptest::prelude::*;

    fn tile(level: u32, row: u32, column: u32) -> TileKey {
        TileKey::from_row_column_level(row, column, level).unwrap()
    }

    fn depths(queries: &SubQuadsRequest) -> Vec<(TileKey, u32)> {
        queries.values().copied().collect()
    }

    #[test]
    fn test_tile_in_range_is_single_query() {
        let t = tile(5, 3, 7);
        let queries = effective_tile_keys(&[t], 5, 8);
        assert_eq!(depths(&queries), vec![(t, 3)]);
    }

    #[test]
    fn test_tile_in_range_adds_ancestors() {
        let t = tile(5, 3, 7);
        let queries = effective_tile_keys(&[t], 3, 6);

        assert_eq!(queries.len(), 3);
        assert_eq!(queries[&t.to_here_tile()].1, 1);
        for level in 3..5 {
            let ancestor = t.ancestor_at(level).unwrap();
            assert_eq!(queries[&ancestor.to_here_tile()].1, 0);
        }
    }

    #[test]
    fn test_tile_below_min_expands_to_min() {
        let t = tile(1, 0, 1);
        let queries = effective_tile_keys(&[t], 3, 3);

        assert_eq!(queries.len(), 16);
        for (key, depth) in queries.values() {
            assert_eq!(key.level(), 3);
            assert_eq!(*depth, 0);
            assert!(t.is_parent_of(key));
        }
    }

    #[test]
    fn test_tile_above_max_walks_ancestors() {
        let t = tile(10, 100, 200);
        let queries = effective_tile_keys(&[t], 4, 7);

        let mut levels: Vec<u32> = queries.values().map(|(key, _)| key.level()).collect();
        levels.sort_unstable();
        assert_eq!(levels, vec![4, 5, 6, 7]);
        assert!(queries.values().all(|(key, depth)| *depth == 0 && key.is_parent_of(&t)));
    }

    #[test]
    fn test_deep_range_is_split() {
        let root = TileKey::root();
        let queries = effective_tile_keys(&[root], 0, 6);

        assert_eq!(queries.len(), 1 + 1024);
        assert_eq!(queries[&root.to_here_tile()].1, MAX_QUERY_DEPTH);
        assert!(queries
            .values()
            .filter(|(key, _)| key.level() == 5)
            .all(|(_, depth)| *depth == 1));
    }

    #[test]
    fn test_merge_keeps_larger_depth() {
        let child = tile(6, 2, 2);
        let parent = child.parent().unwrap();
        // `parent` is an ancestor of `child` (depth 0) and an input (depth 2)
        let queries = effective_tile_keys(&[child, parent], 5, 7);
        assert_eq!(queries[&parent.to_here_tile()].1, 2);
        assert_eq!(queries[&child.to_here_tile()].1, 1);
    }

    #[test]
    fn test_child_tiles_at_level() {
        let t = tile(2, 1, 1);
        assert_eq!(child_tiles_at_level(&t, 2), vec![t]);
        assert_eq!(child_tiles_at_level(&t, 1), vec![t]);
        let grandchildren = child_tiles_at_level(&t, 4);
        assert_eq!(grandchildren.len(), 16);
        assert!(grandchildren.iter().all(|c| c.level() == 4 && t.is_parent_of(c)));
    }

    #[test]
    fn test_filter_skipped_tiles() {
        let request = PrefetchTilesRequest::new(vec![TileKey::root()], 2, 3);
        let tiles = vec![
            (tile(1, 0, 0), "a".to_string()),
            (tile(2, 0, 0), "b".to_string()),
            (tile(3, 0, 0), "c".to_string()),
            (tile(3, 0, 0), "c".to_string()),
            (tile(4, 0, 0), "d".to_string()),
        ];
        let kept: Vec<String> = filter_skipped_tiles(&request, tiles)
            .into_iter()
            .map(|(_, handle)| handle)
            .collect();
        assert_eq!(kept, vec!["b", "c"]);
    }

    fn mock_with_tiles(tiles: &[TileKey]) -> Arc<MockCatalogApi> {
        let api = Arc::new(MockCatalogApi::new());
        api.set_partitions(
            tiles
                .iter()
                .map(|t| Partition::new(t.to_here_tile(), format!("h-{}", t.to_here_tile())))
                .collect(),
        );
        api
    }

    #[test]
    fn test_get_sub_tiles_caches_index_and_partitions() {
        let root = tile(3, 1, 1);
        let children = root.children();
        let api = mock_with_tiles(&children);
        let settings = Arc::new(ClientSettings::new(api.clone()));
        let repository = PrefetchTilesRepository::new(
            "hrn:test",
            MockCatalogApi::VERSIONED_LAYER,
            LayerType::Versioned,
            settings.clone(),
        );
        let request = PrefetchTilesRequest::new(vec![root], 3, 4).with_version(Some(1));
        let queries = effective_tile_keys(&request.tile_keys, 3, 4);
        let context = CancellationContext::new();

        let tiles = repository.get_sub_tiles(&request, &queries, None, &context).unwrap();
        assert_eq!(tiles.len(), 4);
        assert_eq!(api.calls().quad_tree, 1);

        repository.get_sub_tiles(&request, &queries, None, &context).unwrap();
        assert_eq!(api.calls().quad_tree, 1);

        let partitions = PartitionsCacheRepository::new("hrn:test", settings.cache.clone(), None);
        let ids = vec![children[0].to_here_tile()];
        assert_eq!(
            partitions
                .get_by_ids(MockCatalogApi::VERSIONED_LAYER, Some(1), &ids)
                .len(),
            1
        );
    }

    #[test]
    fn test_get_sub_tiles_requires_version_for_versioned_layer() {
        let api = mock_with_tiles(&[]);
        let repository = PrefetchTilesRepository::new(
            "hrn:test",
            MockCatalogApi::VERSIONED_LAYER,
            LayerType::Versioned,
            Arc::new(ClientSettings::new(api)),
        );
        let request = PrefetchTilesRequest::new(vec![TileKey::root()], 0, 1);
        let queries = effective_tile_keys(&request.tile_keys, 0, 1);

        let error = repository
            .get_sub_tiles(&request, &queries, None, &CancellationContext::new())
            .unwrap_err();
        assert_eq!(error.message(), "Catalog version invalid");
    }

    #[test]
    fn test_get_sub_tiles_skips_not_found() {
        let api = mock_with_tiles(&[tile(2, 0, 0)]);
        api.fail_with(404);
        let repository = PrefetchTilesRepository::new(
            "hrn:test",
            MockCatalogApi::VOLATILE_LAYER,
            LayerType::Volatile,
            Arc::new(ClientSettings::new(api.clone())),
        );
        let request = PrefetchTilesRequest::new(vec![tile(2, 0, 0)], 2, 2);
        let queries = effective_tile_keys(&request.tile_keys, 2, 2);

        let tiles = repository
            .get_sub_tiles(&request, &queries, None, &CancellationContext::new())
            .unwrap();
        assert!(tiles.is_empty());

        api.fail_with(500);
        assert!(repository
            .get_sub_tiles(&request, &queries, None, &CancellationContext::new())
            .is_err());
    }

    #[test]
    fn test_get_sub_tiles_cancelled() {
        let api = mock_with_tiles(&[]);
        let repository = PrefetchTilesRepository::new(
            "hrn:test",
            MockCatalogApi::VOLATILE_LAYER,
            LayerType::Volatile,
            Arc::new(ClientSettings::new(api.clone())),
        );
        let request = PrefetchTilesRequest::new(vec![TileKey::root()], 0, 2);
        let queries = effective_tile_keys(&request.tile_keys, 0, 2);
        let context = CancellationContext::new();
        context.cancel();

        let error = repository
            .get_sub_tiles(&request, &queries, None, &context)
            .unwrap_err();
        assert!(error.is_cancelled());
        assert_eq!(api.calls().quad_tree, 0);
    }

    fn descend(tile: TileKey, path: &[u8], levels: u32) -> TileKey {
        path.iter()
            .take(levels as usize)
            .fold(tile, |current, index| current.child(*index).unwrap())
    }

    proptest! {
        #[test]
        fn test_decomposition_covers_range(
            level in 0u32..6,
            below in 0u32..3,
            span in 0u32..5,
            path in proptest::collection::vec(0u8..4, 16),
        ) {
            let t = descend(TileKey::root(), &path, level);
            let min_level = level + below;
            let max_level = min_level + span;
            let queries = effective_tile_keys(&[t], min_level, max_level);

            for (key, depth) in queries.values() {
                prop_assert!(*depth <= MAX_QUERY_DEPTH);
                prop_assert!(key.level() >= min_level);
                prop_assert!(key.level() + depth <= max_level);
            }

            // every tile of the range below `t` is covered by some query
            for target_level in min_level..=max_level {
                let target = descend(t, &path[level as usize..], target_level - level);
                let covered = queries.values().any(|(key, depth)| {
                    target.ancestor_at(key.level()) == Some(*key)
                        && target.level() <= key.level() + depth
                });
                prop_assert!(covered, "tile {} not covered", target);
            }
        }
    }
}
