//! The two-level (memory + disk) cache service: memory hits come straight
//! from `node.cached_output`; disk hits land under
//! `{cache_root}/{node_id}/{location}` with a sibling `{stem}.yml` for
//! non-image metadata. Grounded in the original implementation's
//! `GraphCacheService` (`examples/original_source/src/kernel/services/graph_cache_service.cpp`).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use pixelgraph_core::{CachePrecision, GraphResult, NodeOutput};
use pixelgraph_graph::{ending_nodes, GraphModel};
use tracing::{debug, trace};

use crate::codec::ImageCodec;
use crate::result::{CacheSaveResult, DiskSyncResult, DriveClearResult, MemoryClearResult};

pub struct CacheService {
    codec: Arc<dyn ImageCodec>,
}

impl CacheService {
    pub fn new(codec: impl ImageCodec + 'static) -> Self {
        CacheService { codec: Arc::new(codec) }
    }

    pub fn node_cache_dir(&self, graph: &GraphModel, node_id: i64) -> PathBuf {
        graph.cache_root.join(node_id.to_string())
    }

    /// Persists `node_id`'s `cached_output` to disk if the graph has a
    /// `cache_root`, saving is not globally suppressed, and the node
    /// declares at least one `image`-typed cache entry.
    pub fn save_cache_if_configured(&self, graph: &GraphModel, node_id: i64, precision: CachePrecision) -> GraphResult<()> {
        if graph.skip_save_cache() {
            return Ok(());
        }
        if graph.cache_root.as_os_str().is_empty() {
            return Ok(());
        }
        let Some((caches, output)) = graph.with_node(node_id, |n| (n.caches.clone(), n.cached_output.clone())) else {
            return Ok(());
        };
        let Some(output) = output else {
            return Ok(());
        };
        if caches.is_empty() {
            return Ok(());
        }

        for entry in &caches {
            if entry.cache_type != "image" || entry.location.is_empty() {
                continue;
            }
            let dir = self.node_cache_dir(graph, node_id);
            std::fs::create_dir_all(&dir)?;
            let final_path = dir.join(&entry.location);

            let start = Instant::now();
            if !output.image_buffer.is_empty() {
                let bytes = self.codec.encode(&output.image_buffer, precision)?;
                std::fs::write(&final_path, bytes)?;
            }
            if !output.data.is_empty() {
                let meta_path = final_path.with_extension("yml");
                std::fs::write(meta_path, serde_yaml::to_string(&output.data)?)?;
            }
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            graph.add_io_time_ms(elapsed_ms);
            trace!(node_id, path = %final_path.display(), elapsed_ms, "wrote disk cache entry");
        }
        Ok(())
    }

    /// Loads `node_id`'s disk cache into its `cached_output` slot if not
    /// already populated in memory. Returns whether the node now has a
    /// memory-cached output (either it already did, or the disk load
    /// succeeded). Malformed cache files are treated as absent rather than
    /// propagated as errors.
    pub fn try_load_from_disk_cache(&self, graph: &GraphModel, node_id: i64) -> GraphResult<bool> {
        if graph.with_node(node_id, |n| n.cached_output.is_some()).unwrap_or(false) {
            return Ok(true);
        }
        if graph.cache_root.as_os_str().is_empty() {
            return Ok(false);
        }
        let Some(out) = self.load_from_disk(graph, node_id)? else {
            return Ok(false);
        };
        graph.with_node_mut(node_id, |n| n.cached_output = Some(out));
        Ok(true)
    }

    /// Loads `node_id`'s disk cache into a fresh [`NodeOutput`] without
    /// touching the node's memory cache slot — used by the compute engines
    /// when they need a disk-backed input without committing it as this
    /// node's authoritative cached output.
    pub fn try_load_from_disk_cache_into(&self, graph: &GraphModel, node_id: i64) -> GraphResult<Option<NodeOutput>> {
        if graph.cache_root.as_os_str().is_empty() {
            return Ok(None);
        }
        self.load_from_disk(graph, node_id)
    }

    fn load_from_disk(&self, graph: &GraphModel, node_id: i64) -> GraphResult<Option<NodeOutput>> {
        let Some(caches) = graph.with_node(node_id, |n| n.caches.clone()) else {
            return Ok(None);
        };
        if caches.is_empty() {
            return Ok(None);
        }

        let start = Instant::now();
        let mut loaded = None;
        for entry in &caches {
            if entry.cache_type != "image" || entry.location.is_empty() {
                continue;
            }
            let cache_file = self.node_cache_dir(graph, node_id).join(&entry.location);
            let meta_file = cache_file.with_extension("yml");
            if !cache_file.exists() && !meta_file.exists() {
                continue;
            }

            let mut out = NodeOutput::default();
            if cache_file.exists() {
                if let Ok(bytes) = std::fs::read(&cache_file) {
                    if let Ok(buf) = self.codec.decode(&bytes) {
                        out.image_buffer = buf;
                    }
                    // a malformed image payload leaves image_buffer empty
                    // rather than failing the whole load.
                }
            }
            if meta_file.exists() {
                if let Ok(text) = std::fs::read_to_string(&meta_file) {
                    if let Ok(data) = serde_yaml::from_str(&text) {
                        out.data = data;
                    }
                }
            }
            loaded = Some(out);
            break;
        }

        if loaded.is_some() {
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            graph.add_io_time_ms(elapsed_ms);
            trace!(node_id, elapsed_ms, "loaded disk cache entry");
        }
        Ok(loaded)
    }

    /// Removes the entire `{cache_root}` directory tree and recreates it
    /// empty.
    pub fn clear_drive_cache(&self, graph: &GraphModel) -> GraphResult<DriveClearResult> {
        let mut removed_entries = 0u64;
        if !graph.cache_root.as_os_str().is_empty() && graph.cache_root.exists() {
            removed_entries = count_entries(&graph.cache_root);
            std::fs::remove_dir_all(&graph.cache_root)?;
            std::fs::create_dir_all(&graph.cache_root)?;
        }
        debug!(removed_entries, root = %graph.cache_root.display(), "cleared drive cache");
        Ok(DriveClearResult { removed_entries })
    }

    /// Drops every node's in-memory `cached_output`.
    pub fn clear_memory_cache(&self, graph: &GraphModel) -> MemoryClearResult {
        let mut cleared_nodes = 0;
        for id in graph.node_ids() {
            let had_output = graph.with_node_mut(id, |n| n.cached_output.take().is_some()).unwrap_or(false);
            if had_output {
                cleared_nodes += 1;
            }
        }
        MemoryClearResult { cleared_nodes }
    }

    /// Clears both the disk and memory caches.
    pub fn clear_cache(&self, graph: &GraphModel) -> GraphResult<()> {
        self.clear_drive_cache(graph)?;
        self.clear_memory_cache(graph);
        Ok(())
    }

    /// Saves every node that currently has a memory-cached output.
    pub fn cache_all_nodes(&self, graph: &GraphModel, precision: CachePrecision) -> GraphResult<CacheSaveResult> {
        let mut saved_nodes = 0;
        for node in graph.all_nodes() {
            if node.cached_output.is_some() {
                self.save_cache_if_configured(graph, node.id, precision)?;
                saved_nodes += 1;
            }
        }
        Ok(CacheSaveResult { saved_nodes })
    }

    /// Drops every non-terminal node's memory-cached output — the graph's
    /// own output nodes (those never consumed as another node's input) are
    /// left alone since a caller is likely to read them next.
    pub fn free_transient_memory(&self, graph: &GraphModel) -> MemoryClearResult {
        let ends: std::collections::HashSet<i64> = ending_nodes(graph).into_iter().collect();
        let mut cleared_nodes = 0;
        for id in graph.node_ids() {
            if ends.contains(&id) {
                continue;
            }
            let had_output = graph.with_node_mut(id, |n| n.cached_output.take().is_some()).unwrap_or(false);
            if had_output {
                cleared_nodes += 1;
            }
        }
        MemoryClearResult { cleared_nodes }
    }

    /// Saves every memory-cached node to disk, then removes any on-disk
    /// cache directory belonging to a node that has no memory-cached
    /// output — an orphan left behind by a previous run whose node is no
    /// longer (or not yet) populated.
    pub fn synchronize_disk_cache(&self, graph: &GraphModel, precision: CachePrecision) -> GraphResult<DiskSyncResult> {
        let saved_nodes = self.cache_all_nodes(graph, precision)?.saved_nodes;
        let mut removed_files = 0u64;
        let mut removed_dirs = 0u64;

        for node in graph.all_nodes() {
            if node.cached_output.is_some() || node.caches.is_empty() {
                continue;
            }
            let dir_path = self.node_cache_dir(graph, node.id);
            if !dir_path.exists() {
                continue;
            }
            for entry in &node.caches {
                if entry.location.is_empty() {
                    continue;
                }
                let cache_file = dir_path.join(&entry.location);
                let meta_file = cache_file.with_extension("yml");
                if cache_file.exists() {
                    std::fs::remove_file(&cache_file)?;
                    removed_files += 1;
                }
                if meta_file.exists() {
                    std::fs::remove_file(&meta_file)?;
                    removed_files += 1;
                }
            }
            if dir_path.read_dir().map(|mut d| d.next().is_none()).unwrap_or(false) {
                std::fs::remove_dir(&dir_path)?;
                removed_dirs += 1;
            }
        }

        Ok(DiskSyncResult {
            saved_nodes,
            removed_files,
            removed_dirs,
        })
    }
}

fn count_entries(root: &std::path::Path) -> u64 {
    walkdir_count(root)
}

fn walkdir_count(path: &std::path::Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    let mut count = 0;
    for entry in entries.flatten() {
        count += 1;
        if entry.path().is_dir() {
            count += walkdir_count(&entry.path());
        }
    }
    count
}
