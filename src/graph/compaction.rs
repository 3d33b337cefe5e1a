use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use super::node::{NodeState, NO_NODE};
use super::Graph;
use crate::error::Result;
use crate::types::{NodeId, NodeRef};

impl Graph {
    /// Compacts the node table if the share of live ids fell below the
    /// configured threshold. Returns true if the table was renumbered.
    pub fn maybe_compress(&mut self) -> Result<bool> {
        self.compress(false)
    }

    /// Slides live nodes down to contiguous ids, keeping their relative order,
    /// and returns the arena slots of deleted nodes to the free list. Handles
    /// of those nodes keep reading as deleted; per-type chains are rebuilt
    /// from the new table.
    ///
    /// Without `minimize` this is a no-op while the graph is observed, when
    /// the threshold is 0, or while enough ids are live. With `minimize` the
    /// table is always compacted and spare capacity is released as well.
    pub fn compress(&mut self, minimize: bool) -> Result<bool> {
        self.check_mutable("compress")?;
        let total = self.table.len();
        let live = self.node_count();
        if !minimize {
            let threshold = self.options.compression_threshold as usize;
            if self.observed || total == 0 || threshold == 0 || live * 100 / total >= threshold {
                return Ok(false);
            }
        }

        let mut next = 0usize;
        for index in 0..total {
            let Some(node) = self.table[index] else {
                continue;
            };
            let record = &mut self.store[node.index()];
            record.state = NodeState::Alive(NodeId(next as u32));
            record.mod_count = 0;
            record.usage_mod_count = 0;
            self.table[next] = Some(node);
            next += 1;
        }
        debug_assert_eq!(next, live, "live count out of sync with the node table");
        self.table.truncate(next);

        let reclaimed = total - next;
        self.deleted_before_last_compression += self.deleted_since_last_compression;
        self.deleted_since_last_compression = 0;
        self.compressions += 1;

        let records = self.release_dead_records();
        self.rebuild_iterable_chains();
        if minimize {
            self.purge_leaf_cache();
            self.shrink_storage();
        }

        debug!(
            graph = ?self.options.name,
            live,
            total,
            reclaimed,
            records,
            minimize,
            compressions = self.compressions,
            "graph.compress"
        );
        self.metrics.graph_compressed(live, reclaimed);
        Ok(true)
    }

    /// Reclaims the records of nodes deleted since the last compaction and
    /// returns how many were freed.
    fn release_dead_records(&mut self) -> usize {
        let dead = std::mem::take(&mut self.deleted_records);
        for &index in &dead {
            self.reclaim_record(index as usize);
        }
        dead.len()
    }

    fn shrink_storage(&mut self) {
        for record in &mut self.store {
            if record.is_alive() {
                record.usages.shrink_to_fit();
            }
        }
        for list in &mut self.lists {
            list.items.shrink_to_fit();
        }
        self.table.shrink_to_fit();
        self.free_nodes.shrink_to_fit();
    }

    fn rebuild_iterable_chains(&mut self) {
        let count = self.registry.iterable_type_count();
        self.iterable_heads = (0..count).map(|_| AtomicU32::new(NO_NODE)).collect();
        self.iterable_tails = (0..count).map(|_| AtomicU32::new(NO_NODE)).collect();
        for record in &self.store {
            record.type_next.store(NO_NODE, Ordering::Relaxed);
        }
        let live: Vec<NodeRef> = self.table.iter().flatten().copied().collect();
        for node in live {
            self.link_iterable(node);
        }
    }
}
