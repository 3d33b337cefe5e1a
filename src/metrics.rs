use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trait for tracking graph maintenance work.
///
/// Implementations receive callbacks when nodes enter or leave a graph, when
/// the node table is compacted, when the leaf value-numbering cache changes
/// size and when a subgraph is duplicated. They must be cheap; the graph calls
/// them inline.
pub trait GraphMetrics: Send + Sync {
    /// Records the registration of a node.
    fn node_added(&self);

    /// Records the deletion of a node.
    fn node_removed(&self);

    /// Records a compaction that kept `live` nodes and reclaimed `reclaimed` slots.
    fn graph_compressed(&self, live: usize, reclaimed: usize);

    /// Reports the number of entries in the leaf cache after an insertion.
    fn gvn_cache_size(&self, entries: usize);

    /// Records a duplication of `nodes` nodes that took `elapsed`.
    fn duplication(&self, nodes: usize, elapsed: Duration);
}

/// A no-op implementation of [`GraphMetrics`].
#[derive(Default)]
pub struct NoopMetrics;

impl GraphMetrics for NoopMetrics {
    fn node_added(&self) {}
    fn node_removed(&self) {}
    fn graph_compressed(&self, _live: usize, _reclaimed: usize) {}
    fn gvn_cache_size(&self, _entries: usize) {}
    fn duplication(&self, _nodes: usize, _elapsed: Duration) {}
}

/// A thread-safe counter-based implementation of [`GraphMetrics`].
///
/// Counters use relaxed atomics and may be read from any thread while graphs
/// keep updating them.
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of nodes registered.
    pub nodes_added: AtomicU64,

    /// Number of nodes deleted.
    pub nodes_removed: AtomicU64,

    /// Number of compactions that moved nodes.
    pub compressions: AtomicU64,

    /// Total table slots reclaimed by compaction.
    pub slots_reclaimed: AtomicU64,

    /// Largest leaf cache size observed.
    pub gvn_cache_peak: AtomicU64,

    /// Number of duplication operations.
    pub duplications: AtomicU64,

    /// Total nodes produced by duplication.
    pub duplicated_nodes: AtomicU64,

    /// Total time spent duplicating, in microseconds.
    pub duplication_micros: AtomicU64,
}

impl GraphMetrics for CounterMetrics {
    fn node_added(&self) {
        self.nodes_added.fetch_add(1, Ordering::Relaxed);
    }

    fn node_removed(&self) {
        self.nodes_removed.fetch_add(1, Ordering::Relaxed);
    }

    fn graph_compressed(&self, _live: usize, reclaimed: usize) {
        self.compressions.fetch_add(1, Ordering::Relaxed);
        self.slots_reclaimed
            .fetch_add(reclaimed as u64, Ordering::Relaxed);
    }

    fn gvn_cache_size(&self, entries: usize) {
        self.gvn_cache_peak
            .fetch_max(entries as u64, Ordering::Relaxed);
    }

    fn duplication(&self, nodes: usize, elapsed: Duration) {
        self.duplications.fetch_add(1, Ordering::Relaxed);
        self.duplicated_nodes
            .fetch_add(nodes as u64, Ordering::Relaxed);
        self.duplication_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation wrapped in an [`Arc`].
///
/// The default implementation is [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn GraphMetrics> {
    Arc::new(NoopMetrics)
}
