use crate::graph::Graph;
use crate::types::NodeRef;

const WORD_BITS: usize = 64;

/// Growable set of nodes backed by one bit per node handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeBitMap {
    words: Vec<u64>,
    marked: usize,
}

impl NodeBitMap {
    /// Empty map sized for the nodes currently allocated in `graph`.
    pub fn new(graph: &Graph) -> Self {
        Self::with_capacity(graph.allocated_nodes())
    }

    /// Empty map sized for `nodes` handles.
    pub fn with_capacity(nodes: usize) -> Self {
        Self {
            words: vec![0; nodes.div_ceil(WORD_BITS)],
            marked: 0,
        }
    }

    #[inline]
    fn locate(node: NodeRef) -> (usize, u64) {
        (node.index() / WORD_BITS, 1u64 << (node.index() % WORD_BITS))
    }

    /// Returns true if `node` is in the set.
    #[inline]
    pub fn is_marked(&self, node: NodeRef) -> bool {
        let (word, bit) = Self::locate(node);
        self.words.get(word).is_some_and(|w| w & bit != 0)
    }

    /// Adds `node`, growing the map if needed. Returns true if it was not
    /// marked before.
    pub fn mark(&mut self, node: NodeRef) -> bool {
        let (word, bit) = Self::locate(node);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let fresh = self.words[word] & bit == 0;
        if fresh {
            self.words[word] |= bit;
            self.marked += 1;
        }
        fresh
    }

    /// Removes `node`. Returns true if it was marked.
    pub fn clear(&mut self, node: NodeRef) -> bool {
        let (word, bit) = Self::locate(node);
        match self.words.get_mut(word) {
            Some(w) if *w & bit != 0 => {
                *w &= !bit;
                self.marked -= 1;
                true
            }
            _ => false,
        }
    }

    /// Removes every node, keeping the allocation.
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.marked = 0;
    }

    /// Number of marked nodes.
    pub fn count(&self) -> usize {
        self.marked
    }

    /// Returns true if no node is marked.
    pub fn is_empty(&self) -> bool {
        self.marked == 0
    }

    /// Marked nodes in slot order, as the current handles of `graph`.
    ///
    /// Marks are kept per arena slot; after a compaction reclaims slots, a
    /// map built earlier may name nodes that reused them.
    pub fn iter<'a>(&'a self, graph: &'a Graph) -> impl Iterator<Item = NodeRef> + 'a {
        let limit = graph.allocated_nodes();
        self.words.iter().enumerate().flat_map(move |(index, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || loop {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                let slot = index * WORD_BITS + bit;
                if slot < limit {
                    return Some(graph.handle(slot));
                }
            })
        })
    }
}
