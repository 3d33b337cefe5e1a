use rustc_hash::FxHashMap;

use super::node::NodeState;
use super::Graph;
use crate::error::{GraphError, Result};
use crate::nodeclass::EdgeKind;
use crate::types::NodeRef;

impl Graph {
    /// Checks the structural invariants of the graph.
    ///
    /// Does nothing unless `verify_graphs` is set. With `verify_graph_edges`
    /// usage multiplicities are compared exactly, input kinds are checked
    /// against the allowed usage types of their targets, and required direct
    /// inputs must be set.
    pub fn verify(&self) -> Result<()> {
        if !self.options.verify_graphs {
            return Ok(());
        }
        self.verify_table()?;
        for node in self.nodes() {
            self.verify_node(node)?;
        }
        self.verify_iterable_chains()
    }

    fn fail(&self, message: String) -> GraphError {
        GraphError::Verification(format!(
            "graph {}: {message}",
            self.options.name.as_deref().unwrap_or("<unnamed>")
        ))
    }

    fn verify_table(&self) -> Result<()> {
        let mut live = 0;
        for (index, slot) in self.table.iter().enumerate() {
            let Some(node) = slot else {
                continue;
            };
            live += 1;
            match self.state(*node) {
                NodeState::Alive(id) if id.as_usize() == index => {}
                state => {
                    return Err(self.fail(format!("{node} in table slot {index} has state {state:?}")));
                }
            }
        }
        if live != self.node_count() {
            return Err(self.fail(format!(
                "{live} live table slots but node count is {}",
                self.node_count()
            )));
        }
        let alive_records = self.store.iter().filter(|record| record.is_alive()).count();
        if alive_records != live {
            return Err(self.fail(format!(
                "{alive_records} live records but {live} live table slots"
            )));
        }
        Ok(())
    }

    fn verify_node(&self, node: NodeRef) -> Result<()> {
        let ty = self.node_type(node);
        let exact = self.options.verify_graph_edges;

        let mut input_counts: FxHashMap<NodeRef, usize> = FxHashMap::default();
        for pos in self.input_positions(node) {
            let Some(input) = self.get_at(node, pos) else {
                if exact && pos.sub_index.is_none() {
                    let slot = ty.edges(EdgeKind::Inputs).slot(pos.slot);
                    if slot.is_some_and(|slot| !slot.is_optional()) {
                        return Err(self.fail(format!(
                            "required input {pos} of {} is empty",
                            self.describe(node)
                        )));
                    }
                }
                continue;
            };
            if !self.is_alive(input) {
                return Err(self.fail(format!(
                    "input {pos} of {} points at dead node {input}",
                    self.describe(node)
                )));
            }
            if exact {
                if let Some(kind) = self.input_type_at(node, pos) {
                    if !self.node_type(input).allows_usage_as(kind) {
                        return Err(self.fail(format!(
                            "{} cannot be used as {kind:?} input {pos} of {}",
                            self.describe(input),
                            self.describe(node)
                        )));
                    }
                }
            }
            *input_counts.entry(input).or_default() += 1;
        }
        for (input, count) in input_counts {
            let usages = self.usages(input).iter().filter(|usage| **usage == node).count();
            let consistent = if exact { usages == count } else { usages > 0 };
            if !consistent {
                return Err(self.fail(format!(
                    "{} is used {count} times by {} but records {usages} usages",
                    self.describe(input),
                    self.describe(node)
                )));
            }
        }

        for &usage in self.usages(node) {
            if !self.is_alive(usage) || !self.has_input(usage, node) {
                return Err(self.fail(format!(
                    "{} lists usage {} that does not use it",
                    self.describe(node),
                    self.describe(usage)
                )));
            }
        }

        for successor in self.successors(node) {
            if !self.is_alive(successor) {
                return Err(self.fail(format!(
                    "successor {successor} of {} is dead",
                    self.describe(node)
                )));
            }
            if self.predecessor(successor) != Some(node) {
                return Err(self.fail(format!(
                    "successor {} of {} has predecessor {:?}",
                    self.describe(successor),
                    self.describe(node),
                    self.predecessor(successor)
                )));
            }
        }
        if let Some(predecessor) = self.predecessor(node) {
            if !self.is_alive(predecessor) || !self.successors(predecessor).any(|s| s == node) {
                return Err(self.fail(format!(
                    "predecessor {predecessor} of {} does not hold it as successor",
                    self.describe(node)
                )));
            }
        }
        Ok(())
    }

    fn verify_iterable_chains(&self) -> Result<()> {
        let mut expected = vec![0usize; self.registry.iterable_type_count()];
        for node in self.nodes() {
            if let Some(iterable) = self.node_type(node).iterable_id() {
                if let Some(count) = expected.get_mut(iterable as usize) {
                    *count += 1;
                }
            }
        }
        for (iterable, expected) in expected.into_iter().enumerate() {
            let mut found = 0;
            let mut current = self.iterable_start(iterable as u32);
            while current != super::node::NO_NODE {
                found += 1;
                current = self.iterable_next(self.handle(current as usize));
            }
            if found != expected {
                return Err(self.fail(format!(
                    "iterable chain {iterable} reaches {found} of {expected} live nodes"
                )));
            }
        }
        Ok(())
    }
}
