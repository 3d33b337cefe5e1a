use std::sync::Arc;

use super::Graph;
use crate::error::{GraphError, Result};
use crate::nodeclass::{DataValue, EdgeKind, NodeType, Position};
use crate::types::{NodeRef, SourcePosition};

enum PendingEdge {
    Direct(Option<NodeRef>),
    List(Vec<Option<NodeRef>>),
}

/// Fluent construction of a node by field name.
///
/// Unknown names and mismatched values are reported when the builder is
/// finished, so chains can be written without intermediate `?`.
///
/// ```ignore
/// let sum = graph
///     .build(&add)
///     .input("x", a)
///     .input("y", b)
///     .add_or_unique()?;
/// ```
pub struct NodeBuilder<'g> {
    graph: &'g mut Graph,
    ty: Arc<NodeType>,
    data: Vec<DataValue>,
    edges: Vec<(EdgeKind, usize, PendingEdge)>,
    position: Option<SourcePosition>,
    error: Option<GraphError>,
}

impl<'g> NodeBuilder<'g> {
    pub(crate) fn new(graph: &'g mut Graph, ty: Arc<NodeType>) -> Self {
        let data = ty.data().defaults();
        Self {
            graph,
            ty,
            data,
            edges: Vec::new(),
            position: None,
            error: None,
        }
    }

    fn record_error(&mut self, error: GraphError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn slot(&mut self, kind: EdgeKind, name: &str, list: bool) -> Option<usize> {
        let layout = self.ty.edges(kind);
        match layout.index_of(name).and_then(|i| layout.slot(i).map(|s| (i, s.is_list()))) {
            Some((index, is_list)) if is_list == list => Some(index),
            Some(_) => {
                let shape = if list { "list" } else { "direct" };
                let error = GraphError::layout(self.ty.name(), format!("slot {name} is not a {shape} slot"));
                self.record_error(error);
                None
            }
            None => {
                let error = GraphError::layout(self.ty.name(), format!("no {kind:?} slot named {name}"));
                self.record_error(error);
                None
            }
        }
    }

    /// Sets the data field called `name`.
    pub fn data(mut self, name: &str, value: impl Into<DataValue>) -> Self {
        match self.ty.data().index_of(name) {
            Some(index) => self.data[index] = value.into(),
            None => {
                let error = GraphError::layout(self.ty.name(), format!("no data field named {name}"));
                self.record_error(error);
            }
        }
        self
    }

    /// Sets the direct input called `name`.
    pub fn input(mut self, name: &str, node: impl Into<Option<NodeRef>>) -> Self {
        if let Some(slot) = self.slot(EdgeKind::Inputs, name, false) {
            self.edges
                .push((EdgeKind::Inputs, slot, PendingEdge::Direct(node.into())));
        }
        self
    }

    /// Fills the input list called `name`.
    pub fn inputs(mut self, name: &str, nodes: impl IntoIterator<Item = NodeRef>) -> Self {
        if let Some(slot) = self.slot(EdgeKind::Inputs, name, true) {
            let items = nodes.into_iter().map(Some).collect();
            self.edges
                .push((EdgeKind::Inputs, slot, PendingEdge::List(items)));
        }
        self
    }

    /// Sets the direct successor called `name`.
    pub fn successor(mut self, name: &str, node: impl Into<Option<NodeRef>>) -> Self {
        if let Some(slot) = self.slot(EdgeKind::Successors, name, false) {
            self.edges
                .push((EdgeKind::Successors, slot, PendingEdge::Direct(node.into())));
        }
        self
    }

    /// Fills the successor list called `name`.
    pub fn successors(mut self, name: &str, nodes: impl IntoIterator<Item = NodeRef>) -> Self {
        if let Some(slot) = self.slot(EdgeKind::Successors, name, true) {
            let items = nodes.into_iter().map(Some).collect();
            self.edges
                .push((EdgeKind::Successors, slot, PendingEdge::List(items)));
        }
        self
    }

    /// Source position of the new node.
    pub fn position(mut self, position: SourcePosition) -> Self {
        self.position = Some(position);
        self
    }

    fn create(self) -> Result<(&'g mut Graph, NodeRef)> {
        let NodeBuilder {
            graph,
            ty,
            data,
            edges,
            position,
            error,
        } = self;
        if let Some(error) = error {
            return Err(error);
        }
        let node = graph.create_node(&ty, data)?;
        for (kind, slot, edge) in edges {
            match edge {
                PendingEdge::Direct(value) => {
                    graph.set_at(node, Position::direct(kind, slot), value)?;
                }
                PendingEdge::List(items) => {
                    let list = graph.list(node, kind, slot)?;
                    graph.list_assign(list, &items)?;
                }
            }
        }
        if position.is_some() {
            graph.set_source_position(node, position)?;
        }
        Ok((graph, node))
    }

    /// Creates the node without registering it.
    pub fn finish(self) -> Result<NodeRef> {
        self.create().map(|(_, node)| node)
    }

    /// Creates and registers the node with [`Graph::add`].
    pub fn add(self) -> Result<NodeRef> {
        let (graph, node) = self.create()?;
        graph.add(node)
    }

    /// Creates and registers the node with [`Graph::add_without_unique`].
    pub fn add_without_unique(self) -> Result<NodeRef> {
        let (graph, node) = self.create()?;
        graph.add_without_unique(node)
    }

    /// Creates the node and passes it to [`Graph::unique`].
    pub fn unique(self) -> Result<NodeRef> {
        let (graph, node) = self.create()?;
        graph.unique(node)
    }

    /// Creates the node and passes it to [`Graph::add_or_unique`].
    pub fn add_or_unique(self) -> Result<NodeRef> {
        let (graph, node) = self.create()?;
        graph.add_or_unique(node)
    }

    /// Creates the node and passes it to
    /// [`Graph::add_or_unique_with_inputs`].
    pub fn add_or_unique_with_inputs(self) -> Result<NodeRef> {
        let (graph, node) = self.create()?;
        graph.add_or_unique_with_inputs(node)
    }
}
