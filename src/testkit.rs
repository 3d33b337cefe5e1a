//! A small family of sample node types.
//!
//! The types model a toy compiler IR: constants and parameters as leaves,
//! arithmetic under an abstract binary parent, phis with input lists, a
//! control-flow chain, a branch, a switch, a memory store and a call. Tests,
//! benches and the diagnostic binary share them.

use std::sync::Arc;

use crate::error::Result;
use crate::graph::Graph;
use crate::nodeclass::{DataKind, InputType, NodeType, NodeTypeDescriptor, TypeRegistry};
use crate::options::GraphOptions;
use crate::types::NodeRef;

/// Sample types registered in their own registry.
#[derive(Clone, Debug)]
pub struct SampleTypes {
    /// Registry holding every sample type.
    pub registry: Arc<TypeRegistry>,
    /// `StartNode`: control-flow root with a `next` successor.
    pub start: Arc<NodeType>,
    /// `ConstNode {value: int}`: value-numbered leaf.
    pub constant: Arc<NodeType>,
    /// `ParamNode {index: int}`: iterable leaf with identity.
    pub param: Arc<NodeType>,
    /// `BinaryNode`: abstract parent with inputs `x` and `y`.
    pub binary: Arc<NodeType>,
    /// `AddNode`: commutative binary.
    pub add: Arc<NodeType>,
    /// `SubNode`: binary.
    pub sub: Arc<NodeType>,
    /// `CompareNode {op: int}`: binary usable as a condition.
    pub compare: Arc<NodeType>,
    /// `NegNode`: unary with input `value`.
    pub neg: Arc<NodeType>,
    /// `PhiNode`: input list `values`.
    pub phi: Arc<NodeType>,
    /// `LinkNode {index: int}`: iterable chain element with an optional
    /// `value` input and a `next` successor.
    pub link: Arc<NodeType>,
    /// `IfNode`: condition input and two successors.
    pub branch: Arc<NodeType>,
    /// `StoreNode`: memory kill with a `value` input and an optional `memory`
    /// input.
    pub store: Arc<NodeType>,
    /// `CallNode {target: string}`: argument list and a `next` successor.
    pub call: Arc<NodeType>,
    /// `SwitchNode`: `value` input and a `targets` successor list.
    pub switch: Arc<NodeType>,
}

impl SampleTypes {
    /// Registers the sample types in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Arc::new(TypeRegistry::new());
        let start = registry.register(
            NodeTypeDescriptor::new("StartNode")
                .successor("next")
                .iterable(),
        )?;
        let constant = registry.register(
            NodeTypeDescriptor::new("ConstNode")
                .data("value", DataKind::Int)
                .value_numberable()
                .name_template("C({value})"),
        )?;
        let param = registry.register(
            NodeTypeDescriptor::new("ParamNode")
                .data("index", DataKind::Int)
                .has_identity()
                .iterable(),
        )?;
        let binary = registry.register(
            NodeTypeDescriptor::new("BinaryNode")
                .input("x", InputType::Value)
                .input("y", InputType::Value)
                .value_numberable()
                .canonicalizable()
                .abstract_type(),
        )?;
        let add = registry.register(
            NodeTypeDescriptor::new("AddNode")
                .parent(&binary)
                .commutative()
                .iterable(),
        )?;
        let sub = registry.register(NodeTypeDescriptor::new("SubNode").parent(&binary))?;
        let compare = registry.register(
            NodeTypeDescriptor::new("CompareNode")
                .parent(&binary)
                .data("op", DataKind::Int)
                .allowed_usages(&[InputType::Condition]),
        )?;
        let neg = registry.register(
            NodeTypeDescriptor::new("NegNode")
                .input("value", InputType::Value)
                .value_numberable(),
        )?;
        let phi = registry.register(
            NodeTypeDescriptor::new("PhiNode")
                .input_list("values", InputType::Value)
                .iterable(),
        )?;
        let link = registry.register(
            NodeTypeDescriptor::new("LinkNode")
                .data("index", DataKind::Int)
                .optional_input("value", InputType::Value)
                .successor("next")
                .iterable(),
        )?;
        let branch = registry.register(
            NodeTypeDescriptor::new("IfNode")
                .input("condition", InputType::Condition)
                .successor("true_successor")
                .successor("false_successor"),
        )?;
        let store = registry.register(
            NodeTypeDescriptor::new("StoreNode")
                .input("value", InputType::Value)
                .optional_input("memory", InputType::Memory)
                .memory_kill()
                .allowed_usages(&[InputType::Memory]),
        )?;
        let call = registry.register(
            NodeTypeDescriptor::new("CallNode")
                .data("target", DataKind::Str)
                .input_list("args", InputType::Value)
                .successor("next")
                .iterable(),
        )?;
        let switch = registry.register(
            NodeTypeDescriptor::new("SwitchNode")
                .input("value", InputType::Value)
                .successor_list("targets"),
        )?;
        Ok(Self {
            registry,
            start,
            constant,
            param,
            binary,
            add,
            sub,
            compare,
            neg,
            phi,
            link,
            branch,
            store,
            call,
            switch,
        })
    }

    /// Empty graph over the sample registry.
    pub fn graph(&self, options: GraphOptions) -> Graph {
        Graph::new(Arc::clone(&self.registry), options)
    }

    /// Registers (or finds) the constant `value`.
    pub fn constant(&self, graph: &mut Graph, value: i32) -> Result<NodeRef> {
        graph.build(&self.constant).data("value", value).unique()
    }

    /// Registers a parameter with the given index.
    pub fn param(&self, graph: &mut Graph, index: i32) -> Result<NodeRef> {
        graph.build(&self.param).data("index", index).add()
    }

    /// Registers (or finds) `x + y`.
    pub fn add(&self, graph: &mut Graph, x: NodeRef, y: NodeRef) -> Result<NodeRef> {
        graph.build(&self.add).input("x", x).input("y", y).add_or_unique()
    }

    /// Registers (or finds) `x - y`.
    pub fn sub(&self, graph: &mut Graph, x: NodeRef, y: NodeRef) -> Result<NodeRef> {
        graph.build(&self.sub).input("x", x).input("y", y).add_or_unique()
    }

    /// Registers a phi over `values`.
    pub fn phi(&self, graph: &mut Graph, values: &[NodeRef]) -> Result<NodeRef> {
        graph
            .build(&self.phi)
            .inputs("values", values.iter().copied())
            .add()
    }

    /// Registers a control-flow chain of `len` links behind a start node and
    /// returns the start followed by the links in order.
    pub fn chain(&self, graph: &mut Graph, len: usize) -> Result<Vec<NodeRef>> {
        let mut nodes = Vec::with_capacity(len + 1);
        let mut next = None;
        let mut links = Vec::with_capacity(len);
        for index in (0..len).rev() {
            let link = graph
                .build(&self.link)
                .data("index", index as i32)
                .successor("next", next)
                .add()?;
            links.push(link);
            next = Some(link);
        }
        links.reverse();
        let start = graph.build(&self.start).successor("next", next).add()?;
        nodes.push(start);
        nodes.extend(links);
        Ok(nodes)
    }
}
