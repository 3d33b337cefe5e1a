use std::sync::Arc;

use nodegraph::testkit::SampleTypes;
use nodegraph::{Graph, GraphError, GraphOptions, NodeRef, Result};
use rustc_hash::FxHashMap;

/// start -> call(f, [p0, p0 + 1]) -> link, with p0 + 1 feeding a phi.
fn program(types: &SampleTypes, graph: &mut Graph) -> Result<Vec<NodeRef>> {
    let p0 = types.param(graph, 0)?;
    let one = types.constant(graph, 1)?;
    let sum = types.add(graph, p0, one)?;
    let phi = types.phi(graph, &[sum, p0])?;
    let tail = graph.build(&types.link).data("index", 1).add()?;
    let call = graph
        .build(&types.call)
        .data("target", "f")
        .inputs("args", [p0, sum])
        .successor("next", tail)
        .add()?;
    let start = graph.build(&types.start).successor("next", call).add()?;
    Ok(vec![p0, one, sum, phi, tail, call, start])
}

#[test]
fn copy_reproduces_structure() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new().verify_graph_edges(true));
    let nodes = program(&types, &mut graph)?;
    let (copy, map) = graph.copy()?;

    assert_eq!(copy.node_count(), graph.node_count());
    assert_eq!(map.len(), nodes.len());
    for &node in &nodes {
        let twin = map.get(node).expect("every node is mapped");
        assert_eq!(copy.node_type(twin).id(), graph.node_type(node).id());
        assert_eq!(copy.data(twin), graph.data(node));
        let inputs: Vec<NodeRef> = graph.inputs(node).filter_map(|n| map.get(n)).collect();
        assert_eq!(copy.inputs(twin).collect::<Vec<_>>(), inputs);
        let successors: Vec<NodeRef> = graph.successors(node).filter_map(|n| map.get(n)).collect();
        assert_eq!(copy.successors(twin).collect::<Vec<_>>(), successors);
        assert_eq!(copy.usage_count(twin), graph.usage_count(node));
    }
    copy.verify()?;
    graph.verify()
}

#[test]
fn partial_duplicates_drop_outside_edges_across_graphs() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut source = types.graph(GraphOptions::new());
    let nodes = program(&types, &mut source)?;
    let (sum, phi) = (nodes[2], nodes[3]);

    let mut target = types.graph(GraphOptions::new());
    let map = target.add_duplicates(&source, &[sum, phi], None, 2)?;
    let sum_copy = map.get(sum).expect("sum copied");
    let phi_copy = map.get(phi).expect("phi copied");
    assert_eq!(target.input(sum_copy, 0), None);
    assert_eq!(target.input(sum_copy, 1), None);
    let values = target.input_list(phi_copy, 0)?;
    assert_eq!(target.list_items(values), &[Some(sum_copy), None]);
    target.verify()
}

#[test]
fn map_replacements_reconnect_outside_edges() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut source = types.graph(GraphOptions::new());
    let nodes = program(&types, &mut source)?;
    let (p0, one, sum) = (nodes[0], nodes[1], nodes[2]);

    let mut target = types.graph(GraphOptions::new());
    let stand_in = types.param(&mut target, 7)?;
    let seven = types.constant(&mut target, 7)?;
    let mut replacements = FxHashMap::default();
    replacements.insert(p0, stand_in);
    replacements.insert(one, seven);

    let map = target.add_duplicates(&source, &[sum], Some(&mut replacements), 1)?;
    let copy = map.get(sum).expect("sum copied");
    assert_eq!(target.input(copy, 0), Some(stand_in));
    assert_eq!(target.input(copy, 1), Some(seven));
    assert_eq!(target.usages(seven), &[copy]);
    target.verify()
}

#[test]
fn leaves_are_shared_with_the_target_cache() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut source = types.graph(GraphOptions::new());
    let one = types.constant(&mut source, 1)?;

    let mut target = types.graph(GraphOptions::new());
    let existing = types.constant(&mut target, 1)?;
    let map = target.add_duplicates(&source, &[one], None, 1)?;
    assert_eq!(map.get(one), Some(existing));
    assert_eq!(target.node_count(), 1);
    Ok(())
}

#[test]
fn foreign_registries_are_rejected() -> Result<()> {
    let types = SampleTypes::new()?;
    let other = SampleTypes::new()?;
    assert!(!Arc::ptr_eq(&types.registry, &other.registry));
    let mut source = types.graph(GraphOptions::new());
    let node = types.phi(&mut source, &[])?;
    let mut target = other.graph(GraphOptions::new());
    let err = target.add_duplicates(&source, &[node], None, 1);
    assert!(matches!(err, Err(GraphError::Config(_))));
    Ok(())
}

#[test]
fn successors_inside_the_set_keep_one_predecessor() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let chain = types.chain(&mut graph, 3)?;
    let map = graph.duplicate(&chain[1..], None, 3)?;
    let copies: Vec<NodeRef> = chain[1..].iter().filter_map(|&n| map.get(n)).collect();
    assert_eq!(copies.len(), 3);
    assert_eq!(graph.predecessor(copies[0]), None);
    assert_eq!(graph.predecessor(copies[1]), Some(copies[0]));
    assert_eq!(graph.predecessor(copies[2]), Some(copies[1]));
    assert_eq!(graph.predecessor(chain[2]), Some(chain[1]));
    graph.verify()
}
