use nodegraph::testkit::SampleTypes;
use nodegraph::worklist::EXPLICIT_BITMAP_THRESHOLD;
use nodegraph::{
    GraphError, GraphOptions, IterativeNodeWorkList, NodeFlood, NodeRef, Result,
    SingletonNodeWorkList,
};

#[test]
fn flood_visits_each_input_once() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let one = types.constant(&mut graph, 1)?;
    let two = types.constant(&mut graph, 2)?;
    let sum = types.add(&mut graph, one, two)?;
    let diff = types.sub(&mut graph, sum, one)?;
    let root = types.phi(&mut graph, &[sum, diff, one])?;
    let unrelated = types.constant(&mut graph, 3)?;

    let mut flood = NodeFlood::new(&graph);
    flood.add(&graph, root)?;
    let mut order = Vec::new();
    let mut inputs = Vec::new();
    while let Some(node) = flood.pop() {
        order.push(node);
        inputs.clear();
        graph.push_inputs(node, &mut inputs);
        flood.add_all(&graph, inputs.iter().copied())?;
    }
    assert_eq!(order, vec![root, sum, diff, one, two]);
    assert_eq!(flood.total_marked(), 5);
    assert!(!flood.is_marked(unrelated));
    Ok(())
}

#[test]
fn flood_rejects_dead_nodes() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let phi = types.phi(&mut graph, &[])?;
    graph.safe_delete(phi)?;
    let mut flood = NodeFlood::new(&graph);
    assert!(matches!(flood.add(&graph, phi), Err(GraphError::NotAlive(_))));
    Ok(())
}

#[test]
fn singleton_list_skips_nodes_deleted_while_queued() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let phis: Vec<NodeRef> = (0..4)
        .map(|_| types.phi(&mut graph, &[]))
        .collect::<Result<_>>()?;
    let mut list = SingletonNodeWorkList::filled(&graph);
    graph.safe_delete(phis[1])?;

    let mut seen = Vec::new();
    while let Some(node) = list.next(&graph) {
        seen.push(node);
        list.add(&graph, node);
    }
    assert_eq!(seen, vec![phis[0], phis[2], phis[3]]);
    assert!(list.is_marked(phis[1]));
    Ok(())
}

#[test]
fn iterative_list_requeues_and_switches_to_a_bitmap() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let phis: Vec<NodeRef> = (0..EXPLICIT_BITMAP_THRESHOLD + 5)
        .map(|_| types.phi(&mut graph, &[]))
        .collect::<Result<_>>()?;

    let mut list = IterativeNodeWorkList::new(&graph, 2);
    for &phi in &phis[..EXPLICIT_BITMAP_THRESHOLD] {
        list.add(&graph, phi);
    }
    assert!(!list.uses_bitmap());
    list.add_all(&graph, phis.iter().copied());
    assert!(list.uses_bitmap());
    assert_eq!(list.len(), phis.len());

    let first = list.next(&graph).expect("queued");
    assert_eq!(first, phis[0]);
    list.add(&graph, first);
    list.add(&graph, phis[1]);
    assert_eq!(list.len(), phis.len());
    Ok(())
}

#[test]
fn iterative_list_stops_at_the_iteration_limit() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let a = types.phi(&mut graph, &[])?;
    let b = types.phi(&mut graph, &[])?;
    let mut list = IterativeNodeWorkList::filled(&graph, 3);
    assert_eq!(list.iterations_left(), 6);

    let mut pulls = 0;
    while let Some(node) = list.next(&graph) {
        pulls += 1;
        list.add(&graph, if node == a { b } else { a });
    }
    assert_eq!(pulls, 6);
    assert!(!list.is_empty());
    assert_eq!(list.next(&graph), None);
    Ok(())
}

#[cfg(debug_assertions)]
#[test]
fn iterative_list_flags_unchanged_requeues() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let one = types.constant(&mut graph, 1)?;
    types.phi(&mut graph, &[one])?;
    let mut list = IterativeNodeWorkList::new(&graph, 10);
    list.add(&graph, one);

    for _ in 0..2 {
        let node = list.next(&graph).expect("queued");
        list.add(&graph, node);
    }
    assert_eq!(list.suspected_infinite_work(), Some(one));
    Ok(())
}
