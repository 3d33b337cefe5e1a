use nodegraph::testkit::SampleTypes;
use nodegraph::{GraphOptions, NodeId, NodeRef, Result};
use proptest::prelude::*;

#[test]
fn sparse_chain_is_compacted_below_threshold() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new().compression_threshold(70));
    let chain = types.chain(&mut graph, 9)?;
    assert_eq!(graph.node_count(), 10);

    // Splice out links 1..=6, keeping start, link 0 and the last two links.
    for &link in &chain[2..8] {
        let next = graph.successor(link, 0);
        graph.clear_successors(link)?;
        graph.replace_at_predecessor(link, next)?;
        graph.safe_delete(link)?;
    }
    assert_eq!(graph.node_count(), 4);
    assert_eq!(graph.nodes_deleted_since_last_compression(), 6);

    assert!(graph.maybe_compress()?, "40% live is below the 70% threshold");
    let ids: Vec<Option<NodeId>> = graph.nodes().map(|node| graph.id(node)).collect();
    assert_eq!(
        ids,
        vec![Some(NodeId(0)), Some(NodeId(1)), Some(NodeId(2)), Some(NodeId(3))]
    );
    assert_eq!(graph.total_nodes_deleted(), 6);
    assert_eq!(graph.nodes_deleted_since_last_compression(), 0);
    assert_eq!(graph.successor(chain[1], 0), Some(chain[8]));
    assert_eq!(graph.predecessor(chain[8]), Some(chain[1]));
    graph.verify()
}

#[test]
fn dense_graphs_are_left_alone() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new().compression_threshold(70));
    let chain = types.chain(&mut graph, 9)?;
    let last = chain[9];
    graph.clear_successors(chain[8])?;
    graph.safe_delete(last)?;
    assert!(!graph.maybe_compress()?, "90% live stays above the threshold");
    assert_eq!(graph.node_id_count(), 10);

    let disabled = types.graph(GraphOptions::new().compression_threshold(0));
    let mut disabled = disabled;
    let node = types.phi(&mut disabled, &[])?;
    disabled.safe_delete(node)?;
    assert!(!disabled.maybe_compress()?);
    Ok(())
}

#[test]
fn compaction_keeps_edges_addressable() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let garbage: Vec<NodeRef> = (0..20)
        .map(|i| types.param(&mut graph, i))
        .collect::<Result<_>>()?;
    let one = types.constant(&mut graph, 1)?;
    let two = types.constant(&mut graph, 2)?;
    let sum = types.add(&mut graph, one, two)?;
    let phi = types.phi(&mut graph, &[sum, one])?;
    for node in garbage {
        graph.safe_delete(node)?;
    }

    assert!(graph.compress(true)?);
    assert_eq!(graph.node_id_count(), 4);
    assert_eq!(graph.inputs(phi).collect::<Vec<_>>(), vec![sum, one]);
    assert_eq!(graph.usages(sum), &[phi]);
    assert_eq!(types.constant(&mut graph, 2)?, two);
    assert_eq!(types.add(&mut graph, one, two)?, sum);
    graph.verify()
}

proptest! {
    #[test]
    fn compaction_preserves_relative_order(deletions in prop::collection::vec(any::<bool>(), 1..120)) {
        let types = SampleTypes::new().unwrap();
        let mut graph = types.graph(GraphOptions::new());
        let nodes: Vec<NodeRef> = deletions
            .iter()
            .map(|_| types.phi(&mut graph, &[]).unwrap())
            .collect();
        for (node, delete) in nodes.iter().zip(&deletions) {
            if *delete {
                graph.safe_delete(*node).unwrap();
            }
        }
        let survivors: Vec<NodeRef> = graph.nodes().collect();
        graph.compress(true).unwrap();

        prop_assert_eq!(graph.nodes().collect::<Vec<_>>(), survivors.clone());
        for (index, node) in survivors.iter().enumerate() {
            prop_assert_eq!(graph.id(*node), Some(NodeId(index as u32)));
        }
        prop_assert_eq!(graph.iter_type(&types.phi).collect::<Vec<_>>(), survivors);
        prop_assert!(graph.verify().is_ok());
    }
}
