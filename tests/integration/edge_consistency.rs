use std::collections::HashMap;

use nodegraph::testkit::SampleTypes;
use nodegraph::{Graph, GraphOptions, NodeRef};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum EdgeOp {
    SetInput { user: usize, slot: usize, value: usize },
    Append { phi: usize, value: usize },
    RemoveAt { phi: usize, index: usize },
    SetElement { phi: usize, index: usize, value: usize },
    ReplaceAtUsages { node: usize, by: usize },
    ClearInputs { user: usize },
}

fn arb_op() -> impl Strategy<Value = EdgeOp> {
    prop_oneof![
        (0usize..4, 0usize..2, 0usize..12)
            .prop_map(|(user, slot, value)| EdgeOp::SetInput { user, slot, value }),
        (0usize..4, 0usize..12).prop_map(|(phi, value)| EdgeOp::Append { phi, value }),
        (0usize..4, 0usize..8).prop_map(|(phi, index)| EdgeOp::RemoveAt { phi, index }),
        (0usize..4, 0usize..8, 0usize..12)
            .prop_map(|(phi, index, value)| EdgeOp::SetElement { phi, index, value }),
        (0usize..12, 0usize..12).prop_map(|(node, by)| EdgeOp::ReplaceAtUsages { node, by }),
        (0usize..4).prop_map(|user| EdgeOp::ClearInputs { user }),
    ]
}

struct Pool {
    sums: Vec<NodeRef>,
    phis: Vec<NodeRef>,
    all: Vec<NodeRef>,
}

fn pool(types: &SampleTypes, graph: &mut Graph) -> Pool {
    let constants: Vec<NodeRef> = (0..4)
        .map(|value| types.constant(graph, value).unwrap())
        .collect();
    let sums: Vec<NodeRef> = (0..4)
        .map(|i| types.add(graph, constants[i], constants[(i + 1) % 4]).unwrap())
        .collect();
    let phis: Vec<NodeRef> = (0..4)
        .map(|i| types.phi(graph, &[constants[i]]).unwrap())
        .collect();
    let all = constants
        .iter()
        .chain(&sums)
        .chain(&phis)
        .copied()
        .collect();
    Pool { sums, phis, all }
}

fn apply(graph: &mut Graph, pool: &Pool, op: &EdgeOp) {
    match *op {
        EdgeOp::SetInput { user, slot, value } => {
            let _ = graph.set_input(pool.sums[user], slot, Some(pool.all[value]));
        }
        EdgeOp::Append { phi, value } => {
            let list = graph.input_list(pool.phis[phi], 0).unwrap();
            graph.list_append(list, Some(pool.all[value])).unwrap();
        }
        EdgeOp::RemoveAt { phi, index } => {
            let list = graph.input_list(pool.phis[phi], 0).unwrap();
            if index < graph.list_len(list) {
                graph.list_remove_at(list, index).unwrap();
            }
        }
        EdgeOp::SetElement { phi, index, value } => {
            let list = graph.input_list(pool.phis[phi], 0).unwrap();
            if index < graph.list_len(list) {
                graph.list_set(list, index, Some(pool.all[value])).unwrap();
            }
        }
        EdgeOp::ReplaceAtUsages { node, by } => {
            if node != by {
                let _ = graph.replace_at_usages(pool.all[node], Some(pool.all[by]));
            }
        }
        EdgeOp::ClearInputs { user } => {
            graph.clear_inputs(pool.sums[user]).unwrap();
        }
    }
}

fn usage_multiset(graph: &Graph, node: NodeRef) -> HashMap<NodeRef, usize> {
    let mut counts = HashMap::new();
    for &user in graph.usages(node) {
        *counts.entry(user).or_insert(0) += 1;
    }
    counts
}

proptest! {
    #[test]
    fn usages_mirror_inputs(ops in prop::collection::vec(arb_op(), 1..60)) {
        let types = SampleTypes::new().unwrap();
        // Cleared inputs leave required slots empty, so only structural checks apply.
        let mut graph = types.graph(GraphOptions::new());
        let pool = pool(&types, &mut graph);
        for op in &ops {
            apply(&mut graph, &pool, op);
        }

        let mut expected: HashMap<NodeRef, HashMap<NodeRef, usize>> = HashMap::new();
        for user in graph.nodes() {
            for input in graph.inputs(user) {
                *expected.entry(input).or_default().entry(user).or_insert(0) += 1;
            }
        }
        for node in graph.nodes() {
            let want = expected.remove(&node).unwrap_or_default();
            prop_assert_eq!(usage_multiset(&graph, node), want);
        }
        prop_assert!(graph.verify().is_ok());
    }
}
