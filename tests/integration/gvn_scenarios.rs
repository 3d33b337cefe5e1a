use std::sync::Arc;

use nodegraph::{
    DataKind, Graph, GraphOptions, InputType, NodeRef, NodeType, NodeTypeDescriptor, Result,
    TypeRegistry,
};

struct Arith {
    constant: Arc<NodeType>,
    add: Arc<NodeType>,
}

fn arith() -> Result<(Arith, Graph)> {
    let registry = Arc::new(TypeRegistry::new());
    let constant = registry.register(
        NodeTypeDescriptor::new("Const")
            .data("value", DataKind::Int)
            .value_numberable(),
    )?;
    let add = registry.register(
        NodeTypeDescriptor::new("Add")
            .input("a", InputType::Value)
            .input("b", InputType::Value)
            .value_numberable(),
    )?;
    let graph = Graph::new(registry, GraphOptions::new().verify_graph_edges(true));
    Ok((Arith { constant, add }, graph))
}

fn detached_const(graph: &mut Graph, types: &Arith, value: i32) -> Result<NodeRef> {
    graph.build(&types.constant).data("value", value).finish()
}

#[test]
fn unique_returns_the_cached_leaf() -> Result<()> {
    let (types, mut graph) = arith()?;
    let first = detached_const(&mut graph, &types, 1)?;
    let first = graph.unique(first)?;
    let second = detached_const(&mut graph, &types, 1)?;
    assert_eq!(graph.unique(second)?, first, "second unique should hit");
    assert!(graph.is_unregistered(second));
    assert_eq!(graph.node_count(), 1);
    Ok(())
}

#[test]
fn nested_registration_deduplicates_every_level() -> Result<()> {
    let (types, mut graph) = arith()?;
    let one = detached_const(&mut graph, &types, 1)?;
    let two = detached_const(&mut graph, &types, 2)?;
    let sum = graph
        .build(&types.add)
        .input("a", one)
        .input("b", two)
        .add_or_unique_with_inputs()?;
    assert_eq!(graph.node_count(), 3);

    let one_again = detached_const(&mut graph, &types, 1)?;
    let two_again = detached_const(&mut graph, &types, 2)?;
    let sum_again = graph
        .build(&types.add)
        .input("a", one_again)
        .input("b", two_again)
        .add_or_unique_with_inputs()?;
    assert_eq!(sum_again, sum);
    assert_eq!(graph.node_count(), 3, "expected Const(1), Const(2), Add only");
    graph.verify()
}

#[test]
fn heavily_shared_inputs_still_find_duplicates() -> Result<()> {
    let (types, mut graph) = arith()?;
    let one = graph.build(&types.constant).data("value", 1).unique()?;
    let mut sums = Vec::new();
    for value in 2..40 {
        let other = graph.build(&types.constant).data("value", value).unique()?;
        sums.push(
            graph
                .build(&types.add)
                .input("a", one)
                .input("b", other)
                .add_or_unique()?,
        );
    }
    let last = graph.build(&types.constant).data("value", 39).unique()?;
    let again = graph
        .build(&types.add)
        .input("a", one)
        .input("b", last)
        .add_or_unique()?;
    assert_eq!(Some(&again), sums.last());
    Ok(())
}

#[test]
fn deleted_nodes_drop_out_of_value_numbering() -> Result<()> {
    let (types, mut graph) = arith()?;
    let one = graph.build(&types.constant).data("value", 1).unique()?;
    let sum = graph
        .build(&types.add)
        .input("a", one)
        .input("b", one)
        .add_or_unique()?;
    graph.safe_delete(sum)?;
    let fresh = graph
        .build(&types.add)
        .input("a", one)
        .input("b", one)
        .add_or_unique()?;
    assert_ne!(fresh, sum);
    assert_eq!(graph.usages(one), &[fresh, fresh]);
    graph.verify()
}
