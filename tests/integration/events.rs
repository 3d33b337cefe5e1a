use std::sync::Arc;

use nodegraph::testkit::SampleTypes;
use nodegraph::{
    Graph, GraphOptions, NodeEvent, NodeEventListener, NodeRef, Result, ZeroUsagesAction,
};
use parking_lot::Mutex;

type Log = Arc<Mutex<Vec<(NodeEvent, NodeRef)>>>;

struct Recorder {
    log: Log,
}

impl NodeEventListener for Recorder {
    fn changed(&mut self, _graph: &Graph, event: NodeEvent, node: NodeRef) {
        self.log.lock().push((event, node));
    }
}

fn recorder(graph: &mut Graph) -> Log {
    let log = Log::default();
    graph.track_events(Box::new(Recorder { log: log.clone() }));
    log
}

#[test]
fn input_change_precedes_zero_usages() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let old = types.constant(&mut graph, 1)?;
    let new = types.constant(&mut graph, 2)?;
    let x = graph.build(&types.neg).input("value", old).add_or_unique()?;
    let log = recorder(&mut graph);

    graph.set_input(x, 0, Some(new))?;
    assert_eq!(
        *log.lock(),
        vec![(NodeEvent::InputChanged, x), (NodeEvent::ZeroUsages, old)]
    );
    Ok(())
}

#[test]
fn remaining_usages_suppress_zero_usages() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let old = types.constant(&mut graph, 1)?;
    let new = types.constant(&mut graph, 2)?;
    let x = types.add(&mut graph, old, old)?;
    let log = recorder(&mut graph);

    graph.set_input(x, 0, Some(new))?;
    assert_eq!(*log.lock(), vec![(NodeEvent::InputChanged, x)]);

    graph.set_input(x, 1, Some(new))?;
    assert_eq!(
        log.lock().last(),
        Some(&(NodeEvent::ZeroUsages, old)),
        "last usage gone"
    );
    Ok(())
}

#[test]
fn lifecycle_events_are_reported() -> Result<()> {
    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let log = recorder(&mut graph);
    let phi = types.phi(&mut graph, &[])?;
    graph.begin_decoding_fields(phi)?;
    graph.end_decoding_fields(phi)?;
    graph.safe_delete(phi)?;
    assert_eq!(
        *log.lock(),
        vec![
            (NodeEvent::NodeAdded, phi),
            (NodeEvent::BeforeDecodingFields, phi),
            (NodeEvent::AfterDecodingFields, phi),
            (NodeEvent::NodeRemoved, phi),
        ]
    );
    Ok(())
}

#[test]
fn newest_listener_runs_first() -> Result<()> {
    struct Tagged {
        tag: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    impl NodeEventListener for Tagged {
        fn node_added(&mut self, _graph: &Graph, _node: NodeRef) {
            self.order.lock().push(self.tag);
        }
    }

    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let first = graph.track_events(Box::new(Tagged {
        tag: "first",
        order: order.clone(),
    }));
    graph.track_events(Box::new(Tagged {
        tag: "second",
        order: order.clone(),
    }));
    types.phi(&mut graph, &[])?;
    assert_eq!(*order.lock(), vec!["second", "first"]);

    assert!(graph.untrack_events(first).is_some());
    assert!(graph.untrack_events(first).is_none());
    types.phi(&mut graph, &[])?;
    assert_eq!(*order.lock(), vec!["second", "first", "second"]);
    Ok(())
}

#[test]
fn listeners_can_delete_dead_values() -> Result<()> {
    struct Sweeper {
        swept: Arc<Mutex<Vec<NodeRef>>>,
    }

    impl NodeEventListener for Sweeper {
        fn usages_dropped_to_zero(&mut self, graph: &Graph, node: NodeRef) -> ZeroUsagesAction {
            if graph.node_type(node).is_value_numberable() {
                self.swept.lock().push(node);
                ZeroUsagesAction::Delete
            } else {
                ZeroUsagesAction::Keep
            }
        }
    }

    let types = SampleTypes::new()?;
    let mut graph = types.graph(GraphOptions::new().verify_graph_edges(true));
    let one = types.constant(&mut graph, 1)?;
    let two = types.constant(&mut graph, 2)?;
    let sum = types.add(&mut graph, one, two)?;
    let root = types.phi(&mut graph, &[sum])?;
    let swept = Arc::new(Mutex::new(Vec::new()));
    graph.track_events(Box::new(Sweeper {
        swept: swept.clone(),
    }));

    let values = graph.input_list(root, 0)?;
    graph.list_clear(values)?;
    assert_eq!(*swept.lock(), vec![sum, one, two]);
    assert_eq!(graph.node_count(), 1);
    graph.verify()
}
