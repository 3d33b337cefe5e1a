#![cfg(test)]

use super::*;
use crate::nodeclass::{InputType, Position};
use crate::testkit::SampleTypes;

fn setup() -> (SampleTypes, Graph) {
    let types = SampleTypes::new().unwrap();
    let graph = types.graph(GraphOptions::new().verify_graph_edges(true));
    (types, graph)
}

mod bookkeeping_tests {
    use super::*;
    use crate::nodeclass::EdgeKind;

    #[test]
    fn set_input_moves_the_usage() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let neg = graph.build(&types.neg).input("value", one).add_or_unique()?;
        assert_eq!(graph.usages(one), &[neg]);

        graph.set_input(neg, 0, Some(two))?;
        assert!(!graph.has_usages(one));
        assert_eq!(graph.usages(two), &[neg]);
        assert_eq!(graph.input_named(neg, "value"), Some(two));
        graph.verify()
    }

    #[test]
    fn detached_nodes_record_no_usages_until_registered() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let neg = graph.build(&types.neg).input("value", one).finish()?;
        assert!(graph.is_unregistered(neg));
        assert!(!graph.has_usages(one));

        graph.add_without_unique(neg)?;
        assert_eq!(graph.usages(one), &[neg]);
        graph.verify()
    }

    #[test]
    fn list_edits_replay_usages() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let phi = types.phi(&mut graph, &[one, one, two])?;
        assert_eq!(graph.usage_count(one), 2);

        let values = graph.input_list_named(phi, "values")?;
        assert_eq!(graph.list_remove_at(values, 0)?, Some(one));
        assert_eq!(graph.usage_count(one), 1);

        assert_eq!(graph.list_set(values, 0, Some(two))?, Some(one));
        assert!(!graph.has_usages(one));
        assert_eq!(graph.usage_count(two), 2);

        graph.list_append(values, None)?;
        graph.list_append(values, None)?;
        graph.list_minimize_size(values)?;
        assert_eq!(graph.list_len(values), 2);

        graph.list_assign(values, &[Some(one), Some(two)])?;
        assert_eq!(graph.usage_count(one), 1);
        assert_eq!(graph.usage_count(two), 1);
        graph.verify()
    }

    #[test]
    fn deleting_a_long_list_user_releases_every_usage() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let phi = types.phi(&mut graph, &[one, one, two, one, one, two])?;
        assert_eq!(graph.usage_count(one), 4);
        assert_eq!(graph.usage_count(two), 2);

        graph.safe_delete(phi)?;
        assert!(graph.is_deleted(phi));
        assert!(!graph.has_usages(one));
        assert!(!graph.has_usages(two));
        graph.verify()
    }

    #[test]
    fn bulk_usage_release_honours_every_lookahead() -> Result<()> {
        for lookahead in [0, 1, 4] {
            let types = SampleTypes::new()?;
            let mut graph = types.graph(
                GraphOptions::new()
                    .verify_graph_edges(true)
                    .usage_removal_lookahead(lookahead),
            );
            let one = types.constant(&mut graph, 1)?;
            let two = types.constant(&mut graph, 2)?;
            let neg = graph.build(&types.neg).input("value", one).add_or_unique()?;
            let phi = types.phi(&mut graph, &[one, one, two, one, one, two, one])?;
            let sum = types.add(&mut graph, one, two)?;
            let values = graph.input_list_named(phi, "values")?;
            graph.list_insert(values, 2, None)?;
            assert_eq!(graph.usage_count(one), 7);
            assert_eq!(graph.usage_count(two), 3);

            graph.safe_delete(phi)?;
            assert_eq!(graph.usage_count(one), 2);
            assert!(graph.usages(one).contains(&neg));
            assert!(graph.usages(one).contains(&sum));
            assert_eq!(graph.usages(two), &[sum]);
            graph.verify()?;
        }
        Ok(())
    }

    #[test]
    fn safe_delete_refuses_used_nodes() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let neg = graph.build(&types.neg).input("value", one).add_or_unique()?;
        assert!(matches!(
            graph.safe_delete(one),
            Err(GraphError::DeletionBlocked { .. })
        ));
        graph.safe_delete(neg)?;
        graph.safe_delete(one)?;
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.total_nodes_deleted(), 2);
        Ok(())
    }

    #[test]
    fn successors_keep_a_single_predecessor() -> Result<()> {
        let (types, mut graph) = setup();
        let chain = types.chain(&mut graph, 3)?;
        assert_eq!(graph.predecessor(chain[1]), Some(chain[0]));
        assert_eq!(graph.predecessor(chain[3]), Some(chain[2]));

        let err = graph.set_successor(chain[0], 0, Some(chain[2]));
        assert!(matches!(err, Err(GraphError::IncompatibleEdge { .. })));

        graph.clear_successors(chain[1])?;
        assert_eq!(graph.predecessor(chain[2]), None);
        graph.replace_at_predecessor(chain[1], Some(chain[2]))?;
        assert_eq!(graph.successor(chain[0], 0), Some(chain[2]));
        assert_eq!(graph.predecessor(chain[1]), None);
        graph.safe_delete(chain[1])?;
        graph.verify()
    }

    #[test]
    fn rejected_successor_list_writes_change_nothing() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let chain = types.chain(&mut graph, 1)?;
        let taken = chain[1];
        let a = graph.build(&types.link).data("index", 10).add()?;
        let b = graph.build(&types.link).data("index", 11).add()?;
        let switch = graph
            .build(&types.switch)
            .input("value", one)
            .successors("targets", [a])
            .add()?;
        let targets = graph.successor_list_named(switch, "targets")?;
        assert_eq!(graph.predecessor(a), Some(switch));

        assert!(matches!(
            graph.list_set(targets, 0, Some(taken)),
            Err(GraphError::IncompatibleEdge { .. })
        ));
        assert!(graph.list_append(targets, Some(taken)).is_err());
        assert!(graph.list_insert(targets, 0, Some(taken)).is_err());
        assert!(graph.list_assign(targets, &[Some(b), Some(taken)]).is_err());
        assert!(graph.list_assign(targets, &[Some(b), Some(b)]).is_err());
        assert!(graph.replace_first_successor(chain[0], taken, Some(a)).is_err());

        assert_eq!(graph.list_items(targets), &[Some(a)]);
        assert_eq!(graph.predecessor(a), Some(switch));
        assert_eq!(graph.predecessor(b), None);
        assert_eq!(graph.predecessor(taken), Some(chain[0]));
        assert_eq!(graph.successor(chain[0], 0), Some(taken));
        graph.verify()?;

        graph.list_assign(targets, &[Some(b), Some(a)])?;
        assert_eq!(graph.predecessor(a), Some(switch));
        assert_eq!(graph.predecessor(b), Some(switch));
        assert_eq!(graph.list_set(targets, 0, None)?, Some(b));
        assert_eq!(graph.predecessor(b), None);
        graph.verify()
    }

    #[test]
    fn replace_at_usages_redirects_every_edge() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let three = types.constant(&mut graph, 3)?;
        let sum = types.add(&mut graph, one, one)?;
        let neg = graph.build(&types.neg).input("value", one).add_or_unique()?;

        graph.replace_at_usages(one, Some(three))?;
        assert!(!graph.has_usages(one));
        assert_eq!(graph.input(sum, 0), Some(three));
        assert_eq!(graph.input(sum, 1), Some(three));
        assert_eq!(graph.input(neg, 0), Some(three));
        assert_eq!(graph.usage_count(three), 3);

        graph.replace_at_matching_usages(three, Some(two), &|g: &Graph, usage: NodeRef| {
            g.node_type(usage).short_name() == "Neg"
        })?;
        assert_eq!(graph.input(neg, 0), Some(two));
        assert_eq!(graph.usage_count(three), 2);

        graph.replace_at_usages_and_delete(two, Some(one))?;
        assert!(graph.is_deleted(two));
        assert_eq!(graph.input(neg, 0), Some(one));
        graph.verify()
    }

    #[test]
    fn replace_at_usages_of_type_only_touches_matching_inputs() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let value = graph.build(&types.store).input("value", one).add()?;
        let store = graph
            .build(&types.store)
            .input("value", two)
            .input("memory", value)
            .add()?;
        let replacement = graph.build(&types.store).input("value", two).add()?;

        graph.replace_at_usages_of_type(value, Some(replacement), InputType::Memory)?;
        assert_eq!(graph.input_named(store, "memory"), Some(replacement));
        assert!(!graph.has_usages(value));
        graph.verify()
    }

    #[test]
    fn apply_inputs_rewrites_through_the_closure() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let phi = types.phi(&mut graph, &[one, two, one])?;
        graph.apply_inputs(phi, |_, input| Ok(if input == one { two } else { input }))?;
        assert_eq!(graph.inputs(phi).collect::<Vec<_>>(), vec![two, two, two]);
        assert_eq!(graph.usage_count(two), 3);
        assert_eq!(graph.replace_all_inputs(phi, two, Some(one))?, 3);
        assert_eq!(graph.usage_count(one), 3);
        graph.verify()
    }

    #[test]
    fn edge_kinds_reject_wrong_targets() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        assert!(matches!(
            graph.list(one, EdgeKind::Inputs, 0),
            Err(GraphError::IncompatibleEdge { .. })
        ));

        let phi = types.phi(&mut graph, &[])?;
        assert!(matches!(
            graph.set_input(phi, 0, None),
            Err(GraphError::IncompatibleEdge { .. })
        ));
        Ok(())
    }

    #[test]
    fn frozen_graphs_reject_mutation() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        graph.temporary_freeze()?;
        assert!(matches!(
            graph.create_default(&types.constant),
            Err(GraphError::Frozen(_))
        ));
        assert!(graph.is_alive(one));
        graph.unfreeze()?;
        types.constant(&mut graph, 2)?;

        graph.freeze();
        assert_eq!(graph.freeze_state(), FreezeState::DeepFreeze);
        assert!(graph.unfreeze().is_err());
        assert!(graph.temporary_freeze().is_err());
        Ok(())
    }

    #[test]
    fn add_rejects_value_numberable_nodes() -> Result<()> {
        let (types, mut graph) = setup();
        let node = graph.create_default(&types.constant)?;
        assert!(matches!(graph.add(node), Err(GraphError::ValueNumberable(_))));
        assert!(matches!(
            graph.create_default(&types.binary),
            Err(GraphError::AbstractType(_))
        ));
        Ok(())
    }

    #[test]
    fn clones_copy_data_and_selected_edges() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let sum = types.add(&mut graph, one, two)?;

        let copy = graph.copy_with_inputs(sum)?;
        assert_ne!(copy, sum);
        assert!(graph.equal_inputs(sum, copy));
        assert_eq!(graph.usage_count(one), 2);

        let bare = graph.clone_node(sum, EdgeSelector::None, false)?;
        assert_eq!(graph.inputs(bare).count(), 0);
        assert!(graph.verify().is_err(), "required inputs are empty");
        graph.safe_delete(bare)?;

        let cached = graph.clone_node(one, EdgeSelector::All, true)?;
        assert_eq!(cached, one);
        graph.verify()
    }
}

mod gvn_tests {
    use super::*;

    #[test]
    fn equal_leaves_are_shared() -> Result<()> {
        let (types, mut graph) = setup();
        let first = types.constant(&mut graph, 7)?;
        let second = types.constant(&mut graph, 7)?;
        let other = types.constant(&mut graph, 8)?;
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.gvn_cache_len(), 2);
        Ok(())
    }

    #[test]
    fn deleted_leaves_are_not_reused() -> Result<()> {
        let (types, mut graph) = setup();
        let first = types.constant(&mut graph, 7)?;
        graph.safe_delete(first)?;
        let second = types.constant(&mut graph, 7)?;
        assert_ne!(first, second);
        assert!(graph.is_alive(second));
        Ok(())
    }

    #[test]
    fn rewriting_leaf_data_refiles_the_cache_entry() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        types.constant(&mut graph, 2)?;
        assert_eq!(graph.gvn_cache_len(), 2);

        graph.set_data(one, 0, DataValue::Int(5))?;
        assert_eq!(graph.gvn_cache_len(), 2);
        assert_eq!(types.constant(&mut graph, 5)?, one);
        let fresh = types.constant(&mut graph, 1)?;
        assert_ne!(fresh, one);
        assert_eq!(graph.gvn_cache_len(), 3);

        graph.safe_delete(one)?;
        assert_eq!(graph.gvn_cache_len(), 2);
        assert_ne!(types.constant(&mut graph, 5)?, one);
        graph.verify()
    }

    #[test]
    fn non_leaves_match_on_inputs_and_data() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let a = types.add(&mut graph, one, two)?;
        let b = types.add(&mut graph, one, two)?;
        let swapped = types.add(&mut graph, two, one)?;
        let difference = types.sub(&mut graph, one, two)?;
        assert_eq!(a, b);
        assert_ne!(a, swapped);
        assert_ne!(a, difference);

        let lt = graph
            .build(&types.compare)
            .input("x", one)
            .input("y", two)
            .data("op", 0)
            .add_or_unique()?;
        let gt = graph
            .build(&types.compare)
            .input("x", one)
            .input("y", two)
            .data("op", 1)
            .add_or_unique()?;
        assert_ne!(lt, gt);
        Ok(())
    }

    #[test]
    fn identity_types_only_equal_themselves() -> Result<()> {
        let (types, mut graph) = setup();
        let p0 = types.param(&mut graph, 0)?;
        let p1 = graph.build(&types.param).data("index", 0).add()?;
        assert!(graph.data_equals(p0, p0));
        assert!(!graph.data_equals(p0, p1));
        Ok(())
    }

    #[test]
    fn predicate_filters_candidates() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let existing = graph.build(&types.neg).input("value", one).add_or_unique()?;

        let rejected = graph.build(&types.neg).input("value", one).finish()?;
        let reject_all: NodePredicate<'_> = &|_, _| false;
        let node = graph.add_or_unique_with_inputs_matching(rejected, Some(reject_all))?;
        assert_eq!(node, rejected);
        assert_ne!(node, existing);

        let accepted = graph.build(&types.neg).input("value", one).finish()?;
        assert_eq!(graph.add_or_unique_with_inputs(accepted)?, existing);
        assert!(graph.is_unregistered(accepted));
        Ok(())
    }

    #[test]
    fn hits_transfer_missing_source_positions() -> Result<()> {
        let (types, mut graph) = setup();
        let cached = types.constant(&mut graph, 3)?;
        assert!(graph.source_position(cached).is_none());
        let position = SourcePosition::new("main", 12);
        let hit = graph
            .build(&types.constant)
            .data("value", 3)
            .position(position.clone())
            .unique()?;
        assert_eq!(hit, cached);
        assert_eq!(graph.source_position(cached), Some(&position));
        Ok(())
    }

    #[test]
    fn unique_rejects_plain_types() -> Result<()> {
        let (types, mut graph) = setup();
        let phi = graph.create_default(&types.phi)?;
        assert!(matches!(
            graph.unique(phi),
            Err(GraphError::NotValueNumberable(_))
        ));
        Ok(())
    }
}

mod iteration_tests {
    use super::*;

    #[test]
    fn positions_cover_empty_entries() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let phi = types.phi(&mut graph, &[one])?;
        let values = graph.input_list(phi, 0)?;
        graph.list_append(values, None)?;

        let positions: Vec<Position> = graph.input_positions(phi).collect();
        assert_eq!(positions.len(), 2);
        assert_eq!(graph.get_at(phi, positions[0]), Some(one));
        assert_eq!(graph.get_at(phi, positions[1]), None);
        assert_eq!(graph.inputs(phi).collect::<Vec<_>>(), vec![one]);
        Ok(())
    }

    #[test]
    fn cursors_allow_mutating_other_nodes() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let sum = types.add(&mut graph, one, two)?;
        let neg = graph.build(&types.neg).input("value", one).add_or_unique()?;

        let mut cursor = graph.input_cursor(sum);
        let mut seen = Vec::new();
        while let Some((pos, input)) = cursor.next(&graph) {
            graph.set_input(neg, 0, Some(input))?;
            seen.push((pos.slot, input));
        }
        assert_eq!(seen, vec![(0, one), (1, two)]);
        assert_eq!(graph.input(neg, 0), Some(two));
        Ok(())
    }

    #[test]
    fn typed_iteration_skips_deleted_nodes() -> Result<()> {
        let (types, mut graph) = setup();
        let p1 = types.phi(&mut graph, &[])?;
        let p2 = types.phi(&mut graph, &[])?;
        let p3 = types.phi(&mut graph, &[])?;
        graph.safe_delete(p3)?;
        assert_eq!(graph.iter_type(&types.phi).collect::<Vec<_>>(), vec![p1, p2]);

        let p4 = types.phi(&mut graph, &[])?;
        graph.safe_delete(p1)?;
        assert_eq!(graph.iter_type(&types.phi).collect::<Vec<_>>(), vec![p2, p4]);
        assert!(graph.has_node(&types.phi));
        graph.verify()
    }

    #[test]
    fn iterating_a_parent_type_visits_iterable_subtypes() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let sum = types.add(&mut graph, one, two)?;
        types.sub(&mut graph, one, two)?;
        assert_eq!(graph.iter_type(&types.binary).collect::<Vec<_>>(), vec![sum]);
        assert_eq!(graph.iter_type(&types.constant).count(), 0);
        Ok(())
    }

    #[test]
    fn marks_track_new_nodes_until_compaction() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let mark = graph.mark();
        assert!(!mark.has_new_nodes(&graph));
        let two = types.constant(&mut graph, 2)?;
        let three = types.constant(&mut graph, 3)?;
        graph.safe_delete(two)?;

        assert_eq!(graph.new_nodes(&mark).collect::<Vec<_>>(), vec![three]);
        assert!(graph.is_new(&mark, three));
        assert!(!graph.is_new(&mark, one));

        assert!(graph.compress(true)?);
        assert!(!mark.is_current(&graph));
        assert_eq!(graph.new_nodes(&mark).count(), 0);
        Ok(())
    }
}

mod compaction_tests {
    use super::*;

    #[test]
    fn compaction_keeps_order_and_chains() -> Result<()> {
        let (types, mut graph) = setup();
        let phis: Vec<NodeRef> = (0..6)
            .map(|_| types.phi(&mut graph, &[]))
            .collect::<Result<_>>()?;
        for &phi in &phis[..4] {
            graph.safe_delete(phi)?;
        }
        assert_eq!(graph.node_id_count(), 6);
        assert!(graph.maybe_compress()?);
        assert_eq!(graph.node_id_count(), 2);
        assert_eq!(graph.id(phis[4]), Some(NodeId(0)));
        assert_eq!(graph.id(phis[5]), Some(NodeId(1)));
        assert_eq!(graph.total_nodes_deleted(), 4);
        assert_eq!(graph.nodes_deleted_since_last_compression(), 0);
        assert_eq!(
            graph.iter_type(&types.phi).collect::<Vec<_>>(),
            vec![phis[4], phis[5]]
        );
        graph.verify()
    }

    #[test]
    fn observed_graphs_skip_automatic_compaction() -> Result<()> {
        let (types, mut graph) = setup();
        let a = types.phi(&mut graph, &[])?;
        types.phi(&mut graph, &[])?;
        graph.safe_delete(a)?;
        graph.set_observed(true);
        assert!(!graph.maybe_compress()?);
        assert!(graph.compress(true)?);
        assert_eq!(graph.compressions(), 1);
        Ok(())
    }

    #[test]
    fn minimizing_releases_dead_lists_and_cache_entries() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let phi = types.phi(&mut graph, &[one, one])?;
        graph.safe_delete(phi)?;
        graph.safe_delete(one)?;
        assert!(graph.compress(true)?);
        assert_eq!(graph.gvn_cache_len(), 0);
        assert_eq!(graph.node_count(), 0);
        let again = types.constant(&mut graph, 1)?;
        assert_eq!(graph.id(again), Some(NodeId(0)));
        Ok(())
    }
}

mod handle_tests {
    use super::*;

    #[test]
    fn handles_of_other_graphs_are_rejected() -> Result<()> {
        let (types, mut graph) = setup();
        let mut other = types.graph(GraphOptions::new());
        let foreign = types.constant(&mut other, 1)?;
        let seven = types.constant(&mut graph, 7)?;
        assert_eq!(foreign.index(), seven.index());
        assert_ne!(foreign, seven);
        let neg = graph.build(&types.neg).input("value", seven).add_or_unique()?;

        assert!(!graph.owns(foreign));
        assert!(!graph.is_alive(foreign));
        assert!(matches!(
            graph.set_input(neg, 0, Some(foreign)),
            Err(GraphError::ForeignNode(node)) if node == foreign
        ));
        assert!(matches!(
            graph.set_source_position(foreign, None),
            Err(GraphError::ForeignNode(_))
        ));
        assert!(matches!(
            graph.set_data(foreign, 0, DataValue::Int(2)),
            Err(GraphError::ForeignNode(_))
        ));
        assert!(matches!(graph.safe_delete(foreign), Err(GraphError::ForeignNode(_))));
        assert!(graph
            .build(&types.neg)
            .input("value", foreign)
            .add_or_unique()
            .is_err());

        assert_eq!(graph.input_named(neg, "value"), Some(seven));
        assert_eq!(graph.usages(seven), &[neg]);
        assert!(!other.has_usages(foreign));
        assert_eq!(other.data(foreign), &[DataValue::Int(1)]);
        graph.verify()?;
        other.verify()
    }

    #[test]
    #[should_panic(expected = "used with graph")]
    fn reading_a_foreign_handle_panics() {
        let (types, mut graph) = setup();
        let mut other = types.graph(GraphOptions::new());
        let foreign = types.constant(&mut other, 1).unwrap();
        types.constant(&mut graph, 1).unwrap();
        let _ = graph.usages(foreign);
    }

    #[test]
    fn repeated_unique_lookups_reuse_the_discarded_slot() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        for _ in 0..1000 {
            assert_eq!(types.constant(&mut graph, 1)?, one);
        }
        let sum = types.add(&mut graph, one, one)?;
        for _ in 0..1000 {
            assert_eq!(types.add(&mut graph, one, one)?, sum);
        }
        assert_eq!(graph.node_count(), 2);
        assert!(graph.allocated_nodes() <= 3);
        assert_eq!(graph.usage_count(one), 2);
        graph.verify()
    }

    #[test]
    fn compaction_recycles_deleted_slots() -> Result<()> {
        let (types, mut graph) = setup();
        let params: Vec<NodeRef> = (0..8)
            .map(|i| types.param(&mut graph, i))
            .collect::<Result<_>>()?;
        for &param in &params[..6] {
            graph.safe_delete(param)?;
        }
        let allocated = graph.allocated_nodes();
        assert_eq!(graph.free_node_slots(), 0);
        assert!(graph.compress(true)?);
        assert_eq!(graph.free_node_slots(), 6);

        let fresh: Vec<NodeRef> = (10..16)
            .map(|i| types.param(&mut graph, i))
            .collect::<Result<_>>()?;
        assert_eq!(graph.allocated_nodes(), allocated);
        assert_eq!(graph.free_node_slots(), 0);
        for &old in &params[..6] {
            assert!(graph.is_deleted(old));
            assert!(!graph.is_alive(old));
            assert!(!fresh.contains(&old));
            assert!(matches!(
                graph.safe_delete(old),
                Err(GraphError::NotAlive(node)) if node == old
            ));
        }
        assert!(fresh
            .iter()
            .all(|node| params[..6].iter().any(|old| old.index() == node.index())));

        let mut expected = params[6..].to_vec();
        expected.extend(&fresh);
        assert_eq!(graph.iter_type(&types.param).collect::<Vec<_>>(), expected);
        assert_eq!(graph.data(fresh[0]), &[DataValue::Int(10)]);
        graph.verify()
    }
}

mod duplication_tests {
    use super::*;

    #[test]
    fn duplicates_keep_outside_inputs() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let sum = types.add(&mut graph, one, two)?;
        let neg = graph.build(&types.neg).input("value", sum).add_or_unique()?;

        let map = graph.duplicate(&[sum, neg], None, 2)?;
        let sum_copy = map.get(sum).unwrap();
        let neg_copy = map.get(neg).unwrap();
        assert_ne!(sum_copy, sum);
        assert_eq!(graph.input(neg_copy, 0), Some(sum_copy));
        assert_eq!(graph.input(sum_copy, 0), Some(one));
        assert_eq!(graph.usage_count(one), 2);
        graph.verify()
    }

    #[test]
    fn replacements_stand_in_for_outside_nodes() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let three = types.constant(&mut graph, 3)?;
        let sum = types.add(&mut graph, one, two)?;

        let mut replace = |node: NodeRef| (node == one).then_some(three);
        let map = graph.duplicate(&[sum], Some(&mut replace), 1)?;
        let copy = map.get(sum).unwrap();
        assert_eq!(graph.input(copy, 0), Some(three));
        assert_eq!(graph.input(copy, 1), Some(two));
        graph.verify()
    }

    #[test]
    fn replaced_nodes_receive_compatible_edges() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let sum = types.add(&mut graph, one, two)?;
        let target = graph.build(&types.sub).input("x", two).input("y", two).add_without_unique()?;
        let neg = graph.build(&types.neg).input("value", sum).add_or_unique()?;

        let mut replace = |node: NodeRef| (node == sum).then_some(target);
        let map = graph.duplicate(&[sum, neg], Some(&mut replace), 2)?;
        assert_eq!(map.get(sum), Some(target));
        assert_eq!(graph.input(target, 0), Some(one));
        assert_eq!(graph.input(target, 1), Some(two));
        assert_eq!(graph.input(map.get(neg).unwrap(), 0), Some(target));
        graph.verify()
    }

    #[test]
    fn leaves_resolve_through_the_cache() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let map = graph.duplicate(&[one], None, 1)?;
        assert_eq!(map.get(one), Some(one));
        assert_eq!(graph.node_count(), 1);
        Ok(())
    }

    #[test]
    fn large_estimates_pick_the_dense_map() -> Result<()> {
        let (types, mut graph) = setup();
        let nodes: Vec<NodeRef> = (0..40)
            .map(|i| types.constant(&mut graph, i))
            .collect::<Result<_>>()?;
        let (copy, map) = graph.copy()?;
        assert!(map.is_dense());
        assert_eq!(map.len(), nodes.len());
        assert_eq!(copy.node_count(), nodes.len());

        let sparse = graph.duplicate(&nodes[..1], None, 1)?;
        assert!(!sparse.is_dense());
        Ok(())
    }
}

mod listener_tests {
    use super::*;

    struct DeleteUnused;

    impl NodeEventListener for DeleteUnused {
        fn usages_dropped_to_zero(&mut self, _graph: &Graph, _node: NodeRef) -> ZeroUsagesAction {
            ZeroUsagesAction::Delete
        }
    }

    #[test]
    fn zero_usage_deletion_cascades() -> Result<()> {
        let (types, mut graph) = setup();
        let one = types.constant(&mut graph, 1)?;
        let two = types.constant(&mut graph, 2)?;
        let three = types.constant(&mut graph, 3)?;
        let sum = types.add(&mut graph, one, two)?;
        let neg = graph.build(&types.neg).input("value", sum).add_or_unique()?;

        let id = graph.track_events(Box::new(DeleteUnused));
        graph.set_input(neg, 0, Some(three))?;
        assert!(graph.is_deleted(sum));
        assert!(graph.is_deleted(one));
        assert!(graph.is_deleted(two));
        assert!(graph.is_alive(three));
        assert!(graph.untrack_events(id).is_some());
        assert_eq!(graph.listener_count(), 0);
        graph.verify()
    }
}
