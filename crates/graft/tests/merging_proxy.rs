//! Tests for the merging proxy as seen by a client.

mod common;

use std::sync::Arc;

use graft::model::{
    DragCallback, ItemModel, MergingProxyModel, MimeData, ModelIndex, SortOrder, SourceModel,
    TreeModel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{Event, Recorder, Shadow, names, tree};

fn merged(sources: &[&Arc<TreeModel<String>>]) -> Arc<MergingProxyModel> {
    let proxy = MergingProxyModel::new();
    for source in sources {
        proxy.append(SourceModel::borrowed(source)).unwrap();
    }
    proxy
}

#[test]
fn test_append_tiles_root_rows() {
    let a = tree(&["a0", "a1", "a2"]);
    let b = tree(&["b0", "b1"]);
    let proxy = merged(&[&a, &b]);

    let mounts = proxy.mounts();
    assert_eq!(mounts, vec![(a.model_id(), 0..3), (b.model_id(), 3..5)]);
    assert_eq!(proxy.row_count(&ModelIndex::invalid()), 5);
}

#[test]
fn test_unmount_middle_source() {
    let a = tree(&["a0", "a1", "a2"]);
    let b = tree(&["b0", "b1"]);
    let c = tree(&["c0", "c1", "c2", "c3"]);
    let proxy = merged(&[&a, &b, &c]);
    let recorder = Recorder::attach(proxy.as_ref());

    proxy.try_unmount(b.model_id()).unwrap();

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToRemove("root".into(), 3, 4),
            Event::Removed("root".into(), 3, 4),
        ]
    );
    assert_eq!(proxy.mounts(), vec![(a.model_id(), 0..3), (c.model_id(), 3..7)]);
    assert_eq!(proxy.row_count(&ModelIndex::invalid()), 7);
    assert_eq!(
        names(proxy.as_ref(), &ModelIndex::invalid()),
        vec!["a0", "a1", "a2", "c0", "c1", "c2", "c3"]
    );
}

#[test]
fn test_dropped_borrowed_source_is_unmounted() {
    let a = tree(&["a0", "a1", "a2"]);
    let b = tree(&["b0", "b1"]);
    let c = tree(&["c0"]);
    let proxy = merged(&[&a, &b, &c]);
    let root = ModelIndex::invalid();
    let recorder = Recorder::attach(proxy.as_ref());

    drop(b);

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToRemove("root".into(), 3, 4),
            Event::Removed("root".into(), 3, 4),
        ]
    );
    assert_eq!(proxy.row_count(&root), 4);
    assert_eq!(proxy.mounts(), vec![(a.model_id(), 0..3), (c.model_id(), 3..4)]);
    assert_eq!(names(proxy.as_ref(), &root), vec!["a0", "a1", "a2", "c0"]);
}

#[test]
fn test_drag_across_sources_needs_callback() {
    let a = tree(&["a0"]);
    let b = tree(&["b0"]);
    let proxy = merged(&[&a, &b]);
    let root = ModelIndex::invalid();
    let selection = vec![proxy.index(0, 0, &root), proxy.index(1, 0, &root)];

    assert!(proxy.mime_data(&selection).is_none());
    assert!(proxy.mime_data(&selection[..1]).is_some());

    let callback: DragCallback = Arc::new(|indexes: &[ModelIndex]| {
        Some(MimeData::from_text(format!("{} items", indexes.len())))
    });
    proxy.set_drag_callback(Some(callback));
    let data = proxy.mime_data(&selection).unwrap();
    assert_eq!(data.text().as_deref(), Some("2 items"));
}

/// Source with roots `a` (children `a1`, `a2`) and `b` (child `b1`).
fn nested() -> (Arc<TreeModel<String>>, [u64; 5]) {
    let model = Arc::new(TreeModel::<String>::new());
    let a = model.add_root("a".to_string());
    let a1 = model.add_child(a, "a1".to_string()).unwrap();
    let a2 = model.add_child(a, "a2".to_string()).unwrap();
    let b = model.add_root("b".to_string());
    let b1 = model.add_child(b, "b1".to_string()).unwrap();
    (model, [a, a1, a2, b, b1])
}

#[test]
fn test_move_to_unmapped_parent_becomes_removal() {
    let (source, [_, a1, _, _, b1]) = nested();
    let proxy = merged(&[&source]);
    let root = ModelIndex::invalid();
    let a = proxy.index(0, 0, &root);
    assert_eq!(names(proxy.as_ref(), &a), vec!["a1", "a2"]);
    let recorder = Recorder::attach(proxy.as_ref());

    assert!(source.move_node(a1, Some(b1), 0));

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToRemove("0".into(), 0, 0),
            Event::Removed("0".into(), 0, 0),
        ]
    );
    assert_eq!(names(proxy.as_ref(), &a), vec!["a2"]);
}

#[test]
fn test_move_from_unmapped_parent_becomes_insertion() {
    let (source, [a, _, _, _, b1]) = nested();
    let proxy = merged(&[&source]);
    let root = ModelIndex::invalid();
    let a_index = proxy.index(0, 0, &root);
    assert_eq!(proxy.row_count(&a_index), 2);
    let recorder = Recorder::attach(proxy.as_ref());

    assert!(source.move_node(b1, Some(a), 0));

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToInsert("0".into(), 0, 0),
            Event::Inserted("0".into(), 0, 0),
        ]
    );
    assert_eq!(names(proxy.as_ref(), &a_index), vec!["b1", "a1", "a2"]);
}

#[test]
fn test_removal_kind_kept_when_destination_is_mapped_mid_move() {
    let (source, [_, a1, _, _, b1]) = nested();
    let proxy = merged(&[&source]);
    let root = ModelIndex::invalid();
    let a = proxy.index(0, 0, &root);
    assert_eq!(proxy.row_count(&a), 2);
    let recorder = Recorder::attach(proxy.as_ref());

    // Runs after the proxy saw the announcement
    let observer = proxy.clone();
    source
        .signals()
        .rows_about_to_be_moved
        .connect(move |(_, _, _, dest_parent, _)| {
            assert!(observer.map_from_source(dest_parent).is_valid());
        });
    assert!(source.move_node(a1, Some(b1), 0));

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToRemove("0".into(), 0, 0),
            Event::Removed("0".into(), 0, 0),
        ]
    );
    assert_eq!(names(proxy.as_ref(), &a), vec!["a2"]);
}

#[test]
fn test_insertion_kind_kept_when_source_is_mapped_mid_move() {
    let (source, [a, _, _, _, b1]) = nested();
    let proxy = merged(&[&source]);
    let root = ModelIndex::invalid();
    let a_index = proxy.index(0, 0, &root);
    assert_eq!(proxy.row_count(&a_index), 2);
    let recorder = Recorder::attach(proxy.as_ref());

    let observer = proxy.clone();
    source
        .signals()
        .rows_about_to_be_moved
        .connect(move |(source_parent, _, _, _, _)| {
            assert!(observer.map_from_source(source_parent).is_valid());
        });
    assert!(source.move_node(b1, Some(a), 0));

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToInsert("0".into(), 0, 0),
            Event::Inserted("0".into(), 0, 0),
        ]
    );
    assert_eq!(names(proxy.as_ref(), &a_index), vec!["b1", "a1", "a2"]);
}

#[test]
fn test_move_between_mapped_parents_is_kept() {
    let (source, [_, _, a2, b, _]) = nested();
    let proxy = merged(&[&source]);
    let root = ModelIndex::invalid();
    let a_index = proxy.index(0, 0, &root);
    let b_index = proxy.index(1, 0, &root);
    let moved = proxy.index(1, 0, &a_index);
    assert_eq!(proxy.row_count(&b_index), 1);
    let recorder = Recorder::attach(proxy.as_ref());

    assert!(source.move_node(a2, Some(b), 1));

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToMove("0".into(), 1, 1, "1".into(), 1),
            Event::Moved("0".into(), 1, 1, "1".into(), 1),
        ]
    );
    assert_eq!(names(proxy.as_ref(), &b_index), vec!["b1", "a2"]);
    let followed = proxy.revalidate(&moved);
    assert_eq!(followed.row(), 1);
    assert_eq!(proxy.parent(&followed), b_index);
}

#[test]
fn test_move_between_unmapped_parents_is_dropped() {
    let (source, [_, a1, _, _, b1]) = nested();
    let proxy = merged(&[&source]);
    let recorder = Recorder::attach(proxy.as_ref());

    assert!(source.move_node(a1, Some(b1), 0));
    assert!(recorder.structural().is_empty());
}

#[test]
fn test_empty_mount_and_unmount_are_silent() {
    let a = tree(&["a0"]);
    let proxy = merged(&[&a]);
    let recorder = Recorder::attach(proxy.as_ref());

    let empty = tree(&[]);
    let id = proxy.append(SourceModel::borrowed(&empty)).unwrap();
    proxy.try_unmount(id).unwrap();

    assert!(recorder.structural().is_empty());
}

#[test]
fn test_round_trip_through_nested_nodes() {
    let (source, [_, _, _, b, _]) = nested();
    source.add_child(b, "b2".to_string());
    let other = tree(&["x"]);
    let proxy = merged(&[&other, &source]);

    let b2 = source.index(1, 0, &source.index(1, 0, &ModelIndex::invalid()));
    let mapped = proxy.map_from_source(&b2);
    assert!(mapped.is_valid());
    assert_eq!(proxy.display_text(&mapped).as_deref(), Some("b2"));
    assert_eq!(proxy.map_to_source(&mapped), b2);
    assert_eq!(proxy.map_from_source(&proxy.map_to_source(&mapped)), mapped);
    assert_eq!(proxy.parent(&mapped).row(), 2);
}

#[test]
fn test_sort_applies_to_every_source() {
    let a = tree(&["b", "a"]);
    let b = tree(&["d", "c"]);
    let proxy = merged(&[&a, &b]);
    let recorder = Recorder::attach(proxy.as_ref());

    proxy.sort(Some(0), SortOrder::Ascending);

    assert_eq!(
        names(proxy.as_ref(), &ModelIndex::invalid()),
        vec!["a", "b", "c", "d"]
    );
    recorder.assert_balanced();

    // Later mounts are sorted before they show up
    let c = tree(&["f", "e"]);
    proxy.append(SourceModel::borrowed(&c)).unwrap();
    assert_eq!(
        names(proxy.as_ref(), &ModelIndex::invalid()),
        vec!["a", "b", "c", "d", "e", "f"]
    );
}

// =============================================================================
// Random operation sequences
// =============================================================================

fn walk(model: &dyn ItemModel, parent: &ModelIndex, out: &mut Vec<ModelIndex>) {
    for row in 0..model.row_count(parent) {
        let index = model.index(row, 0, parent);
        out.push(index.clone());
        walk(model, &index, out);
    }
}

fn check_invariants(proxy: &MergingProxyModel, mounted: &[Arc<TreeModel<String>>]) {
    let mounts = proxy.mounts();
    assert_eq!(mounts.len(), mounted.len());
    let mut next = 0;
    for ((id, range), source) in mounts.iter().zip(mounted) {
        assert_eq!(*id, source.model_id());
        assert_eq!(range.start, next);
        assert_eq!(range.len(), source.root_count());
        next = range.end;
    }
    assert_eq!(next, proxy.row_count(&ModelIndex::invalid()));

    for source in mounted {
        let mut nodes = Vec::new();
        walk(source.as_ref(), &ModelIndex::invalid(), &mut nodes);
        for node in nodes {
            let mapped = proxy.map_from_source(&node);
            assert!(mapped.is_valid());
            assert_eq!(proxy.map_to_source(&mapped), node);
            assert_eq!(proxy.map_from_source(&proxy.map_to_source(&mapped)), mapped);
            assert_eq!(proxy.display_text(&mapped), source.display_text(&node));
            assert_eq!(proxy.row_count(&mapped), source.row_count(&node));
        }
    }
}

fn random_node(rng: &mut StdRng, source: &TreeModel<String>) -> Option<u64> {
    let mut nodes = Vec::new();
    walk(source, &ModelIndex::invalid(), &mut nodes);
    if nodes.is_empty() {
        return None;
    }
    let index = &nodes[rng.gen_range(0..nodes.len())];
    source.node_for_index(index)
}

#[test]
fn test_random_operations_keep_invariants() {
    common::init_tracing();
    for seed in 0..16 {
        let mut rng = StdRng::seed_from_u64(seed);
        let proxy = MergingProxyModel::new();
        let recorder = Recorder::attach(proxy.as_ref());
        let mut shadow = Shadow::new(proxy.as_ref());
        let mut mounted: Vec<Arc<TreeModel<String>>> = Vec::new();
        let mut label = 0;
        let mut next_label = || {
            label += 1;
            format!("n{label:03}")
        };

        for _ in 0..80 {
            match rng.gen_range(0..8) {
                0 => {
                    let rows = rng.gen_range(0..4);
                    let source = Arc::new(TreeModel::<String>::new());
                    for _ in 0..rows {
                        source.add_root(next_label());
                    }
                    let position = rng.gen_range(0..=mounted.len());
                    proxy
                        .try_mount(SourceModel::borrowed(&source), position)
                        .unwrap();
                    mounted.insert(position, source);
                }
                1 if !mounted.is_empty() => {
                    let source = mounted.remove(rng.gen_range(0..mounted.len()));
                    proxy.try_unmount(source.model_id()).unwrap();
                }
                2 if !mounted.is_empty() => {
                    let source = &mounted[rng.gen_range(0..mounted.len())];
                    let parent = if rng.gen_bool(0.5) {
                        random_node(&mut rng, source)
                    } else {
                        None
                    };
                    let count = source.children(parent).len();
                    source.insert_child(parent, rng.gen_range(0..=count), next_label());
                }
                3 if !mounted.is_empty() => {
                    let source = &mounted[rng.gen_range(0..mounted.len())];
                    if let Some(node) = random_node(&mut rng, source) {
                        source.remove(node);
                    }
                }
                4 if !mounted.is_empty() => {
                    let source = &mounted[rng.gen_range(0..mounted.len())];
                    let node = random_node(&mut rng, source);
                    let parent = if rng.gen_bool(0.3) {
                        None
                    } else {
                        random_node(&mut rng, source)
                    };
                    if let Some(node) = node {
                        let count = source.children(parent).len();
                        source.move_node(node, parent, rng.gen_range(0..=count));
                    }
                }
                5 => {
                    let order = if rng.gen_bool(0.5) {
                        SortOrder::Ascending
                    } else {
                        SortOrder::Descending
                    };
                    proxy.sort(Some(0), order);
                }
                6 => shadow.expand_all(proxy.as_ref()),
                _ => {}
            }
            let events = recorder.take();
            common::assert_balanced(&events);
            shadow.apply(proxy.as_ref(), &events);
            shadow.verify(proxy.as_ref());
            check_invariants(&proxy, &mounted);
        }
    }
}
