//! Tests for the mounting proxy as seen by a client.

mod common;

use std::sync::Arc;

use graft::model::{
    ItemData, ItemModel, ItemRole, ModelId, ModelIndex, MountingProxyModel, SortOrder,
    SourceModel, SourceModelFactory, TreeModel,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{Event, Recorder, Shadow, names, tree};

fn mounting(primary: &Arc<TreeModel<String>>) -> Arc<MountingProxyModel> {
    let proxy = MountingProxyModel::new(None);
    proxy.set_source_model(Some(SourceModel::borrowed(primary)));
    proxy
}

#[test]
fn test_factory_mounts_on_data_change() {
    let primary = tree(&["R"]);
    let factory: SourceModelFactory = {
        let primary = primary.clone();
        Arc::new(move |node: &ModelIndex| {
            let ready = primary.display_text(node).as_deref() == Some("ready");
            ready.then(|| {
                let model = TreeModel::<String>::new();
                model.add_root("m0".to_string());
                model.add_root("m1".to_string());
                SourceModel::owned(model)
            })
        })
    };
    let proxy = MountingProxyModel::new(Some(factory));
    proxy.set_source_model(Some(SourceModel::borrowed(&primary)));

    let root = ModelIndex::invalid();
    let node = proxy.index(0, 0, &root);
    assert_eq!(proxy.row_count(&node), 0);
    let recorder = Recorder::attach(proxy.as_ref());

    let source_node = primary.index(0, 0, &root);
    assert!(primary.set_data(&source_node, ItemData::from("ready"), ItemRole::Display));

    assert_eq!(
        recorder.events(),
        vec![
            Event::DataChanged("0".into()),
            Event::AboutToInsert("0".into(), 0, 1),
            Event::Inserted("0".into(), 0, 1),
            Event::DataChanged("0".into()),
        ]
    );
    let mapped = proxy.map_from_source(&source_node);
    assert_eq!(proxy.row_count(&mapped), 2);
    assert_eq!(names(proxy.as_ref(), &mapped), vec!["m0", "m1"]);
}

#[test]
fn test_mount_point_data_changed_reports_mounted_model() {
    let primary = tree(&["R"]);
    let proxy = mounting(&primary);
    let node = proxy.index(0, 0, &ModelIndex::invalid());
    let sub = tree(&["x"]);
    proxy.try_mount(&node, SourceModel::borrowed(&sub)).unwrap();

    let seen: Arc<Mutex<Vec<(ModelIndex, ModelId)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    proxy
        .mount_point_data_changed()
        .connect(move |(index, model)| log.lock().push((index.clone(), *model)));

    let source_node = primary.index(0, 0, &ModelIndex::invalid());
    primary.set_data(&source_node, ItemData::from("renamed"), ItemRole::Display);

    assert_eq!(*seen.lock(), vec![(node.clone(), sub.model_id())]);
    assert_eq!(proxy.display_text(&node).as_deref(), Some("renamed"));
}

#[test]
fn test_empty_mount_only_marks_node() {
    let primary = tree(&["a"]);
    let proxy = mounting(&primary);
    let node = proxy.index(0, 0, &ModelIndex::invalid());
    let recorder = Recorder::attach(proxy.as_ref());

    let empty = tree(&[]);
    proxy.try_mount(&node, SourceModel::borrowed(&empty)).unwrap();
    proxy.try_unmount(&node).unwrap();

    assert!(recorder.structural().is_empty());
    assert_eq!(
        recorder.events(),
        vec![Event::DataChanged("0".into()), Event::DataChanged("0".into())]
    );
}

#[test]
fn test_unmount_reveals_children_added_while_mounted() {
    let primary = tree(&["a"]);
    let proxy = mounting(&primary);
    let node = proxy.index(0, 0, &ModelIndex::invalid());
    let sub = tree(&["s"]);
    proxy.try_mount(&node, SourceModel::borrowed(&sub)).unwrap();
    let a = primary.children(None)[0];
    primary.add_child(a, "own".to_string());
    let recorder = Recorder::attach(proxy.as_ref());

    proxy.try_unmount(&node).unwrap();

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToRemove("0".into(), 0, 0),
            Event::Removed("0".into(), 0, 0),
            Event::AboutToInsert("0".into(), 0, 0),
            Event::Inserted("0".into(), 0, 0),
        ]
    );
    assert_eq!(names(proxy.as_ref(), &node), vec!["own"]);
}

#[test]
fn test_mount_with_unmatched_sort_column_restores_order() {
    let primary = tree(&["a"]);
    let proxy = mounting(&primary);
    proxy.set_header_data_callbacks(2, common::headers(&["name", "size"]), ItemRole::Display, None);
    proxy.sort(Some(1), SortOrder::Ascending);
    let node = proxy.index(0, 0, &ModelIndex::invalid());

    let sub = common::SortLog::new(&["name"]);
    proxy.try_mount(&node, SourceModel::borrowed(&sub)).unwrap();

    assert_eq!(sub.requests(), vec![(None, SortOrder::Ascending)]);
}

#[test]
fn test_mount_follows_node_through_sort() {
    let primary = tree(&["c", "b", "a"]);
    let proxy = mounting(&primary);
    let root = ModelIndex::invalid();
    let a = proxy.index(2, 0, &root);
    let sub = tree(&["inner"]);
    proxy.try_mount(&a, SourceModel::borrowed(&sub)).unwrap();
    let recorder = Recorder::attach(proxy.as_ref());

    proxy.sort(Some(0), SortOrder::Ascending);

    recorder.assert_balanced();
    assert_eq!(names(proxy.as_ref(), &root), vec!["a", "b", "c"]);
    let a = proxy.revalidate(&a);
    assert_eq!(a.row(), 0);
    assert_eq!(names(proxy.as_ref(), &a), vec!["inner"]);
    assert_eq!(proxy.map_from_source_model(sub.model_id()), a);
}

#[test]
fn test_nested_mounts() {
    let primary = tree(&["top"]);
    let proxy = mounting(&primary);
    let root = ModelIndex::invalid();
    let top = proxy.index(0, 0, &root);

    let middle = tree(&["mid"]);
    proxy.try_mount(&top, SourceModel::borrowed(&middle)).unwrap();
    let mid = proxy.index(0, 0, &top);
    let bottom = tree(&["leaf0", "leaf1"]);
    proxy.try_mount(&mid, SourceModel::borrowed(&bottom)).unwrap();

    let leaf = proxy.index(1, 0, &mid);
    assert_eq!(proxy.display_text(&leaf).as_deref(), Some("leaf1"));
    assert_eq!(proxy.parent(&leaf), mid);
    assert_eq!(proxy.parent(&mid), top);

    // Unmounting the middle model takes the bottom one with it
    proxy.try_unmount(&top).unwrap();
    assert!(!proxy.is_mounted(middle.model_id()));
    assert!(!proxy.is_mounted(bottom.model_id()));
    assert!(!proxy.revalidate(&leaf).is_valid());
}

#[test]
fn test_submodel_rows_below_mount_node() {
    let primary = tree(&["a", "b"]);
    let proxy = mounting(&primary);
    let root = ModelIndex::invalid();
    let b = proxy.index(1, 0, &root);
    let sub = tree(&["x", "y", "z"]);
    proxy.try_mount(&b, SourceModel::borrowed(&sub)).unwrap();
    let recorder = Recorder::attach(proxy.as_ref());

    let y = sub.children(None)[1];
    sub.remove(y);

    assert_eq!(
        recorder.structural(),
        vec![
            Event::AboutToRemove("1".into(), 1, 1),
            Event::Removed("1".into(), 1, 1),
        ]
    );
    assert_eq!(names(proxy.as_ref(), &b), vec!["x", "z"]);
}

#[test]
fn test_owned_model_dropped_after_unmount() {
    let primary = tree(&["a"]);
    let proxy = mounting(&primary);
    let node = proxy.index(0, 0, &ModelIndex::invalid());

    let sub = Arc::new(TreeModel::<String>::new());
    sub.add_root("x".to_string());
    let watch = Arc::downgrade(&sub);
    proxy.try_mount(&node, SourceModel::Owned(sub)).unwrap();
    assert!(watch.upgrade().is_some());

    proxy.try_unmount(&node).unwrap();
    assert!(watch.upgrade().is_none());
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

fn random_node(rng: &mut StdRng, source: &TreeModel<String>) -> Option<u64> {
    let mut nodes = Vec::new();
    walk(source, &ModelIndex::invalid(), &mut nodes);
    if nodes.is_empty() {
        return None;
    }
    let index = &nodes[rng.gen_range(0..nodes.len())];
    source.node_for_index(index)
}

fn check_invariants(proxy: &MountingProxyModel, models: &[Arc<TreeModel<String>>]) {
    let mut nodes = Vec::new();
    walk(proxy, &ModelIndex::invalid(), &mut nodes);
    for node in nodes {
        let source = proxy.map_to_source(&node);
        assert!(source.is_valid());
        assert_eq!(proxy.map_from_source(&source), node);
        assert_eq!(proxy.parent(&node), node.parent());

        let Some(model) = models.iter().find(|model| model.model_id() == source.model_id()) else {
            panic!("proxy node maps into an unknown model");
        };
        assert_eq!(proxy.display_text(&node), model.display_text(&source));
        match proxy.mount_source_model(&node) {
            Some(mounted) => assert_eq!(
                proxy.row_count(&node),
                mounted.row_count(&ModelIndex::invalid())
            ),
            None => assert_eq!(proxy.row_count(&node), model.row_count(&source)),
        }
    }
}

#[test]
fn test_random_operations_keep_invariants() {
    common::init_tracing();
    for seed in 0..16 {
        let mut rng = StdRng::seed_from_u64(seed);
        let primary = tree(&["p0", "p1", "p2"]);
        let proxy = mounting(&primary);
        let recorder = Recorder::attach(proxy.as_ref());
        let mut shadow = Shadow::new(proxy.as_ref());
        let mut models = vec![primary.clone()];
        let mut label = 0;
        let mut next_label = || {
            label += 1;
            format!("n{label:03}")
        };

        for _ in 0..80 {
            shadow.expand_all(proxy.as_ref());
            let mut visible = Vec::new();
            walk(proxy.as_ref(), &ModelIndex::invalid(), &mut visible);
            match rng.gen_range(0..8) {
                0 => {
                    let leaves: Vec<&ModelIndex> =
                        visible.iter().filter(|node| !proxy.has_children(node)).collect();
                    if !leaves.is_empty() {
                        let leaf = leaves[rng.gen_range(0..leaves.len())];
                        let sub = Arc::new(TreeModel::<String>::new());
                        for _ in 0..rng.gen_range(0..3) {
                            sub.add_root(next_label());
                        }
                        proxy.try_mount(leaf, SourceModel::borrowed(&sub)).unwrap();
                        models.push(sub);
                    }
                }
                1 => {
                    let mounted: Vec<&ModelIndex> = visible
                        .iter()
                        .filter(|node| proxy.mount_source_model(node).is_some())
                        .collect();
                    if !mounted.is_empty() {
                        let node = mounted[rng.gen_range(0..mounted.len())];
                        proxy.try_unmount(node).unwrap();
                    }
                }
                2 => {
                    let model = &models[rng.gen_range(0..models.len())];
                    let parent = if rng.gen_bool(0.5) {
                        random_node(&mut rng, model)
                    } else {
                        None
                    };
                    let count = model.children(parent).len();
                    model.insert_child(parent, rng.gen_range(0..=count), next_label());
                }
                3 => {
                    let model = &models[rng.gen_range(0..models.len())];
                    if let Some(node) = random_node(&mut rng, model) {
                        model.remove(node);
                    }
                }
                4 => {
                    let model = &models[rng.gen_range(0..models.len())];
                    let node = random_node(&mut rng, model);
                    let parent = if rng.gen_bool(0.3) {
                        None
                    } else {
                        random_node(&mut rng, model)
                    };
                    if let Some(node) = node {
                        let count = model.children(parent).len();
                        model.move_node(node, parent, rng.gen_range(0..=count));
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
                6 => {
                    let model = &models[rng.gen_range(0..models.len())];
                    if let Some(node) = random_node(&mut rng, model) {
                        let index = model.index_for_node(node);
                        model.set_data(&index, ItemData::from(next_label()), ItemRole::Display);
                    }
                }
                _ => {}
            }
            let events = recorder.take();
            common::assert_balanced(&events);
            shadow.apply(proxy.as_ref(), &events);
            shadow.verify(proxy.as_ref());
            check_invariants(&proxy, &models);
        }
    }
}
