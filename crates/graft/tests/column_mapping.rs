//! Tests for identity-matched columns across sources.

mod common;

use std::sync::Arc;

use graft::model::{
    GetHeaderDataFn, ItemData, ItemModel, ItemRole, MergingProxyModel, ModelIndex,
    MultiProxyColumnMapping, Orientation, SortOrder, SourceModel, TreeModel,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

fn identities(names: &[&str]) -> Vec<ItemData> {
    names.iter().map(|name| ItemData::from(*name)).collect()
}

fn headed(headers: &[&str]) -> TreeModel<Vec<ItemData>> {
    TreeModel::new().with_headers(headers.iter().copied())
}

#[test]
fn test_columns_matched_by_header_value() {
    let mut mapping = MultiProxyColumnMapping::new();
    mapping.reset(identities(&["name", "size", "type"]), ItemRole::Display);

    let source = headed(&["type", "name"]);
    let data = mapping.mount_data(&source);

    assert_eq!(data.source_table(), &[Some(2), Some(0)]);
    assert_eq!(data.proxy_table(), &[Some(1), None, Some(0)]);
}

#[test]
fn test_column_tables_are_inverse() {
    let names = ["name", "size", "type", "date", "owner", "flags"];
    for seed in 0..32 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut proxy_names = names.to_vec();
        proxy_names.shuffle(&mut rng);
        proxy_names.truncate(rng.gen_range(1..=names.len()));
        let mut source_names = names.to_vec();
        source_names.shuffle(&mut rng);
        source_names.truncate(rng.gen_range(0..=names.len()));

        let mut mapping = MultiProxyColumnMapping::new();
        mapping.reset(identities(&proxy_names), ItemRole::Display);
        let data = mapping.mount_data(&headed(&source_names));

        for (proxy, source) in data.proxy_table().iter().enumerate() {
            if let Some(source) = source {
                assert_eq!(data.source_to_proxy(*source), Some(proxy));
            }
        }
        for (source, proxy) in data.source_table().iter().enumerate() {
            if let Some(proxy) = proxy {
                assert_eq!(data.proxy_to_source(*proxy), Some(source));
            }
        }
    }
}

#[test]
fn test_proxy_reads_through_matched_columns() {
    let first = Arc::new(headed(&["name", "size"]));
    first.add_root(vec![ItemData::from("a.txt"), ItemData::from("10")]);
    let second = Arc::new(headed(&["size", "name"]));
    second.add_root(vec![ItemData::from("20"), ItemData::from("b.txt")]);

    let proxy = MergingProxyModel::new();
    proxy.append(SourceModel::borrowed(&first)).unwrap();
    proxy.append(SourceModel::borrowed(&second)).unwrap();

    let headers = ["name", "size", "kind"];
    let get: GetHeaderDataFn = Arc::new(move |section, orientation, role| match (orientation, role) {
        (Orientation::Horizontal, ItemRole::Display) => headers
            .get(section)
            .map(|name| ItemData::from(*name))
            .unwrap_or_default(),
        _ => ItemData::None,
    });
    let recorder = common::Recorder::attach(proxy.as_ref());
    proxy.set_header_data_callbacks(3, get, ItemRole::Display, None);
    recorder.assert_balanced();

    let root = ModelIndex::invalid();
    assert_eq!(proxy.column_count(&root), 3);
    let b_name = proxy.index(1, 0, &root);
    let b_size = proxy.index(1, 1, &root);
    assert_eq!(proxy.display_text(&b_name).as_deref(), Some("b.txt"));
    assert_eq!(proxy.display_text(&b_size).as_deref(), Some("20"));
    assert_eq!(proxy.data(&proxy.index(0, 2, &root), ItemRole::Display), ItemData::None);
    assert_eq!(
        proxy.header_data(2, Orientation::Horizontal, ItemRole::Display),
        ItemData::from("kind")
    );
    assert!(!proxy.set_header_data(0, Orientation::Horizontal, ItemData::from("x"), ItemRole::ToolTip));
}

#[test]
fn test_mounted_source_sorted_by_matched_column() {
    let proxy = MergingProxyModel::new();
    proxy.set_header_data_callbacks(2, common::headers(&["name", "size"]), ItemRole::Display, None);
    proxy.sort(Some(1), SortOrder::Descending);

    let matched = common::SortLog::new(&["size", "name"]);
    let unmatched = common::SortLog::new(&["name"]);
    proxy.append(SourceModel::borrowed(&matched)).unwrap();
    proxy.append(SourceModel::borrowed(&unmatched)).unwrap();

    assert_eq!(matched.requests(), vec![(Some(0), SortOrder::Descending)]);
    // No size column: back to the source's own order
    assert_eq!(unmatched.requests(), vec![(None, SortOrder::Descending)]);
}
