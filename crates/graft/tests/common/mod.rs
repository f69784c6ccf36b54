//! Shared helpers for the proxy integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use graft::model::{
    GetHeaderDataFn, ItemData, ItemModel, ItemRole, ModelIndex, ModelSignals, Orientation,
    SortOrder, TreeModel,
};
use parking_lot::Mutex;

/// Builds a flat tree with one root row per name.
pub fn tree(names: &[&str]) -> Arc<TreeModel<String>> {
    let model = Arc::new(TreeModel::<String>::new());
    for name in names {
        model.add_root(name.to_string());
    }
    model
}

/// Display texts of the rows below `parent`.
pub fn names(model: &dyn ItemModel, parent: &ModelIndex) -> Vec<String> {
    (0..model.row_count(parent))
        .map(|row| {
            model
                .display_text(&model.index(row, 0, parent))
                .unwrap_or_default()
        })
        .collect()
}

/// Horizontal display headers with the given names.
pub fn headers(names: &'static [&'static str]) -> GetHeaderDataFn {
    Arc::new(move |section, orientation, role| match (orientation, role) {
        (Orientation::Horizontal, ItemRole::Display) => names
            .get(section)
            .map(|name| ItemData::from(*name))
            .unwrap_or_default(),
        _ => ItemData::None,
    })
}

/// A headed tree model that records every sort request it receives.
pub struct SortLog {
    inner: TreeModel<Vec<ItemData>>,
    requests: Mutex<Vec<(Option<usize>, SortOrder)>>,
}

impl SortLog {
    pub fn new(headers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner: TreeModel::new().with_headers(headers.iter().copied()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(Option<usize>, SortOrder)> {
        self.requests.lock().clone()
    }
}

impl ItemModel for SortLog {
    fn row_count(&self, parent: &ModelIndex) -> usize {
        self.inner.row_count(parent)
    }

    fn column_count(&self, parent: &ModelIndex) -> usize {
        self.inner.column_count(parent)
    }

    fn data(&self, index: &ModelIndex, role: ItemRole) -> ItemData {
        self.inner.data(index, role)
    }

    fn index(&self, row: usize, column: usize, parent: &ModelIndex) -> ModelIndex {
        self.inner.index(row, column, parent)
    }

    fn parent(&self, index: &ModelIndex) -> ModelIndex {
        self.inner.parent(index)
    }

    fn signals(&self) -> &ModelSignals {
        self.inner.signals()
    }

    fn header_data(&self, section: usize, orientation: Orientation, role: ItemRole) -> ItemData {
        self.inner.header_data(section, orientation, role)
    }

    fn sort(&self, column: Option<usize>, order: SortOrder) {
        self.requests.lock().push((column, order));
        self.inner.sort(column, order);
    }
}

/// Row path of an index, `root` for the invalid index.
pub fn path(index: &ModelIndex) -> String {
    if !index.is_valid() {
        return "root".to_string();
    }
    let mut rows = vec![index.row()];
    let mut parent = index.parent();
    while parent.is_valid() {
        rows.push(parent.row());
        parent = parent.parent();
    }
    rows.iter()
        .rev()
        .map(|row| row.to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Structural notifications as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    AboutToInsert(String, usize, usize),
    Inserted(String, usize, usize),
    AboutToRemove(String, usize, usize),
    Removed(String, usize, usize),
    AboutToMove(String, usize, usize, String, usize),
    Moved(String, usize, usize, String, usize),
    AboutToChangeLayout,
    LayoutChanged,
    AboutToReset,
    Reset,
    DataChanged(String),
}

impl Event {
    /// The completion event an announcement must be followed by.
    fn completion(&self) -> Option<Event> {
        Some(match self {
            Event::AboutToInsert(parent, first, last) => Event::Inserted(parent.clone(), *first, *last),
            Event::AboutToRemove(parent, first, last) => Event::Removed(parent.clone(), *first, *last),
            Event::AboutToMove(from, first, last, to, row) => {
                Event::Moved(from.clone(), *first, *last, to.clone(), *row)
            }
            Event::AboutToChangeLayout => Event::LayoutChanged,
            Event::AboutToReset => Event::Reset,
            _ => return None,
        })
    }

    fn is_completion(&self) -> bool {
        matches!(
            self,
            Event::Inserted(..)
                | Event::Removed(..)
                | Event::Moved(..)
                | Event::LayoutChanged
                | Event::Reset
        )
    }
}

/// Records every notification a model emits.
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(model: &dyn ItemModel) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let signals = model.signals();

        let log = events.clone();
        signals
            .rows_about_to_be_inserted
            .connect(move |(parent, first, last)| {
                log.lock().push(Event::AboutToInsert(path(parent), *first, *last))
            });
        let log = events.clone();
        signals.rows_inserted.connect(move |(parent, first, last)| {
            log.lock().push(Event::Inserted(path(parent), *first, *last))
        });
        let log = events.clone();
        signals
            .rows_about_to_be_removed
            .connect(move |(parent, first, last)| {
                log.lock().push(Event::AboutToRemove(path(parent), *first, *last))
            });
        let log = events.clone();
        signals.rows_removed.connect(move |(parent, first, last)| {
            log.lock().push(Event::Removed(path(parent), *first, *last))
        });
        let log = events.clone();
        signals
            .rows_about_to_be_moved
            .connect(move |(from, first, last, to, row)| {
                log.lock()
                    .push(Event::AboutToMove(path(from), *first, *last, path(to), *row))
            });
        let log = events.clone();
        signals.rows_moved.connect(move |(from, first, last, to, row)| {
            log.lock()
                .push(Event::Moved(path(from), *first, *last, path(to), *row))
        });
        let log = events.clone();
        signals
            .layout_about_to_change
            .connect(move |_| log.lock().push(Event::AboutToChangeLayout));
        let log = events.clone();
        signals
            .layout_changed
            .connect(move |_| log.lock().push(Event::LayoutChanged));
        let log = events.clone();
        signals
            .model_about_to_reset
            .connect(move |_| log.lock().push(Event::AboutToReset));
        let log = events.clone();
        signals.model_reset.connect(move |_| log.lock().push(Event::Reset));
        let log = events.clone();
        signals
            .data_changed
            .connect(move |(top_left, _, _)| log.lock().push(Event::DataChanged(path(top_left))));

        Self { events }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Events other than data changes.
    pub fn structural(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| !matches!(event, Event::DataChanged(_)))
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Returns the events recorded so far and forgets them.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn assert_balanced(&self) {
        assert_balanced(&self.events());
    }
}

/// Asserts every announcement is directly completed by its matching
/// event, with no other structural event in between.
pub fn assert_balanced(events: &[Event]) {
    let mut open: Option<Event> = None;
    for event in events.iter().filter(|event| !matches!(event, Event::DataChanged(_))) {
        match open.take() {
            Some(expected) => assert_eq!(*event, expected, "announcement completed out of order"),
            None if event.is_completion() => panic!("{event:?} without announcement"),
            None => open = event.completion(),
        }
    }
    assert!(open.is_none(), "announcement left open: {open:?}");
}

// =============================================================================
// Shadow client
// =============================================================================

#[derive(Debug, Default, Clone)]
struct ShadowNode {
    /// `None` until the client has looked below the node.
    children: Option<Vec<ShadowNode>>,
}

impl ShadowNode {
    fn unseen(count: usize) -> Vec<ShadowNode> {
        vec![ShadowNode::default(); count]
    }

    /// The children of the node at `rows`, if the client has seen them.
    fn known_mut(&mut self, rows: &[usize]) -> Option<&mut Vec<ShadowNode>> {
        let mut node = self;
        for &row in rows {
            let children = node.children.as_mut()?;
            assert!(
                row < children.len(),
                "client has no row {row} below a parent it has seen"
            );
            node = &mut children[row];
        }
        node.children.as_mut()
    }
}

fn rows_of(path: &str) -> Vec<usize> {
    if path == "root" {
        return Vec::new();
    }
    path.split('/')
        .map(|row| row.parse().expect("row path"))
        .collect()
}

/// The row counts a client believes in when it only follows notifications.
///
/// The client knows the children of every node it has looked at and
/// updates them from the structural events it receives.
pub struct Shadow {
    root: ShadowNode,
}

impl Shadow {
    pub fn new(model: &dyn ItemModel) -> Self {
        let rows = model.row_count(&ModelIndex::invalid());
        Self {
            root: ShadowNode {
                children: Some(ShadowNode::unseen(rows)),
            },
        }
    }

    /// Looks below every node, like a fully expanded view.
    pub fn expand_all(&mut self, model: &dyn ItemModel) {
        fn expand(node: &mut ShadowNode, model: &dyn ItemModel, index: &ModelIndex) {
            let children = node
                .children
                .get_or_insert_with(|| ShadowNode::unseen(model.row_count(index)));
            for (row, child) in children.iter_mut().enumerate() {
                expand(child, model, &model.index(row, 0, index));
            }
        }
        expand(&mut self.root, model, &ModelIndex::invalid());
    }

    /// Replays one batch of notifications.
    ///
    /// A layout change or reset invalidates everything the client knew, so
    /// it starts over from the model's top level.
    pub fn apply(&mut self, model: &dyn ItemModel, events: &[Event]) {
        if events
            .iter()
            .any(|event| matches!(event, Event::LayoutChanged | Event::Reset))
        {
            *self = Shadow::new(model);
            return;
        }
        for event in events {
            match event {
                Event::AboutToInsert(parent, first, last) => {
                    if let Some(children) = self.root.known_mut(&rows_of(parent)) {
                        assert!(
                            *first <= children.len(),
                            "{parent}: insert at {first} past {} rows",
                            children.len()
                        );
                        children.splice(*first..*first, ShadowNode::unseen(last - first + 1));
                    }
                }
                Event::AboutToRemove(parent, first, last) => {
                    if let Some(children) = self.root.known_mut(&rows_of(parent)) {
                        assert!(
                            *last < children.len(),
                            "{parent}: removal of {first}..{last} past {} rows",
                            children.len()
                        );
                        children.drain(*first..=*last);
                    }
                }
                Event::AboutToMove(from, first, last, to, row) => {
                    self.apply_move(from, *first, *last, to, *row)
                }
                _ => {}
            }
        }
    }

    fn apply_move(&mut self, from: &str, first: usize, last: usize, to: &str, row: usize) {
        let count = last - first + 1;
        let source = rows_of(from);
        let mut dest = rows_of(to);
        let moved = match self.root.known_mut(&source) {
            Some(children) => {
                assert!(
                    last < children.len(),
                    "{from}: move of {first}..{last} past {} rows",
                    children.len()
                );
                children.drain(first..=last).collect()
            }
            None => ShadowNode::unseen(count),
        };

        // Destination coordinates are taken before the rows left
        let mut row = row;
        if dest == source {
            if row > last {
                row -= count;
            }
        } else if dest.len() > source.len() && dest.starts_with(&source) && dest[source.len()] > last {
            dest[source.len()] -= count;
        }
        if let Some(children) = self.root.known_mut(&dest) {
            assert!(
                row <= children.len(),
                "{to}: move to {row} past {} rows",
                children.len()
            );
            children.splice(row..row, moved);
        }
    }

    /// Asserts the model agrees with every row count the client knows.
    pub fn verify(&self, model: &dyn ItemModel) {
        fn check(node: &ShadowNode, model: &dyn ItemModel, index: &ModelIndex) {
            let Some(children) = &node.children else {
                return;
            };
            let rows = model.row_count(index);
            assert_eq!(
                children.len(),
                rows,
                "{}: client believes {} rows, proxy reports {rows}",
                path(index),
                children.len()
            );
            for (row, child) in children.iter().enumerate() {
                check(child, model, &model.index(row, 0, index));
            }
        }
        check(&self.root, model, &ModelIndex::invalid());
    }
}

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
