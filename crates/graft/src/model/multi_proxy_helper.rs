//! Translation of source model notifications for multi-source proxies.
//!
//! A proxy composed of several sources connects to every source's signals
//! through [`connect_source_model`]. The connection forwards each
//! notification to a [`MultiProxyHooks`] implementation, tagged with the
//! mount the source belongs to, and drops the ones concerning source
//! subtrees the proxy has not exposed:
//!
//! - row inserts and removals are forwarded only below mapped parents;
//! - layout changes are forwarded if they concern the whole model or at
//!   least one mapped parent;
//! - moves are reclassified by the mapped state of both parents (see
//!   [`MoveKind`]).
//!
//! The decision taken for an "about to" notification is cached and reused
//! for the matching completion, since the change itself can alter what is
//! mapped.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use graft_core::ConnectionId;
use graft_core::logging::targets;

use super::index::ModelIndex;
use super::mime::{DropActions, MimeData};
use super::role::{ItemData, ItemRole};
use super::source_mapping::{MappingKey, MountKey, Scope};
use super::traits::{ItemModel, LayoutChangeHint, Orientation};

/// Provides header data for non-identity roles.
pub type GetHeaderDataFn = Arc<dyn Fn(usize, Orientation, ItemRole) -> ItemData + Send + Sync>;

/// Stores header data for non-identity roles. Returns `true` on success.
pub type SetHeaderDataFn = Arc<dyn Fn(usize, Orientation, &ItemData, ItemRole) -> bool + Send + Sync>;

/// Serializes a drag whose items come from several source models.
///
/// Receives the source indices of the dragged items.
pub type DragCallback = Arc<dyn Fn(&[ModelIndex]) -> Option<MimeData> + Send + Sync>;

/// How a source move is presented to the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MoveKind {
    /// Both parents are mapped: a genuine move.
    Move,
    /// Only the source parent is mapped: the rows disappear.
    Remove,
    /// Only the destination parent is mapped: the rows appear.
    Insert,
    /// Neither parent is mapped.
    Ignore,
}

impl MoveKind {
    pub fn classify(source_mapped: bool, dest_mapped: bool) -> Self {
        match (source_mapped, dest_mapped) {
            (true, true) => MoveKind::Move,
            (true, false) => MoveKind::Remove,
            (false, true) => MoveKind::Insert,
            (false, false) => MoveKind::Ignore,
        }
    }
}

/// Receivers of translated source notifications.
///
/// Every method receives the mount of the source model that emitted.
pub(crate) trait MultiProxyHooks: Send + Sync + 'static {
    /// Returns true if the children of `index` are exposed by the proxy.
    ///
    /// An invalid index stands for the source model's root.
    fn is_source_index_mapped(&self, mount: MountKey, index: &ModelIndex) -> bool;

    fn source_data_changed(
        &self,
        mount: MountKey,
        top_left: &ModelIndex,
        bottom_right: &ModelIndex,
        roles: &[ItemRole],
    );

    fn source_about_to_reset(&self, mount: MountKey);

    fn source_reset(&self, mount: MountKey);

    /// The source model is being dropped and can no longer be queried.
    fn source_destroyed(&self, _mount: MountKey) {}

    /// `parents` only holds the mapped parents; empty means the whole model.
    fn source_layout_about_to_change(
        &self,
        mount: MountKey,
        parents: &[ModelIndex],
        hint: LayoutChangeHint,
    );

    fn source_layout_changed(&self, mount: MountKey, hint: LayoutChangeHint);

    fn source_rows_about_to_be_inserted(&self, mount: MountKey, parent: &ModelIndex, first: usize, last: usize);

    fn source_rows_inserted(&self, mount: MountKey, parent: &ModelIndex, first: usize, last: usize);

    fn source_rows_about_to_be_removed(&self, mount: MountKey, parent: &ModelIndex, first: usize, last: usize);

    fn source_rows_removed(&self, mount: MountKey, parent: &ModelIndex, first: usize, last: usize);

    fn source_rows_about_to_be_moved(
        &self,
        mount: MountKey,
        source_parent: &ModelIndex,
        first: usize,
        last: usize,
        dest_parent: &ModelIndex,
        dest_row: usize,
    );

    fn source_rows_moved(
        &self,
        mount: MountKey,
        source_parent: &ModelIndex,
        first: usize,
        last: usize,
        dest_parent: &ModelIndex,
        dest_row: usize,
    );
}

/// Decisions taken at "about to" time, popped at completion.
#[derive(Debug, Default)]
struct PairCache {
    inserts: Vec<bool>,
    removes: Vec<bool>,
    layouts: Vec<bool>,
    moves: Vec<MoveKind>,
}

/// The connections made to one source model.
#[derive(Debug)]
pub(crate) struct SourceConnections {
    data_changed: ConnectionId,
    about_to_reset: ConnectionId,
    reset: ConnectionId,
    layout_about_to_change: ConnectionId,
    layout_changed: ConnectionId,
    rows_about_to_be_inserted: ConnectionId,
    rows_inserted: ConnectionId,
    rows_about_to_be_removed: ConnectionId,
    rows_removed: ConnectionId,
    rows_about_to_be_moved: ConnectionId,
    rows_moved: ConnectionId,
    destroyed: ConnectionId,
}

impl SourceConnections {
    /// Disconnects from the model the connections were made to.
    pub fn disconnect(&self, model: &dyn ItemModel) {
        let signals = model.signals();
        signals.data_changed.disconnect(self.data_changed);
        signals.model_about_to_reset.disconnect(self.about_to_reset);
        signals.model_reset.disconnect(self.reset);
        signals
            .layout_about_to_change
            .disconnect(self.layout_about_to_change);
        signals.layout_changed.disconnect(self.layout_changed);
        signals
            .rows_about_to_be_inserted
            .disconnect(self.rows_about_to_be_inserted);
        signals.rows_inserted.disconnect(self.rows_inserted);
        signals
            .rows_about_to_be_removed
            .disconnect(self.rows_about_to_be_removed);
        signals.rows_removed.disconnect(self.rows_removed);
        signals
            .rows_about_to_be_moved
            .disconnect(self.rows_about_to_be_moved);
        signals.rows_moved.disconnect(self.rows_moved);
        signals.model_destroyed.disconnect(self.destroyed);
    }
}

/// Connects a source model's notifications to `hooks`, tagged with `mount`.
pub(crate) fn connect_source_model<H: MultiProxyHooks>(
    hooks: &Weak<H>,
    mount: MountKey,
    model: &dyn ItemModel,
) -> SourceConnections {
    let signals = model.signals();
    let cache = Arc::new(Mutex::new(PairCache::default()));

    let data_changed = {
        let hooks = hooks.clone();
        signals
            .data_changed
            .connect(move |(top_left, bottom_right, roles)| {
                let Some(hooks) = hooks.upgrade() else {
                    return;
                };
                if top_left.is_valid() && hooks.is_source_index_mapped(mount, &top_left.parent()) {
                    hooks.source_data_changed(mount, top_left, bottom_right, roles);
                }
            })
    };

    let about_to_reset = {
        let hooks = hooks.clone();
        signals.model_about_to_reset.connect(move |_| {
            if let Some(hooks) = hooks.upgrade() {
                hooks.source_about_to_reset(mount);
            }
        })
    };

    let reset = {
        let hooks = hooks.clone();
        signals.model_reset.connect(move |_| {
            if let Some(hooks) = hooks.upgrade() {
                hooks.source_reset(mount);
            }
        })
    };

    let layout_about_to_change = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals
            .layout_about_to_change
            .connect(move |(parents, hint)| {
                let Some(hooks) = hooks.upgrade() else {
                    return;
                };
                let mapped: Vec<ModelIndex> = parents
                    .iter()
                    .filter(|parent| hooks.is_source_index_mapped(mount, parent))
                    .cloned()
                    .collect();
                let forward = parents.is_empty() || !mapped.is_empty();
                cache.lock().layouts.push(forward);
                if forward {
                    hooks.source_layout_about_to_change(mount, &mapped, *hint);
                }
            })
    };

    let layout_changed = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals.layout_changed.connect(move |(_, hint)| {
            let forward = cache.lock().layouts.pop().unwrap_or(false);
            if let (true, Some(hooks)) = (forward, hooks.upgrade()) {
                hooks.source_layout_changed(mount, *hint);
            }
        })
    };

    let rows_about_to_be_inserted = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals
            .rows_about_to_be_inserted
            .connect(move |(parent, first, last)| {
                let Some(hooks) = hooks.upgrade() else {
                    return;
                };
                let mapped = hooks.is_source_index_mapped(mount, parent);
                cache.lock().inserts.push(mapped);
                if mapped {
                    hooks.source_rows_about_to_be_inserted(mount, parent, *first, *last);
                }
            })
    };

    let rows_inserted = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals.rows_inserted.connect(move |(parent, first, last)| {
            let mapped = cache.lock().inserts.pop().unwrap_or(false);
            if let (true, Some(hooks)) = (mapped, hooks.upgrade()) {
                hooks.source_rows_inserted(mount, parent, *first, *last);
            }
        })
    };

    let rows_about_to_be_removed = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals
            .rows_about_to_be_removed
            .connect(move |(parent, first, last)| {
                let Some(hooks) = hooks.upgrade() else {
                    return;
                };
                let mapped = hooks.is_source_index_mapped(mount, parent);
                cache.lock().removes.push(mapped);
                if mapped {
                    hooks.source_rows_about_to_be_removed(mount, parent, *first, *last);
                }
            })
    };

    let rows_removed = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals.rows_removed.connect(move |(parent, first, last)| {
            let mapped = cache.lock().removes.pop().unwrap_or(false);
            if let (true, Some(hooks)) = (mapped, hooks.upgrade()) {
                hooks.source_rows_removed(mount, parent, *first, *last);
            }
        })
    };

    let rows_about_to_be_moved = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals.rows_about_to_be_moved.connect(
            move |(source_parent, first, last, dest_parent, dest_row)| {
                let Some(hooks) = hooks.upgrade() else {
                    return;
                };
                let kind = MoveKind::classify(
                    hooks.is_source_index_mapped(mount, source_parent),
                    hooks.is_source_index_mapped(mount, dest_parent),
                );
                trace!(target: targets::MAPPING, ?kind, first, last, dest_row, "source move");
                cache.lock().moves.push(kind);
                let count = last - first;
                match kind {
                    MoveKind::Move => hooks.source_rows_about_to_be_moved(
                        mount,
                        source_parent,
                        *first,
                        *last,
                        dest_parent,
                        *dest_row,
                    ),
                    MoveKind::Remove => {
                        hooks.source_rows_about_to_be_removed(mount, source_parent, *first, *last)
                    }
                    MoveKind::Insert => hooks.source_rows_about_to_be_inserted(
                        mount,
                        dest_parent,
                        *dest_row,
                        dest_row + count,
                    ),
                    MoveKind::Ignore => {}
                }
            },
        )
    };

    let rows_moved = {
        let hooks = hooks.clone();
        let cache = cache.clone();
        signals
            .rows_moved
            .connect(move |(source_parent, first, last, dest_parent, dest_row)| {
                let kind = cache.lock().moves.pop().unwrap_or(MoveKind::Ignore);
                let Some(hooks) = hooks.upgrade() else {
                    return;
                };
                let count = last - first;
                match kind {
                    MoveKind::Move => hooks.source_rows_moved(
                        mount,
                        source_parent,
                        *first,
                        *last,
                        dest_parent,
                        *dest_row,
                    ),
                    MoveKind::Remove => hooks.source_rows_removed(mount, source_parent, *first, *last),
                    MoveKind::Insert => {
                        hooks.source_rows_inserted(mount, dest_parent, *dest_row, dest_row + count)
                    }
                    MoveKind::Ignore => {}
                }
            })
    };

    let destroyed = {
        let hooks = hooks.clone();
        signals.model_destroyed.connect(move |_| {
            if let Some(hooks) = hooks.upgrade() {
                hooks.source_destroyed(mount);
            }
        })
    };

    SourceConnections {
        data_changed,
        about_to_reset,
        reset,
        layout_about_to_change,
        layout_changed,
        rows_about_to_be_inserted,
        rows_inserted,
        rows_about_to_be_removed,
        rows_removed,
        rows_about_to_be_moved,
        rows_moved,
        destroyed,
    }
}

/// Fail-fast guard against re-entrant structural changes.
///
/// Set when a proxy announces a change and cleared right before it
/// announces completion. Setting it twice means a notification handler
/// mutated a model while a change was in flight.
#[derive(Debug, Default)]
pub(crate) struct BusyFlag(AtomicBool);

impl BusyFlag {
    pub fn set(&self) {
        let was_busy = self.0.swap(true, Ordering::AcqRel);
        assert!(
            !was_busy,
            "proxy model modified while a change notification was in flight"
        );
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Rebuilds a source index from the rows leading to it.
pub(crate) fn source_index(model: &dyn ItemModel, rows: &[usize], column: usize) -> ModelIndex {
    let Some((last, ancestors)) = rows.split_last() else {
        return ModelIndex::invalid();
    };
    let mut parent = ModelIndex::invalid();
    for row in ancestors {
        parent = model.index(*row, 0, &parent);
        if !parent.is_valid() {
            return ModelIndex::invalid();
        }
    }
    model.index(*last, column, &parent)
}

/// The exposed children of one scope with their node identities, recorded
/// before the source reorders them.
#[derive(Debug)]
pub(crate) struct ScopeCapture {
    pub scope: Scope,
    pub nodes: Vec<(MappingKey, Option<u64>)>,
}

impl ScopeCapture {
    /// Records the identities of `children`, given as source row paths.
    pub fn record(model: &dyn ItemModel, scope: Scope, children: Vec<(MappingKey, Vec<usize>)>) -> Self {
        let nodes = children
            .into_iter()
            .map(|(key, rows)| {
                let index = source_index(model, &rows, 0);
                (key, model.node_id(&index))
            })
            .collect();
        Self { scope, nodes }
    }

    /// Finds where the recorded nodes ended up below `parent`.
    ///
    /// Nodes without identity, or no longer present, map to `None`.
    pub fn locate(&self, model: &dyn ItemModel, parent: &ModelIndex) -> HashMap<MappingKey, Option<usize>> {
        let wanted: HashSet<u64> = self.nodes.iter().filter_map(|(_, id)| *id).collect();
        if wanted.is_empty() {
            return self.nodes.iter().map(|(key, _)| (*key, None)).collect();
        }

        let mut rows = HashMap::with_capacity(wanted.len());
        for row in 0..model.row_count(parent) {
            let index = model.index(row, 0, parent);
            if let Some(id) = model.node_id(&index).filter(|id| wanted.contains(id)) {
                rows.entry(id).or_insert(row);
            }
        }
        self.nodes
            .iter()
            .map(|(key, id)| (*key, id.and_then(|id| rows.get(&id).copied())))
            .collect()
    }
}

/// Moves captured entries to the rows their nodes occupy after a layout
/// change.
///
/// `parent_path` yields the current source path of a scope's owner (empty
/// for a mount's top level), or `None` if the scope is gone. `apply`
/// receives the new rows of each scope, in capture order.
pub(crate) fn relocate_captures(
    model: &dyn ItemModel,
    captures: &[ScopeCapture],
    mut parent_path: impl FnMut(Scope) -> Option<Vec<usize>>,
    mut apply: impl FnMut(Scope, &HashMap<MappingKey, Option<usize>>),
) {
    for capture in captures {
        let Some(path) = parent_path(capture.scope) else {
            continue;
        };
        let parent = source_index(model, &path, 0);
        let rows = if !path.is_empty() && !parent.is_valid() {
            HashMap::new()
        } else {
            capture.locate(model, &parent)
        };
        apply(capture.scope, &rows);
    }
}

/// Appends the entries of `more` missing from `into`, keeping order.
pub(crate) fn merge_mime_types(into: &mut Vec<String>, more: Vec<String>) {
    for mime_type in more {
        if !into.contains(&mime_type) {
            into.push(mime_type);
        }
    }
}

/// Union of role names; earlier models win on conflicts.
pub(crate) fn merge_role_names(into: &mut HashMap<ItemRole, String>, more: HashMap<ItemRole, String>) {
    for (role, name) in more {
        into.entry(role).or_insert(name);
    }
}

/// Union of drop actions over several models.
pub(crate) fn union_actions<'a>(
    models: impl IntoIterator<Item = &'a Arc<dyn ItemModel>>,
    actions: impl Fn(&dyn ItemModel) -> DropActions,
) -> DropActions {
    models
        .into_iter()
        .fold(DropActions::empty(), |all, model| all | actions(model.as_ref()))
}
