//! Proxy model grafting source trees below interior nodes.
//!
//! `MountingProxyModel` shows a primary source model as is and lets other
//! models be mounted below any of its nodes, or below nodes of mounted
//! models. A mounted model's top-level rows become the children of the
//! node it is mounted at; the node's own source children are hidden while
//! the mount exists.
//!
//! Mounts are made explicitly with [`mount`](MountingProxyModel::mount) or
//! lazily by a [`SourceModelFactory`] consulted for every node the proxy
//! exposes and for every exposed node that reports a data change.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::SecondaryMap;
use static_assertions::assert_impl_all;
use tracing::{debug, trace, warn};

use graft_core::logging::{span_names, targets};
use graft_core::{PerfSpan, Signal, ThreadAffinity};

use super::column_mapping::{MountData, MultiProxyColumnMapping};
use super::column_sort::ColumnSort;
use super::error::ProxyError;
use super::index::{ModelId, ModelIndex};
use super::mime::{DropActions, MimeData};
use super::multi_proxy_helper::{
    BusyFlag, DragCallback, GetHeaderDataFn, MultiProxyHooks, ScopeCapture, SetHeaderDataFn,
    SourceConnections, connect_source_model, merge_mime_types, merge_role_names,
    relocate_captures, source_index, union_actions,
};
use super::role::{ItemData, ItemRole};
use super::source::SourceModel;
use super::source_mapping::{MappingKey, MountKey, Scope, SourceMapping};
use super::traits::{
    ItemFlags, ItemModel, LayoutChangeHint, ModelSignals, MoveArgs, Orientation, RangeArgs,
    SortOrder,
};

/// Produces the model to mount below a source node, if any.
///
/// Receives the node's index in its own source model.
pub type SourceModelFactory = Arc<dyn Fn(&ModelIndex) -> Option<SourceModel> + Send + Sync>;

struct MountRecord {
    source: SourceModel,
    model_id: ModelId,
    columns: MountData,
    connections: Option<SourceConnections>,
}

impl MountRecord {
    fn disconnect(&mut self) {
        if let (Some(connections), Some(model)) = (self.connections.take(), self.source.get()) {
            connections.disconnect(model.as_ref());
        }
    }
}

enum Pending {
    Insert {
        scope: Scope,
        first: usize,
        count: usize,
        proxy: RangeArgs,
    },
    Remove {
        scope: Scope,
        first: usize,
        count: usize,
        proxy: RangeArgs,
    },
    Move {
        source: Scope,
        first: usize,
        last: usize,
        destination: Scope,
        dest_row: usize,
        proxy: MoveArgs,
    },
    Layout {
        captures: Vec<ScopeCapture>,
        parents: Vec<ModelIndex>,
    },
    Skip,
}

#[derive(Default)]
struct State {
    mapping: SourceMapping,
    primary: Option<MountKey>,
    mounts: SecondaryMap<MountKey, MountRecord>,
    by_model: HashMap<ModelId, MountKey>,
    columns: MultiProxyColumnMapping,
    sort: ColumnSort,
    get_header_data: Option<GetHeaderDataFn>,
    set_header_data: Option<SetHeaderDataFn>,
    drag_callback: Option<DragCallback>,
    pending: Vec<Pending>,
}

impl State {
    fn key_of(&self, proxy: ModelId, index: &ModelIndex) -> Option<MappingKey> {
        if !index.is_valid() || !index.belongs_to(proxy) {
            return None;
        }
        let key = MappingKey::from_internal_id(index.internal_id());
        self.mapping.contains(key).then_some(key)
    }

    /// The scope holding the proxy children of `parent`.
    fn scope_for_parent(&self, proxy: ModelId, parent: &ModelIndex) -> Option<Scope> {
        if !parent.is_valid() {
            return self.primary.map(Scope::top);
        }
        let key = self.key_of(proxy, parent)?;
        self.mapping.child_scope(key)
    }

    fn model(&self, mount: MountKey) -> Option<Arc<dyn ItemModel>> {
        self.mounts.get(mount)?.source.get()
    }

    /// Live models, the primary first.
    fn models(&self) -> Vec<Arc<dyn ItemModel>> {
        let primary = self.primary.and_then(|mount| self.model(mount));
        let others = self
            .mounts
            .iter()
            .filter(|(mount, _)| Some(*mount) != self.primary)
            .filter_map(|(_, record)| record.source.get());
        primary.into_iter().chain(others).collect()
    }

    fn announce_range(
        &self,
        proxy: ModelId,
        mount: MountKey,
        parent: &ModelIndex,
        first: usize,
        last: usize,
    ) -> Option<(Scope, RangeArgs)> {
        let scope = self.mapping.find_scope(mount, parent)?;
        let owner = self.mapping.scope_owner(proxy, scope)?;
        Some((scope, (owner, first, last)))
    }

    #[allow(clippy::too_many_arguments)]
    fn announce_move(
        &self,
        proxy: ModelId,
        mount: MountKey,
        source_parent: &ModelIndex,
        first: usize,
        last: usize,
        dest_parent: &ModelIndex,
        dest_row: usize,
    ) -> Option<(Pending, MoveArgs)> {
        let source = self.mapping.find_scope(mount, source_parent)?;
        let destination = self.mapping.find_scope(mount, dest_parent)?;
        let from = self.mapping.scope_owner(proxy, source)?;
        let to = self.mapping.scope_owner(proxy, destination)?;
        let args = (from, first, last, to, dest_row);
        let pending = Pending::Move {
            source,
            first,
            last,
            destination,
            dest_row,
            proxy: args.clone(),
        };
        Some((pending, args))
    }

    /// Forgets mounts removed from the mapping, returning their records so
    /// owned models can be dropped once the lock is released.
    fn take_records(&mut self, removed: &[MountKey]) -> Vec<MountRecord> {
        let mut records = Vec::with_capacity(removed.len());
        for mount in removed {
            if let Some(mut record) = self.mounts.remove(*mount) {
                self.by_model.remove(&record.model_id);
                record.disconnect();
                records.push(record);
            }
        }
        if let Some(primary) = self.primary
            && removed.contains(&primary)
        {
            self.primary = None;
        }
        records
    }

    fn take_all_records(&mut self) -> Vec<MountRecord> {
        let mut records = Vec::with_capacity(self.mounts.len());
        for (_, mut record) in self.mounts.drain() {
            record.disconnect();
            records.push(record);
        }
        self.by_model.clear();
        self.mapping.clear();
        self.primary = None;
        self.pending.clear();
        records
    }

    fn update_mount_data(&mut self) {
        let State { mounts, columns, .. } = self;
        for record in mounts.values_mut() {
            if let Some(model) = record.source.get() {
                columns.update_mount_data(model.as_ref(), &mut record.columns);
            }
        }
    }
}

/// A proxy node resolved to a source model.
struct Resolved {
    mount: MountKey,
    model: Arc<dyn ItemModel>,
    index: ModelIndex,
}

/// The source node whose children a proxy node shows.
struct ChildSource {
    scope: Scope,
    model: Arc<dyn ItemModel>,
    parent: ModelIndex,
    hidden: bool,
}

/// Where a drop on the proxy lands in a source model.
struct DropTarget {
    model: Arc<dyn ItemModel>,
    row: Option<usize>,
    column: Option<usize>,
    parent: ModelIndex,
}

/// A proxy model composing a primary tree with trees mounted below its
/// nodes.
///
/// # Example
///
/// ```
/// use graft::model::{ItemModel, ModelIndex, MountingProxyModel, SourceModel, TreeModel};
///
/// let project = TreeModel::<String>::new();
/// project.add_root("level.cry".to_string());
///
/// let proxy = MountingProxyModel::new(None);
/// proxy.set_source_model(Some(SourceModel::owned(project)));
///
/// let layers = TreeModel::<String>::new();
/// layers.add_root("terrain".to_string());
/// layers.add_root("lighting".to_string());
///
/// let level = proxy.index(0, 0, &ModelIndex::invalid());
/// proxy.try_mount(&level, SourceModel::owned(layers)).unwrap();
/// assert_eq!(proxy.row_count(&level), 2);
/// ```
pub struct MountingProxyModel {
    this: Weak<Self>,
    state: Mutex<State>,
    factory: Option<SourceModelFactory>,
    busy: BusyFlag,
    affinity: ThreadAffinity,
    signals: ModelSignals,
    mount_point_data_changed: Signal<(ModelIndex, ModelId)>,
}

assert_impl_all!(MountingProxyModel: Send, Sync);

impl MountingProxyModel {
    /// Creates an empty proxy, optionally with a factory for lazy mounts.
    pub fn new(factory: Option<SourceModelFactory>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(State::default()),
            factory,
            busy: BusyFlag::default(),
            affinity: ThreadAffinity::current(),
            signals: ModelSignals::new(),
            mount_point_data_changed: Signal::new(),
        })
    }

    /// Emitted when a node carrying a mount reports a data change.
    ///
    /// Args: (proxy index of the node, id of the model mounted there)
    pub fn mount_point_data_changed(&self) -> &Signal<(ModelIndex, ModelId)> {
        &self.mount_point_data_changed
    }

    // =========================================================================
    // Primary model
    // =========================================================================

    /// Replaces the primary model, tearing down every mount. Clients see a
    /// reset.
    pub fn set_source_model(&self, source: Option<SourceModel>) {
        self.affinity.debug_assert_same_thread();
        let _span = PerfSpan::new(span_names::RESET);
        let model = source.as_ref().and_then(SourceModel::get);
        if source.is_some() && model.is_none() {
            debug!(target: targets::MOUNTING, "primary model already dropped");
        }

        self.busy.set();
        self.signals.model_about_to_reset.emit(());
        let dropped = self.state.lock().take_all_records();
        if let (Some(source), Some(model)) = (source, model) {
            let columns = self.prepare(model.as_ref());
            let mut state = self.state.lock();
            if let Some((mount, _)) = state.mapping.add_mount(None) {
                let model_id = model.model_id();
                let connections = connect_source_model(&self.this, mount, model.as_ref());
                state.mounts.insert(
                    mount,
                    MountRecord {
                        source,
                        model_id,
                        columns,
                        connections: Some(connections),
                    },
                );
                state.by_model.insert(model_id, mount);
                state.primary = Some(mount);
                debug!(target: targets::MOUNTING, model = %model_id, "primary model set");
            }
        }
        self.busy.clear();
        self.signals.model_reset.emit(());
        drop(dropped);
    }

    /// The primary model.
    pub fn source_model(&self) -> Option<Arc<dyn ItemModel>> {
        let state = self.state.lock();
        state.primary.and_then(|mount| state.model(mount))
    }

    // =========================================================================
    // Mounting
    // =========================================================================

    /// Mounts `source` below the node at `index`.
    ///
    /// The node must not be the root, must not carry a mount and must not
    /// have children of its own. Clients see the new rows inserted and a
    /// data change of the node.
    pub fn try_mount(&self, index: &ModelIndex, source: SourceModel) -> Result<ModelId, ProxyError> {
        self.affinity.debug_assert_same_thread();
        if !index.is_valid() {
            return Err(ProxyError::RootIndex);
        }
        let proxy = self.signals.model_id();
        let key = {
            let state = self.state.lock();
            let key = state.key_of(proxy, index).ok_or(ProxyError::StaleIndex)?;
            if state
                .mapping
                .entry(key)
                .is_some_and(|entry| entry.submount.is_some())
            {
                return Err(ProxyError::AlreadyMounted);
            }
            key
        };
        let model = source.get().ok_or(ProxyError::SourceDropped)?;
        let model_id = model.model_id();
        if self.state.lock().by_model.contains_key(&model_id) {
            return Err(ProxyError::ModelAlreadyMounted(model_id));
        }
        if self.has_children(index) {
            return Err(ProxyError::WouldShadowChildren);
        }
        self.attach(key, source, model, true)
    }

    /// Mounts `source` below the node at `index`, logging a refusal
    /// instead of returning it.
    pub fn mount(&self, index: &ModelIndex, source: SourceModel) {
        if let Err(err) = self.try_mount(index, source) {
            debug!(target: targets::MOUNTING, %err, "mount refused");
        }
    }

    /// Mounts `source` below the proxy node showing `source_index`.
    pub fn try_mount_to_source(
        &self,
        source_index: &ModelIndex,
        source: SourceModel,
    ) -> Result<ModelId, ProxyError> {
        let index = self.map_from_source(source_index);
        if !index.is_valid() {
            return Err(ProxyError::RootIndex);
        }
        self.try_mount(&index, source)
    }

    /// Mounts `source` below the proxy node showing `source_index`,
    /// logging a refusal instead of returning it.
    pub fn mount_to_source(&self, source_index: &ModelIndex, source: SourceModel) {
        if let Err(err) = self.try_mount_to_source(source_index, source) {
            debug!(target: targets::MOUNTING, %err, "mount refused");
        }
    }

    /// Removes the mount below the node at `index`, with the mounts nested
    /// in it.
    ///
    /// Owned models are dropped once clients have been notified.
    pub fn try_unmount(&self, index: &ModelIndex) -> Result<(), ProxyError> {
        self.affinity.debug_assert_same_thread();
        if !index.is_valid() {
            return Err(ProxyError::RootIndex);
        }
        let proxy = self.signals.model_id();
        let (key, mount, model, hidden) = {
            let mut state = self.state.lock();
            let key = state.key_of(proxy, index).ok_or(ProxyError::StaleIndex)?;
            let mount = state
                .mapping
                .entry(key)
                .and_then(|entry| entry.submount)
                .ok_or(ProxyError::NotMounted)?;
            let hidden = state.mapping.mount(mount).is_some_and(|top| top.hidden);
            let model = state.model(mount);
            if let Some(record) = state.mounts.get_mut(mount) {
                record.disconnect();
            }
            (key, mount, model, hidden)
        };

        let rows = match (&model, hidden) {
            (Some(model), false) => model.row_count(&ModelIndex::invalid()),
            _ => 0,
        };
        let node = self.state.lock().mapping.proxy_index(proxy, key, 0);
        if rows > 0 {
            self.busy.set();
            self.signals
                .rows_about_to_be_removed
                .emit((node.clone(), 0, rows - 1));
        }
        // The mount stays in place, withheld, until the node's own children
        // have been announced
        if let Some(top) = self.state.lock().mapping.mount_mut(mount) {
            top.hidden = true;
        }
        if rows > 0 {
            self.busy.clear();
            self.signals.rows_removed.emit((node.clone(), 0, rows - 1));
        }

        let revealed = self
            .resolve_key(key, None)
            .map_or(0, |own| own.model.row_count(&own.index));
        if revealed > 0 {
            self.busy.set();
            self.signals
                .rows_about_to_be_inserted
                .emit((node.clone(), 0, revealed - 1));
        }
        let dropped = {
            let mut state = self.state.lock();
            let removed = state.mapping.remove_mount(mount);
            state.take_records(&removed)
        };
        if revealed > 0 {
            self.busy.clear();
            self.signals
                .rows_inserted
                .emit((node.clone(), 0, revealed - 1));
        }
        debug!(
            target: targets::MOUNTING,
            mounts = dropped.len(),
            rows,
            revealed,
            "unmounted"
        );
        self.signals.emit_data_changed_single(node, Vec::new());
        drop(dropped);
        Ok(())
    }

    /// Removes the mount below the node at `index`; does nothing if there
    /// is none.
    pub fn unmount(&self, index: &ModelIndex) {
        if let Err(err) = self.try_unmount(index) {
            debug!(target: targets::MOUNTING, %err, "unmount refused");
        }
    }

    /// Mounts a model below `key`, announcing its rows if `announce` is set.
    fn attach(
        &self,
        key: MappingKey,
        source: SourceModel,
        model: Arc<dyn ItemModel>,
        announce: bool,
    ) -> Result<ModelId, ProxyError> {
        let proxy = self.signals.model_id();
        let model_id = model.model_id();
        let columns = self.prepare(model.as_ref());
        let rows = if announce {
            model.row_count(&ModelIndex::invalid())
        } else {
            0
        };

        let (mount, node, dropped) = {
            let mut state = self.state.lock();
            if state.by_model.contains_key(&model_id) {
                return Err(ProxyError::ModelAlreadyMounted(model_id));
            }
            if !state.mapping.contains(key) {
                return Err(ProxyError::StaleIndex);
            }
            let (mount, removed) = state
                .mapping
                .add_mount(Some(key))
                .ok_or(ProxyError::AlreadyMounted)?;
            if let Some(top) = state.mapping.mount_mut(mount) {
                top.hidden = announce;
            }
            let connections = connect_source_model(&self.this, mount, model.as_ref());
            state.mounts.insert(
                mount,
                MountRecord {
                    source,
                    model_id,
                    columns,
                    connections: Some(connections),
                },
            );
            state.by_model.insert(model_id, mount);
            let dropped = state.take_records(&removed);
            (mount, state.mapping.proxy_index(proxy, key, 0), dropped)
        };
        drop(dropped);
        debug!(
            target: targets::MOUNTING,
            model = %model_id,
            rows,
            announce,
            "mounted model"
        );
        if !announce {
            return Ok(model_id);
        }

        if rows > 0 {
            self.busy.set();
            self.signals
                .rows_about_to_be_inserted
                .emit((node.clone(), 0, rows - 1));
        }
        if let Some(top) = self.state.lock().mapping.mount_mut(mount) {
            top.hidden = false;
        }
        if rows > 0 {
            self.busy.clear();
            self.signals.rows_inserted.emit((node.clone(), 0, rows - 1));
        }
        self.signals.emit_data_changed_single(node, Vec::new());
        Ok(model_id)
    }

    /// Computes a model's column table and brings it into the active sort.
    fn prepare(&self, model: &dyn ItemModel) -> MountData {
        let (columns, sort) = {
            let state = self.state.lock();
            (state.columns.clone(), state.sort)
        };
        let data = columns.mount_data(model);
        // An unmatched sort column restores the source's natural order
        if let Some(column) = sort.column() {
            model.sort(data.proxy_to_source(column), sort.order());
        }
        data
    }

    /// Consults the factory for nodes exposed for the first time, parents
    /// first. No client has seen their children yet, so mounts are silent.
    fn mount_exposed(&self, created: Vec<MappingKey>) {
        let Some(factory) = &self.factory else {
            return;
        };
        for key in created {
            let Some(node) = self.resolve_key(key, None) else {
                continue;
            };
            let Some(source) = factory(&node.index) else {
                continue;
            };
            let Some(model) = source.get() else {
                trace!(target: targets::MOUNTING, "factory returned a dropped model");
                continue;
            };
            if let Err(err) = self.attach(key, source, model, false) {
                debug!(target: targets::MOUNTING, %err, "factory mount refused");
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The model mounted below the node at `index`.
    pub fn mount_source_model(&self, index: &ModelIndex) -> Option<Arc<dyn ItemModel>> {
        let proxy = self.signals.model_id();
        let state = self.state.lock();
        let key = state.key_of(proxy, index)?;
        let mount = state.mapping.entry(key)?.submount?;
        state.model(mount)
    }

    /// The proxy index of the node a model is mounted at.
    ///
    /// Invalid for the primary model and for models that are not mounted.
    pub fn map_from_source_model(&self, model: ModelId) -> ModelIndex {
        let proxy = self.signals.model_id();
        let state = self.state.lock();
        state
            .by_model
            .get(&model)
            .and_then(|mount| state.mapping.mount(*mount))
            .and_then(|top| top.attach)
            .map(|attach| state.mapping.proxy_index(proxy, attach, 0))
            .unwrap_or_default()
    }

    /// Returns true if the model is the primary model or mounted.
    pub fn is_mounted(&self, model: ModelId) -> bool {
        self.state.lock().by_model.contains_key(&model)
    }

    /// The number of mounted models besides the primary one.
    pub fn mount_count(&self) -> usize {
        let state = self.state.lock();
        state.mounts.len() - usize::from(state.primary.is_some())
    }

    /// The active sort.
    pub fn column_sort(&self) -> ColumnSort {
        self.state.lock().sort
    }

    /// A snapshot of the column mapping.
    pub fn column_mapping(&self) -> MultiProxyColumnMapping {
        self.state.lock().columns.clone()
    }

    // =========================================================================
    // Columns and headers
    // =========================================================================

    /// Switches the proxy to identity-matched columns.
    ///
    /// Column `i` is identified by `get(i, Horizontal, identity_role)`. Other
    /// header queries go to `get`; header edits go to `set`, or are refused
    /// without it. Clients see a reset; mounts are kept.
    pub fn set_header_data_callbacks(
        &self,
        column_count: usize,
        get: GetHeaderDataFn,
        identity_role: ItemRole,
        set: Option<SetHeaderDataFn>,
    ) {
        self.affinity.debug_assert_same_thread();
        let identities: Vec<ItemData> = (0..column_count)
            .map(|column| get(column, Orientation::Horizontal, identity_role))
            .collect();
        self.reset_columns(identities, identity_role, |state| {
            state.get_header_data = Some(get);
            state.set_header_data = set;
        });
    }

    /// Re-reads column identities from the header callback, for a new
    /// column count.
    ///
    /// Does nothing until callbacks are set.
    pub fn columns_changed(&self, column_count: usize) {
        self.affinity.debug_assert_same_thread();
        let (get, role) = {
            let state = self.state.lock();
            (state.get_header_data.clone(), state.columns.identity_role())
        };
        let Some(get) = get else {
            return;
        };
        let identities: Vec<ItemData> = (0..column_count)
            .map(|column| get(column, Orientation::Horizontal, role))
            .collect();
        self.reset_columns(identities, role, |_| {});
    }

    fn reset_columns(&self, identities: Vec<ItemData>, role: ItemRole, configure: impl FnOnce(&mut State)) {
        let _span = PerfSpan::new(span_names::RESET);
        self.busy.set();
        self.signals.model_about_to_reset.emit(());
        {
            let mut state = self.state.lock();
            configure(&mut state);
            state.columns.reset(identities, role);
            state.update_mount_data();
        }
        self.busy.clear();
        self.signals.model_reset.emit(());
    }

    /// Sets the serializer for drags spanning several models.
    pub fn set_drag_callback(&self, callback: Option<DragCallback>) {
        self.state.lock().drag_callback = callback;
    }

    // =========================================================================
    // Index mapping
    // =========================================================================

    /// Maps a proxy index to the source index it shows.
    pub fn map_to_source(&self, proxy_index: &ModelIndex) -> ModelIndex {
        self.resolve(proxy_index, true)
            .map(|resolved| resolved.index)
            .unwrap_or_default()
    }

    /// Maps an index of the primary or a mounted model to the proxy.
    ///
    /// Nodes hidden below a mount have no proxy index.
    pub fn map_from_source(&self, source_index: &ModelIndex) -> ModelIndex {
        if !source_index.is_valid() {
            return ModelIndex::invalid();
        }
        let proxy = self.signals.model_id();
        let mut created = Vec::new();
        let (key, column) = {
            let mut state = self.state.lock();
            let Some(&mount) = state.by_model.get(&source_index.model_id()) else {
                return ModelIndex::invalid();
            };
            let Some(column) = state
                .mounts
                .get(mount)
                .and_then(|record| record.columns.source_to_proxy(source_index.column()))
            else {
                return ModelIndex::invalid();
            };
            let Some(key) = state.mapping.find_or_create(mount, source_index, &mut created) else {
                return ModelIndex::invalid();
            };
            (key, column)
        };
        self.mount_exposed(created);
        self.state.lock().mapping.proxy_index(proxy, key, column)
    }

    /// Rebuilds an index held across changes, or returns an invalid index
    /// if its node is gone.
    pub fn revalidate(&self, index: &ModelIndex) -> ModelIndex {
        let proxy = self.signals.model_id();
        let state = self.state.lock();
        match state.key_of(proxy, index) {
            Some(key) => state.mapping.proxy_index(proxy, key, index.column()),
            None => ModelIndex::invalid(),
        }
    }

    fn resolve(&self, index: &ModelIndex, mapped_column: bool) -> Option<Resolved> {
        let key = self.state.lock().key_of(self.signals.model_id(), index)?;
        self.resolve_key(key, mapped_column.then_some(index.column()))
    }

    /// Resolves an entry to its source node, at the source column of
    /// `proxy_column` or at column 0.
    fn resolve_key(&self, key: MappingKey, proxy_column: Option<usize>) -> Option<Resolved> {
        let (mount, model, rows, column) = {
            let state = self.state.lock();
            let (mount, rows) = state.mapping.source_path(key)?;
            let record = state.mounts.get(mount)?;
            let column = match proxy_column {
                Some(column) => record.columns.proxy_to_source(column)?,
                None => 0,
            };
            (mount, record.source.get()?, rows, column)
        };
        let index = source_index(model.as_ref(), &rows, column);
        index.is_valid().then_some(Resolved { mount, model, index })
    }

    fn child_source(&self, parent: &ModelIndex) -> Option<ChildSource> {
        let proxy = self.signals.model_id();
        let (scope, model, path, hidden) = {
            let state = self.state.lock();
            let scope = state.scope_for_parent(proxy, parent)?;
            let hidden = scope.parent.is_none()
                && state.mapping.mount(scope.mount).is_some_and(|top| top.hidden);
            let path = match scope.parent {
                Some(key) => state.mapping.source_path(key)?.1,
                None => Vec::new(),
            };
            (scope, state.model(scope.mount)?, path, hidden)
        };
        let parent = source_index(model.as_ref(), &path, 0);
        if !path.is_empty() && !parent.is_valid() {
            return None;
        }
        Some(ChildSource {
            scope,
            model,
            parent,
            hidden,
        })
    }

    fn drop_target(&self, row: Option<usize>, column: Option<usize>, parent: &ModelIndex) -> Option<DropTarget> {
        let target = self.child_source(parent)?;
        let column = {
            let state = self.state.lock();
            let record = state.mounts.get(target.scope.mount)?;
            column.and_then(|c| record.columns.proxy_to_source(c))
        };
        Some(DropTarget {
            model: target.model,
            row,
            column,
            parent: target.parent,
        })
    }

    fn pop_pending(&self) -> Pending {
        self.state.lock().pending.pop().unwrap_or(Pending::Skip)
    }
}

impl ItemModel for MountingProxyModel {
    fn row_count(&self, parent: &ModelIndex) -> usize {
        match self.child_source(parent) {
            Some(children) if !children.hidden => children.model.row_count(&children.parent),
            _ => 0,
        }
    }

    fn column_count(&self, _parent: &ModelIndex) -> usize {
        let state = self.state.lock();
        if state.columns.is_configured() {
            return state.columns.column_count();
        }
        state
            .mounts
            .values()
            .map(|record| record.columns.proxy_table().len())
            .max()
            .unwrap_or(0)
    }

    fn data(&self, index: &ModelIndex, role: ItemRole) -> ItemData {
        match self.resolve(index, true) {
            Some(cell) => cell.model.data(&cell.index, role),
            None => ItemData::None,
        }
    }

    fn index(&self, row: usize, column: usize, parent: &ModelIndex) -> ModelIndex {
        if column >= self.column_count(parent) {
            return ModelIndex::invalid();
        }
        let Some(children) = self.child_source(parent) else {
            return ModelIndex::invalid();
        };
        if children.hidden || row >= children.model.row_count(&children.parent) {
            return ModelIndex::invalid();
        }

        let proxy = self.signals.model_id();
        let mut created = Vec::new();
        let key = self
            .state
            .lock()
            .mapping
            .get_or_create(children.scope, row, &mut created);
        let Some(key) = key else {
            return ModelIndex::invalid();
        };
        self.mount_exposed(created);
        self.state.lock().mapping.proxy_index(proxy, key, column)
    }

    fn parent(&self, index: &ModelIndex) -> ModelIndex {
        let proxy = self.signals.model_id();
        let state = self.state.lock();
        match state.key_of(proxy, index) {
            Some(key) => state.mapping.proxy_index(proxy, key, 0).parent(),
            None => ModelIndex::invalid(),
        }
    }

    fn signals(&self) -> &ModelSignals {
        &self.signals
    }

    fn set_data(&self, index: &ModelIndex, value: ItemData, role: ItemRole) -> bool {
        match self.resolve(index, true) {
            Some(cell) => cell.model.set_data(&cell.index, value, role),
            None => false,
        }
    }

    fn flags(&self, index: &ModelIndex) -> ItemFlags {
        if !index.is_valid() {
            return ItemFlags::disabled().with_drop(true);
        }
        if let Some(cell) = self.resolve(index, true) {
            return cell.model.flags(&cell.index);
        }
        match self.resolve(index, false) {
            Some(node) => node.model.flags(&node.index).with_editable(false),
            None => ItemFlags::disabled(),
        }
    }

    fn has_children(&self, parent: &ModelIndex) -> bool {
        if !parent.is_valid() {
            return true;
        }
        let proxy = self.signals.model_id();
        let mounted = {
            let state = self.state.lock();
            match state.key_of(proxy, parent) {
                Some(key) => state
                    .mapping
                    .entry(key)
                    .is_some_and(|entry| entry.submount.is_some()),
                None => return false,
            }
        };
        if mounted {
            return true;
        }
        match self.child_source(parent) {
            Some(children) => children.model.has_children(&children.parent),
            None => false,
        }
    }

    fn header_data(&self, section: usize, orientation: Orientation, role: ItemRole) -> ItemData {
        let (get, fallback) = {
            let state = self.state.lock();
            if orientation == Orientation::Horizontal
                && state.columns.is_configured()
                && role == state.columns.identity_role()
            {
                return state
                    .columns
                    .get_column_value(section)
                    .cloned()
                    .unwrap_or_default();
            }
            // The primary model answers first, then any model with the column
            let candidates = state
                .primary
                .into_iter()
                .chain(state.mounts.keys().filter(|mount| Some(*mount) != state.primary));
            let fallback = candidates
                .filter_map(|mount| {
                    let record = state.mounts.get(mount)?;
                    let section = match orientation {
                        Orientation::Horizontal => record.columns.proxy_to_source(section)?,
                        Orientation::Vertical => section,
                    };
                    Some((record.source.get()?, section))
                })
                .next();
            (state.get_header_data.clone(), fallback)
        };
        if let Some(get) = get {
            return get(section, orientation, role);
        }
        match fallback {
            Some((model, section)) => model.header_data(section, orientation, role),
            None => ItemData::None,
        }
    }

    fn set_header_data(&self, section: usize, orientation: Orientation, value: ItemData, role: ItemRole) -> bool {
        let set = {
            let state = self.state.lock();
            if state.columns.is_configured() && role == state.columns.identity_role() {
                return false;
            }
            state.set_header_data.clone()
        };
        let Some(set) = set else {
            return false;
        };
        let accepted = set(section, orientation, &value, role);
        if accepted {
            self.signals
                .header_data_changed
                .emit((orientation, section, section));
        }
        accepted
    }

    fn can_fetch_more(&self, parent: &ModelIndex) -> bool {
        match self.child_source(parent) {
            Some(children) => !children.hidden && children.model.can_fetch_more(&children.parent),
            None => false,
        }
    }

    fn fetch_more(&self, parent: &ModelIndex) {
        if let Some(children) = self.child_source(parent)
            && !children.hidden
        {
            children.model.fetch_more(&children.parent);
        }
    }

    fn sort(&self, column: Option<usize>, order: SortOrder) {
        self.affinity.debug_assert_same_thread();
        let sort = ColumnSort::new(column, order);
        let sorted: Vec<(Arc<dyn ItemModel>, Option<usize>)> = {
            let mut state = self.state.lock();
            if state.sort == sort {
                return;
            }
            state.sort = sort;
            state
                .mounts
                .values()
                .filter_map(|record| {
                    let model = record.source.get()?;
                    Some((model, column.and_then(|c| record.columns.proxy_to_source(c))))
                })
                .collect()
        };
        debug!(target: targets::MOUNTING, ?column, ?order, models = sorted.len(), "sorting models");
        for (model, column) in sorted {
            model.sort(column, order);
        }
    }

    fn mime_types(&self) -> Vec<String> {
        let mut types = Vec::new();
        for model in self.state.lock().models() {
            merge_mime_types(&mut types, model.mime_types());
        }
        types
    }

    fn mime_data(&self, indexes: &[ModelIndex]) -> Option<MimeData> {
        let resolved: Vec<Resolved> = indexes
            .iter()
            .filter_map(|index| self.resolve(index, true).or_else(|| self.resolve(index, false)))
            .collect();
        let first = resolved.first()?;
        let source_indexes: Vec<ModelIndex> = resolved.iter().map(|r| r.index.clone()).collect();
        if resolved.iter().all(|r| r.mount == first.mount) {
            return first.model.mime_data(&source_indexes);
        }
        let callback = self.state.lock().drag_callback.clone();
        callback.and_then(|callback| callback(&source_indexes))
    }

    fn can_drop_mime_data(
        &self,
        data: &MimeData,
        action: DropActions,
        row: Option<usize>,
        column: Option<usize>,
        parent: &ModelIndex,
    ) -> bool {
        self.drop_target(row, column, parent).is_some_and(|target| {
            target
                .model
                .can_drop_mime_data(data, action, target.row, target.column, &target.parent)
        })
    }

    fn drop_mime_data(
        &self,
        data: &MimeData,
        action: DropActions,
        row: Option<usize>,
        column: Option<usize>,
        parent: &ModelIndex,
    ) -> bool {
        self.affinity.debug_assert_same_thread();
        self.drop_target(row, column, parent).is_some_and(|target| {
            target
                .model
                .drop_mime_data(data, action, target.row, target.column, &target.parent)
        })
    }

    fn supported_drag_actions(&self) -> DropActions {
        let models = self.state.lock().models();
        union_actions(&models, |model| model.supported_drag_actions())
    }

    fn supported_drop_actions(&self) -> DropActions {
        let models = self.state.lock().models();
        union_actions(&models, |model| model.supported_drop_actions())
    }

    fn role_names(&self) -> HashMap<ItemRole, String> {
        let mut names = HashMap::new();
        for model in self.state.lock().models() {
            merge_role_names(&mut names, model.role_names());
        }
        names
    }

    fn node_id(&self, index: &ModelIndex) -> Option<u64> {
        let node = self.resolve(index, false)?;
        node.model.node_id(&node.index)
    }

    fn buddy(&self, index: &ModelIndex) -> ModelIndex {
        match self.resolve(index, true) {
            Some(cell) => {
                let buddy = cell.model.buddy(&cell.index);
                let mapped = self.map_from_source(&buddy);
                if mapped.is_valid() { mapped } else { index.clone() }
            }
            None => index.clone(),
        }
    }
}

impl MultiProxyHooks for MountingProxyModel {
    fn is_source_index_mapped(&self, mount: MountKey, index: &ModelIndex) -> bool {
        let state = self.state.lock();
        if !index.is_valid() {
            return state.mapping.contains_mount(mount);
        }
        state
            .mapping
            .find(mount, index)
            .and_then(|key| state.mapping.entry(key))
            .is_some_and(|entry| entry.submount.is_none())
    }

    fn source_data_changed(
        &self,
        mount: MountKey,
        top_left: &ModelIndex,
        bottom_right: &ModelIndex,
        roles: &[ItemRole],
    ) {
        let proxy = self.signals.model_id();
        let mut created = Vec::new();
        let (span, keys, model) = {
            let mut state = self.state.lock();
            let span = state
                .mounts
                .get(mount)
                .and_then(|record| record.columns.map_source_span(top_left.column(), bottom_right.column()));
            let top = state.mapping.find_or_create(mount, top_left, &mut created);
            let bottom = state.mapping.find_or_create(mount, bottom_right, &mut created);
            (span, top.zip(bottom), state.model(mount))
        };
        self.mount_exposed(created);

        if let (Some((first, last)), Some((top, bottom))) = (span, keys) {
            let (top_left, bottom_right) = {
                let state = self.state.lock();
                (
                    state.mapping.proxy_index(proxy, top, first),
                    state.mapping.proxy_index(proxy, bottom, last),
                )
            };
            if top_left.is_valid() && bottom_right.is_valid() {
                self.signals
                    .data_changed
                    .emit((top_left, bottom_right, roles.to_vec()));
            }
        }

        let Some(model) = model else {
            return;
        };
        let source_parent = top_left.parent();
        for row in top_left.row()..=bottom_right.row() {
            let node = model.index(row, 0, &source_parent);
            let found = {
                let state = self.state.lock();
                state.mapping.find(mount, &node).map(|key| {
                    let mounted = state
                        .mapping
                        .entry(key)
                        .and_then(|entry| entry.submount)
                        .and_then(|submount| state.mounts.get(submount))
                        .map(|record| record.model_id);
                    (key, mounted)
                })
            };
            match found {
                None => {}
                Some((key, Some(mounted))) => {
                    let index = self.state.lock().mapping.proxy_index(proxy, key, 0);
                    self.mount_point_data_changed.emit((index, mounted));
                }
                Some((key, None)) => {
                    let Some(factory) = &self.factory else {
                        continue;
                    };
                    if model.has_children(&node) {
                        trace!(target: targets::MOUNTING, row, "node has children, factory skipped");
                        continue;
                    }
                    let Some(source) = factory(&node) else {
                        continue;
                    };
                    let Some(submodel) = source.get() else {
                        continue;
                    };
                    if let Err(err) = self.attach(key, source, submodel, true) {
                        debug!(target: targets::MOUNTING, %err, "factory mount refused");
                    }
                }
            }
        }
    }

    fn source_about_to_reset(&self, mount: MountKey) {
        let proxy = self.signals.model_id();
        let (is_primary, node, model, hidden) = {
            let state = self.state.lock();
            let Some(top) = state.mapping.mount(mount) else {
                return;
            };
            let node = top
                .attach
                .map(|attach| state.mapping.proxy_index(proxy, attach, 0));
            (state.primary == Some(mount), node, state.model(mount), top.hidden)
        };

        if is_primary {
            debug!(target: targets::MOUNTING, "primary model about to reset");
            self.busy.set();
            self.signals.model_about_to_reset.emit(());
            return;
        }

        let Some(node) = node else {
            return;
        };
        let rows = match (model, hidden) {
            (Some(model), false) => model.row_count(&ModelIndex::invalid()),
            _ => 0,
        };
        trace!(target: targets::MOUNTING, rows, "mounted model about to reset");
        if rows > 0 {
            self.busy.set();
            self.signals
                .rows_about_to_be_removed
                .emit((node.clone(), 0, rows - 1));
        }
        let dropped = {
            let mut state = self.state.lock();
            let removed = state.mapping.clear_mount(mount);
            if let Some(top) = state.mapping.mount_mut(mount) {
                top.hidden = true;
            }
            state.take_records(&removed)
        };
        if rows > 0 {
            self.busy.clear();
            self.signals.rows_removed.emit((node, 0, rows - 1));
        }
        drop(dropped);
    }

    fn source_reset(&self, mount: MountKey) {
        let _span = PerfSpan::new(span_names::RESET);
        let proxy = self.signals.model_id();
        let (is_primary, node, model) = {
            let state = self.state.lock();
            let Some(top) = state.mapping.mount(mount) else {
                return;
            };
            let node = top
                .attach
                .map(|attach| state.mapping.proxy_index(proxy, attach, 0));
            (state.primary == Some(mount), node, state.model(mount))
        };

        if is_primary {
            let dropped = {
                let mut state = self.state.lock();
                let removed = state.mapping.clear_mount(mount);
                let dropped = state.take_records(&removed);
                let State { mounts, columns, .. } = &mut *state;
                if let (Some(record), Some(model)) = (mounts.get_mut(mount), model) {
                    columns.update_mount_data(model.as_ref(), &mut record.columns);
                }
                state.pending.clear();
                dropped
            };
            debug!(
                target: targets::MOUNTING,
                mounts = dropped.len(),
                "primary model reset"
            );
            self.busy.clear();
            self.signals.model_reset.emit(());
            drop(dropped);
            return;
        }

        let (Some(node), Some(model)) = (node, model) else {
            return;
        };
        let rows = model.row_count(&ModelIndex::invalid());
        trace!(target: targets::MOUNTING, rows, "mounted model reset");
        if rows > 0 {
            self.busy.set();
            self.signals
                .rows_about_to_be_inserted
                .emit((node.clone(), 0, rows - 1));
        }
        if let Some(top) = self.state.lock().mapping.mount_mut(mount) {
            top.hidden = false;
        }
        if rows > 0 {
            self.busy.clear();
            self.signals.rows_inserted.emit((node, 0, rows - 1));
        }
    }

    fn source_layout_about_to_change(&self, mount: MountKey, parents: &[ModelIndex], hint: LayoutChangeHint) {
        let proxy = self.signals.model_id();
        let (model, children, proxy_parents) = {
            let state = self.state.lock();
            let scopes = state.mapping.layout_scopes(mount, parents);
            let is_primary = state.primary == Some(mount);
            let proxy_parents: Vec<ModelIndex> = if parents.is_empty() && is_primary {
                Vec::new()
            } else if parents.is_empty() {
                scopes
                    .iter()
                    .filter_map(|scope| state.mapping.scope_owner(proxy, *scope))
                    .collect()
            } else {
                parents
                    .iter()
                    .filter_map(|parent| {
                        let scope = state.mapping.find_scope(mount, parent)?;
                        state.mapping.scope_owner(proxy, scope)
                    })
                    .collect()
            };
            let children: Vec<(Scope, Vec<(MappingKey, Vec<usize>)>)> = scopes
                .into_iter()
                .map(|scope| (scope, state.mapping.child_paths(scope)))
                .collect();
            (state.model(mount), children, proxy_parents)
        };

        let captures: Vec<ScopeCapture> = match model {
            Some(model) => children
                .into_iter()
                .map(|(scope, nodes)| ScopeCapture::record(model.as_ref(), scope, nodes))
                .collect(),
            None => Vec::new(),
        };
        self.state.lock().pending.push(Pending::Layout {
            captures,
            parents: proxy_parents.clone(),
        });
        self.busy.set();
        self.signals
            .layout_about_to_change
            .emit((proxy_parents, hint));
    }

    fn source_layout_changed(&self, mount: MountKey, hint: LayoutChangeHint) {
        let Pending::Layout { captures, parents } = self.pop_pending() else {
            warn!(target: targets::MOUNTING, "layout change completed without announcement");
            return;
        };
        let _span = PerfSpan::new(span_names::RELOCATE);
        let model = self.state.lock().model(mount);
        let mut dropped = Vec::new();
        if let Some(model) = model {
            relocate_captures(
                model.as_ref(),
                &captures,
                |scope| {
                    let state = self.state.lock();
                    match scope.parent {
                        None => state.mapping.contains_mount(scope.mount).then(Vec::new),
                        Some(key) => state.mapping.source_path(key).map(|(_, rows)| rows),
                    }
                },
                |scope, rows| {
                    let mut state = self.state.lock();
                    let removed = state.mapping.relocate(scope, rows);
                    dropped.extend(state.take_records(&removed));
                },
            );
        }
        if !dropped.is_empty() {
            debug!(
                target: targets::MOUNTING,
                mounts = dropped.len(),
                "mounts lost their nodes in a layout change"
            );
        }
        self.busy.clear();
        self.signals.layout_changed.emit((parents, hint));
        drop(dropped);
    }

    fn source_rows_about_to_be_inserted(&self, mount: MountKey, parent: &ModelIndex, first: usize, last: usize) {
        let proxy = self.signals.model_id();
        let range = {
            let mut state = self.state.lock();
            let announced = state.announce_range(proxy, mount, parent, first, last);
            let pending = match &announced {
                Some((scope, range)) => Pending::Insert {
                    scope: *scope,
                    first,
                    count: last - first + 1,
                    proxy: range.clone(),
                },
                None => Pending::Skip,
            };
            state.pending.push(pending);
            announced.map(|(_, range)| range)
        };
        if let Some(range) = range {
            self.busy.set();
            self.signals.rows_about_to_be_inserted.emit(range);
        }
    }

    fn source_rows_inserted(&self, _mount: MountKey, _parent: &ModelIndex, _first: usize, _last: usize) {
        let Pending::Insert {
            scope,
            first,
            count,
            proxy,
        } = self.pop_pending()
        else {
            return;
        };
        self.state.lock().mapping.insert_rows(scope, first, count);
        self.busy.clear();
        self.signals.rows_inserted.emit(proxy);
    }

    fn source_rows_about_to_be_removed(&self, mount: MountKey, parent: &ModelIndex, first: usize, last: usize) {
        let proxy = self.signals.model_id();
        let range = {
            let mut state = self.state.lock();
            let announced = state.announce_range(proxy, mount, parent, first, last);
            let pending = match &announced {
                Some((scope, range)) => Pending::Remove {
                    scope: *scope,
                    first,
                    count: last - first + 1,
                    proxy: range.clone(),
                },
                None => Pending::Skip,
            };
            state.pending.push(pending);
            announced.map(|(_, range)| range)
        };
        if let Some(range) = range {
            self.busy.set();
            self.signals.rows_about_to_be_removed.emit(range);
        }
    }

    fn source_rows_removed(&self, _mount: MountKey, _parent: &ModelIndex, _first: usize, _last: usize) {
        let Pending::Remove {
            scope,
            first,
            count,
            proxy,
        } = self.pop_pending()
        else {
            return;
        };
        let dropped = {
            let mut state = self.state.lock();
            let removed = state.mapping.remove_rows(scope, first, count);
            state.take_records(&removed)
        };
        self.busy.clear();
        self.signals.rows_removed.emit(proxy);
        drop(dropped);
    }

    fn source_rows_about_to_be_moved(
        &self,
        mount: MountKey,
        source_parent: &ModelIndex,
        first: usize,
        last: usize,
        dest_parent: &ModelIndex,
        dest_row: usize,
    ) {
        let proxy = self.signals.model_id();
        let args = {
            let mut state = self.state.lock();
            match state.announce_move(proxy, mount, source_parent, first, last, dest_parent, dest_row) {
                Some((pending, args)) => {
                    state.pending.push(pending);
                    Some(args)
                }
                None => {
                    state.pending.push(Pending::Skip);
                    None
                }
            }
        };
        if let Some(args) = args {
            self.busy.set();
            self.signals.rows_about_to_be_moved.emit(args);
        }
    }

    fn source_rows_moved(
        &self,
        _mount: MountKey,
        _source_parent: &ModelIndex,
        _first: usize,
        _last: usize,
        _dest_parent: &ModelIndex,
        _dest_row: usize,
    ) {
        let Pending::Move {
            source,
            first,
            last,
            destination,
            dest_row,
            proxy,
        } = self.pop_pending()
        else {
            return;
        };
        self.state
            .lock()
            .mapping
            .move_rows(source, first, last, destination, dest_row);
        self.busy.clear();
        self.signals.rows_moved.emit(proxy);
    }
}

impl Drop for MountingProxyModel {
    fn drop(&mut self) {
        for record in self.state.get_mut().mounts.values_mut() {
            record.disconnect();
        }
    }
}
