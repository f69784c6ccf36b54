//! Proxy model placing several source trees side by side.
//!
//! `MergingProxyModel` exposes the top-level rows of every mounted source
//! as consecutive rows of its own root, in mount order. Below the root,
//! each source's subtree is exposed as is. Every structural notification a
//! source emits is re-emitted in proxy coordinates, so views stay
//! incremental even while sources change.
//!
//! Columns are either passed through or matched by identity through a
//! [`MultiProxyColumnMapping`] configured with
//! [`set_header_data_callbacks`](MergingProxyModel::set_header_data_callbacks).

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::SecondaryMap;
use static_assertions::assert_impl_all;
use tracing::{debug, trace, warn};

use graft_core::logging::{span_names, targets};
use graft_core::{PerfSpan, ThreadAffinity};

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

/// One mounted source and the root rows it occupies.
struct MergedSource {
    source: SourceModel,
    model_id: ModelId,
    columns: MountData,
    connections: Option<SourceConnections>,
    first_row: usize,
    row_count: usize,
}

impl MergedSource {
    fn disconnect(&mut self) {
        if let (Some(connections), Some(model)) = (self.connections.take(), self.source.get()) {
            connections.disconnect(model.as_ref());
        }
    }
}

/// A structural change announced to clients but not applied yet.
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
    /// The change does not concern exposed rows.
    Skip,
}

#[derive(Default)]
struct State {
    mapping: SourceMapping,
    order: Vec<MountKey>,
    sources: SecondaryMap<MountKey, MergedSource>,
    by_model: HashMap<ModelId, MountKey>,
    columns: MultiProxyColumnMapping,
    sort: ColumnSort,
    get_header_data: Option<GetHeaderDataFn>,
    set_header_data: Option<SetHeaderDataFn>,
    drag_callback: Option<DragCallback>,
    pending: Vec<Pending>,
}

impl State {
    fn total_rows(&self) -> usize {
        self.sources.values().map(|source| source.row_count).sum()
    }

    /// Recomputes where each source starts, keeping the root partitioned.
    fn refresh_offsets(&mut self) {
        let mut next = 0;
        for mount in &self.order {
            let Some(source) = self.sources.get_mut(*mount) else {
                continue;
            };
            source.first_row = next;
            next += source.row_count;
            if let Some(top) = self.mapping.mount_mut(*mount) {
                top.row_offset = source.first_row;
            }
        }
    }

    /// The source owning a root row, and the row within that source.
    fn mount_at_row(&self, row: usize) -> Option<(MountKey, usize)> {
        self.order.iter().find_map(|mount| {
            let source = self.sources.get(*mount)?;
            (row >= source.first_row && row < source.first_row + source.row_count)
                .then(|| (*mount, row - source.first_row))
        })
    }

    fn model(&self, mount: MountKey) -> Option<Arc<dyn ItemModel>> {
        self.sources.get(mount)?.source.get()
    }

    fn models(&self) -> Vec<Arc<dyn ItemModel>> {
        self.order
            .iter()
            .filter_map(|mount| self.model(*mount))
            .collect()
    }

    fn key_of(&self, proxy: ModelId, index: &ModelIndex) -> Option<MappingKey> {
        if !index.is_valid() || !index.belongs_to(proxy) {
            return None;
        }
        let key = MappingKey::from_internal_id(index.internal_id());
        self.mapping.contains(key).then_some(key)
    }

    /// Proxy coordinates of a row span in a scope.
    fn proxy_range(&self, proxy: ModelId, scope: Scope, first: usize, last: usize) -> Option<RangeArgs> {
        let parent = self.mapping.scope_owner(proxy, scope)?;
        let offset = self.row_offset(scope);
        Some((parent, first + offset, last + offset))
    }

    /// Proxy coordinates of a row span about to change in a source.
    fn announce_range(
        &self,
        proxy: ModelId,
        mount: MountKey,
        parent: &ModelIndex,
        first: usize,
        last: usize,
    ) -> Option<(Scope, RangeArgs)> {
        let scope = self.mapping.find_scope(mount, parent)?;
        Some((scope, self.proxy_range(proxy, scope, first, last)?))
    }

    /// Pending move and proxy coordinates of a source move.
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
        let (from, proxy_first, proxy_last) = self.proxy_range(proxy, source, first, last)?;
        let to = self.mapping.scope_owner(proxy, destination)?;
        let args = (from, proxy_first, proxy_last, to, dest_row + self.row_offset(destination));
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

    fn row_offset(&self, scope: Scope) -> usize {
        match scope.parent {
            Some(_) => 0,
            None => self
                .sources
                .get(scope.mount)
                .map_or(0, |source| source.first_row),
        }
    }

    /// Adjusts the number of root rows a source provides.
    fn grow(&mut self, mount: MountKey, added: usize, removed: usize) {
        if let Some(source) = self.sources.get_mut(mount) {
            source.row_count = (source.row_count + added).saturating_sub(removed);
        }
        self.refresh_offsets();
    }
}

/// A proxy index resolved to a source model.
struct Resolved {
    mount: MountKey,
    model: Arc<dyn ItemModel>,
    index: ModelIndex,
}

/// Where a drop on the proxy lands in a source model.
struct DropTarget {
    model: Arc<dyn ItemModel>,
    row: Option<usize>,
    column: Option<usize>,
    parent: ModelIndex,
}

/// A proxy model exposing several source trees as siblings.
///
/// The proxy root holds the top-level rows of each source, in mount order.
/// Sources keep their own subtrees. A source contributes its rows the
/// moment it is mounted and takes them along when it is unmounted.
///
/// # Example
///
/// ```
/// use graft::model::{ItemModel, MergingProxyModel, ModelIndex, SourceModel, TreeModel};
///
/// let local = TreeModel::<String>::new();
/// local.add_root("notes.txt".to_string());
/// let remote = TreeModel::<String>::new();
/// remote.add_root("backup.tar".to_string());
/// remote.add_root("photos".to_string());
///
/// let proxy = MergingProxyModel::new();
/// proxy.append(SourceModel::owned(local)).unwrap();
/// proxy.append(SourceModel::owned(remote)).unwrap();
///
/// let root = ModelIndex::invalid();
/// assert_eq!(proxy.row_count(&root), 3);
/// assert_eq!(proxy.display_text(&proxy.index(1, 0, &root)).as_deref(), Some("backup.tar"));
/// ```
pub struct MergingProxyModel {
    this: Weak<Self>,
    state: Mutex<State>,
    busy: BusyFlag,
    affinity: ThreadAffinity,
    signals: ModelSignals,
}

assert_impl_all!(MergingProxyModel: Send, Sync);

impl MergingProxyModel {
    /// Creates an empty proxy.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            state: Mutex::new(State::default()),
            busy: BusyFlag::default(),
            affinity: ThreadAffinity::current(),
            signals: ModelSignals::new(),
        })
    }

    // =========================================================================
    // Mounting
    // =========================================================================

    /// Mounts a source so that its rows start at root row `position`'s
    /// source slot: `position` counts sources, not rows, and is clamped to
    /// the number of mounted sources.
    ///
    /// If a sort is active the source is sorted before its rows appear.
    /// Mounting an empty source emits nothing.
    pub fn try_mount(&self, source: SourceModel, position: usize) -> Result<ModelId, ProxyError> {
        self.affinity.debug_assert_same_thread();
        let model = source.get().ok_or(ProxyError::SourceDropped)?;
        let model_id = model.model_id();

        let (columns, sort) = {
            let state = self.state.lock();
            if state.by_model.contains_key(&model_id) {
                return Err(ProxyError::ModelAlreadyMounted(model_id));
            }
            (state.columns.clone(), state.sort)
        };

        let mount_data = columns.mount_data(model.as_ref());
        // An unmatched sort column restores the source's natural order
        if let Some(column) = sort.column() {
            model.sort(mount_data.proxy_to_source(column), sort.order());
        }
        let rows = model.row_count(&ModelIndex::invalid());

        let (mount, first, position) = {
            let mut state = self.state.lock();
            if state.by_model.contains_key(&model_id) {
                return Err(ProxyError::ModelAlreadyMounted(model_id));
            }
            let Some((mount, _)) = state.mapping.add_mount(None) else {
                return Err(ProxyError::SourceDropped);
            };
            let position = position.min(state.order.len());
            state.order.insert(position, mount);
            state.sources.insert(
                mount,
                MergedSource {
                    source,
                    model_id,
                    columns: mount_data,
                    connections: None,
                    first_row: 0,
                    row_count: 0,
                },
            );
            state.by_model.insert(model_id, mount);
            state.refresh_offsets();
            if rows == 0 {
                let connections = connect_source_model(&self.this, mount, model.as_ref());
                if let Some(record) = state.sources.get_mut(mount) {
                    record.connections = Some(connections);
                }
            }
            let first = state.sources.get(mount).map_or(0, |record| record.first_row);
            (mount, first, position)
        };

        debug!(
            target: targets::MERGING,
            model = %model_id,
            position,
            rows,
            "mounted source"
        );
        if rows == 0 {
            return Ok(model_id);
        }

        self.busy.set();
        self.signals
            .rows_about_to_be_inserted
            .emit((ModelIndex::invalid(), first, first + rows - 1));
        {
            let mut state = self.state.lock();
            state.grow(mount, rows, 0);
            let connections = connect_source_model(&self.this, mount, model.as_ref());
            if let Some(record) = state.sources.get_mut(mount) {
                record.connections = Some(connections);
            }
        }
        self.busy.clear();
        self.signals
            .rows_inserted
            .emit((ModelIndex::invalid(), first, first + rows - 1));
        Ok(model_id)
    }

    /// Mounts a source at `position`, logging a refusal instead of
    /// returning it.
    pub fn mount(&self, source: SourceModel, position: usize) {
        if let Err(err) = self.try_mount(source, position) {
            debug!(target: targets::MERGING, %err, "mount refused");
        }
    }

    /// Mounts a source after all others.
    pub fn append(&self, source: SourceModel) -> Result<ModelId, ProxyError> {
        self.try_mount(source, usize::MAX)
    }

    /// Mounts a source before all others.
    pub fn prepend(&self, source: SourceModel) -> Result<ModelId, ProxyError> {
        self.try_mount(source, 0)
    }

    /// Unmounts a source and removes its rows.
    ///
    /// An owned source is dropped once clients have been notified.
    pub fn try_unmount(&self, model: ModelId) -> Result<(), ProxyError> {
        self.affinity.debug_assert_same_thread();
        let (mount, first, count) = {
            let mut state = self.state.lock();
            let Some(&mount) = state.by_model.get(&model) else {
                return Err(ProxyError::NotMounted);
            };
            let Some(record) = state.sources.get_mut(mount) else {
                return Err(ProxyError::NotMounted);
            };
            record.disconnect();
            (mount, record.first_row, record.row_count)
        };

        if count > 0 {
            self.busy.set();
            self.signals
                .rows_about_to_be_removed
                .emit((ModelIndex::invalid(), first, first + count - 1));
        }
        let record = {
            let mut state = self.state.lock();
            state.order.retain(|m| *m != mount);
            state.by_model.remove(&model);
            state.mapping.remove_mount(mount);
            let record = state.sources.remove(mount);
            state.refresh_offsets();
            record
        };
        if count > 0 {
            self.busy.clear();
            self.signals
                .rows_removed
                .emit((ModelIndex::invalid(), first, first + count - 1));
        }
        debug!(target: targets::MERGING, model = %model, rows = count, "unmounted source");
        drop(record);
        Ok(())
    }

    /// Unmounts a source; does nothing if it is not mounted.
    pub fn unmount(&self, model: ModelId) {
        if let Err(err) = self.try_unmount(model) {
            debug!(target: targets::MERGING, %err, model = %model, "unmount refused");
        }
    }

    /// Unmounts every source within a single reset.
    pub fn unmount_all(&self) {
        self.affinity.debug_assert_same_thread();
        let _span = PerfSpan::new(span_names::RESET);
        self.busy.set();
        self.signals.model_about_to_reset.emit(());
        let removed: Vec<MergedSource> = {
            let mut state = self.state.lock();
            let mut removed = Vec::with_capacity(state.order.len());
            for mount in std::mem::take(&mut state.order) {
                if let Some(mut record) = state.sources.remove(mount) {
                    record.disconnect();
                    removed.push(record);
                }
            }
            state.by_model.clear();
            state.mapping.clear();
            state.pending.clear();
            removed
        };
        self.busy.clear();
        self.signals.model_reset.emit(());
        debug!(target: targets::MERGING, sources = removed.len(), "unmounted all sources");
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns true if the model is mounted.
    pub fn is_mounted(&self, model: ModelId) -> bool {
        self.state.lock().by_model.contains_key(&model)
    }

    /// The number of mounted sources.
    pub fn source_count(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Mounted sources with the root rows they occupy, in mount order.
    pub fn mounts(&self) -> Vec<(ModelId, Range<usize>)> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|mount| state.sources.get(*mount))
            .map(|source| {
                (
                    source.model_id,
                    source.first_row..source.first_row + source.row_count,
                )
            })
            .collect()
    }

    /// The live source models, in mount order.
    pub fn source_models(&self) -> Vec<Arc<dyn ItemModel>> {
        self.state.lock().models()
    }

    /// The source model providing a root row.
    pub fn source_model_at(&self, row: usize) -> Option<Arc<dyn ItemModel>> {
        let state = self.state.lock();
        let (mount, _) = state.mount_at_row(row)?;
        state.model(mount)
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
    /// without it. Clients see a reset.
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
            Self::update_mount_data(&mut state);
        }
        self.busy.clear();
        self.signals.model_reset.emit(());
    }

    /// Inserts identity-matched columns before `first`.
    ///
    /// # Panics
    ///
    /// Panics if `first` is past the configured columns.
    pub fn insert_columns(&self, first: usize, identities: Vec<ItemData>) {
        self.affinity.debug_assert_same_thread();
        if identities.is_empty() {
            return;
        }
        let count = identities.len();
        let columns = self.state.lock().columns.column_count();
        assert!(first <= columns, "insert position {first} past {columns} columns");

        self.busy.set();
        self.signals
            .columns_about_to_be_inserted
            .emit((ModelIndex::invalid(), first, first + count - 1));
        {
            let mut state = self.state.lock();
            state.columns.insert_columns(first, identities);
            Self::update_mount_data(&mut state);
        }
        self.busy.clear();
        self.signals
            .columns_inserted
            .emit((ModelIndex::invalid(), first, first + count - 1));
    }

    /// Removes `count` identity-matched columns starting at `first`.
    ///
    /// # Panics
    ///
    /// Panics if the span reaches past the configured columns.
    pub fn remove_columns(&self, first: usize, count: usize) {
        self.affinity.debug_assert_same_thread();
        if count == 0 {
            return;
        }
        let columns = self.state.lock().columns.column_count();
        assert!(
            first.checked_add(count).is_some_and(|end| end <= columns),
            "column span {first}+{count} past {columns} columns"
        );

        self.busy.set();
        self.signals
            .columns_about_to_be_removed
            .emit((ModelIndex::invalid(), first, first + count - 1));
        {
            let mut state = self.state.lock();
            state.columns.remove_columns(first, count);
            Self::update_mount_data(&mut state);
        }
        self.busy.clear();
        self.signals
            .columns_removed
            .emit((ModelIndex::invalid(), first, first + count - 1));
    }

    fn update_mount_data(state: &mut State) {
        let State { sources, columns, .. } = state;
        for source in sources.values_mut() {
            if let Some(model) = source.source.get() {
                columns.update_mount_data(model.as_ref(), &mut source.columns);
            }
        }
    }

    /// Sets the serializer for drags spanning several sources.
    pub fn set_drag_callback(&self, callback: Option<DragCallback>) {
        self.state.lock().drag_callback = callback;
    }

    // =========================================================================
    // Index mapping
    // =========================================================================

    /// Maps a proxy index to the source index it shows.
    ///
    /// Returns an invalid index for cells the source does not provide.
    pub fn map_to_source(&self, proxy_index: &ModelIndex) -> ModelIndex {
        self.resolve(proxy_index, true)
            .map(|resolved| resolved.index)
            .unwrap_or_default()
    }

    /// Maps an index of a mounted source to the proxy.
    pub fn map_from_source(&self, source_index: &ModelIndex) -> ModelIndex {
        if !source_index.is_valid() {
            return ModelIndex::invalid();
        }
        let proxy = self.signals.model_id();
        let mut state = self.state.lock();
        let Some(&mount) = state.by_model.get(&source_index.model_id()) else {
            return ModelIndex::invalid();
        };
        let Some(column) = state
            .sources
            .get(mount)
            .and_then(|source| source.columns.source_to_proxy(source_index.column()))
        else {
            return ModelIndex::invalid();
        };
        let mut created = Vec::new();
        match state.mapping.find_or_create(mount, source_index, &mut created) {
            Some(key) => state.mapping.proxy_index(proxy, key, column),
            None => ModelIndex::invalid(),
        }
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

    /// Resolves a proxy index to its source, at the mapped column or at
    /// column 0 for structural queries.
    fn resolve(&self, index: &ModelIndex, mapped_column: bool) -> Option<Resolved> {
        let proxy = self.signals.model_id();
        let (mount, model, rows, column) = {
            let state = self.state.lock();
            let key = state.key_of(proxy, index)?;
            let (mount, rows) = state.mapping.source_path(key)?;
            let source = state.sources.get(mount)?;
            let column = if mapped_column {
                source.columns.proxy_to_source(index.column())?
            } else {
                0
            };
            (mount, source.source.get()?, rows, column)
        };
        let index = source_index(model.as_ref(), &rows, column);
        index.is_valid().then_some(Resolved { mount, model, index })
    }

    fn drop_target(&self, row: Option<usize>, column: Option<usize>, parent: &ModelIndex) -> Option<DropTarget> {
        if parent.is_valid() {
            let node = self.resolve(parent, false)?;
            let column = {
                let state = self.state.lock();
                let source = state.sources.get(node.mount)?;
                column.and_then(|c| source.columns.proxy_to_source(c))
            };
            return Some(DropTarget {
                model: node.model,
                row,
                column,
                parent: node.index,
            });
        }

        let state = self.state.lock();
        let (mount, row) = match row.and_then(|row| state.mount_at_row(row)) {
            Some((mount, row)) => (mount, Some(row)),
            None => {
                // Drops on the root or past its end go to the last source
                let last = *state.order.last()?;
                let appended = row.map(|_| state.sources.get(last).map_or(0, |s| s.row_count));
                (last, appended)
            }
        };
        let source = state.sources.get(mount)?;
        Some(DropTarget {
            model: source.source.get()?,
            row,
            column: column.and_then(|c| source.columns.proxy_to_source(c)),
            parent: ModelIndex::invalid(),
        })
    }

    fn pop_pending(&self) -> Pending {
        self.state.lock().pending.pop().unwrap_or(Pending::Skip)
    }
}

impl ItemModel for MergingProxyModel {
    fn row_count(&self, parent: &ModelIndex) -> usize {
        if !parent.is_valid() {
            return self.state.lock().total_rows();
        }
        match self.resolve(parent, false) {
            Some(node) => node.model.row_count(&node.index),
            None => 0,
        }
    }

    fn column_count(&self, _parent: &ModelIndex) -> usize {
        let state = self.state.lock();
        if state.columns.is_configured() {
            return state.columns.column_count();
        }
        state
            .sources
            .values()
            .map(|source| source.columns.proxy_table().len())
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
        let proxy = self.signals.model_id();
        let mut created = Vec::new();

        if !parent.is_valid() {
            let mut state = self.state.lock();
            let Some((mount, source_row)) = state.mount_at_row(row) else {
                return ModelIndex::invalid();
            };
            return match state
                .mapping
                .get_or_create(Scope::top(mount), source_row, &mut created)
            {
                Some(key) => state.mapping.proxy_index(proxy, key, column),
                None => ModelIndex::invalid(),
            };
        }

        let Some(node) = self.resolve(parent, false) else {
            return ModelIndex::invalid();
        };
        if row >= node.model.row_count(&node.index) {
            return ModelIndex::invalid();
        }
        let mut state = self.state.lock();
        let Some(scope) = state
            .key_of(proxy, parent)
            .and_then(|key| state.mapping.child_scope(key))
        else {
            return ModelIndex::invalid();
        };
        match state.mapping.get_or_create(scope, row, &mut created) {
            Some(key) => state.mapping.proxy_index(proxy, key, column),
            None => ModelIndex::invalid(),
        }
    }

    fn parent(&self, index: &ModelIndex) -> ModelIndex {
        let proxy = self.signals.model_id();
        let state = self.state.lock();
        let parent = state
            .key_of(proxy, index)
            .and_then(|key| state.mapping.entry(key))
            .and_then(|entry| entry.parent);
        match parent {
            Some(parent) => state.mapping.proxy_index(proxy, parent, 0),
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
        match self.resolve(parent, false) {
            Some(node) => node.model.has_children(&node.index),
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
            let fallback = state.order.first().and_then(|mount| {
                let source = state.sources.get(*mount)?;
                let section = match orientation {
                    Orientation::Horizontal => source.columns.proxy_to_source(section)?,
                    Orientation::Vertical => section,
                };
                Some((source.source.get()?, section))
            });
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
        if !parent.is_valid() {
            let models = self.state.lock().models();
            return models
                .iter()
                .any(|model| model.can_fetch_more(&ModelIndex::invalid()));
        }
        self.resolve(parent, false)
            .is_some_and(|node| node.model.can_fetch_more(&node.index))
    }

    fn fetch_more(&self, parent: &ModelIndex) {
        if !parent.is_valid() {
            let models = self.state.lock().models();
            for model in models {
                if model.can_fetch_more(&ModelIndex::invalid()) {
                    model.fetch_more(&ModelIndex::invalid());
                }
            }
            return;
        }
        if let Some(node) = self.resolve(parent, false) {
            node.model.fetch_more(&node.index);
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
                .order
                .iter()
                .filter_map(|mount| state.sources.get(*mount))
                .filter_map(|source| {
                    let model = source.source.get()?;
                    Some((model, column.and_then(|c| source.columns.proxy_to_source(c))))
                })
                .collect()
        };
        debug!(target: targets::MERGING, ?column, ?order, sources = sorted.len(), "sorting sources");
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

impl MultiProxyHooks for MergingProxyModel {
    fn is_source_index_mapped(&self, mount: MountKey, index: &ModelIndex) -> bool {
        let state = self.state.lock();
        if !index.is_valid() {
            return state.mapping.contains_mount(mount);
        }
        state.mapping.find(mount, index).is_some()
    }

    fn source_data_changed(
        &self,
        mount: MountKey,
        top_left: &ModelIndex,
        bottom_right: &ModelIndex,
        roles: &[ItemRole],
    ) {
        let proxy = self.signals.model_id();
        let changed = {
            let mut state = self.state.lock();
            let Some((first, last)) = state
                .sources
                .get(mount)
                .and_then(|source| source.columns.map_source_span(top_left.column(), bottom_right.column()))
            else {
                return;
            };
            let mut created = Vec::new();
            let top = state.mapping.find_or_create(mount, top_left, &mut created);
            let bottom = state.mapping.find_or_create(mount, bottom_right, &mut created);
            match (top, bottom) {
                (Some(top), Some(bottom)) => Some((
                    state.mapping.proxy_index(proxy, top, first),
                    state.mapping.proxy_index(proxy, bottom, last),
                )),
                _ => None,
            }
        };
        if let Some((top_left, bottom_right)) = changed {
            self.signals
                .data_changed
                .emit((top_left, bottom_right, roles.to_vec()));
        }
    }

    fn source_about_to_reset(&self, mount: MountKey) {
        let (first, count) = {
            let state = self.state.lock();
            match state.sources.get(mount) {
                Some(source) => (source.first_row, source.row_count),
                None => return,
            }
        };
        trace!(target: targets::MERGING, rows = count, "source about to reset");
        if count == 0 {
            self.state.lock().mapping.clear_mount(mount);
            return;
        }
        self.busy.set();
        self.signals
            .rows_about_to_be_removed
            .emit((ModelIndex::invalid(), first, first + count - 1));
        {
            let mut state = self.state.lock();
            state.mapping.clear_mount(mount);
            state.grow(mount, 0, count);
        }
        self.busy.clear();
        self.signals
            .rows_removed
            .emit((ModelIndex::invalid(), first, first + count - 1));
    }

    fn source_reset(&self, mount: MountKey) {
        let (model, first) = {
            let state = self.state.lock();
            match state.sources.get(mount) {
                Some(source) => (source.source.get(), source.first_row),
                None => return,
            }
        };
        let Some(model) = model else {
            return;
        };
        let count = model.row_count(&ModelIndex::invalid());
        trace!(target: targets::MERGING, rows = count, "source reset");
        if count == 0 {
            return;
        }
        self.busy.set();
        self.signals
            .rows_about_to_be_inserted
            .emit((ModelIndex::invalid(), first, first + count - 1));
        self.state.lock().grow(mount, count, 0);
        self.busy.clear();
        self.signals
            .rows_inserted
            .emit((ModelIndex::invalid(), first, first + count - 1));
    }

    fn source_destroyed(&self, mount: MountKey) {
        let Some(model) = self.state.lock().sources.get(mount).map(|source| source.model_id) else {
            return;
        };
        // Its rows go by their last known count
        warn!(target: targets::MERGING, model = %model, "mounted source dropped");
        if let Err(err) = self.try_unmount(model) {
            debug!(target: targets::MERGING, %err, model = %model, "dropped source already gone");
        }
    }

    fn source_layout_about_to_change(&self, mount: MountKey, parents: &[ModelIndex], hint: LayoutChangeHint) {
        let proxy = self.signals.model_id();
        let (model, children, proxy_parents) = {
            let state = self.state.lock();
            let children: Vec<(Scope, Vec<(MappingKey, Vec<usize>)>)> = state
                .mapping
                .layout_scopes(mount, parents)
                .into_iter()
                .map(|scope| (scope, state.mapping.child_paths(scope)))
                .collect();
            let proxy_parents: Vec<ModelIndex> = parents
                .iter()
                .filter_map(|parent| {
                    let scope = state.mapping.find_scope(mount, parent)?;
                    state.mapping.scope_owner(proxy, scope)
                })
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
            warn!(target: targets::MERGING, "layout change completed without announcement");
            return;
        };
        let _span = PerfSpan::new(span_names::RELOCATE);
        let model = self.state.lock().model(mount);
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
                    self.state.lock().mapping.relocate(scope, rows);
                },
            );
        }
        self.busy.clear();
        self.signals.layout_changed.emit((parents, hint));
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
        {
            let mut state = self.state.lock();
            state.mapping.insert_rows(scope, first, count);
            if scope.parent.is_none() {
                state.grow(scope.mount, count, 0);
            }
        }
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
        {
            let mut state = self.state.lock();
            state.mapping.remove_rows(scope, first, count);
            if scope.parent.is_none() {
                state.grow(scope.mount, 0, count);
            }
        }
        self.busy.clear();
        self.signals.rows_removed.emit(proxy);
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
        {
            let mut state = self.state.lock();
            state
                .mapping
                .move_rows(source, first, last, destination, dest_row);
            let count = last - first + 1;
            match (source.parent, destination.parent) {
                (None, Some(_)) => state.grow(source.mount, 0, count),
                (Some(_), None) => state.grow(source.mount, count, 0),
                _ => state.refresh_offsets(),
            }
        }
        self.busy.clear();
        self.signals.rows_moved.emit(proxy);
    }
}

impl Drop for MergingProxyModel {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for source in state.sources.values_mut() {
            source.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TreeModel;
    use std::sync::Arc;

    fn tree(names: &[&str]) -> Arc<TreeModel<String>> {
        let model = Arc::new(TreeModel::<String>::new());
        for name in names {
            model.add_root(name.to_string());
        }
        model
    }

    fn root_names(proxy: &MergingProxyModel) -> Vec<String> {
        let root = ModelIndex::invalid();
        (0..proxy.row_count(&root))
            .map(|row| {
                proxy
                    .display_text(&proxy.index(row, 0, &root))
                    .unwrap_or_default()
            })
            .collect()
    }

    #[test]
    fn test_append_concatenates_sources() {
        let proxy = MergingProxyModel::new();
        let a = tree(&["a1", "a2"]);
        let b = tree(&["b1"]);
        proxy.append(SourceModel::borrowed(&a)).unwrap();
        proxy.append(SourceModel::borrowed(&b)).unwrap();

        assert_eq!(root_names(&proxy), vec!["a1", "a2", "b1"]);
        assert_eq!(
            proxy.mounts(),
            vec![(a.model_id(), 0..2), (b.model_id(), 2..3)]
        );
        assert_eq!(
            proxy.source_model_at(2).map(|model| model.model_id()),
            Some(b.model_id())
        );
        assert!(proxy.source_model_at(3).is_none());
    }

    #[test]
    fn test_mount_position_counts_sources() {
        let proxy = MergingProxyModel::new();
        let a = tree(&["a"]);
        let b = tree(&["b"]);
        let c = tree(&["c"]);
        proxy.append(SourceModel::borrowed(&a)).unwrap();
        proxy.append(SourceModel::borrowed(&c)).unwrap();
        proxy.mount(SourceModel::borrowed(&b), 1);
        assert_eq!(root_names(&proxy), vec!["a", "b", "c"]);

        let z = tree(&["z"]);
        proxy.prepend(SourceModel::borrowed(&z)).unwrap();
        assert_eq!(root_names(&proxy), vec!["z", "a", "b", "c"]);
        assert_eq!(proxy.mounts()[1], (a.model_id(), 1..2));
    }

    #[test]
    fn test_mount_refusals() {
        let proxy = MergingProxyModel::new();
        let a = tree(&["a"]);
        proxy.append(SourceModel::borrowed(&a)).unwrap();
        assert_eq!(
            proxy.append(SourceModel::borrowed(&a)),
            Err(ProxyError::ModelAlreadyMounted(a.model_id()))
        );

        let gone = SourceModel::borrowed(&tree(&["x"]));
        assert_eq!(proxy.append(gone), Err(ProxyError::SourceDropped));
        assert_eq!(proxy.try_unmount(ModelId::next()), Err(ProxyError::NotMounted));
    }

    #[test]
    fn test_source_insert_shifts_later_sources() {
        let proxy = MergingProxyModel::new();
        let a = tree(&["a1"]);
        let b = tree(&["b1"]);
        proxy.append(SourceModel::borrowed(&a)).unwrap();
        proxy.append(SourceModel::borrowed(&b)).unwrap();
        let b1 = proxy.index(1, 0, &ModelIndex::invalid());

        let inserted = Arc::new(Mutex::new(Vec::new()));
        let log = inserted.clone();
        proxy
            .signals()
            .rows_inserted
            .connect(move |(parent, first, last)| log.lock().push((parent.is_valid(), *first, *last)));

        a.add_root("a2".to_string());
        assert_eq!(*inserted.lock(), vec![(false, 1, 1)]);
        assert_eq!(root_names(&proxy), vec!["a1", "a2", "b1"]);
        assert_eq!(proxy.revalidate(&b1).row(), 2);
    }

    #[test]
    fn test_unmount_removes_rows_and_drops_owned_source() {
        let proxy = MergingProxyModel::new();
        let a = tree(&["a"]);
        let owned = TreeModel::<String>::new();
        owned.add_root("b".to_string());
        owned.add_root("c".to_string());
        proxy.append(SourceModel::borrowed(&a)).unwrap();
        let owned_id = proxy.append(SourceModel::owned(owned)).unwrap();

        let removed = Arc::new(Mutex::new(Vec::new()));
        let log = removed.clone();
        proxy
            .signals()
            .rows_removed
            .connect(move |(_, first, last)| log.lock().push((*first, *last)));

        proxy.unmount(owned_id);
        assert_eq!(*removed.lock(), vec![(1, 2)]);
        assert_eq!(root_names(&proxy), vec!["a"]);
        assert_eq!(proxy.try_unmount(owned_id), Err(ProxyError::NotMounted));
        assert_eq!(removed.lock().len(), 1);
    }

    #[test]
    fn test_children_pass_through() {
        let proxy = MergingProxyModel::new();
        let a = tree(&["folder"]);
        let folder = a.children(None)[0];
        a.add_child(folder, "file".to_string());
        proxy.append(SourceModel::borrowed(&a)).unwrap();

        let parent = proxy.index(0, 0, &ModelIndex::invalid());
        assert!(proxy.has_children(&parent));
        assert_eq!(proxy.row_count(&parent), 1);
        let child = proxy.index(0, 0, &parent);
        assert_eq!(proxy.display_text(&child).as_deref(), Some("file"));
        assert_eq!(proxy.parent(&child), parent);
        assert_eq!(proxy.map_from_source(&proxy.map_to_source(&child)), child);
    }

    #[test]
    fn test_empty_source_mount_is_silent() {
        let proxy = MergingProxyModel::new();
        let events = Arc::new(Mutex::new(0));
        let count = events.clone();
        proxy
            .signals()
            .rows_about_to_be_inserted
            .connect(move |_| *count.lock() += 1);

        let empty = tree(&[]);
        proxy.append(SourceModel::borrowed(&empty)).unwrap();
        assert_eq!(*events.lock(), 0);

        empty.add_root("late".to_string());
        assert_eq!(*events.lock(), 1);
        assert_eq!(root_names(&proxy), vec!["late"]);
    }

    #[test]
    #[should_panic(expected = "past 2 columns")]
    fn test_remove_columns_span_overflow() {
        let proxy = MergingProxyModel::new();
        let get: GetHeaderDataFn = Arc::new(|section: usize, _, _| ItemData::from(section as i64));
        proxy.set_header_data_callbacks(2, get, ItemRole::Display, None);
        proxy.remove_columns(1, usize::MAX);
    }
}
