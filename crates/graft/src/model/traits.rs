//! Core traits for the hierarchical data model protocol.
//!
//! This module defines the interface every model implements: the queries a
//! client issues against it and the signals it emits when its structure or
//! data changes. Proxies both implement and consume this protocol.

use std::collections::HashMap;

use graft_core::Signal;

use super::index::{ModelId, ModelIndex};
use super::mime::{DropActions, MimeData};
use super::role::{ItemData, ItemRole};

/// Flags indicating what operations are allowed on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemFlags {
    /// Item can be selected.
    pub selectable: bool,
    /// Item can be edited.
    pub editable: bool,
    /// Item can be dragged.
    pub drag_enabled: bool,
    /// Item can receive drops.
    pub drop_enabled: bool,
    /// Item has a checkbox.
    pub checkable: bool,
    /// Item is enabled (can interact).
    pub enabled: bool,
    /// Item should never have children (optimizes views).
    pub never_has_children: bool,
}

impl ItemFlags {
    /// Creates flags with all defaults (selectable and enabled only).
    pub fn new() -> Self {
        Self {
            selectable: true,
            enabled: true,
            ..Default::default()
        }
    }

    /// Creates flags for a disabled item.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Creates flags for an editable item.
    pub fn editable() -> Self {
        Self {
            selectable: true,
            editable: true,
            enabled: true,
            ..Default::default()
        }
    }

    /// Sets the editable flag.
    pub fn with_editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }

    /// Sets the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the drag enabled flag.
    pub fn with_drag(mut self, enabled: bool) -> Self {
        self.drag_enabled = enabled;
        self
    }

    /// Sets the drop enabled flag.
    pub fn with_drop(mut self, enabled: bool) -> Self {
        self.drop_enabled = enabled;
        self
    }
}

/// Header orientation for `header_data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// Horizontal header (column headers).
    Horizontal,
    /// Vertical header (row headers).
    Vertical,
}

/// Direction of a sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Smallest value first.
    #[default]
    Ascending,
    /// Largest value first.
    Descending,
}

/// Hint passed along with layout change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutChangeHint {
    /// Nothing is known about the change.
    #[default]
    NoHint,
    /// Rows were reordered within their parents.
    VerticalSortHint,
    /// Columns were reordered.
    HorizontalSortHint,
}

/// Arguments of the `rows_*` and `columns_*` signals: (parent, first, last).
pub type RangeArgs = (ModelIndex, usize, usize);

/// Arguments of the move signals:
/// (source parent, source first, source last, destination parent, destination row).
pub type MoveArgs = (ModelIndex, usize, usize, ModelIndex, usize);

/// Arguments of the layout signals: (affected parents, hint).
///
/// An empty parent list means the whole model is affected.
pub type LayoutArgs = (Vec<ModelIndex>, LayoutChangeHint);

/// The core trait for item models.
///
/// `ItemModel` provides a flexible interface for representing hierarchical
/// data. Clients and proxies use this interface to query data without
/// needing to know the underlying data structure.
///
/// # Implementation Requirements
///
/// At minimum, you must implement:
/// - [`row_count`](ItemModel::row_count) - Number of rows under a parent
/// - [`column_count`](ItemModel::column_count) - Number of columns
/// - [`data`](ItemModel::data) - Data for a given index and role
/// - [`index`](ItemModel::index) - Create an index for a position
/// - [`parent`](ItemModel::parent) - Get the parent of an index
/// - [`signals`](ItemModel::signals) - The model's notification signals
///
/// Every structural change must be announced through a matching pair of
/// signals: the "about to" signal before the change while the old state is
/// still observable, the completion signal after it. Signals must not be
/// emitted while the model holds its own internal locks, since slots are
/// free to query the model.
pub trait ItemModel: Send + Sync {
    /// Returns the number of rows under the given parent.
    fn row_count(&self, parent: &ModelIndex) -> usize;

    /// Returns the number of columns for children of the given parent.
    fn column_count(&self, parent: &ModelIndex) -> usize;

    /// Returns the data stored under the given role for the item at index.
    ///
    /// Return `ItemData::None` if:
    /// - The index is invalid
    /// - The role is not supported
    /// - There's no data for that role
    fn data(&self, index: &ModelIndex, role: ItemRole) -> ItemData;

    /// Creates a model index for the given row and column under parent.
    ///
    /// Return `ModelIndex::invalid()` if the position is out of bounds.
    fn index(&self, row: usize, column: usize, parent: &ModelIndex) -> ModelIndex;

    /// Returns the parent of the given index.
    ///
    /// Return `ModelIndex::invalid()` for root-level items and invalid
    /// indices.
    fn parent(&self, index: &ModelIndex) -> ModelIndex;

    /// Returns the signals for this model.
    fn signals(&self) -> &ModelSignals;

    // -------------------------------------------------------------------------
    // Optional methods with default implementations
    // -------------------------------------------------------------------------

    /// Returns the identity of this model.
    ///
    /// Every index this model creates must carry this id.
    fn model_id(&self) -> ModelId {
        self.signals().model_id()
    }

    /// Creates an index owned by this model.
    fn create_index(
        &self,
        row: usize,
        column: usize,
        parent: &ModelIndex,
        internal_id: u64,
    ) -> ModelIndex {
        ModelIndex::new(self.model_id(), row, column, parent.clone(), internal_id)
    }

    /// Sets the data for the given index and role.
    ///
    /// Returns `true` if the data was successfully set. The default
    /// implementation returns `false` (read-only). Implementations emit
    /// `data_changed` after modifying data.
    fn set_data(&self, _index: &ModelIndex, _value: ItemData, _role: ItemRole) -> bool {
        false
    }

    /// Returns the flags for the item at the given index.
    fn flags(&self, _index: &ModelIndex) -> ItemFlags {
        ItemFlags::new()
    }

    /// Returns `true` if the item at parent has any children.
    fn has_children(&self, parent: &ModelIndex) -> bool {
        self.row_count(parent) > 0
    }

    /// Returns header data for the given section (row or column header).
    fn header_data(&self, _section: usize, _orientation: Orientation, _role: ItemRole) -> ItemData {
        ItemData::None
    }

    /// Sets header data for the given section.
    fn set_header_data(
        &self,
        _section: usize,
        _orientation: Orientation,
        _value: ItemData,
        _role: ItemRole,
    ) -> bool {
        false
    }

    /// Returns `true` if more children can be fetched for the given parent.
    fn can_fetch_more(&self, _parent: &ModelIndex) -> bool {
        false
    }

    /// Fetches more children for the given parent.
    fn fetch_more(&self, _parent: &ModelIndex) {}

    /// Sorts the model by a column. `None` requests the unsorted order.
    ///
    /// Models announce the reordering through the layout signals.
    fn sort(&self, _column: Option<usize>, _order: SortOrder) {}

    /// Returns the MIME types this model can produce and accept.
    fn mime_types(&self) -> Vec<String> {
        Vec::new()
    }

    /// Serializes the given items for a drag.
    fn mime_data(&self, _indexes: &[ModelIndex]) -> Option<MimeData> {
        None
    }

    /// Returns `true` if the payload could be dropped at the given position.
    ///
    /// `row` and `column` are `None` when the drop targets `parent` itself.
    fn can_drop_mime_data(
        &self,
        _data: &MimeData,
        _action: DropActions,
        _row: Option<usize>,
        _column: Option<usize>,
        _parent: &ModelIndex,
    ) -> bool {
        false
    }

    /// Handles a drop at the given position.
    fn drop_mime_data(
        &self,
        _data: &MimeData,
        _action: DropActions,
        _row: Option<usize>,
        _column: Option<usize>,
        _parent: &ModelIndex,
    ) -> bool {
        false
    }

    /// Returns the actions supported when dragging from this model.
    fn supported_drag_actions(&self) -> DropActions {
        self.supported_drop_actions()
    }

    /// Returns the actions supported when dropping onto this model.
    fn supported_drop_actions(&self) -> DropActions {
        DropActions::COPY
    }

    /// Returns the names of the roles this model understands.
    fn role_names(&self) -> HashMap<ItemRole, String> {
        [
            ItemRole::Display,
            ItemRole::Decoration,
            ItemRole::Edit,
            ItemRole::ToolTip,
            ItemRole::StatusTip,
            ItemRole::WhatsThis,
        ]
        .into_iter()
        .filter_map(|role| role.standard_name().map(|name| (role, name.to_string())))
        .collect()
    }

    /// Returns a stable identity of the node at `index`.
    ///
    /// Unlike rows, node identities survive reordering. Proxies use them to
    /// follow mapped nodes across layout changes. Models without stable
    /// identities return `None`.
    fn node_id(&self, _index: &ModelIndex) -> Option<u64> {
        None
    }

    /// Returns the index of the item that edits on behalf of `index`.
    fn buddy(&self, index: &ModelIndex) -> ModelIndex {
        index.clone()
    }

    // -------------------------------------------------------------------------
    // Convenience methods
    // -------------------------------------------------------------------------

    /// Returns the display text for an item (convenience for `data(index, Display)`).
    fn display_text(&self, index: &ModelIndex) -> Option<String> {
        self.data(index, ItemRole::Display).into_string()
    }

    /// Creates a sibling index at the given row and column.
    ///
    /// This validates against the model, unlike `ModelIndex::sibling_at_column`.
    fn sibling(&self, index: &ModelIndex, row: usize, column: usize) -> ModelIndex {
        if !index.is_valid() {
            return ModelIndex::invalid();
        }
        self.index(row, column, &self.parent(index))
    }
}

/// Collection of signals emitted by item models.
///
/// Clients connect to these signals to stay synchronized with the model.
/// Models emit the appropriate signals when their data changes.
///
/// # Signal Usage
///
/// - **Before modifications**: Emit `rows_about_to_be_*` or `layout_about_to_change`
/// - **After modifications**: Emit `rows_*` or `layout_changed`
/// - **Data changes**: Emit `data_changed` for value modifications
/// - **Major restructuring**: Emit the model reset pair
pub struct ModelSignals {
    model_id: ModelId,

    // -------------------------------------------------------------------------
    // Row modification signals
    // -------------------------------------------------------------------------
    /// Emitted just before rows are inserted.
    /// Args: (parent index, first row, last row)
    pub rows_about_to_be_inserted: Signal<RangeArgs>,

    /// Emitted after rows have been inserted.
    /// Args: (parent index, first row, last row)
    pub rows_inserted: Signal<RangeArgs>,

    /// Emitted just before rows are removed.
    /// Args: (parent index, first row, last row)
    pub rows_about_to_be_removed: Signal<RangeArgs>,

    /// Emitted after rows have been removed.
    /// Args: (parent index, first row, last row)
    pub rows_removed: Signal<RangeArgs>,

    /// Emitted just before rows are moved.
    /// Args: (source parent, source first, source last, dest parent, dest row)
    pub rows_about_to_be_moved: Signal<MoveArgs>,

    /// Emitted after rows have been moved.
    /// Args: (source parent, source first, source last, dest parent, dest row)
    pub rows_moved: Signal<MoveArgs>,

    // -------------------------------------------------------------------------
    // Column modification signals
    // -------------------------------------------------------------------------
    /// Emitted just before columns are inserted.
    pub columns_about_to_be_inserted: Signal<RangeArgs>,

    /// Emitted after columns have been inserted.
    pub columns_inserted: Signal<RangeArgs>,

    /// Emitted just before columns are removed.
    pub columns_about_to_be_removed: Signal<RangeArgs>,

    /// Emitted after columns have been removed.
    pub columns_removed: Signal<RangeArgs>,

    // -------------------------------------------------------------------------
    // Data change signals
    // -------------------------------------------------------------------------
    /// Emitted when data in existing items changes.
    /// Args: (top-left index, bottom-right index, changed roles)
    pub data_changed: Signal<(ModelIndex, ModelIndex, Vec<ItemRole>)>,

    /// Emitted when header data changes.
    /// Args: (orientation, first section, last section)
    pub header_data_changed: Signal<(Orientation, usize, usize)>,

    // -------------------------------------------------------------------------
    // Layout signals
    // -------------------------------------------------------------------------
    /// Emitted before a layout change (e.g., sorting).
    pub layout_about_to_change: Signal<LayoutArgs>,

    /// Emitted after a layout change.
    pub layout_changed: Signal<LayoutArgs>,

    // -------------------------------------------------------------------------
    // Reset signals
    // -------------------------------------------------------------------------
    /// Emitted before the model is reset.
    pub model_about_to_reset: Signal<()>,

    /// Emitted after the model has been reset.
    pub model_reset: Signal<()>,

    /// Emitted while the model is being dropped.
    /// Args: the id of the dropped model
    pub model_destroyed: Signal<ModelId>,
}

impl Default for ModelSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSignals {
    /// Creates a new set of model signals with a freshly allocated model id.
    pub fn new() -> Self {
        Self {
            model_id: ModelId::next(),
            rows_about_to_be_inserted: Signal::new(),
            rows_inserted: Signal::new(),
            rows_about_to_be_removed: Signal::new(),
            rows_removed: Signal::new(),
            rows_about_to_be_moved: Signal::new(),
            rows_moved: Signal::new(),
            columns_about_to_be_inserted: Signal::new(),
            columns_inserted: Signal::new(),
            columns_about_to_be_removed: Signal::new(),
            columns_removed: Signal::new(),
            data_changed: Signal::new(),
            header_data_changed: Signal::new(),
            layout_about_to_change: Signal::new(),
            layout_changed: Signal::new(),
            model_about_to_reset: Signal::new(),
            model_reset: Signal::new(),
            model_destroyed: Signal::new(),
        }
    }

    /// Returns the id of the model these signals belong to.
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    // -------------------------------------------------------------------------
    // Convenience methods for emitting signals
    // -------------------------------------------------------------------------

    /// Emits signals for row insertion.
    ///
    /// Calls the provided function between the about_to_be_inserted and inserted signals.
    pub fn emit_rows_inserted<F>(&self, parent: ModelIndex, first: usize, last: usize, insert_fn: F)
    where
        F: FnOnce(),
    {
        self.rows_about_to_be_inserted
            .emit((parent.clone(), first, last));
        insert_fn();
        self.rows_inserted.emit((parent, first, last));
    }

    /// Emits signals for row removal.
    ///
    /// Calls the provided function between the about_to_be_removed and removed signals.
    pub fn emit_rows_removed<F>(&self, parent: ModelIndex, first: usize, last: usize, remove_fn: F)
    where
        F: FnOnce(),
    {
        self.rows_about_to_be_removed
            .emit((parent.clone(), first, last));
        remove_fn();
        self.rows_removed.emit((parent, first, last));
    }

    /// Emits the data_changed signal for a single item.
    pub fn emit_data_changed_single(&self, index: ModelIndex, roles: Vec<ItemRole>) {
        self.data_changed.emit((index.clone(), index, roles));
    }

    /// Emits signals for a model reset.
    ///
    /// Calls the provided function between the about_to_reset and reset signals.
    pub fn emit_reset<F>(&self, reset_fn: F)
    where
        F: FnOnce(),
    {
        self.model_about_to_reset.emit(());
        reset_fn();
        self.model_reset.emit(());
    }

    /// Emits signals for a layout change.
    ///
    /// Calls the provided function between the about_to_change and changed signals.
    pub fn emit_layout_changed<F>(&self, parents: Vec<ModelIndex>, hint: LayoutChangeHint, change_fn: F)
    where
        F: FnOnce(),
    {
        self.layout_about_to_change.emit((parents.clone(), hint));
        change_fn();
        self.layout_changed.emit((parents, hint));
    }
}

impl Drop for ModelSignals {
    fn drop(&mut self) {
        self.model_destroyed.emit(self.model_id);
    }
}
