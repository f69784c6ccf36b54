//! Hierarchical tree model implementation.
//!
//! `TreeModel` stores parent-child data in memory and implements the full
//! notification protocol, including moves, sorting and lazy child loading.
//! It is the stock source model for the proxies in this crate.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use super::index::ModelIndex;
use super::mime::{DropActions, MimeData, types};
use super::role::{ItemData, ItemRole};
use super::traits::{
    ItemFlags, ItemModel, LayoutChangeHint, ModelSignals, Orientation, SortOrder,
};

/// A node ID for internal tracking.
///
/// Node ids are unique across every tree model in the process.
pub type NodeId = u64;

/// Counter for generating unique node IDs.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> NodeId {
    NODE_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Callback producing the children of a node on demand.
///
/// Receives `None` for the top level.
pub type ChildLoader<T> = Arc<dyn Fn(Option<NodeId>) -> Vec<T> + Send + Sync>;

/// Trait for tree node data that provides its own display information.
///
/// Implement this trait for types that should be directly usable as tree nodes.
pub trait TreeNodeData: Send + Sync {
    /// Returns data for a column and role.
    fn data(&self, column: usize, role: ItemRole) -> ItemData;

    /// Stores data for a column and role. Returns `true` if it was accepted.
    fn set_data(&mut self, _column: usize, _value: &ItemData, _role: ItemRole) -> bool {
        false
    }

    /// Returns the flags for a column of this node.
    fn flags(&self, _column: usize) -> ItemFlags {
        ItemFlags::new()
    }
}

/// Single column nodes.
impl TreeNodeData for String {
    fn data(&self, column: usize, role: ItemRole) -> ItemData {
        match (column, role) {
            (0, ItemRole::Display | ItemRole::Edit) => ItemData::from(self.as_str()),
            _ => ItemData::None,
        }
    }

    fn set_data(&mut self, column: usize, value: &ItemData, role: ItemRole) -> bool {
        match (column, role, value) {
            (0, ItemRole::Display | ItemRole::Edit, ItemData::String(text)) => {
                self.clone_from(text);
                true
            }
            _ => false,
        }
    }

    fn flags(&self, _column: usize) -> ItemFlags {
        ItemFlags::editable()
    }
}

/// Multi column nodes, one value per column.
impl TreeNodeData for Vec<ItemData> {
    fn data(&self, column: usize, role: ItemRole) -> ItemData {
        match role {
            ItemRole::Display | ItemRole::Edit => self.get(column).cloned().unwrap_or_default(),
            _ => ItemData::None,
        }
    }

    fn set_data(&mut self, column: usize, value: &ItemData, role: ItemRole) -> bool {
        match (self.get_mut(column), role) {
            (Some(slot), ItemRole::Display | ItemRole::Edit) => {
                *slot = value.clone();
                true
            }
            _ => false,
        }
    }

    fn flags(&self, _column: usize) -> ItemFlags {
        ItemFlags::editable()
    }
}

/// A node in the tree structure.
struct TreeNode<T> {
    data: T,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

/// Internal storage for tree nodes.
struct TreeStorage<T> {
    nodes: HashMap<NodeId, TreeNode<T>>,
    root_children: Vec<NodeId>,
    /// Parents whose children were already requested from the loader.
    fetched: HashSet<Option<NodeId>>,
}

impl<T> TreeStorage<T> {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            root_children: Vec::new(),
            fetched: HashSet::new(),
        }
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.root_children.clear();
        self.fetched.clear();
    }

    fn exists(&self, parent: Option<NodeId>) -> bool {
        parent.is_none_or(|id| self.nodes.contains_key(&id))
    }

    fn insert_node(&mut self, parent: Option<NodeId>, row: usize, data: T) -> Option<NodeId> {
        if !self.exists(parent) {
            return None;
        }
        let id = next_node_id();
        self.nodes.insert(
            id,
            TreeNode {
                data,
                children: Vec::new(),
                parent,
            },
        );
        let children = self.children_of_mut(parent)?;
        let row = row.min(children.len());
        children.insert(row, id);
        Some(id)
    }

    /// Unlinks a node from its parent, returning its former parent and row.
    fn detach(&mut self, id: NodeId) -> Option<(Option<NodeId>, usize)> {
        let parent = self.nodes.get(&id)?.parent;
        let row = self.row_of(id)?;
        self.children_of_mut(parent)?.remove(row);
        Some((parent, row))
    }

    fn remove_node(&mut self, id: NodeId) -> Option<T> {
        self.detach(id)?;
        self.remove_subtree(id)
    }

    fn remove_subtree(&mut self, id: NodeId) -> Option<T> {
        let node = self.nodes.remove(&id)?;
        self.fetched.remove(&Some(id));

        for child_id in node.children {
            self.remove_subtree(child_id);
        }

        Some(node.data)
    }

    /// Moves a node using "insert before `dest_row`" semantics, where
    /// `dest_row` is counted before the node is taken out.
    fn move_node(&mut self, id: NodeId, new_parent: Option<NodeId>, dest_row: usize) {
        let Some((old_parent, row)) = self.detach(id) else {
            return;
        };
        let dest = if old_parent == new_parent && dest_row > row {
            dest_row - 1
        } else {
            dest_row
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = new_parent;
        }
        if let Some(children) = self.children_of_mut(new_parent) {
            let dest = dest.min(children.len());
            children.insert(dest, id);
        }
    }

    fn children_of(&self, parent_id: Option<NodeId>) -> &[NodeId] {
        match parent_id {
            None => &self.root_children,
            Some(id) => self
                .nodes
                .get(&id)
                .map(|n| n.children.as_slice())
                .unwrap_or(&[]),
        }
    }

    fn children_of_mut(&mut self, parent_id: Option<NodeId>) -> Option<&mut Vec<NodeId>> {
        match parent_id {
            None => Some(&mut self.root_children),
            Some(id) => self.nodes.get_mut(&id).map(|n| &mut n.children),
        }
    }

    fn child_count(&self, parent_id: Option<NodeId>) -> usize {
        self.children_of(parent_id).len()
    }

    fn child_at(&self, parent_id: Option<NodeId>, index: usize) -> Option<NodeId> {
        self.children_of(parent_id).get(index).copied()
    }

    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    fn row_of(&self, id: NodeId) -> Option<usize> {
        let parent_id = self.parent_of(id);
        let siblings = self.children_of(parent_id);
        siblings.iter().position(|&child_id| child_id == id)
    }

    /// Returns true if `ancestor` lies on the parent chain of `id`.
    fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }
}

impl<T: TreeNodeData> TreeStorage<T> {
    fn sort_key(&self, id: NodeId, column: usize) -> ItemData {
        self.nodes
            .get(&id)
            .map(|node| node.data.data(column, ItemRole::Display))
            .unwrap_or_default()
    }

    /// Stable sort of every level below `parent`.
    fn sort_subtree(&mut self, parent: Option<NodeId>, column: usize, order: SortOrder) {
        let Some(mut children) = self.children_of_mut(parent).map(std::mem::take) else {
            return;
        };
        children.sort_by(|a, b| {
            let ordering = compare_item_data(&self.sort_key(*a, column), &self.sort_key(*b, column));
            match order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
        let ids = children.clone();
        if let Some(slot) = self.children_of_mut(parent) {
            *slot = children;
        }
        for id in ids {
            self.sort_subtree(Some(id), column, order);
        }
    }
}

/// Compares two ItemData values for sorting.
pub(crate) fn compare_item_data(a: &ItemData, b: &ItemData) -> Ordering {
    match (a, b) {
        (ItemData::String(sa), ItemData::String(sb)) => sa.cmp(sb),
        (ItemData::Int(ia), ItemData::Int(ib)) => ia.cmp(ib),
        (ItemData::Float(fa), ItemData::Float(fb)) => fa.partial_cmp(fb).unwrap_or(Ordering::Equal),
        (ItemData::Bool(ba), ItemData::Bool(bb)) => ba.cmp(bb),
        // Missing values sort first
        (ItemData::None, ItemData::None) => Ordering::Equal,
        (ItemData::None, _) => Ordering::Less,
        (_, ItemData::None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// A hierarchical tree model for displaying parent-child data.
///
/// `TreeModel` stores data in a tree structure where each node can have
/// multiple children. Node data provides its values per column through
/// [`TreeNodeData`].
///
/// Every structural change is announced with a matching pair of signals,
/// and indices carry the node id as their internal id, so
/// [`ItemModel::node_id`] follows a node across moves and sorts.
///
/// # Example
///
/// ```
/// use graft::model::{ItemData, ItemModel, ModelIndex, TreeModel};
///
/// let model = TreeModel::<Vec<ItemData>>::new().with_headers(["name", "size"]);
///
/// let docs = model.add_root(vec!["Documents".into(), 0.into()]);
/// model.add_child(docs, vec!["file.txt".into(), 120.into()]);
///
/// let top = model.index(0, 1, &ModelIndex::invalid());
/// assert_eq!(model.column_count(&ModelIndex::invalid()), 2);
/// assert_eq!(model.row_count(&top), 1);
/// ```
pub struct TreeModel<T> {
    storage: RwLock<TreeStorage<T>>,
    column_count: usize,
    headers: RwLock<HashMap<(usize, ItemRole), ItemData>>,
    loader: Option<ChildLoader<T>>,
    signals: ModelSignals,
}

impl<T: TreeNodeData + 'static> TreeModel<T> {
    /// Creates a new empty tree model with one column.
    pub fn new() -> Self {
        Self {
            storage: RwLock::new(TreeStorage::new()),
            column_count: 1,
            headers: RwLock::new(HashMap::new()),
            loader: None,
            signals: ModelSignals::new(),
        }
    }

    /// Sets the number of columns.
    pub fn with_columns(mut self, count: usize) -> Self {
        self.column_count = count;
        self
    }

    /// Sets the horizontal headers under the display role.
    ///
    /// The column count becomes the number of headers.
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ItemData>,
    {
        let table = self.headers.get_mut();
        table.clear();
        let mut count = 0;
        for (section, header) in headers.into_iter().enumerate() {
            table.insert((section, ItemRole::Display), header.into());
            count = section + 1;
        }
        self.column_count = count;
        self
    }

    /// Sets a loader that produces children lazily through `fetch_more`.
    ///
    /// Each parent, including the top level, is loaded at most once.
    pub fn with_loader<F>(mut self, loader: F) -> Self
    where
        F: Fn(Option<NodeId>) -> Vec<T> + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Adds a root-level node and returns its ID.
    pub fn add_root(&self, data: T) -> NodeId {
        let row = self.storage.read().root_children.len();
        self.signals
            .rows_about_to_be_inserted
            .emit((ModelIndex::invalid(), row, row));
        let id = {
            let mut storage = self.storage.write();
            let id = next_node_id();
            storage.nodes.insert(
                id,
                TreeNode {
                    data,
                    children: Vec::new(),
                    parent: None,
                },
            );
            storage.root_children.push(id);
            id
        };
        self.signals
            .rows_inserted
            .emit((ModelIndex::invalid(), row, row));
        id
    }

    /// Adds a child node to the specified parent and returns its ID.
    ///
    /// Returns `None` if the parent doesn't exist.
    pub fn add_child(&self, parent_id: NodeId, data: T) -> Option<NodeId> {
        let row = self.storage.read().child_count(Some(parent_id));
        self.insert_child(Some(parent_id), row, data)
    }

    /// Inserts a node at `row` under `parent` (`None` for the top level).
    ///
    /// Returns `None` if the parent doesn't exist or `row` is past the end.
    pub fn insert_child(&self, parent: Option<NodeId>, row: usize, data: T) -> Option<NodeId> {
        let parent_index = {
            let storage = self.storage.read();
            if !storage.exists(parent) || row > storage.child_count(parent) {
                return None;
            }
            self.parent_index(&storage, parent)?
        };

        self.signals
            .rows_about_to_be_inserted
            .emit((parent_index.clone(), row, row));
        let id = self.storage.write().insert_node(parent, row, data);
        self.signals.rows_inserted.emit((parent_index, row, row));
        id
    }

    /// Removes a node and all its descendants.
    ///
    /// Returns the removed node's data, or `None` if the node doesn't exist.
    pub fn remove(&self, id: NodeId) -> Option<T> {
        let row;
        let parent_index;
        {
            let storage = self.storage.read();
            row = storage.row_of(id)?;
            parent_index = self.parent_index(&storage, storage.parent_of(id))?;
        }

        self.signals
            .rows_about_to_be_removed
            .emit((parent_index.clone(), row, row));
        let result = self.storage.write().remove_node(id);
        self.signals.rows_removed.emit((parent_index, row, row));
        result
    }

    /// Moves a node under `new_parent` so that it lands before `dest_row`.
    ///
    /// `dest_row` is counted in the destination as it is before the move.
    /// Returns `false` for moves that would change nothing, moves into the
    /// node's own subtree and unknown nodes.
    pub fn move_node(&self, id: NodeId, new_parent: Option<NodeId>, dest_row: usize) -> bool {
        let (source_parent, row, dest_parent) = {
            let storage = self.storage.read();
            let Some(row) = storage.row_of(id) else {
                return false;
            };
            if !storage.exists(new_parent) || dest_row > storage.child_count(new_parent) {
                return false;
            }
            if let Some(target) = new_parent
                && (target == id || storage.is_ancestor(id, target))
            {
                return false;
            }
            let old_parent = storage.parent_of(id);
            if old_parent == new_parent && (dest_row == row || dest_row == row + 1) {
                return false;
            }
            let (Some(source_parent), Some(dest_parent)) = (
                self.parent_index(&storage, old_parent),
                self.parent_index(&storage, new_parent),
            ) else {
                return false;
            };
            (source_parent, row, dest_parent)
        };

        self.signals.rows_about_to_be_moved.emit((
            source_parent.clone(),
            row,
            row,
            dest_parent.clone(),
            dest_row,
        ));
        self.storage.write().move_node(id, new_parent, dest_row);
        self.signals
            .rows_moved
            .emit((source_parent, row, row, dest_parent, dest_row));
        true
    }

    /// Clears all nodes from the tree.
    pub fn clear(&self) {
        self.signals.emit_reset(|| {
            self.storage.write().clear();
        });
    }

    /// Replaces the whole tree with new top-level nodes.
    pub fn reset_roots(&self, roots: Vec<T>) {
        self.signals.emit_reset(|| {
            let mut storage = self.storage.write();
            storage.clear();
            for (row, data) in roots.into_iter().enumerate() {
                storage.insert_node(None, row, data);
            }
        });
    }

    /// Returns the number of root-level nodes.
    pub fn root_count(&self) -> usize {
        self.storage.read().root_children.len()
    }

    /// Returns `true` if the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.read().root_children.is_empty()
    }

    /// Returns the children of a node in row order.
    pub fn children(&self, parent: Option<NodeId>) -> Vec<NodeId> {
        self.storage.read().children_of(parent).to_vec()
    }

    /// Provides read access to a node's data.
    pub fn with_node<F, R>(&self, id: NodeId, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let storage = self.storage.read();
        storage.nodes.get(&id).map(|node| f(&node.data))
    }

    /// Provides mutable access to a node's data.
    ///
    /// Emits `data_changed` across all columns of the node afterwards.
    pub fn modify_node<F, R>(&self, id: NodeId, f: F) -> Option<R>
    where
        F: FnOnce(&mut T) -> R,
    {
        let result;
        let index;
        {
            let mut storage = self.storage.write();
            let node = storage.nodes.get_mut(&id)?;
            result = f(&mut node.data);
            index = self.create_index_for_id(&storage, id)?;
        }
        let last = index.sibling_at_column(self.column_count.saturating_sub(1));
        self.signals.data_changed.emit((index, last, Vec::new()));
        Some(result)
    }

    /// Returns the index of a node in column 0, or an invalid index.
    pub fn index_for_node(&self, id: NodeId) -> ModelIndex {
        let storage = self.storage.read();
        self.create_index_for_id(&storage, id)
            .unwrap_or_else(ModelIndex::invalid)
    }

    /// Returns the node an index of this model points at.
    pub fn node_for_index(&self, index: &ModelIndex) -> Option<NodeId> {
        let id = self.node_key(index)?;
        self.storage.read().nodes.contains_key(&id).then_some(id)
    }

    /// Creates a ModelIndex for a node ID.
    fn create_index_for_id(&self, storage: &TreeStorage<T>, id: NodeId) -> Option<ModelIndex> {
        let row = storage.row_of(id)?;
        let parent_index = self.parent_index(storage, storage.parent_of(id))?;
        Some(ModelIndex::new(
            self.signals.model_id(),
            row,
            0,
            parent_index,
            id,
        ))
    }

    fn parent_index(&self, storage: &TreeStorage<T>, parent: Option<NodeId>) -> Option<ModelIndex> {
        match parent {
            Some(pid) => self.create_index_for_id(storage, pid),
            None => Some(ModelIndex::invalid()),
        }
    }

    /// Gets the node ID from a ModelIndex of this model.
    fn node_key(&self, index: &ModelIndex) -> Option<NodeId> {
        index
            .belongs_to(self.signals.model_id())
            .then(|| index.internal_id())
    }

    /// Resolves a parent argument. `Some(None)` is the top level and `None`
    /// an index of another model.
    fn parent_key(&self, parent: &ModelIndex) -> Option<Option<NodeId>> {
        if !parent.is_valid() {
            return Some(None);
        }
        self.node_key(parent).map(Some)
    }
}

impl<T: TreeNodeData + 'static> Default for TreeModel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TreeNodeData + 'static> ItemModel for TreeModel<T> {
    fn row_count(&self, parent: &ModelIndex) -> usize {
        match self.parent_key(parent) {
            Some(parent_id) => self.storage.read().child_count(parent_id),
            None => 0,
        }
    }

    fn column_count(&self, _parent: &ModelIndex) -> usize {
        self.column_count
    }

    fn data(&self, index: &ModelIndex, role: ItemRole) -> ItemData {
        let Some(node_id) = self.node_key(index) else {
            return ItemData::None;
        };
        if index.column() >= self.column_count {
            return ItemData::None;
        }

        let storage = self.storage.read();
        match storage.nodes.get(&node_id) {
            Some(node) => node.data.data(index.column(), role),
            None => ItemData::None,
        }
    }

    fn set_data(&self, index: &ModelIndex, value: ItemData, role: ItemRole) -> bool {
        let Some(node_id) = self.node_key(index) else {
            return false;
        };
        if index.column() >= self.column_count {
            return false;
        }
        let accepted = {
            let mut storage = self.storage.write();
            match storage.nodes.get_mut(&node_id) {
                Some(node) => node.data.set_data(index.column(), &value, role),
                None => false,
            }
        };
        if accepted {
            self.signals
                .emit_data_changed_single(index.clone(), vec![role]);
        }
        accepted
    }

    fn index(&self, row: usize, column: usize, parent: &ModelIndex) -> ModelIndex {
        if column >= self.column_count {
            return ModelIndex::invalid();
        }
        let Some(parent_id) = self.parent_key(parent) else {
            return ModelIndex::invalid();
        };

        let storage = self.storage.read();
        let child_id = match storage.child_at(parent_id, row) {
            Some(id) => id,
            None => return ModelIndex::invalid(),
        };

        ModelIndex::new(
            self.signals.model_id(),
            row,
            column,
            parent.sibling_at_column(0),
            child_id,
        )
    }

    fn parent(&self, index: &ModelIndex) -> ModelIndex {
        let Some(node_id) = self.node_key(index) else {
            return ModelIndex::invalid();
        };

        let storage = self.storage.read();
        match storage.parent_of(node_id) {
            Some(parent_id) => self
                .create_index_for_id(&storage, parent_id)
                .unwrap_or_else(ModelIndex::invalid),
            None => ModelIndex::invalid(),
        }
    }

    fn signals(&self) -> &ModelSignals {
        &self.signals
    }

    fn flags(&self, index: &ModelIndex) -> ItemFlags {
        let Some(node_id) = self.node_key(index) else {
            return ItemFlags::disabled().with_drop(true);
        };

        let storage = self.storage.read();
        storage
            .nodes
            .get(&node_id)
            .map(|n| n.data.flags(index.column()).with_drag(true).with_drop(true))
            .unwrap_or_else(ItemFlags::disabled)
    }

    fn has_children(&self, parent: &ModelIndex) -> bool {
        self.row_count(parent) > 0 || self.can_fetch_more(parent)
    }

    fn header_data(&self, section: usize, orientation: Orientation, role: ItemRole) -> ItemData {
        if orientation != Orientation::Horizontal || section >= self.column_count {
            return ItemData::None;
        }
        self.headers
            .read()
            .get(&(section, role))
            .cloned()
            .unwrap_or_default()
    }

    fn set_header_data(
        &self,
        section: usize,
        orientation: Orientation,
        value: ItemData,
        role: ItemRole,
    ) -> bool {
        if orientation != Orientation::Horizontal || section >= self.column_count {
            return false;
        }
        self.headers.write().insert((section, role), value);
        self.signals
            .header_data_changed
            .emit((orientation, section, section));
        true
    }

    fn can_fetch_more(&self, parent: &ModelIndex) -> bool {
        if self.loader.is_none() {
            return false;
        }
        let Some(parent_id) = self.parent_key(parent) else {
            return false;
        };
        let storage = self.storage.read();
        storage.exists(parent_id) && !storage.fetched.contains(&parent_id)
    }

    fn fetch_more(&self, parent: &ModelIndex) {
        let Some(loader) = self.loader.clone() else {
            return;
        };
        let Some(parent_id) = self.parent_key(parent) else {
            return;
        };
        {
            let mut storage = self.storage.write();
            if !storage.exists(parent_id) || !storage.fetched.insert(parent_id) {
                return;
            }
        }

        let items = loader(parent_id);
        if items.is_empty() {
            return;
        }

        let (first, parent_index) = {
            let storage = self.storage.read();
            let Some(parent_index) = self.parent_index(&storage, parent_id) else {
                return;
            };
            (storage.child_count(parent_id), parent_index)
        };
        let last = first + items.len() - 1;

        self.signals
            .rows_about_to_be_inserted
            .emit((parent_index.clone(), first, last));
        {
            let mut storage = self.storage.write();
            for (offset, item) in items.into_iter().enumerate() {
                storage.insert_node(parent_id, first + offset, item);
            }
        }
        self.signals.rows_inserted.emit((parent_index, first, last));
    }

    fn sort(&self, column: Option<usize>, order: SortOrder) {
        let Some(column) = column.filter(|column| *column < self.column_count) else {
            return;
        };
        self.signals.emit_layout_changed(
            Vec::new(),
            LayoutChangeHint::VerticalSortHint,
            || {
                self.storage.write().sort_subtree(None, column, order);
            },
        );
    }

    fn mime_types(&self) -> Vec<String> {
        vec![types::NODE_IDS.to_string(), types::TEXT_PLAIN.to_string()]
    }

    fn mime_data(&self, indexes: &[ModelIndex]) -> Option<MimeData> {
        let storage = self.storage.read();
        let mut ids = Vec::new();
        let mut lines = Vec::new();
        for index in indexes {
            let Some(id) = self.node_key(index) else {
                continue;
            };
            let Some(node) = storage.nodes.get(&id) else {
                continue;
            };
            if !ids.contains(&id) {
                ids.push(id);
                lines.push(
                    node.data
                        .data(0, ItemRole::Display)
                        .into_string()
                        .unwrap_or_default(),
                );
            }
        }
        if ids.is_empty() {
            return None;
        }

        let mut data = MimeData::from_text(lines.join("\n"));
        data.set_node_ids(&ids);
        Some(data)
    }

    fn can_drop_mime_data(
        &self,
        data: &MimeData,
        action: DropActions,
        row: Option<usize>,
        _column: Option<usize>,
        parent: &ModelIndex,
    ) -> bool {
        if !action.contains(DropActions::MOVE) {
            return false;
        }
        let (Some(ids), Some(target)) = (data.node_ids(), self.parent_key(parent)) else {
            return false;
        };
        let storage = self.storage.read();
        if ids.is_empty() || !storage.exists(target) {
            return false;
        }
        if row.is_some_and(|row| row > storage.child_count(target)) {
            return false;
        }
        ids.iter().all(|id| {
            storage.nodes.contains_key(id)
                && target.is_none_or(|target| target != *id && !storage.is_ancestor(*id, target))
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
        if !self.can_drop_mime_data(data, action, row, column, parent) {
            return false;
        }
        let (Some(ids), Some(target)) = (data.node_ids(), self.parent_key(parent)) else {
            return false;
        };

        let mut dest = row.unwrap_or_else(|| self.storage.read().child_count(target));
        for id in ids {
            self.move_node(id, target, dest);
            let storage = self.storage.read();
            if storage.parent_of(id) == target
                && let Some(new_row) = storage.row_of(id)
            {
                dest = new_row + 1;
            }
        }
        true
    }

    fn supported_drag_actions(&self) -> DropActions {
        DropActions::MOVE
    }

    fn supported_drop_actions(&self) -> DropActions {
        DropActions::MOVE
    }

    fn node_id(&self, index: &ModelIndex) -> Option<u64> {
        self.node_for_index(index)
    }
}
