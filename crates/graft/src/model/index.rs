//! Model index for addressing items in hierarchical models.
//!
//! The `ModelIndex` type is the fundamental way to reference items within
//! an `ItemModel`. It contains row, column, and parent information plus the
//! identity of the model that produced it, so indices from different source
//! models can never be confused with each other.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// A global counter for generating unique model IDs.
static MODEL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a model instance.
///
/// Every [`ModelSignals`](super::ModelSignals) set allocates one at
/// construction, so each model carries a process-unique id that its indices
/// refer back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

impl ModelId {
    /// The id carried by invalid indices. No model is ever assigned it.
    pub const NONE: ModelId = ModelId(0);

    /// Allocates a fresh, never before used id.
    pub fn next() -> Self {
        ModelId(MODEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value of this id.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Represents a position within an `ItemModel`.
///
/// `ModelIndex` is used by views and proxies to locate items within a model.
/// Each index contains:
/// - Row and column within the parent
/// - A reference to the parent index (for hierarchical models)
/// - An internal ID for model-specific identification
/// - The id of the model that created it
///
/// # Index Validity
///
/// Model indices should be used immediately and not stored long-term.
/// After model modifications (insertions, deletions, moves), previously
/// obtained indices may become invalid. Proxies offer a `revalidate` call
/// that refreshes an index from the proxy's mapping.
///
/// # Example
///
/// ```
/// use graft::model::{ItemModel, ModelIndex, TreeModel};
///
/// let model = TreeModel::<String>::new();
/// let root = model.add_root("root".to_string());
/// model.add_child(root, "child".to_string());
///
/// let top = model.index(0, 0, &ModelIndex::invalid());
/// let child = model.index(0, 0, &top);
/// assert_eq!(child.parent(), top);
/// assert_eq!(child.model_id(), model.model_id());
/// ```
#[derive(Clone)]
pub struct ModelIndex {
    /// The row within the parent.
    row: usize,
    /// The column within the parent.
    column: usize,
    /// The parent index. `None` indicates a root-level item.
    parent: Option<Box<ModelIndex>>,
    /// An internal ID that models can use for their own purposes.
    internal_id: u64,
    /// The model this index belongs to.
    model: ModelId,
    /// Whether this index is valid.
    valid: bool,
}

impl Default for ModelIndex {
    fn default() -> Self {
        Self::invalid()
    }
}

impl ModelIndex {
    /// Creates an invalid (null) model index.
    ///
    /// An invalid index is used to represent:
    /// - The root of the model (as a parent reference)
    /// - A non-existent or out-of-bounds item
    /// - An uninitialized index
    #[inline]
    pub const fn invalid() -> Self {
        Self {
            row: 0,
            column: 0,
            parent: None,
            internal_id: 0,
            model: ModelId::NONE,
            valid: false,
        }
    }

    /// Creates a new valid model index.
    ///
    /// This is typically called by model implementations via
    /// [`ItemModel::create_index`](super::ItemModel::create_index) rather
    /// than directly.
    ///
    /// # Arguments
    ///
    /// * `model` - The model that owns the item
    /// * `row` - The row within the parent
    /// * `column` - The column within the parent
    /// * `parent` - The parent index, or `ModelIndex::invalid()` for root items
    /// * `internal_id` - Model-specific identifier
    #[inline]
    pub fn new(
        model: ModelId,
        row: usize,
        column: usize,
        parent: ModelIndex,
        internal_id: u64,
    ) -> Self {
        Self {
            row,
            column,
            parent: if parent.is_valid() {
                Some(Box::new(parent))
            } else {
                None
            },
            internal_id,
            model,
            valid: true,
        }
    }

    /// Returns `true` if this is a valid index.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the row of this index within its parent.
    ///
    /// Returns 0 for invalid indices.
    #[inline]
    pub fn row(&self) -> usize {
        self.row
    }

    /// Returns the column of this index within its parent.
    ///
    /// Returns 0 for invalid indices.
    #[inline]
    pub fn column(&self) -> usize {
        self.column
    }

    /// Returns the parent index, or an invalid index if this is a root item.
    #[inline]
    pub fn parent(&self) -> ModelIndex {
        match &self.parent {
            Some(parent) => (**parent).clone(),
            None => ModelIndex::invalid(),
        }
    }

    /// Returns `true` if this index has a valid parent.
    #[inline]
    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Returns the internal ID associated with this index.
    #[inline]
    pub fn internal_id(&self) -> u64 {
        self.internal_id
    }

    /// Returns the id of the model that produced this index.
    ///
    /// Invalid indices report [`ModelId::NONE`].
    #[inline]
    pub fn model_id(&self) -> ModelId {
        self.model
    }

    /// Returns `true` if this index was produced by the given model.
    #[inline]
    pub fn belongs_to(&self, model: ModelId) -> bool {
        self.valid && self.model == model
    }

    /// Creates an index for the same item at another column.
    ///
    /// Column changes never change the item an index points at, so the
    /// internal id and parent are kept. Returns an invalid index if this
    /// index is invalid.
    #[inline]
    pub fn sibling_at_column(&self, column: usize) -> ModelIndex {
        if !self.is_valid() {
            return ModelIndex::invalid();
        }
        ModelIndex {
            column,
            ..self.clone()
        }
    }

    /// Returns the depth of this index in the tree hierarchy.
    ///
    /// Root-level items have depth 0. Returns 0 for invalid indices.
    pub fn depth(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        let mut depth = 0;
        let mut current = self.parent();
        while current.is_valid() {
            depth += 1;
            current = current.parent();
        }
        depth
    }

    /// Returns the chain of ancestors from this index up to (but not including) the root.
    ///
    /// The first element is the immediate parent, and the last is the
    /// top-level ancestor.
    pub fn ancestors(&self) -> Vec<ModelIndex> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while current.is_valid() {
            ancestors.push(current.clone());
            current = current.parent();
        }
        ancestors
    }

    /// Checks if this index is a descendant of the given ancestor.
    ///
    /// Returns `false` if either index is invalid or if `ancestor` is not
    /// actually an ancestor of this index.
    pub fn is_descendant_of(&self, ancestor: &ModelIndex) -> bool {
        if !self.is_valid() || !ancestor.is_valid() {
            return false;
        }
        let mut current = self.parent();
        while current.is_valid() {
            if current == *ancestor {
                return true;
            }
            current = current.parent();
        }
        false
    }
}

impl std::fmt::Debug for ModelIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            f.debug_struct("ModelIndex")
                .field("row", &self.row)
                .field("column", &self.column)
                .field("depth", &self.depth())
                .field("internal_id", &self.internal_id)
                .field("model", &self.model.0)
                .finish()
        } else {
            write!(f, "ModelIndex(invalid)")
        }
    }
}

impl PartialEq for ModelIndex {
    fn eq(&self, other: &Self) -> bool {
        // Two invalid indices are equal
        if !self.is_valid() && !other.is_valid() {
            return true;
        }
        if self.is_valid() != other.is_valid() {
            return false;
        }
        // The internal id identifies the node within its model
        self.model == other.model
            && self.row == other.row
            && self.column == other.column
            && self.internal_id == other.internal_id
    }
}

impl Eq for ModelIndex {}

impl Hash for ModelIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.valid.hash(state);
        if self.valid {
            self.model.hash(state);
            self.row.hash(state);
            self.column.hash(state);
            self.internal_id.hash(state);
        }
    }
}

impl PartialOrd for ModelIndex {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ModelIndex {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Invalid indices sort before valid ones
        match (self.is_valid(), other.is_valid()) {
            (false, false) => std::cmp::Ordering::Equal,
            (false, true) => std::cmp::Ordering::Less,
            (true, false) => std::cmp::Ordering::Greater,
            (true, true) => self
                .depth()
                .cmp(&other.depth())
                .then(self.row.cmp(&other.row))
                .then(self.column.cmp(&other.column))
                .then(self.model.cmp(&other.model))
                .then(self.internal_id.cmp(&other.internal_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(row: usize, column: usize, parent: ModelIndex, id: u64) -> ModelIndex {
        ModelIndex::new(ModelId(7), row, column, parent, id)
    }

    #[test]
    fn test_invalid_index() {
        let index = ModelIndex::invalid();
        assert!(!index.is_valid());
        assert_eq!(index.row(), 0);
        assert_eq!(index.column(), 0);
        assert!(!index.has_parent());
        assert_eq!(index.model_id(), ModelId::NONE);
    }

    #[test]
    fn test_valid_index() {
        let index = index(5, 3, ModelIndex::invalid(), 1);
        assert!(index.is_valid());
        assert_eq!(index.row(), 5);
        assert_eq!(index.column(), 3);
        assert!(!index.has_parent());
        assert!(index.belongs_to(ModelId(7)));
        assert!(!index.belongs_to(ModelId(8)));
    }

    #[test]
    fn test_hierarchical_index() {
        let parent = index(0, 0, ModelIndex::invalid(), 1);
        let child = index(2, 1, parent.clone(), 2);

        assert!(child.is_valid());
        assert!(child.has_parent());
        assert_eq!(child.parent(), parent);
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn test_sibling_at_column_keeps_identity() {
        let parent = index(0, 0, ModelIndex::invalid(), 1);
        let item = index(1, 0, parent.clone(), 9);
        let sibling = item.sibling_at_column(2);

        assert_eq!(sibling.row(), 1);
        assert_eq!(sibling.column(), 2);
        assert_eq!(sibling.internal_id(), 9);
        assert_eq!(sibling.parent(), parent);
        assert!(!ModelIndex::invalid().sibling_at_column(1).is_valid());
    }

    #[test]
    fn test_equality() {
        assert_eq!(ModelIndex::invalid(), ModelIndex::invalid());

        let idx1 = index(1, 0, ModelIndex::invalid(), 100);
        let idx2 = index(1, 0, ModelIndex::invalid(), 100);
        assert_eq!(idx1, idx2);

        let other_model = ModelIndex::new(ModelId(8), 1, 0, ModelIndex::invalid(), 100);
        assert_ne!(idx1, other_model);
        assert_ne!(idx1, index(1, 0, ModelIndex::invalid(), 101));
    }

    #[test]
    fn test_ancestors() {
        let level1 = index(0, 0, ModelIndex::invalid(), 1);
        let level2 = index(1, 0, level1.clone(), 2);
        let level3 = index(2, 0, level2.clone(), 3);

        let ancestors = level3.ancestors();
        assert_eq!(ancestors, vec![level2, level1]);
    }

    #[test]
    fn test_is_descendant_of() {
        let level1 = index(0, 0, ModelIndex::invalid(), 1);
        let level2 = index(1, 0, level1.clone(), 2);
        let level3 = index(2, 0, level2.clone(), 3);

        assert!(level3.is_descendant_of(&level2));
        assert!(level3.is_descendant_of(&level1));
        assert!(!level1.is_descendant_of(&level3));
        assert!(!level1.is_descendant_of(&level2));
    }

    #[test]
    fn test_ordering() {
        let idx1 = index(0, 0, ModelIndex::invalid(), 1);
        let idx2 = index(1, 0, ModelIndex::invalid(), 2);
        let idx3 = index(0, 1, ModelIndex::invalid(), 1);

        assert!(idx1 < idx2);
        assert!(idx1 < idx3);
        assert!(ModelIndex::invalid() < idx1);
    }

    #[test]
    fn test_model_ids_are_unique() {
        let a = ModelId::next();
        let b = ModelId::next();
        assert_ne!(a, b);
        assert_ne!(a, ModelId::NONE);
    }
}
