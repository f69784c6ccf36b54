//! Commonly used types, for glob import.
//!
//! ```
//! use graft::prelude::*;
//! ```

pub use crate::model::{
    ColumnSort, DropActions, ItemData, ItemFlags, ItemModel, ItemRole, MergingProxyModel,
    MimeData, ModelId, ModelIndex, ModelSignals, MountingProxyModel, Orientation, ProxyError,
    SortOrder, SourceModel, TreeModel,
};
pub use graft_core::Signal;
