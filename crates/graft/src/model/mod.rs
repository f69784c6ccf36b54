//! Item models and the proxies composing them.
//!
//! # Core Types
//!
//! - `ModelIndex`: Identifies an item's position in a model
//! - `ItemRole`: Specifies what type of data to access
//! - `ItemData`: Type-erased container for item data
//! - `ItemModel`: The trait that models implement
//! - `ModelSignals`: Signals for change notifications
//!
//! # Model Implementations
//!
//! - `TreeModel`: Hierarchical tree structure, used as a source
//! - `MergingProxyModel`: Several sources side by side at the proxy root
//! - `MountingProxyModel`: Sources grafted below nodes of a primary tree
//!
//! # Columns
//!
//! Both proxies accept sources with different column layouts. Without
//! header callbacks, proxy column `i` is source column `i`. With them,
//! proxy columns are identified by header values and every source column
//! is matched by its own header value (`MultiProxyColumnMapping`).
//!
//! # Example
//!
//! ```
//! use graft::model::{ItemModel, MergingProxyModel, ModelIndex, SourceModel, TreeModel};
//!
//! let objects = TreeModel::<String>::new();
//! objects.add_root("camera".to_string());
//!
//! let proxy = MergingProxyModel::new();
//! proxy.append(SourceModel::owned(objects)).unwrap();
//!
//! let camera = proxy.index(0, 0, &ModelIndex::invalid());
//! assert_eq!(proxy.display_text(&camera).as_deref(), Some("camera"));
//! ```

mod column_mapping;
mod column_sort;
mod debug;
mod error;
mod index;
mod merging_proxy_model;
mod mime;
mod mounting_proxy_model;
mod multi_proxy_helper;
mod role;
mod source;
mod source_mapping;
mod traits;
mod tree_model;

pub use column_mapping::{MountData, MultiProxyColumnMapping};
pub use column_sort::ColumnSort;
pub use debug::{ModelTreeDebug, TreeFormatOptions, TreeStyle};
pub use error::ProxyError;
pub use index::{ModelId, ModelIndex};
pub use merging_proxy_model::MergingProxyModel;
pub use mime::{DropActions, MimeData};
pub use mounting_proxy_model::{MountingProxyModel, SourceModelFactory};
pub use multi_proxy_helper::{DragCallback, GetHeaderDataFn, SetHeaderDataFn};
pub use role::{CheckState, ItemData, ItemRole};
pub use source::SourceModel;
pub use traits::{
    ItemFlags, ItemModel, LayoutArgs, LayoutChangeHint, ModelSignals, MoveArgs, Orientation,
    RangeArgs, SortOrder,
};
pub use tree_model::{ChildLoader, NodeId, TreeModel, TreeNodeData};
