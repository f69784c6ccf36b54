//! graft: compose hierarchical item models from independently owned sources.
//!
//! The crate implements a Qt-style model protocol ([`model::ItemModel`]) and
//! two proxies on top of it:
//!
//! - [`model::MergingProxyModel`] places several source trees side by side
//!   as siblings at the proxy root.
//! - [`model::MountingProxyModel`] grafts source trees below arbitrary
//!   interior nodes of a primary tree, either explicitly or lazily through a
//!   factory callback.
//!
//! Both proxies keep every structural notification of every source intact
//! (inserts, removals, moves, layout changes and resets) and re-emit it in
//! proxy coordinates.
//!
//! # Example
//!
//! ```
//! use graft::model::{ItemModel, MergingProxyModel, ModelIndex, SourceModel, TreeModel};
//!
//! let a = TreeModel::<String>::new();
//! a.add_root("alpha".to_string());
//! let b = TreeModel::<String>::new();
//! b.add_root("beta".to_string());
//!
//! let proxy = MergingProxyModel::new();
//! proxy.append(SourceModel::owned(a)).unwrap();
//! proxy.append(SourceModel::owned(b)).unwrap();
//!
//! assert_eq!(proxy.row_count(&ModelIndex::invalid()), 2);
//! ```

pub mod model;
pub mod prelude;

pub use graft_core::{ConnectionId, Signal};
