//! Ownership of the models a proxy composes.

use std::sync::{Arc, Weak};

use super::traits::ItemModel;

/// A model handed to a proxy, together with who owns it.
///
/// An owned source lives as long as the proxy keeps it mounted and is
/// dropped when it is unmounted. A borrowed source stays under the control
/// of its owner; the proxy only reads and writes through it and simply
/// stops seeing it once the owner drops it.
#[derive(Clone)]
pub enum SourceModel {
    /// The proxy owns the model.
    Owned(Arc<dyn ItemModel>),
    /// The model is owned elsewhere.
    Borrowed(Weak<dyn ItemModel>),
}

impl SourceModel {
    /// Hands ownership of a model to the proxy.
    pub fn owned<M: ItemModel + 'static>(model: M) -> Self {
        SourceModel::Owned(Arc::new(model))
    }

    /// Lets the proxy use a model owned elsewhere.
    pub fn borrowed<M: ItemModel + 'static>(model: &Arc<M>) -> Self {
        let model: Arc<dyn ItemModel> = model.clone();
        SourceModel::Borrowed(Arc::downgrade(&model))
    }

    /// Returns the model if it is still alive.
    pub fn get(&self) -> Option<Arc<dyn ItemModel>> {
        match self {
            SourceModel::Owned(model) => Some(model.clone()),
            SourceModel::Borrowed(model) => model.upgrade(),
        }
    }

    /// Returns true if the proxy owns the model.
    pub fn is_owned(&self) -> bool {
        matches!(self, SourceModel::Owned(_))
    }
}

impl From<Arc<dyn ItemModel>> for SourceModel {
    fn from(model: Arc<dyn ItemModel>) -> Self {
        SourceModel::Owned(model)
    }
}

impl std::fmt::Debug for SourceModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(model) => write!(
                f,
                "SourceModel({}, {})",
                model.model_id(),
                if self.is_owned() { "owned" } else { "borrowed" }
            ),
            None => write!(f, "SourceModel(dropped)"),
        }
    }
}
