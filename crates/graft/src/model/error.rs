//! Errors reported by the proxy models.

use thiserror::Error;

use super::index::ModelId;

/// Reasons a mount or unmount request was refused.
///
/// The plain `mount`/`unmount` calls treat these as safe no-ops and only log
/// them; the `try_*` variants hand them back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The operation does not apply to the proxy root.
    #[error("cannot mount at the proxy root")]
    RootIndex,
    /// The index does not resolve to a live mapping entry.
    #[error("proxy index is stale or belongs to another model")]
    StaleIndex,
    /// The node already carries a mounted model.
    #[error("a model is already mounted at this node")]
    AlreadyMounted,
    /// The node carries no mounted model.
    #[error("no model is mounted at this node")]
    NotMounted,
    /// Mounting would hide children the node already has.
    #[error("node already has children")]
    WouldShadowChildren,
    /// The model is already mounted in this proxy.
    #[error("{0} is already mounted")]
    ModelAlreadyMounted(ModelId),
    /// A borrowed source model was dropped by its owner.
    #[error("source model is no longer alive")]
    SourceDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProxyError::WouldShadowChildren.to_string(),
            "node already has children"
        );
        let id = ModelId::next();
        assert_eq!(
            ProxyError::ModelAlreadyMounted(id).to_string(),
            format!("model#{} is already mounted", id.as_u64())
        );
    }
}
