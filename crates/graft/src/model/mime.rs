//! Drag and drop payloads.
//!
//! Models serialize dragged items into a [`MimeData`] payload and accept
//! payloads back through `drop_mime_data`. A payload can hold several
//! representations of the same data, each identified by a MIME type.

use std::collections::BTreeMap;

use bitflags::bitflags;

/// Standard MIME types used by the models in this crate.
pub mod types {
    /// Plain text MIME type.
    pub const TEXT_PLAIN: &str = "text/plain";
    /// Tree node ids, encoded as little-endian `u64` values.
    pub const NODE_IDS: &str = "application/x-graft-node-ids";
}

bitflags! {
    /// Actions that can be performed during a drop operation.
    ///
    /// These flags indicate what actions are supported by a drag source
    /// or drop target. Proxies report the union over all mounted sources.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DropActions: u8 {
        /// Copy the data.
        const COPY = 1 << 0;
        /// Move the data (source should delete original).
        const MOVE = 1 << 1;
        /// Create a link/reference to the data.
        const LINK = 1 << 2;
    }
}

/// Data being transferred in a drag and drop operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeData {
    formats: BTreeMap<String, Vec<u8>>,
}

impl MimeData {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a payload with plain text.
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut data = Self::default();
        data.set_text(text);
        data
    }

    /// Returns true if this payload holds no data.
    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Returns the available MIME formats in sorted order.
    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(|s| s.as_str())
    }

    /// Checks if data is available for the given MIME type.
    pub fn has_format(&self, mime_type: &str) -> bool {
        self.formats.contains_key(mime_type)
    }

    /// Gets raw data for a MIME type.
    pub fn data(&self, mime_type: &str) -> Option<&[u8]> {
        self.formats.get(mime_type).map(|v| v.as_slice())
    }

    /// Sets raw data for a MIME type.
    pub fn set_data(&mut self, mime_type: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.formats.insert(mime_type.into(), data.into());
    }

    /// Gets the plain text content, if available.
    pub fn text(&self) -> Option<String> {
        self.data(types::TEXT_PLAIN)
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
    }

    /// Sets the plain text content.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.set_data(types::TEXT_PLAIN, text.into().into_bytes());
    }

    /// Stores a list of node ids under [`types::NODE_IDS`].
    pub fn set_node_ids(&mut self, ids: &[u64]) {
        let bytes: Vec<u8> = ids.iter().flat_map(|id| id.to_le_bytes()).collect();
        self.set_data(types::NODE_IDS, bytes);
    }

    /// Reads the node ids stored under [`types::NODE_IDS`].
    ///
    /// Returns `None` if the format is missing or truncated.
    pub fn node_ids(&self) -> Option<Vec<u64>> {
        let bytes = self.data(types::NODE_IDS)?;
        if bytes.len() % 8 != 0 {
            return None;
        }
        Some(
            bytes
                .chunks_exact(8)
                .map(|chunk| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(chunk);
                    u64::from_le_bytes(raw)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_payload() {
        let data = MimeData::from_text("hello");
        assert!(data.has_format(types::TEXT_PLAIN));
        assert_eq!(data.text().as_deref(), Some("hello"));
        assert_eq!(data.formats().collect::<Vec<_>>(), vec![types::TEXT_PLAIN]);
    }

    #[test]
    fn test_node_ids() {
        let mut data = MimeData::new();
        assert!(data.node_ids().is_none());
        data.set_node_ids(&[1, 42, u64::MAX]);
        assert_eq!(data.node_ids(), Some(vec![1, 42, u64::MAX]));
    }

    #[test]
    fn test_truncated_node_ids() {
        let mut data = MimeData::new();
        data.set_data(types::NODE_IDS, vec![1, 2, 3]);
        assert!(data.node_ids().is_none());
    }

    #[test]
    fn test_drop_actions() {
        let actions = DropActions::COPY | DropActions::MOVE;
        assert!(actions.contains(DropActions::MOVE));
        assert!(!actions.contains(DropActions::LINK));
        assert!(DropActions::default().is_empty());
    }
}
