//! Column mapping between a proxy and its source models.
//!
//! A proxy that composes several sources cannot rely on column positions:
//! one source may report `["type", "name"]` while another reports
//! `["name", "size", "type"]`. Columns are instead matched by an identity
//! value that every source reports as horizontal header data under an
//! agreed role. The mapping holds the proxy's ordered identity list and
//! produces a [`MountData`] lookup table per source.
//!
//! Until identities are configured the mapping is in pass-through mode:
//! proxy column `c` is source column `c`.

use std::collections::HashMap;

use tracing::trace;

use graft_core::logging::targets;

use super::index::ModelIndex;
use super::role::{ItemData, ItemRole};
use super::traits::{ItemModel, Orientation};

/// Identity values that can be matched against each other.
///
/// Values without a meaningful equality (`None`, custom payloads) never
/// match any column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IdentityKey {
    String(String),
    Int(i64),
    Float(u64),
    Bool(bool),
    CheckState(super::role::CheckState),
}

impl IdentityKey {
    fn of(value: &ItemData) -> Option<Self> {
        match value {
            ItemData::String(s) => Some(IdentityKey::String(s.clone())),
            ItemData::Int(n) => Some(IdentityKey::Int(*n)),
            ItemData::Float(f) => Some(IdentityKey::Float(f.to_bits())),
            ItemData::Bool(b) => Some(IdentityKey::Bool(*b)),
            ItemData::CheckState(s) => Some(IdentityKey::CheckState(*s)),
            ItemData::None | ItemData::Custom(_) => None,
        }
    }
}

/// Per-source lookup table between source and proxy columns.
///
/// Missing counterparts are `None`: a source column whose identity is not
/// part of the proxy is not shown, and a proxy column the source does not
/// provide has no data for that source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountData {
    source_to_proxy: Vec<Option<usize>>,
    proxy_to_source: Vec<Option<usize>>,
    generation: u64,
}

impl MountData {
    /// Creates an empty table. Every lookup yields `None`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a source column to the proxy.
    #[inline]
    pub fn source_to_proxy(&self, source_column: usize) -> Option<usize> {
        self.source_to_proxy.get(source_column).copied().flatten()
    }

    /// Maps a proxy column to the source.
    #[inline]
    pub fn proxy_to_source(&self, proxy_column: usize) -> Option<usize> {
        self.proxy_to_source.get(proxy_column).copied().flatten()
    }

    /// The whole source to proxy table, indexed by source column.
    pub fn source_table(&self) -> &[Option<usize>] {
        &self.source_to_proxy
    }

    /// The whole proxy to source table, indexed by proxy column.
    pub fn proxy_table(&self) -> &[Option<usize>] {
        &self.proxy_to_source
    }

    /// The mapping generation this table was computed for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Maps the source column span `[first, last]` to the smallest proxy
    /// span covering every mapped column in it.
    ///
    /// Returns `None` if no column of the span is shown by the proxy.
    pub fn map_source_span(&self, first: usize, last: usize) -> Option<(usize, usize)> {
        (first..=last)
            .filter_map(|column| self.source_to_proxy(column))
            .fold(None, |span, column| match span {
                None => Some((column, column)),
                Some((low, high)) => Some((low.min(column), high.max(column))),
            })
    }
}

/// Mapping from column identities to proxy columns.
///
/// # Example
///
/// ```
/// use graft::model::{ItemData, ItemRole, MultiProxyColumnMapping, TreeModel};
///
/// let mut mapping = MultiProxyColumnMapping::new();
/// mapping.reset(
///     vec!["name".into(), "size".into(), "type".into()],
///     ItemRole::Display,
/// );
///
/// let source = TreeModel::<Vec<ItemData>>::new().with_headers(["type", "name"]);
/// let data = mapping.mount_data(&source);
/// assert_eq!(data.source_table(), &[Some(2), Some(0)]);
/// assert_eq!(data.proxy_table(), &[Some(1), None, Some(0)]);
/// ```
#[derive(Debug, Clone)]
pub struct MultiProxyColumnMapping {
    identities: Vec<ItemData>,
    lookup: HashMap<IdentityKey, usize>,
    identity_role: ItemRole,
    configured: bool,
    generation: u64,
}

impl Default for MultiProxyColumnMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiProxyColumnMapping {
    /// Creates a mapping in pass-through mode.
    pub fn new() -> Self {
        Self {
            identities: Vec::new(),
            lookup: HashMap::new(),
            identity_role: ItemRole::Display,
            configured: false,
            generation: 0,
        }
    }

    /// Replaces the column set. Proxy column `i` gets `identities[i]`.
    ///
    /// `identity_role` is the role under which sources report the identity
    /// of their own columns.
    pub fn reset(&mut self, identities: Vec<ItemData>, identity_role: ItemRole) {
        trace!(
            target: targets::MAPPING,
            columns = identities.len(),
            role = identity_role.value(),
            "column mapping reset"
        );
        self.identities = identities;
        self.identity_role = identity_role;
        self.configured = true;
        self.rebuild_lookup();
    }

    /// Inserts columns before `first_proxy_column`.
    ///
    /// An empty identity list is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if `first_proxy_column` is past the end of the column set.
    pub fn insert_columns(&mut self, first_proxy_column: usize, identities: Vec<ItemData>) {
        if identities.is_empty() {
            return;
        }
        assert!(
            first_proxy_column <= self.identities.len(),
            "insert position {first_proxy_column} past {} columns",
            self.identities.len()
        );
        self.identities
            .splice(first_proxy_column..first_proxy_column, identities);
        self.configured = true;
        self.rebuild_lookup();
    }

    /// Removes `count` columns starting at `first_proxy_column`.
    ///
    /// A `count` of zero is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if the span reaches past the end of the column set.
    pub fn remove_columns(&mut self, first_proxy_column: usize, count: usize) {
        if count == 0 {
            return;
        }
        assert!(
            first_proxy_column
                .checked_add(count)
                .is_some_and(|end| end <= self.identities.len()),
            "column span {first_proxy_column}+{count} past {} columns",
            self.identities.len()
        );
        self.identities
            .drain(first_proxy_column..first_proxy_column + count);
        self.rebuild_lookup();
    }

    /// Recomputes a source's lookup table in place.
    pub fn update_mount_data(&self, source: &dyn ItemModel, out: &mut MountData) {
        let count = source.column_count(&ModelIndex::invalid());
        out.generation = self.generation;
        out.source_to_proxy.clear();
        out.proxy_to_source.clear();

        if !self.configured {
            out.source_to_proxy.extend((0..count).map(Some));
            out.proxy_to_source.extend((0..count).map(Some));
            return;
        }

        out.proxy_to_source.resize(self.identities.len(), None);
        for column in 0..count {
            let value = source.header_data(column, Orientation::Horizontal, self.identity_role);
            let proxy_column = IdentityKey::of(&value)
                .and_then(|key| self.lookup.get(&key).copied())
                // A proxy column takes the first source column claiming it
                .filter(|proxy_column| out.proxy_to_source[*proxy_column].is_none());
            if let Some(proxy_column) = proxy_column {
                out.proxy_to_source[proxy_column] = Some(column);
            }
            out.source_to_proxy.push(proxy_column);
        }
    }

    /// Computes a fresh lookup table for a source.
    pub fn mount_data(&self, source: &dyn ItemModel) -> MountData {
        let mut data = MountData::new();
        self.update_mount_data(source, &mut data);
        data
    }

    /// Returns the identity of a proxy column, or `None` if out of range.
    pub fn get_column_value(&self, proxy_column: usize) -> Option<&ItemData> {
        self.identities.get(proxy_column)
    }

    /// Returns the number of configured proxy columns.
    ///
    /// Zero in pass-through mode.
    pub fn column_count(&self) -> usize {
        self.identities.len()
    }

    /// Returns true once identities have been supplied.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// The role under which sources report column identities.
    pub fn identity_role(&self) -> ItemRole {
        self.identity_role
    }

    /// Bumped whenever previously computed tables become outdated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn rebuild_lookup(&mut self) {
        self.generation += 1;
        self.lookup.clear();
        for (column, identity) in self.identities.iter().enumerate() {
            if let Some(key) = IdentityKey::of(identity) {
                self.lookup.entry(key).or_insert(column);
            }
        }
    }
}
