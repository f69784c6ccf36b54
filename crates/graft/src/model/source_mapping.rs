//! Lazily populated mapping between proxy indices and source nodes.
//!
//! Every source node a proxy has ever exposed owns an entry in an arena.
//! The entry key doubles as the internal id of the proxy index for that
//! node, so resolving a proxy index is a single arena lookup. Keys are
//! versioned and never reused while live; a key that outlived its entry
//! simply fails to resolve.
//!
//! Entries are grouped into mounts, one per source model. Within a mount an
//! entry records its row below its parent entry. A node can carry a nested
//! mount, in which case that mount's top-level nodes are the node's children
//! in the proxy and the node's own source children stay hidden.
//!
//! The table never queries models: callers translate source events into
//! row based edits (`insert_rows`, `remove_rows`, `move_rows`, `relocate`).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use slotmap::{Key, KeyData, SlotMap, new_key_type};

use super::index::{ModelId, ModelIndex};

new_key_type! {
    /// Handle of a mapping entry.
    pub struct MappingKey;

    /// Handle of a mount.
    pub struct MountKey;
}

impl MappingKey {
    /// Encodes the key as the internal id of a proxy index.
    #[inline]
    pub(crate) fn to_internal_id(self) -> u64 {
        self.data().as_ffi()
    }

    /// Decodes a key from the internal id of a proxy index.
    #[inline]
    pub(crate) fn from_internal_id(id: u64) -> Self {
        KeyData::from_ffi(id).into()
    }
}

/// The children of one node (or of a mount's top level) within a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Scope {
    pub mount: MountKey,
    /// `None` for the top level of the mount.
    pub parent: Option<MappingKey>,
}

impl Scope {
    pub fn top(mount: MountKey) -> Self {
        Self { mount, parent: None }
    }

    pub fn under(mount: MountKey, parent: MappingKey) -> Self {
        Self {
            mount,
            parent: Some(parent),
        }
    }
}

/// One exposed source node.
#[derive(Debug)]
pub(crate) struct MappingEntry {
    pub mount: MountKey,
    pub parent: Option<MappingKey>,
    pub row: usize,
    /// Exposed children from the same mount, by source row.
    pub children: BTreeMap<usize, MappingKey>,
    /// Mount whose top level replaces this node's children.
    pub submount: Option<MountKey>,
}

/// One source model's attachment point and top-level entries.
#[derive(Debug, Default)]
pub(crate) struct MountTop {
    /// Node the mount is grafted under, `None` at the proxy root.
    pub attach: Option<MappingKey>,
    pub rows: BTreeMap<usize, MappingKey>,
    /// Added to top-level rows to obtain proxy rows.
    pub row_offset: usize,
    /// Set while the mount's rows are withheld from the proxy.
    pub hidden: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SourceMapping {
    entries: SlotMap<MappingKey, MappingEntry>,
    mounts: SlotMap<MountKey, MountTop>,
}

impl SourceMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry and mount.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.mounts.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // -------------------------------------------------------------------------
    // Mounts
    // -------------------------------------------------------------------------

    /// Creates a mount, optionally grafted under `attach`.
    ///
    /// Exposed children of `attach` are removed since the mount replaces
    /// them. Returns the new mount and the nested mounts that went away, or
    /// `None` if `attach` is stale or already carries a mount.
    pub fn add_mount(&mut self, attach: Option<MappingKey>) -> Option<(MountKey, Vec<MountKey>)> {
        let mut removed = Vec::new();
        if let Some(key) = attach {
            let entry = self.entries.get_mut(key)?;
            if entry.submount.is_some() {
                return None;
            }
            let shadowed = std::mem::take(&mut entry.children);
            for child in shadowed.into_values() {
                self.remove_subtree(child, &mut removed);
            }
        }

        let mount = self.mounts.insert(MountTop {
            attach,
            ..MountTop::default()
        });
        if let Some(entry) = attach.and_then(|key| self.entries.get_mut(key)) {
            entry.submount = Some(mount);
        }
        Some((mount, removed))
    }

    /// Removes a mount with all its entries.
    ///
    /// Returns every mount that went away, starting with `mount` itself.
    pub fn remove_mount(&mut self, mount: MountKey) -> Vec<MountKey> {
        let mut removed = Vec::new();
        self.remove_mount_into(mount, &mut removed);
        removed
    }

    /// Removes every entry of a mount but keeps the mount.
    ///
    /// Returns the nested mounts that went away.
    pub fn clear_mount(&mut self, mount: MountKey) -> Vec<MountKey> {
        let mut removed = Vec::new();
        let rows = match self.mounts.get_mut(mount) {
            Some(top) => std::mem::take(&mut top.rows),
            None => return removed,
        };
        for key in rows.into_values() {
            self.remove_subtree(key, &mut removed);
        }
        removed
    }

    pub fn mount(&self, mount: MountKey) -> Option<&MountTop> {
        self.mounts.get(mount)
    }

    pub fn mount_mut(&mut self, mount: MountKey) -> Option<&mut MountTop> {
        self.mounts.get_mut(mount)
    }

    pub fn contains_mount(&self, mount: MountKey) -> bool {
        self.mounts.contains_key(mount)
    }

    fn remove_mount_into(&mut self, mount: MountKey, removed: &mut Vec<MountKey>) {
        let Some(top) = self.mounts.remove(mount) else {
            return;
        };
        removed.push(mount);
        if let Some(entry) = top.attach.and_then(|key| self.entries.get_mut(key))
            && entry.submount == Some(mount)
        {
            entry.submount = None;
        }
        for key in top.rows.into_values() {
            self.remove_subtree(key, removed);
        }
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    pub fn entry(&self, key: MappingKey) -> Option<&MappingEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: MappingKey) -> bool {
        self.entries.contains_key(key)
    }

    /// The scope holding the proxy children of `key`.
    pub fn child_scope(&self, key: MappingKey) -> Option<Scope> {
        let entry = self.entries.get(key)?;
        Some(match entry.submount {
            Some(submount) => Scope::top(submount),
            None => Scope::under(entry.mount, key),
        })
    }

    pub fn children(&self, scope: Scope) -> Option<&BTreeMap<usize, MappingKey>> {
        match scope.parent {
            None => self.mounts.get(scope.mount).map(|top| &top.rows),
            Some(key) => self
                .entries
                .get(key)
                .filter(|entry| entry.mount == scope.mount)
                .map(|entry| &entry.children),
        }
    }

    fn children_mut(&mut self, scope: Scope) -> Option<&mut BTreeMap<usize, MappingKey>> {
        match scope.parent {
            None => self.mounts.get_mut(scope.mount).map(|top| &mut top.rows),
            Some(key) => self
                .entries
                .get_mut(key)
                .filter(|entry| entry.mount == scope.mount)
                .map(|entry| &mut entry.children),
        }
    }

    pub fn child(&self, scope: Scope, row: usize) -> Option<MappingKey> {
        self.children(scope)?.get(&row).copied()
    }

    /// Returns the entry at `row` in `scope`, creating it if needed.
    ///
    /// Newly created keys are appended to `created`.
    pub fn get_or_create(
        &mut self,
        scope: Scope,
        row: usize,
        created: &mut Vec<MappingKey>,
    ) -> Option<MappingKey> {
        if let Some(key) = self.child(scope, row) {
            return Some(key);
        }
        if let Some(parent) = scope.parent {
            // Children of a node carrying a mount are not exposed
            let entry = self.entries.get(parent)?;
            if entry.mount != scope.mount || entry.submount.is_some() {
                return None;
            }
        } else if !self.mounts.contains_key(scope.mount) {
            return None;
        }

        let key = self.entries.insert(MappingEntry {
            mount: scope.mount,
            parent: scope.parent,
            row,
            children: BTreeMap::new(),
            submount: None,
        });
        if let Some(children) = self.children_mut(scope) {
            children.insert(row, key);
        }
        created.push(key);
        Some(key)
    }

    /// Finds the entry of a node of `mount`'s source model.
    pub fn find(&self, mount: MountKey, source: &ModelIndex) -> Option<MappingKey> {
        if !source.is_valid() {
            return None;
        }
        let mut scope = Scope::top(mount);
        let mut key = None;
        for row in source_rows(source) {
            let child = self.child(scope, row)?;
            scope = Scope::under(mount, child);
            key = Some(child);
        }
        key
    }

    /// Finds the entry of a node, creating it and its ancestors as needed.
    ///
    /// Fails if the node is hidden below a nested mount.
    pub fn find_or_create(
        &mut self,
        mount: MountKey,
        source: &ModelIndex,
        created: &mut Vec<MappingKey>,
    ) -> Option<MappingKey> {
        if !source.is_valid() {
            return None;
        }
        let mut scope = Scope::top(mount);
        let mut key = None;
        for row in source_rows(source) {
            let child = self.get_or_create(scope, row, created)?;
            scope = Scope::under(mount, child);
            key = Some(child);
        }
        key
    }

    /// The scope of a source parent within `mount`, if it is exposed.
    pub fn find_scope(&self, mount: MountKey, source_parent: &ModelIndex) -> Option<Scope> {
        if !source_parent.is_valid() {
            return self.mounts.contains_key(mount).then(|| Scope::top(mount));
        }
        self.find(mount, source_parent)
            .map(|key| Scope::under(mount, key))
    }

    /// Removes an already unlinked entry, its descendants and nested mounts.
    fn remove_subtree(&mut self, key: MappingKey, removed: &mut Vec<MountKey>) {
        let Some(entry) = self.entries.remove(key) else {
            return;
        };
        for child in entry.children.into_values() {
            self.remove_subtree(child, removed);
        }
        if let Some(submount) = entry.submount {
            self.remove_mount_into(submount, removed);
        }
    }

    /// Removes an entry with its subtree, returning the nested mounts that
    /// went away.
    pub fn remove_entry(&mut self, key: MappingKey) -> Vec<MountKey> {
        let mut removed = Vec::new();
        let Some(entry) = self.entries.get(key) else {
            return removed;
        };
        let scope = Scope {
            mount: entry.mount,
            parent: entry.parent,
        };
        let row = entry.row;
        if let Some(children) = self.children_mut(scope)
            && children.get(&row) == Some(&key)
        {
            children.remove(&row);
        }
        self.remove_subtree(key, &mut removed);
        removed
    }

    // -------------------------------------------------------------------------
    // Row edits
    // -------------------------------------------------------------------------

    /// Shifts entries at or after `first` down by `count`.
    pub fn insert_rows(&mut self, scope: Scope, first: usize, count: usize) {
        if count == 0 {
            return;
        }
        let shifted = {
            let Some(children) = self.children_mut(scope) else {
                return;
            };
            let tail = children.split_off(&first);
            let mut shifted = Vec::with_capacity(tail.len());
            for (row, key) in tail {
                children.insert(row + count, key);
                shifted.push((key, row + count));
            }
            shifted
        };
        self.set_rows(shifted);
    }

    /// Removes entries in `[first, first + count)` and shifts later ones up.
    ///
    /// Returns the nested mounts that went away.
    pub fn remove_rows(&mut self, scope: Scope, first: usize, count: usize) -> Vec<MountKey> {
        let mut removed = Vec::new();
        if count == 0 {
            return removed;
        }
        let (doomed, shifted) = {
            let Some(children) = self.children_mut(scope) else {
                return removed;
            };
            let mut doomed = children.split_off(&first);
            let rest = doomed.split_off(&(first + count));
            let mut shifted = Vec::with_capacity(rest.len());
            for (row, key) in rest {
                children.insert(row - count, key);
                shifted.push((key, row - count));
            }
            (doomed, shifted)
        };
        self.set_rows(shifted);
        for key in doomed.into_values() {
            self.remove_subtree(key, &mut removed);
        }
        removed
    }

    /// Moves rows `[first, last]` of `source` before `dest_row` of
    /// `destination`, where `dest_row` is counted before the rows are taken
    /// out. Both scopes must belong to the same mount.
    pub fn move_rows(
        &mut self,
        source: Scope,
        first: usize,
        last: usize,
        destination: Scope,
        dest_row: usize,
    ) {
        debug_assert_eq!(source.mount, destination.mount);
        let count = last + 1 - first;
        let (moving, shifted) = {
            let Some(children) = self.children_mut(source) else {
                return;
            };
            let mut moving = children.split_off(&first);
            let rest = moving.split_off(&(last + 1));
            let mut shifted = Vec::with_capacity(rest.len());
            for (row, key) in rest {
                children.insert(row - count, key);
                shifted.push((key, row - count));
            }
            (moving, shifted)
        };
        self.set_rows(shifted);

        let dest = if source != destination || dest_row <= first {
            dest_row
        } else if dest_row > last {
            dest_row - count
        } else {
            first
        };
        self.insert_rows(destination, dest, count);

        let placed: Vec<(MappingKey, usize)> = moving
            .into_iter()
            .map(|(row, key)| (key, dest + (row - first)))
            .collect();
        match self.children_mut(destination) {
            Some(children) => {
                for (key, row) in &placed {
                    children.insert(*row, *key);
                }
            }
            None => {
                // Destination vanished; nothing can hold the moved entries
                let mut removed = Vec::new();
                for (key, _) in placed {
                    self.remove_subtree(key, &mut removed);
                }
                return;
            }
        }
        for (key, row) in placed {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.row = row;
                entry.parent = destination.parent;
            }
        }
    }

    /// Reassigns the rows of a scope after its source reordered.
    ///
    /// Entries mapped to `None`, and entries missing from `rows`, are
    /// removed with their subtrees. Returns the nested mounts that went away.
    pub fn relocate(&mut self, scope: Scope, rows: &HashMap<MappingKey, Option<usize>>) -> Vec<MountKey> {
        let mut removed = Vec::new();
        let Some(children) = self.children_mut(scope).map(std::mem::take) else {
            return removed;
        };

        let mut doomed = Vec::new();
        let mut placed = BTreeMap::new();
        for key in children.into_values() {
            match rows.get(&key).copied().flatten() {
                Some(row) if !placed.contains_key(&row) => {
                    placed.insert(row, key);
                }
                _ => doomed.push(key),
            }
        }

        for (row, key) in &placed {
            if let Some(entry) = self.entries.get_mut(*key) {
                entry.row = *row;
            }
        }
        if let Some(children) = self.children_mut(scope) {
            *children = placed;
        }
        for key in doomed {
            self.remove_subtree(key, &mut removed);
        }
        removed
    }

    fn set_rows(&mut self, rows: Vec<(MappingKey, usize)>) {
        for (key, row) in rows {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.row = row;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Paths
    // -------------------------------------------------------------------------

    /// Source rows from the mount's top level down to `key`.
    pub fn source_path(&self, key: MappingKey) -> Option<(MountKey, Vec<usize>)> {
        let mut entry = self.entries.get(key)?;
        let mount = entry.mount;
        let mut rows = vec![entry.row];
        while let Some(parent) = entry.parent {
            entry = self.entries.get(parent)?;
            rows.push(entry.row);
        }
        rows.reverse();
        Some((mount, rows))
    }

    /// Entries and proxy rows from the proxy root down to `key`.
    fn proxy_chain(&self, key: MappingKey) -> Option<Vec<(MappingKey, usize)>> {
        let mut chain = Vec::new();
        let mut current = Some(key);
        while let Some(key) = current {
            let entry = self.entries.get(key)?;
            match entry.parent {
                Some(parent) => {
                    chain.push((key, entry.row));
                    current = Some(parent);
                }
                None => {
                    let top = self.mounts.get(entry.mount)?;
                    chain.push((key, top.row_offset + entry.row));
                    current = top.attach;
                }
            }
        }
        chain.reverse();
        Some(chain)
    }

    /// Builds the proxy index of `key`, or an invalid index if it is stale.
    pub fn proxy_index(&self, model: ModelId, key: MappingKey, column: usize) -> ModelIndex {
        let Some(chain) = self.proxy_chain(key) else {
            return ModelIndex::invalid();
        };
        let last = chain.len().saturating_sub(1);
        chain
            .into_iter()
            .enumerate()
            .fold(ModelIndex::invalid(), |parent, (depth, (key, row))| {
                let column = if depth == last { column } else { 0 };
                ModelIndex::new(model, row, column, parent, key.to_internal_id())
            })
    }

    /// The proxy index of the node owning a scope.
    ///
    /// The top level of a root mount is owned by the proxy root.
    pub fn scope_owner(&self, model: ModelId, scope: Scope) -> Option<ModelIndex> {
        match scope.parent {
            Some(key) => self
                .contains(key)
                .then(|| self.proxy_index(model, key, 0)),
            None => {
                let top = self.mounts.get(scope.mount)?;
                match top.attach {
                    Some(attach) => self
                        .contains(attach)
                        .then(|| self.proxy_index(model, attach, 0)),
                    None => Some(ModelIndex::invalid()),
                }
            }
        }
    }

    /// Scopes of `mount` reachable from `start`, parents before children.
    ///
    /// Nested mounts are not entered.
    pub fn scopes_below(&self, start: Scope) -> Vec<Scope> {
        let mut scopes = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(scope) = queue.pop_front() {
            let Some(children) = self.children(scope) else {
                continue;
            };
            for key in children.values() {
                if let Some(entry) = self.entries.get(*key)
                    && entry.submount.is_none()
                    && !entry.children.is_empty()
                {
                    queue.push_back(Scope::under(scope.mount, *key));
                }
            }
            scopes.push(scope);
        }
        scopes
    }

    /// Scopes touched by a layout change of `mount` below `parents`.
    ///
    /// An empty parent list covers the whole mount. Shallower scopes come
    /// first so a scope's parent is relocated before the scope itself.
    pub fn layout_scopes(&self, mount: MountKey, parents: &[ModelIndex]) -> Vec<Scope> {
        let starts: Vec<Scope> = if parents.is_empty() {
            vec![Scope::top(mount)]
        } else {
            parents
                .iter()
                .filter_map(|parent| self.find_scope(mount, parent))
                .collect()
        };
        let mut seen = HashSet::new();
        let mut scopes: Vec<Scope> = starts
            .into_iter()
            .flat_map(|start| self.scopes_below(start))
            .filter(|scope| seen.insert(*scope))
            .collect();
        scopes.sort_by_key(|scope| self.scope_depth(*scope));
        scopes
    }

    /// Exposed children of a scope with their source paths.
    pub fn child_paths(&self, scope: Scope) -> Vec<(MappingKey, Vec<usize>)> {
        self.children(scope)
            .map(|children| {
                children
                    .values()
                    .filter_map(|key| self.source_path(*key).map(|(_, rows)| (*key, rows)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn scope_depth(&self, scope: Scope) -> usize {
        let mut depth = 0;
        let mut current = scope.parent;
        while let Some(key) = current {
            depth += 1;
            current = self.entries.get(key).and_then(|entry| entry.parent);
        }
        depth
    }
}

/// Rows of a source index and its ancestors, top-level first.
fn source_rows(index: &ModelIndex) -> Vec<usize> {
    let mut rows: Vec<usize> = index.ancestors().iter().map(ModelIndex::row).collect();
    rows.reverse();
    rows.push(index.row());
    rows
}
