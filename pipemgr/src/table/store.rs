// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::Bound;

use slog::Logger;

use common::table::TableContext;
use dal::{EntryHandle, MatchSpec};

use crate::freemap::FreeMap;
use crate::freemap::MAX_HANDLES;
use crate::key_index::KeyIndex;
use crate::types::{PipeError, PipeResult};

/// The indexable parts of an entry
pub trait Entry {
    /// The key used for duplicate detection, for tables matched by key
    fn match_spec(&self) -> Option<&MatchSpec> {
        None
    }

    /// The caller-assigned member or group id, for tables addressed by id
    fn alt_id(&self) -> Option<u32> {
        None
    }
}

struct Stored<E> {
    replica: usize,
    entry: E,
}

/// The run-time entries of one table: a handle allocator, the handle-ordered
/// primary index, and the key and id secondary indexes.
pub struct EntryStore<E> {
    handles: FreeMap,
    entries: BTreeMap<EntryHandle, Stored<E>>,
    keys: KeyIndex,
    ids: HashMap<(usize, u32), EntryHandle>,
}

impl<E: Entry> EntryStore<E> {
    pub fn new(
        log: &Logger,
        ctx: &TableContext,
        replicas: usize,
        dup_check: bool,
    ) -> Self {
        EntryStore {
            handles: FreeMap::new(
                log,
                &ctx.name,
                ctx.size.unwrap_or(MAX_HANDLES),
            ),
            entries: BTreeMap::new(),
            keys: KeyIndex::new(ctx.match_type, replicas, dup_check),
            ids: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn dup_check(&self) -> bool {
        self.keys.is_enabled()
    }

    pub fn capacity(&self) -> u32 {
        self.handles.capacity()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take a handle for an entry that is about to be programmed.  The handle
    /// must be passed to either `insert()` or `release()`.
    pub fn reserve(&mut self) -> PipeResult<EntryHandle> {
        self.handles.alloc()
    }

    /// Return a reserved handle whose entry was never inserted
    pub fn release(&mut self, handle: EntryHandle) {
        self.handles.free(handle)
    }

    /// Make an entry visible under a reserved handle.  On failure nothing has
    /// been indexed, and the handle is still reserved.
    pub fn insert(
        &mut self,
        handle: EntryHandle,
        replica: usize,
        entry: E,
    ) -> PipeResult<()> {
        if self.entries.contains_key(&handle) {
            return Err(PipeError::Unexpected(format!(
                "handle {handle} is already in use"
            )));
        }
        if let Some(spec) = entry.match_spec() {
            self.keys.insert(replica, spec, handle)?;
        }
        if let Some(id) = entry.alt_id() {
            self.ids.insert((replica, id), handle);
        }
        self.entries.insert(handle, Stored { replica, entry });
        Ok(())
    }

    /// Drop an entry from every index and free its handle
    pub fn remove(&mut self, handle: EntryHandle) -> Option<E> {
        let stored = self.entries.remove(&handle)?;
        if let Some(spec) = stored.entry.match_spec() {
            self.keys.remove(stored.replica, spec);
        }
        if let Some(id) = stored.entry.alt_id() {
            self.ids.remove(&(stored.replica, id));
        }
        self.handles.free(handle);
        Some(stored.entry)
    }

    pub fn get(&self, handle: EntryHandle) -> Option<&E> {
        self.entries.get(&handle).map(|s| &s.entry)
    }

    pub fn get_mut(&mut self, handle: EntryHandle) -> Option<&mut E> {
        self.entries.get_mut(&handle).map(|s| &mut s.entry)
    }

    pub fn key_to_handle(
        &self,
        replica: usize,
        spec: &MatchSpec,
    ) -> Option<EntryHandle> {
        self.keys.exists(replica, spec)
    }

    pub fn id_to_handle(&self, replica: usize, id: u32) -> Option<EntryHandle> {
        self.ids.get(&(replica, id)).copied()
    }

    pub fn first_handle(&self) -> Option<EntryHandle> {
        self.entries.keys().next().copied()
    }

    /// Up to `n` handles, in order, starting strictly after `after`
    pub fn next_handles(&self, after: EntryHandle, n: usize) -> Vec<EntryHandle> {
        self.entries
            .range((Bound::Excluded(after), Bound::Unbounded))
            .take(n)
            .map(|(h, _)| *h)
            .collect()
    }
}
