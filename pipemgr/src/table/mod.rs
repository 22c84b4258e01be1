// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Mutex;
use std::sync::MutexGuard;

use slog::{debug, o, Logger};

use common::table::{ActionFnHandle, TableContext};
use dal::{ActionRef, ActionSpec, EntryHandle, MatchSpec};

use crate::types::{ErrorKind, PipeError, PipeResult};

mod store;
pub use store::Entry;
pub use store::EntryStore;

/// Basic statistics about table usage
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableUsage {
    /// Maximum number of entries in the table
    pub size: u32,
    /// Current number of entries in the table
    pub occupancy: u32,
    /// Total number of entries inserted over time
    pub inserts: u64,
    /// Total number of entries deleted over time
    pub deletes: u64,
    /// Number of entries updated in place over time
    pub updates: u64,
    /// Number of inserts failed due to a collision
    pub collisions: u64,
    /// Number of updates failed due to a missing entry
    pub update_misses: u64,
    /// Number of deletes failed due to a missing entry
    pub delete_misses: u64,
    /// Number of inserts that failed due to space exhaustion
    pub exhaustion: u64,
}

impl TableUsage {
    /// Initialize a TableUsage structure with the provided size
    pub fn new(size: u32) -> TableUsage {
        TableUsage {
            size,
            ..Default::default()
        }
    }

    /// Account for the outcome of an insert
    pub(crate) fn record_insert<T>(&mut self, result: &PipeResult<T>) {
        match result {
            Ok(_) => {
                self.inserts += 1;
                self.occupancy += 1;
            }
            Err(e) => match e.kind() {
                ErrorKind::AlreadyExists => self.collisions += 1,
                ErrorKind::ResourceExhausted => self.exhaustion += 1,
                _ => {}
            },
        }
    }

    /// Account for the outcome of a delete
    pub(crate) fn record_delete<T>(&mut self, result: &PipeResult<T>) {
        match result {
            Ok(_) => {
                self.deletes += 1;
                self.occupancy = self.occupancy.saturating_sub(1);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.delete_misses += 1
            }
            Err(_) => {}
        }
    }

    /// Account for the outcome of an in-place update
    pub(crate) fn record_update<T>(&mut self, result: &PipeResult<T>) {
        match result {
            Ok(_) => self.updates += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.update_misses += 1
            }
            Err(_) => {}
        }
    }
}

/// The mutable state of one table, guarded by the table's mutex
pub struct TableState<E> {
    pub usage: TableUsage,
    /// Absent for tables that keep no run-time entries
    pub store: Option<EntryStore<E>>,
    name: String,
    // Handles issued for tables without a store are never reused
    next_passthru: EntryHandle,
}

impl<E: Entry> TableState<E> {
    pub fn store(&self) -> PipeResult<&EntryStore<E>> {
        self.store.as_ref().ok_or_else(|| self.unsupported())
    }

    pub fn store_mut(&mut self) -> PipeResult<&mut EntryStore<E>> {
        match self.store.as_mut() {
            Some(store) => Ok(store),
            None => Err(PipeError::NotSupported(format!(
                "table {} does not store entries",
                self.name
            ))),
        }
    }

    fn unsupported(&self) -> PipeError {
        PipeError::NotSupported(format!(
            "table {} does not store entries",
            self.name
        ))
    }

    fn missing(&self, handle: EntryHandle) -> PipeError {
        PipeError::Missing(format!("no entry {handle} in table {}", self.name))
    }

    /// The entry for a handle, or NotFound
    pub fn entry(&self, handle: EntryHandle) -> PipeResult<&E> {
        self.store()?.get(handle).ok_or_else(|| self.missing(handle))
    }

    pub fn entry_mut(&mut self, handle: EntryHandle) -> PipeResult<&mut E> {
        let missing = self.missing(handle);
        self.store_mut()?.get_mut(handle).ok_or(missing)
    }

    /// Issue a handle for an entry in a table without a store
    pub fn passthru_handle(&mut self) -> PipeResult<EntryHandle> {
        let handle = self.next_passthru;
        if handle == u32::MAX {
            return Err(PipeError::TableFull(format!(
                "{}: pass-through handles exhausted",
                self.name
            )));
        }
        self.next_passthru += 1;
        Ok(handle)
    }

    pub fn get_first_handle(&self) -> PipeResult<EntryHandle> {
        self.store()?.first_handle().ok_or_else(|| {
            PipeError::Missing(format!("table {} is empty", self.name))
        })
    }

    pub fn get_next_n_handles(
        &self,
        after: EntryHandle,
        n: usize,
    ) -> PipeResult<Vec<EntryHandle>> {
        Ok(self.store()?.next_handles(after, n))
    }

    pub fn key_to_handle(
        &self,
        replica: usize,
        spec: &MatchSpec,
    ) -> PipeResult<EntryHandle> {
        self.store()?.key_to_handle(replica, spec).ok_or_else(|| {
            PipeError::Missing(format!("no such key in table {}", self.name))
        })
    }

    pub fn id_to_handle(&self, replica: usize, id: u32) -> PipeResult<EntryHandle> {
        self.store()?.id_to_handle(replica, id).ok_or_else(|| {
            PipeError::Missing(format!("no id {id} in table {}", self.name))
        })
    }
}

/// A table: its static context and its lock-protected run-time state
pub struct Table<E> {
    pub ctx: TableContext,
    pub log: Logger,
    state: Mutex<TableState<E>>,
}

impl<E: Entry> Table<E> {
    pub fn new(
        log: &Logger,
        ctx: &TableContext,
        replicas: usize,
        default_dup_check: bool,
    ) -> Self {
        let log = log.new(o!("table" => ctx.name.clone()));
        let dup_check = ctx.duplicate_entry_check.unwrap_or(default_dup_check);
        let store = ctx
            .store_entries
            .then(|| EntryStore::new(&log, ctx, replicas, dup_check));
        let size = store
            .as_ref()
            .map(|s| s.capacity())
            .or(ctx.size)
            .unwrap_or(0);
        debug!(log, "table initialized";
            "kind" => %ctx.kind,
            "store_entries" => ctx.store_entries,
            "dup_check" => dup_check,
            "size" => size);
        Table {
            ctx: ctx.clone(),
            log,
            state: Mutex::new(TableState {
                usage: TableUsage::new(size),
                store,
                name: ctx.name.clone(),
                next_passthru: crate::freemap::FIRST_HANDLE,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn lock(&self) -> PipeResult<MutexGuard<'_, TableState<E>>> {
        Ok(self.state.lock()?)
    }

    pub fn usage(&self) -> PipeResult<TableUsage> {
        Ok(self.lock()?.usage.clone())
    }

    /// Check a key against the table's schema
    pub fn validate_match_spec(&self, spec: &MatchSpec) -> PipeResult<()> {
        let want = self.ctx.match_bytes();
        if want == 0 {
            return Ok(());
        }
        if spec.value.len() != want {
            return Err(PipeError::Invalid(format!(
                "{}: key is {} bytes, expected {want}",
                self.ctx.name,
                spec.value.len()
            )));
        }
        if !self.ctx.match_type.is_exact() && spec.mask.len() != want {
            return Err(PipeError::Invalid(format!(
                "{}: mask is {} bytes, expected {want}",
                self.ctx.name,
                spec.mask.len()
            )));
        }
        if spec.validity & !self.ctx.validity_mask() != 0 {
            return Err(PipeError::Invalid(format!(
                "{}: validity bits {:#x} name no optional field",
                self.ctx.name, spec.validity
            )));
        }
        Ok(())
    }

    /// Check an action against the table's schema.  Indirect actions are only
    /// legal in tables associated with an action-data or selector table.
    pub fn validate_action(
        &self,
        act_fn_hdl: ActionFnHandle,
        spec: &ActionSpec,
    ) -> PipeResult<()> {
        if !self.ctx.actions.is_empty() && self.ctx.action(act_fn_hdl).is_none()
        {
            return Err(PipeError::Invalid(format!(
                "{}: unknown action function {act_fn_hdl:#x}",
                self.ctx.name
            )));
        }
        match spec.action_ref {
            ActionRef::Direct => Ok(()),
            ActionRef::Member(_) if self.ctx.adt_handle.is_none() => {
                Err(PipeError::Invalid(format!(
                    "{} has no action-data table",
                    self.ctx.name
                )))
            }
            ActionRef::Group(_) if self.ctx.sel_handle.is_none() => {
                Err(PipeError::Invalid(format!(
                    "{} has no selector table",
                    self.ctx.name
                )))
            }
            _ => Ok(()),
        }
    }
}
