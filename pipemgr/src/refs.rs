// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Reference counting between tables.
//!
//! Action-data members are counted by the selector groups and match-action
//! entries that point at them, and selector groups by the match-action entries
//! that point at them.  A referenced object can't be deleted.
//!
//! Whenever two tables are locked together they are locked in the order
//! match-action, selector, action-data.  Every reference change is made
//! through a [`RefTxn`], which undoes the changes it has made unless it is
//! committed, so an operation that fails after adjusting some counts leaves
//! all of them as they were.

use std::sync::MutexGuard;

use slog::{trace, Logger};

use common::profile::PipeId;
use common::table::TableContext;
use dal::{ActionRef, EntryHandle};

use crate::adt::AdtEntry;
use crate::registry::PipelineTables;
use crate::sel::SelGroup;
use crate::table::{Entry, EntryStore, TableState};
use crate::types::{PipeError, PipeResult};

/// An entry that other entries may point at
pub trait Referenced {
    /// The pipe the entry was added on
    fn pipe_id(&self) -> PipeId;
    fn ref_count(&self) -> u32;
    fn ref_count_mut(&mut self) -> &mut u32;
}

#[derive(Debug, Clone, Copy)]
enum Delta {
    Inc,
    Dec,
}

/// A set of reference count changes against a single table
pub struct RefTxn<'a, E: Entry + Referenced> {
    log: &'a Logger,
    store: &'a mut EntryStore<E>,
    applied: Vec<(EntryHandle, Delta)>,
    committed: bool,
}

impl<'a, E: Entry + Referenced> RefTxn<'a, E> {
    pub fn new(log: &'a Logger, store: &'a mut EntryStore<E>) -> Self {
        RefTxn {
            log,
            store,
            applied: Vec::new(),
            committed: false,
        }
    }

    /// Take a reference on `handle`, which must name a live entry
    pub fn increment(&mut self, handle: EntryHandle) -> PipeResult<()> {
        let entry = self.store.get_mut(handle).ok_or_else(|| {
            PipeError::Missing(format!("referenced entry {handle} not found"))
        })?;
        let count = entry.ref_count_mut();
        *count = count.checked_add(1).ok_or_else(|| {
            PipeError::Unexpected(format!("reference overflow on {handle}"))
        })?;
        self.applied.push((handle, Delta::Inc));
        Ok(())
    }

    /// Fail unless a live `handle` belongs to `pipe_id`.  A missing handle is
    /// left for [`RefTxn::increment`] to report.
    pub fn check_pipe(
        &self,
        handle: EntryHandle,
        pipe_id: PipeId,
    ) -> PipeResult<()> {
        match self.store.get(handle) {
            Some(entry) if entry.pipe_id() != pipe_id => {
                Err(PipeError::Invalid(format!(
                    "entry {handle} is on pipe {}, not pipe {pipe_id}",
                    entry.pipe_id()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Drop a reference on `handle`.  The caller holds a reference, so the
    /// entry missing or having no references is an internal error.
    pub fn decrement(&mut self, handle: EntryHandle) -> PipeResult<()> {
        let entry = self.store.get_mut(handle).ok_or_else(|| {
            PipeError::Unexpected(format!(
                "referenced entry {handle} vanished"
            ))
        })?;
        let count = entry.ref_count_mut();
        *count = count.checked_sub(1).ok_or_else(|| {
            PipeError::Unexpected(format!("reference underflow on {handle}"))
        })?;
        self.applied.push((handle, Delta::Dec));
        Ok(())
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl<E: Entry + Referenced> Drop for RefTxn<'_, E> {
    fn drop(&mut self) {
        if self.committed || self.applied.is_empty() {
            return;
        }
        trace!(self.log, "reverting reference changes";
            "count" => self.applied.len());
        while let Some((handle, delta)) = self.applied.pop() {
            // Every handle was live when its change was applied, and the
            // table has been locked ever since.
            if let Some(entry) = self.store.get_mut(handle) {
                let count = entry.ref_count_mut();
                match delta {
                    Delta::Inc => *count -= 1,
                    Delta::Dec => *count += 1,
                }
            }
        }
    }
}

/// The referenced tables an operation on a match-action entry has locked
pub(crate) struct RefLocks<'a> {
    log: &'a Logger,
    sel: Option<MutexGuard<'a, TableState<SelGroup>>>,
    adt: Option<MutexGuard<'a, TableState<AdtEntry>>>,
}

impl<'a> RefLocks<'a> {
    /// Lock every table named by `refs`, selector before action-data.  The
    /// caller already holds the lock of the referencing table.
    pub fn acquire(
        log: &'a Logger,
        tables: &'a PipelineTables,
        ctx: &TableContext,
        refs: &[ActionRef],
    ) -> PipeResult<Self> {
        let need_sel = refs.iter().any(|r| matches!(r, ActionRef::Group(_)));
        let need_adt = refs.iter().any(|r| matches!(r, ActionRef::Member(_)));

        let sel = match (need_sel, ctx.sel_handle) {
            (false, _) => None,
            (true, Some(hdl)) => Some(tables.sel(hdl)?.lock()?),
            (true, None) => {
                return Err(PipeError::Invalid(format!(
                    "{} has no selector table",
                    ctx.name
                )))
            }
        };
        let adt = match (need_adt, ctx.adt_handle) {
            (false, _) => None,
            (true, Some(hdl)) => Some(tables.adt(hdl)?.lock()?),
            (true, None) => {
                return Err(PipeError::Invalid(format!(
                    "{} has no action-data table",
                    ctx.name
                )))
            }
        };
        Ok(RefLocks { log, sel, adt })
    }

    /// Start a set of changes.  References into tables that keep no entries
    /// aren't tracked.
    pub fn update(&mut self) -> RefUpdate<'_> {
        let log = self.log;
        RefUpdate {
            sel: self
                .sel
                .as_mut()
                .and_then(|g| g.store.as_mut())
                .map(|s| RefTxn::new(log, s)),
            adt: self
                .adt
                .as_mut()
                .and_then(|g| g.store.as_mut())
                .map(|s| RefTxn::new(log, s)),
        }
    }
}

/// Reference changes spanning the selector and action-data tables
pub(crate) struct RefUpdate<'a> {
    sel: Option<RefTxn<'a, SelGroup>>,
    adt: Option<RefTxn<'a, AdtEntry>>,
}

impl RefUpdate<'_> {
    /// Take a reference on behalf of an entry on `pipe_id`.  The target
    /// must live on the same pipe.
    pub fn add(&mut self, r: ActionRef, pipe_id: PipeId) -> PipeResult<()> {
        match (r, &mut self.sel, &mut self.adt) {
            (ActionRef::Group(h), Some(txn), _) => {
                txn.check_pipe(h, pipe_id)?;
                txn.increment(h)
            }
            (ActionRef::Member(h), _, Some(txn)) => {
                txn.check_pipe(h, pipe_id)?;
                txn.increment(h)
            }
            _ => Ok(()),
        }
    }

    pub fn release(&mut self, r: ActionRef) -> PipeResult<()> {
        match (r, &mut self.sel, &mut self.adt) {
            (ActionRef::Group(h), Some(txn), _) => txn.decrement(h),
            (ActionRef::Member(h), _, Some(txn)) => txn.decrement(h),
            _ => Ok(()),
        }
    }

    pub fn commit(self) {
        if let Some(txn) = self.sel {
            txn.commit();
        }
        if let Some(txn) = self.adt {
            txn.commit();
        }
    }
}
