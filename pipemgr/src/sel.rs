// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Selector tables.  A selector group is a set of action-data members over
//! which the device spreads traffic.  Every member of a group holds a
//! reference on its action-data entry, so membership changes lock the
//! selector table and then the action-data table, and adjust the counts in
//! the same critical section as the group itself.

use std::collections::BTreeSet;
use std::sync::MutexGuard;

use slog::{debug, error, trace};

use common::profile::PipeId;
use common::table::TableHandle;
use dal::{DalHdl, DalOps, DevTarget, EntryHandle, EntryLoc};

use crate::adt::AdtEntry;
use crate::refs::{RefTxn, Referenced};
use crate::rollback;
use crate::table::{Entry, Table, TableState};
use crate::types::{PipeError, PipeResult, SessionHandle};
use crate::{OpCtx, PipeMgr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelGroup {
    pub handle: EntryHandle,
    pub pipe_id: PipeId,
    pub grp_id: u32,
    pub max_grp_size: u32,
    /// Handles of the action-data members, in the order they were set
    pub members: Vec<EntryHandle>,
    /// Number of match-action entries pointing at this group
    pub ref_count: u32,
    pub dal_hdl: DalHdl,
}

impl Entry for SelGroup {
    fn alt_id(&self) -> Option<u32> {
        Some(self.grp_id)
    }
}

impl Referenced for SelGroup {
    fn pipe_id(&self) -> PipeId {
        self.pipe_id
    }

    fn ref_count(&self) -> u32 {
        self.ref_count
    }

    fn ref_count_mut(&mut self) -> &mut u32 {
        &mut self.ref_count
    }
}

impl SelGroup {
    fn loc(&self) -> EntryLoc {
        EntryLoc {
            ent_hdl: self.handle,
            dal_hdl: self.dal_hdl,
        }
    }
}

type SelTable = Table<SelGroup>;
type SelState = TableState<SelGroup>;

// Lock the action-data table holding this selector's members.  The selector
// table's own lock must already be held.
fn lock_members<'a, D>(
    op: &OpCtx<'a, D>,
    tbl: &SelTable,
) -> PipeResult<MutexGuard<'a, TableState<AdtEntry>>> {
    let tables = op.tables;
    match tbl.ctx.adt_handle {
        Some(hdl) => tables.adt(hdl)?.lock(),
        None => Err(PipeError::Invalid(format!(
            "{} has no action-data table",
            tbl.name()
        ))),
    }
}

fn add<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &SelTable,
    state: &mut SelState,
    grp_id: u32,
    max_grp_size: u32,
) -> PipeResult<EntryHandle> {
    if state.store.is_none() {
        let handle = state.passthru_handle()?;
        op.dal
            .sel_grp_add(op.tgt, &tbl.ctx, handle, grp_id, max_grp_size)?;
        return Ok(handle);
    }

    let store = state.store_mut()?;
    if let Some(existing) = store.id_to_handle(op.replica, grp_id) {
        return Err(PipeError::Exists(format!(
            "{}: group {grp_id} already present as entry {existing}",
            tbl.name()
        )));
    }
    let handle = store.reserve()?;
    let dal_hdl = match op.dal.sel_grp_add(
        op.tgt,
        &tbl.ctx,
        handle,
        grp_id,
        max_grp_size,
    ) {
        Ok(dal_hdl) => dal_hdl,
        Err(e) => {
            error!(tbl.log, "backend group add failed";
                "tgt" => %op.tgt, "grp_id" => grp_id, "error" => %e);
            store.release(handle);
            return Err(e.into());
        }
    };

    let group = SelGroup {
        handle,
        pipe_id: op.tgt.pipe_id,
        grp_id,
        max_grp_size,
        members: Vec::new(),
        ref_count: 0,
        dal_hdl,
    };
    let loc = group.loc();
    if let Err(e) = store.insert(handle, op.replica, group) {
        store.release(handle);
        let undo = op.dal.sel_grp_del(op.tgt, &tbl.ctx, grp_id, Some(loc));
        return Err(rollback::unwind(&tbl.log, e, undo.map_err(Into::into)));
    }
    trace!(tbl.log, "group added";
        "tgt" => %op.tgt, "handle" => handle, "grp_id" => grp_id);
    Ok(handle)
}

fn del<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &SelTable,
    state: &mut SelState,
    handle: EntryHandle,
) -> PipeResult<()> {
    let group = state.entry(handle)?;
    if group.ref_count > 0 {
        return Err(PipeError::InUse(format!(
            "{}: group {} is referenced {} times",
            tbl.name(),
            group.grp_id,
            group.ref_count
        )));
    }
    let (grp_id, loc) = (group.grp_id, group.loc());
    let members = group.members.clone();
    let tgt = op.target_pipe(group.pipe_id);

    let mut adt = match members.is_empty() {
        true => None,
        false => Some(lock_members(op, tbl)?),
    };
    let mut txn = adt
        .as_mut()
        .and_then(|g| g.store.as_mut())
        .map(|s| RefTxn::new(&tbl.log, s));
    if let Some(txn) = txn.as_mut() {
        for member in &members {
            txn.decrement(*member)?;
        }
    }

    if let Err(e) = op.dal.sel_grp_del(tgt, &tbl.ctx, grp_id, Some(loc)) {
        error!(tbl.log, "backend group delete failed";
            "tgt" => %tgt, "handle" => handle, "error" => %e);
        return Err(e.into());
    }
    if let Some(txn) = txn {
        txn.commit();
    }
    state.store_mut()?.remove(handle);
    trace!(tbl.log, "group deleted";
        "tgt" => %tgt, "handle" => handle, "members" => members.len());
    Ok(())
}

fn mbrs_set<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &SelTable,
    state: &mut SelState,
    handle: EntryHandle,
    members: &[EntryHandle],
) -> PipeResult<()> {
    let group = state.entry(handle)?;
    if members.len() > group.max_grp_size as usize {
        return Err(PipeError::Invalid(format!(
            "{}: {} members exceeds the group maximum of {}",
            tbl.name(),
            members.len(),
            group.max_grp_size
        )));
    }
    let new: BTreeSet<EntryHandle> = members.iter().copied().collect();
    if new.len() != members.len() {
        return Err(PipeError::Invalid(format!(
            "{}: duplicate members in group {}",
            tbl.name(),
            group.grp_id
        )));
    }
    let old: BTreeSet<EntryHandle> = group.members.iter().copied().collect();
    let (pipe_id, loc) = (group.pipe_id, group.loc());
    let tgt = op.target_pipe(pipe_id);

    let mut adt = match new.is_empty() && old.is_empty() {
        true => None,
        false => Some(lock_members(op, tbl)?),
    };
    let mut txn = match adt.as_mut().and_then(|g| g.store.as_mut()) {
        Some(store) => {
            for member in new.difference(&old) {
                match store.get(*member) {
                    Some(m) if m.pipe_id == pipe_id => {}
                    Some(m) => {
                        return Err(PipeError::Invalid(format!(
                            "member {} is on pipe {}, group {} is on pipe {}",
                            m.mbr_id, m.pipe_id, handle, pipe_id
                        )))
                    }
                    None => {
                        return Err(PipeError::Invalid(format!(
                            "{}: no action-data member {member}",
                            tbl.name()
                        )))
                    }
                }
            }
            Some(RefTxn::new(&tbl.log, store))
        }
        None => None,
    };
    if let Some(txn) = txn.as_mut() {
        for member in new.difference(&old) {
            txn.increment(*member)?;
        }
        for member in old.difference(&new) {
            txn.decrement(*member)?;
        }
    }

    if let Err(e) = op.dal.sel_grp_mbrs_set(tgt, &tbl.ctx, loc, members) {
        error!(tbl.log, "backend member update failed";
            "tgt" => %tgt, "handle" => handle, "error" => %e);
        return Err(e.into());
    }
    if let Some(txn) = txn {
        txn.commit();
    }
    state.entry_mut(handle)?.members = members.to_vec();
    debug!(tbl.log, "group members set";
        "tgt" => %tgt,
        "handle" => handle,
        "added" => new.difference(&old).count(),
        "removed" => old.difference(&new).count());
    Ok(())
}

impl<D: DalOps> PipeMgr<D> {
    /// Create an empty selector group, returning its handle
    pub fn sel_grp_add(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_id: u32,
        max_grp_size: u32,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.sel(tbl_hdl)?;
            if max_grp_size == 0 {
                return Err(PipeError::Invalid(format!(
                    "{}: maximum group size must be non-zero",
                    tbl.name()
                )));
            }
            let mut state = tbl.lock()?;
            let r = add(op, tbl, &mut state, grp_id, max_grp_size);
            state.usage.record_insert(&r);
            r
        })
    }

    /// Delete a group, dropping its references on its members.  Fails with
    /// `InUse` while a match-action entry points at the group.
    pub fn sel_grp_del(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.sel(tbl_hdl)?;
            let mut state = tbl.lock()?;
            let r = del(op, tbl, &mut state, grp_hdl);
            state.usage.record_delete(&r);
            r
        })
    }

    pub fn sel_grp_del_by_grp_id(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_id: u32,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.sel(tbl_hdl)?;
            let mut state = tbl.lock()?;
            let r = if state.store.is_none() {
                op.dal
                    .sel_grp_del(op.tgt, &tbl.ctx, grp_id, None)
                    .map_err(PipeError::from)
            } else {
                state
                    .id_to_handle(op.replica, grp_id)
                    .and_then(|handle| del(op, tbl, &mut state, handle))
            };
            state.usage.record_delete(&r);
            r
        })
    }

    /// Replace the membership of a group.  Either every reference count and
    /// the group change together, or nothing changes.
    pub fn sel_grp_mbrs_set(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
        members: &[EntryHandle],
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.sel(tbl_hdl)?;
            let mut state = tbl.lock()?;
            let r = mbrs_set(op, tbl, &mut state, grp_hdl, members);
            state.usage.record_update(&r);
            r
        })
    }

    /// Up to `max` member handles of a group
    pub fn sel_grp_mbrs_get(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
        max: usize,
    ) -> PipeResult<Vec<EntryHandle>> {
        self.api_call(sess, tgt, |op| {
            let state = op.tables.sel(tbl_hdl)?.lock()?;
            let group = state.entry(grp_hdl)?;
            Ok(group.members.iter().take(max).copied().collect())
        })
    }

    pub fn sel_grp_mbr_count(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
    ) -> PipeResult<usize> {
        self.api_call(sess, tgt, |op| {
            let state = op.tables.sel(tbl_hdl)?.lock()?;
            Ok(state.entry(grp_hdl)?.members.len())
        })
    }

    /// The first member of a group, if it has any
    pub fn sel_grp_get_first_member(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
    ) -> PipeResult<Option<EntryHandle>> {
        self.api_call(sess, tgt, |op| {
            let state = op.tables.sel(tbl_hdl)?.lock()?;
            Ok(state.entry(grp_hdl)?.members.first().copied())
        })
    }

    pub fn sel_grp_get(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
    ) -> PipeResult<SelGroup> {
        self.api_call(sess, tgt, |op| {
            op.tables.sel(tbl_hdl)?.lock()?.entry(grp_hdl).cloned()
        })
    }

    pub fn sel_grp_get_first_handle(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables.sel(tbl_hdl)?.lock()?.get_first_handle()
        })
    }

    pub fn sel_grp_get_next_n_handles(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
        n: usize,
    ) -> PipeResult<Vec<EntryHandle>> {
        self.api_call(sess, tgt, |op| {
            op.tables.sel(tbl_hdl)?.lock()?.get_next_n_handles(grp_hdl, n)
        })
    }

    pub fn sel_grp_id_to_hdl(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        grp_id: u32,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables.sel(tbl_hdl)?.lock()?.id_to_handle(op.replica, grp_id)
        })
    }
}
