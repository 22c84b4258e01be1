// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Action-data tables: shared sets of action parameters, addressed by a
//! caller-assigned member id and referenced from selector groups and
//! match-action entries.

use slog::{error, trace};

use common::profile::PipeId;
use common::table::{ActionFnHandle, TableHandle};
use dal::{
    ActionRef, ActionSpec, DalHdl, DalOps, DevTarget, EntryHandle, EntryLoc,
};

use crate::refs::Referenced;
use crate::rollback;
use crate::table::{Entry, Table, TableState};
use crate::types::{PipeError, PipeResult, SessionHandle};
use crate::{OpCtx, PipeMgr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtEntry {
    pub handle: EntryHandle,
    pub pipe_id: PipeId,
    pub mbr_id: u32,
    pub act_fn_hdl: ActionFnHandle,
    pub action_spec: ActionSpec,
    /// Number of selector groups and match-action entries pointing here
    pub ref_count: u32,
    pub dal_hdl: DalHdl,
}

impl Entry for AdtEntry {
    fn alt_id(&self) -> Option<u32> {
        Some(self.mbr_id)
    }
}

impl Referenced for AdtEntry {
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

type AdtTable = Table<AdtEntry>;
type AdtState = TableState<AdtEntry>;

fn add<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &AdtTable,
    state: &mut AdtState,
    mbr_id: u32,
    act_fn_hdl: ActionFnHandle,
    action_spec: &ActionSpec,
) -> PipeResult<EntryHandle> {
    let action_spec = action_spec.clone();
    if state.store.is_none() {
        let handle = state.passthru_handle()?;
        op.dal.adt_ent_add(
            op.tgt,
            &tbl.ctx,
            handle,
            mbr_id,
            act_fn_hdl,
            &action_spec,
        )?;
        return Ok(handle);
    }

    let store = state.store_mut()?;
    if let Some(existing) = store.id_to_handle(op.replica, mbr_id) {
        return Err(PipeError::Exists(format!(
            "{}: member {mbr_id} already present as entry {existing}",
            tbl.name()
        )));
    }
    let handle = store.reserve()?;
    let dal_hdl = match op.dal.adt_ent_add(
        op.tgt,
        &tbl.ctx,
        handle,
        mbr_id,
        act_fn_hdl,
        &action_spec,
    ) {
        Ok(dal_hdl) => dal_hdl,
        Err(e) => {
            error!(tbl.log, "backend add failed";
                "tgt" => %op.tgt, "mbr_id" => mbr_id, "error" => %e);
            store.release(handle);
            return Err(e.into());
        }
    };

    let entry = AdtEntry {
        handle,
        pipe_id: op.tgt.pipe_id,
        mbr_id,
        act_fn_hdl,
        action_spec,
        ref_count: 0,
        dal_hdl,
    };
    if let Err(e) = store.insert(handle, op.replica, entry) {
        store.release(handle);
        let loc = EntryLoc {
            ent_hdl: handle,
            dal_hdl,
        };
        let undo = op.dal.adt_ent_del(op.tgt, &tbl.ctx, mbr_id, Some(loc));
        return Err(rollback::unwind(&tbl.log, e, undo.map_err(Into::into)));
    }
    trace!(tbl.log, "member added";
        "tgt" => %op.tgt, "handle" => handle, "mbr_id" => mbr_id);
    Ok(handle)
}

fn del<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &AdtTable,
    state: &mut AdtState,
    handle: EntryHandle,
) -> PipeResult<()> {
    let entry = state.entry(handle)?;
    if entry.ref_count > 0 {
        return Err(PipeError::InUse(format!(
            "{}: member {} is referenced {} times",
            tbl.name(),
            entry.mbr_id,
            entry.ref_count
        )));
    }
    let tgt = op.target_pipe(entry.pipe_id);
    let loc = EntryLoc {
        ent_hdl: handle,
        dal_hdl: entry.dal_hdl,
    };
    if let Err(e) = op.dal.adt_ent_del(tgt, &tbl.ctx, entry.mbr_id, Some(loc)) {
        error!(tbl.log, "backend delete failed";
            "tgt" => %tgt, "handle" => handle, "error" => %e);
        return Err(e.into());
    }
    state.store_mut()?.remove(handle);
    trace!(tbl.log, "member deleted"; "tgt" => %tgt, "handle" => handle);
    Ok(())
}

impl<D: DalOps> PipeMgr<D> {
    /// Add a member to an action-data table, returning its handle.  Member ids
    /// are unique within a pipe.
    pub fn adt_ent_add(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        mbr_id: u32,
        act_fn_hdl: ActionFnHandle,
        action_spec: &ActionSpec,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.adt(tbl_hdl)?;
            tbl.validate_action(act_fn_hdl, action_spec)?;
            if action_spec.action_ref != ActionRef::Direct {
                return Err(PipeError::Invalid(format!(
                    "{}: action-data members must carry their own data",
                    tbl.name()
                )));
            }
            let mut state = tbl.lock()?;
            let r = add(op, tbl, &mut state, mbr_id, act_fn_hdl, action_spec);
            state.usage.record_insert(&r);
            r
        })
    }

    /// Remove a member.  Fails with `InUse` while anything references it.
    pub fn adt_ent_del(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.adt(tbl_hdl)?;
            let mut state = tbl.lock()?;
            let r = del(op, tbl, &mut state, ent_hdl);
            state.usage.record_delete(&r);
            r
        })
    }

    /// Remove a member by its id
    pub fn adt_ent_del_by_mbr_id(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        mbr_id: u32,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.adt(tbl_hdl)?;
            let mut state = tbl.lock()?;
            let r = if state.store.is_none() {
                op.dal
                    .adt_ent_del(op.tgt, &tbl.ctx, mbr_id, None)
                    .map_err(PipeError::from)
            } else {
                state
                    .id_to_handle(op.replica, mbr_id)
                    .and_then(|handle| del(op, tbl, &mut state, handle))
            };
            state.usage.record_delete(&r);
            r
        })
    }

    pub fn adt_ent_get(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> PipeResult<AdtEntry> {
        self.api_call(sess, tgt, |op| {
            op.tables.adt(tbl_hdl)?.lock()?.entry(ent_hdl).cloned()
        })
    }

    pub fn adt_ent_get_first_handle(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables.adt(tbl_hdl)?.lock()?.get_first_handle()
        })
    }

    pub fn adt_ent_get_next_n_handles(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
        n: usize,
    ) -> PipeResult<Vec<EntryHandle>> {
        self.api_call(sess, tgt, |op| {
            op.tables.adt(tbl_hdl)?.lock()?.get_next_n_handles(ent_hdl, n)
        })
    }

    pub fn adt_mbr_id_to_ent_hdl(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        mbr_id: u32,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables.adt(tbl_hdl)?.lock()?.id_to_handle(op.replica, mbr_id)
        })
    }
}
