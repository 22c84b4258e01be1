// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Match-action table entries.

use slog::{error, trace};

use common::profile::PipeId;
use common::table::{ActionFnHandle, TableHandle};
use dal::{
    ActionSpec, DalHdl, DalOps, DevTarget, EntryHandle, EntryLoc, MatchSpec,
};

use crate::refs::RefLocks;
use crate::rollback;
use crate::table::{Entry, Table, TableState};
use crate::types::{PipeError, PipeResult, SessionHandle};
use crate::{OpCtx, PipeMgr};

/// A match-action entry, holding its own copies of the caller's key and
/// action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatEntry {
    pub handle: EntryHandle,
    pub pipe_id: PipeId,
    pub act_fn_hdl: ActionFnHandle,
    pub match_spec: MatchSpec,
    pub action_spec: ActionSpec,
    pub dal_hdl: DalHdl,
}

impl Entry for MatEntry {
    fn match_spec(&self) -> Option<&MatchSpec> {
        Some(&self.match_spec)
    }
}

impl MatEntry {
    fn loc(&self) -> EntryLoc {
        EntryLoc {
            ent_hdl: self.handle,
            dal_hdl: self.dal_hdl,
        }
    }
}

type MatTable = Table<MatEntry>;
type MatState = TableState<MatEntry>;

fn add<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &MatTable,
    state: &mut MatState,
    match_spec: &MatchSpec,
    act_fn_hdl: ActionFnHandle,
    action_spec: &ActionSpec,
) -> PipeResult<EntryHandle> {
    if state.store.is_none() {
        let handle = state.passthru_handle()?;
        let (match_spec, action_spec) = (match_spec.clone(), action_spec.clone());
        op.dal.mat_ent_add(
            op.tgt,
            &tbl.ctx,
            handle,
            &match_spec,
            act_fn_hdl,
            &action_spec,
        )?;
        return Ok(handle);
    }

    let store = state.store_mut()?;
    if let Some(existing) = store.key_to_handle(op.replica, match_spec) {
        return Err(PipeError::Exists(format!(
            "{}: key already present as entry {existing}",
            tbl.name()
        )));
    }

    let mut refs =
        RefLocks::acquire(&tbl.log, op.tables, &tbl.ctx, &[action_spec.action_ref])?;
    let mut update = refs.update();
    update.add(action_spec.action_ref, op.tgt.pipe_id)?;

    let handle = store.reserve()?;
    let mut entry = MatEntry {
        handle,
        pipe_id: op.tgt.pipe_id,
        act_fn_hdl,
        match_spec: match_spec.clone(),
        action_spec: action_spec.clone(),
        dal_hdl: 0,
    };
    entry.dal_hdl = match op.dal.mat_ent_add(
        op.tgt,
        &tbl.ctx,
        handle,
        &entry.match_spec,
        act_fn_hdl,
        &entry.action_spec,
    ) {
        Ok(dal_hdl) => dal_hdl,
        Err(e) => {
            error!(tbl.log, "backend add failed";
                "tgt" => %op.tgt, "handle" => handle, "error" => %e);
            store.release(handle);
            return Err(e.into());
        }
    };

    let loc = entry.loc();
    if let Err(e) = store.insert(handle, op.replica, entry) {
        store.release(handle);
        let undo = op.dal.mat_ent_del(op.tgt, &tbl.ctx, match_spec, Some(loc));
        return Err(rollback::unwind(&tbl.log, e, undo.map_err(Into::into)));
    }
    update.commit();
    trace!(tbl.log, "entry added"; "tgt" => %op.tgt, "handle" => handle);
    Ok(handle)
}

fn del<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &MatTable,
    state: &mut MatState,
    handle: EntryHandle,
) -> PipeResult<()> {
    let entry = state.entry(handle)?;
    let action_ref = entry.action_spec.action_ref;
    let tgt = op.target_pipe(entry.pipe_id);

    let mut refs =
        RefLocks::acquire(&tbl.log, op.tables, &tbl.ctx, &[action_ref])?;
    let mut update = refs.update();
    update.release(action_ref)?;

    if let Err(e) =
        op.dal
            .mat_ent_del(tgt, &tbl.ctx, &entry.match_spec, Some(entry.loc()))
    {
        error!(tbl.log, "backend delete failed";
            "tgt" => %tgt, "handle" => handle, "error" => %e);
        return Err(e.into());
    }
    update.commit();
    state.store_mut()?.remove(handle);
    trace!(tbl.log, "entry deleted"; "tgt" => %tgt, "handle" => handle);
    Ok(())
}

fn set_action<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &MatTable,
    state: &mut MatState,
    handle: EntryHandle,
    act_fn_hdl: ActionFnHandle,
    action_spec: &ActionSpec,
) -> PipeResult<()> {
    let entry = state.entry(handle)?;
    let old_ref = entry.action_spec.action_ref;
    let new_ref = action_spec.action_ref;
    let tgt = op.target_pipe(entry.pipe_id);

    let mut refs =
        RefLocks::acquire(&tbl.log, op.tables, &tbl.ctx, &[old_ref, new_ref])?;
    let mut update = refs.update();
    update.add(new_ref, entry.pipe_id)?;
    update.release(old_ref)?;

    let action_spec = action_spec.clone();
    if let Err(e) = op.dal.mat_ent_set_action(
        tgt,
        &tbl.ctx,
        entry.loc(),
        act_fn_hdl,
        &action_spec,
    ) {
        error!(tbl.log, "backend action update failed";
            "tgt" => %tgt, "handle" => handle, "error" => %e);
        return Err(e.into());
    }
    update.commit();

    let entry = state.entry_mut(handle)?;
    entry.act_fn_hdl = act_fn_hdl;
    entry.action_spec = action_spec;
    Ok(())
}

impl<D: DalOps> PipeMgr<D> {
    /// Add an entry to a match-action table, returning its handle.
    pub fn mat_ent_add(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        match_spec: &MatchSpec,
        act_fn_hdl: ActionFnHandle,
        action_spec: &ActionSpec,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.mat(tbl_hdl)?;
            tbl.validate_match_spec(match_spec)?;
            tbl.validate_action(act_fn_hdl, action_spec)?;
            let mut state = tbl.lock()?;
            let r = add(op, tbl, &mut state, match_spec, act_fn_hdl, action_spec);
            state.usage.record_insert(&r);
            r
        })
    }

    /// Remove the entry with the given key
    pub fn mat_ent_del_by_match_spec(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        match_spec: &MatchSpec,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.mat(tbl_hdl)?;
            tbl.validate_match_spec(match_spec)?;
            let mut state = tbl.lock()?;
            let r = if state.store.is_none() {
                let match_spec = match_spec.clone();
                op.dal
                    .mat_ent_del(op.tgt, &tbl.ctx, &match_spec, None)
                    .map_err(PipeError::from)
            } else {
                state
                    .key_to_handle(op.replica, match_spec)
                    .and_then(|handle| del(op, tbl, &mut state, handle))
            };
            state.usage.record_delete(&r);
            r
        })
    }

    /// Remove the entry with the given handle
    pub fn mat_ent_del(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.mat(tbl_hdl)?;
            let mut state = tbl.lock()?;
            let r = del(op, tbl, &mut state, ent_hdl);
            state.usage.record_delete(&r);
            r
        })
    }

    /// Replace the action of an existing entry.  References held by the old
    /// action are released, and those of the new action taken, atomically.
    pub fn mat_ent_set_action(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
        act_fn_hdl: ActionFnHandle,
        action_spec: &ActionSpec,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.mat(tbl_hdl)?;
            tbl.validate_action(act_fn_hdl, action_spec)?;
            let mut state = tbl.lock()?;
            let r = set_action(
                op,
                tbl,
                &mut state,
                ent_hdl,
                act_fn_hdl,
                action_spec,
            );
            state.usage.record_update(&r);
            r
        })
    }

    pub fn mat_ent_get(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> PipeResult<MatEntry> {
        self.api_call(sess, tgt, |op| {
            op.tables.mat(tbl_hdl)?.lock()?.entry(ent_hdl).cloned()
        })
    }

    pub fn mat_ent_get_first_handle(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables.mat(tbl_hdl)?.lock()?.get_first_handle()
        })
    }

    /// Up to `n` handles following `ent_hdl`, in handle order.  Fewer are
    /// returned at the end of the table.
    pub fn mat_ent_get_next_n_handles(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
        n: usize,
    ) -> PipeResult<Vec<EntryHandle>> {
        self.api_call(sess, tgt, |op| {
            op.tables.mat(tbl_hdl)?.lock()?.get_next_n_handles(ent_hdl, n)
        })
    }

    pub fn mat_match_spec_to_ent_hdl(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        match_spec: &MatchSpec,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables
                .mat(tbl_hdl)?
                .lock()?
                .key_to_handle(op.replica, match_spec)
        })
    }
}
