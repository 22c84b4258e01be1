// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Value-lookup tables map a key directly to a block of data, with no action
//! and no references into other tables.

use slog::{error, trace};

use common::profile::PipeId;
use common::table::TableHandle;
use dal::{
    DalHdl, DalOps, DataSpec, DevTarget, EntryHandle, EntryLoc, MatchSpec,
};

use crate::rollback;
use crate::table::{Entry, Table, TableState};
use crate::types::{PipeError, PipeResult, SessionHandle};
use crate::{OpCtx, PipeMgr};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueLookupEntry {
    pub handle: EntryHandle,
    pub pipe_id: PipeId,
    pub match_spec: MatchSpec,
    pub data: DataSpec,
    pub dal_hdl: DalHdl,
}

impl Entry for ValueLookupEntry {
    fn match_spec(&self) -> Option<&MatchSpec> {
        Some(&self.match_spec)
    }
}

type VlTable = Table<ValueLookupEntry>;
type VlState = TableState<ValueLookupEntry>;

fn add<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &VlTable,
    state: &mut VlState,
    match_spec: &MatchSpec,
    data: &DataSpec,
) -> PipeResult<EntryHandle> {
    if state.store.is_none() {
        let handle = state.passthru_handle()?;
        let (match_spec, data) = (match_spec.clone(), data.clone());
        op.dal.value_lookup_ent_add(
            op.tgt,
            &tbl.ctx,
            handle,
            &match_spec,
            &data,
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
    let handle = store.reserve()?;
    let mut entry = ValueLookupEntry {
        handle,
        pipe_id: op.tgt.pipe_id,
        match_spec: match_spec.clone(),
        data: data.clone(),
        dal_hdl: 0,
    };
    entry.dal_hdl = match op.dal.value_lookup_ent_add(
        op.tgt,
        &tbl.ctx,
        handle,
        &entry.match_spec,
        &entry.data,
    ) {
        Ok(dal_hdl) => dal_hdl,
        Err(e) => {
            error!(tbl.log, "backend add failed";
                "tgt" => %op.tgt, "handle" => handle, "error" => %e);
            store.release(handle);
            return Err(e.into());
        }
    };

    let loc = EntryLoc {
        ent_hdl: handle,
        dal_hdl: entry.dal_hdl,
    };
    if let Err(e) = store.insert(handle, op.replica, entry) {
        store.release(handle);
        let undo =
            op.dal
                .value_lookup_ent_del(op.tgt, &tbl.ctx, match_spec, Some(loc));
        return Err(rollback::unwind(&tbl.log, e, undo.map_err(Into::into)));
    }
    trace!(tbl.log, "entry added"; "tgt" => %op.tgt, "handle" => handle);
    Ok(handle)
}

fn del<D: DalOps>(
    op: &OpCtx<'_, D>,
    tbl: &VlTable,
    state: &mut VlState,
    handle: EntryHandle,
) -> PipeResult<()> {
    let entry = state.entry(handle)?;
    let tgt = op.target_pipe(entry.pipe_id);
    let loc = EntryLoc {
        ent_hdl: handle,
        dal_hdl: entry.dal_hdl,
    };
    if let Err(e) =
        op.dal
            .value_lookup_ent_del(tgt, &tbl.ctx, &entry.match_spec, Some(loc))
    {
        error!(tbl.log, "backend delete failed";
            "tgt" => %tgt, "handle" => handle, "error" => %e);
        return Err(e.into());
    }
    state.store_mut()?.remove(handle);
    trace!(tbl.log, "entry deleted"; "tgt" => %tgt, "handle" => handle);
    Ok(())
}

impl<D: DalOps> PipeMgr<D> {
    pub fn value_lookup_ent_add(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        match_spec: &MatchSpec,
        data: &DataSpec,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.value_lookup(tbl_hdl)?;
            tbl.validate_match_spec(match_spec)?;
            let mut state = tbl.lock()?;
            let r = add(op, tbl, &mut state, match_spec, data);
            state.usage.record_insert(&r);
            r
        })
    }

    pub fn value_lookup_ent_del_by_match_spec(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        match_spec: &MatchSpec,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.value_lookup(tbl_hdl)?;
            tbl.validate_match_spec(match_spec)?;
            let mut state = tbl.lock()?;
            let r = if state.store.is_none() {
                let match_spec = match_spec.clone();
                op.dal
                    .value_lookup_ent_del(op.tgt, &tbl.ctx, &match_spec, None)
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

    pub fn value_lookup_ent_del(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.value_lookup(tbl_hdl)?;
            let mut state = tbl.lock()?;
            let r = del(op, tbl, &mut state, ent_hdl);
            state.usage.record_delete(&r);
            r
        })
    }

    pub fn value_lookup_ent_get(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> PipeResult<ValueLookupEntry> {
        self.api_call(sess, tgt, |op| {
            op.tables
                .value_lookup(tbl_hdl)?
                .lock()?
                .entry(ent_hdl)
                .cloned()
        })
    }

    pub fn value_lookup_get_first_handle(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables.value_lookup(tbl_hdl)?.lock()?.get_first_handle()
        })
    }

    pub fn value_lookup_get_next_n_handles(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
        n: usize,
    ) -> PipeResult<Vec<EntryHandle>> {
        self.api_call(sess, tgt, |op| {
            op.tables
                .value_lookup(tbl_hdl)?
                .lock()?
                .get_next_n_handles(ent_hdl, n)
        })
    }

    pub fn value_lookup_match_spec_to_ent_hdl(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        match_spec: &MatchSpec,
    ) -> PipeResult<EntryHandle> {
        self.api_call(sess, tgt, |op| {
            op.tables
                .value_lookup(tbl_hdl)?
                .lock()?
                .key_to_handle(op.replica, match_spec)
        })
    }
}
