// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A backend with no device behind it.  Every call succeeds.

use slog::{o, trace, Logger};

use common::profile::{DevFamily, DevId};
use common::table::{ActionFnHandle, TableContext};
use dal::{
    ActionSpec, DalHdl, DalOps, DalResult, DataSpec, DevTarget, EntryHandle,
    EntryLoc, MatchSpec, MirrorSessionSpec, StatData,
};

use crate::TokenSource;

pub struct StubDal {
    log: Logger,
    tokens: TokenSource,
}

impl StubDal {
    pub fn new(log: &Logger) -> Self {
        StubDal {
            log: log.new(o!("unit" => "stub_dal")),
            tokens: TokenSource::default(),
        }
    }
}

impl DalOps for StubDal {
    fn device_add(&self, dev_id: DevId, family: DevFamily) -> DalResult<()> {
        trace!(self.log, "device add"; "dev_id" => dev_id, "family" => %family);
        Ok(())
    }

    fn device_remove(&self, dev_id: DevId) -> DalResult<()> {
        trace!(self.log, "device remove"; "dev_id" => dev_id);
        Ok(())
    }

    fn mat_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        _match_spec: &MatchSpec,
        _act_fn_hdl: ActionFnHandle,
        _action_spec: &ActionSpec,
    ) -> DalResult<DalHdl> {
        trace!(self.log, "mat add";
            "tgt" => %tgt, "table" => &tbl.name, "ent_hdl" => ent_hdl);
        Ok(self.tokens.next())
    }

    fn mat_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        _match_spec: &MatchSpec,
        _loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        trace!(self.log, "mat del"; "tgt" => %tgt, "table" => &tbl.name);
        Ok(())
    }

    fn mat_ent_set_action(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        loc: EntryLoc,
        _act_fn_hdl: ActionFnHandle,
        _action_spec: &ActionSpec,
    ) -> DalResult<()> {
        trace!(self.log, "mat set action";
            "tgt" => %tgt, "table" => &tbl.name, "ent_hdl" => loc.ent_hdl);
        Ok(())
    }

    fn adt_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        mbr_id: u32,
        _act_fn_hdl: ActionFnHandle,
        _action_spec: &ActionSpec,
    ) -> DalResult<DalHdl> {
        trace!(self.log, "adt add"; "tgt" => %tgt, "table" => &tbl.name,
            "ent_hdl" => ent_hdl, "mbr_id" => mbr_id);
        Ok(self.tokens.next())
    }

    fn adt_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        mbr_id: u32,
        _loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        trace!(self.log, "adt del";
            "tgt" => %tgt, "table" => &tbl.name, "mbr_id" => mbr_id);
        Ok(())
    }

    fn sel_grp_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        grp_hdl: EntryHandle,
        grp_id: u32,
        max_grp_size: u32,
    ) -> DalResult<DalHdl> {
        trace!(self.log, "sel grp add"; "tgt" => %tgt, "table" => &tbl.name,
            "grp_hdl" => grp_hdl, "grp_id" => grp_id, "max" => max_grp_size);
        Ok(self.tokens.next())
    }

    fn sel_grp_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        grp_id: u32,
        _loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        trace!(self.log, "sel grp del";
            "tgt" => %tgt, "table" => &tbl.name, "grp_id" => grp_id);
        Ok(())
    }

    fn sel_grp_mbrs_set(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        loc: EntryLoc,
        members: &[EntryHandle],
    ) -> DalResult<()> {
        trace!(self.log, "sel grp mbrs set"; "tgt" => %tgt,
            "table" => &tbl.name, "grp_hdl" => loc.ent_hdl,
            "members" => members.len());
        Ok(())
    }

    fn value_lookup_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        _match_spec: &MatchSpec,
        _data: &DataSpec,
    ) -> DalResult<DalHdl> {
        trace!(self.log, "value lookup add";
            "tgt" => %tgt, "table" => &tbl.name, "ent_hdl" => ent_hdl);
        Ok(self.tokens.next())
    }

    fn value_lookup_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        _match_spec: &MatchSpec,
        _loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        trace!(self.log, "value lookup del";
            "tgt" => %tgt, "table" => &tbl.name);
        Ok(())
    }

    fn stat_ent_query(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
    ) -> DalResult<StatData> {
        trace!(self.log, "stat query";
            "tgt" => %tgt, "table" => &tbl.name, "index" => index);
        Ok(StatData::default())
    }

    fn stful_ent_query(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
    ) -> DalResult<u64> {
        trace!(self.log, "stful query";
            "tgt" => %tgt, "table" => &tbl.name, "index" => index);
        Ok(0)
    }

    fn stful_ent_set(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
        value: u64,
    ) -> DalResult<()> {
        trace!(self.log, "stful set"; "tgt" => %tgt, "table" => &tbl.name,
            "index" => index, "value" => value);
        Ok(())
    }

    fn mirror_session_set(
        &self,
        tgt: DevTarget,
        session_id: u32,
        spec: &MirrorSessionSpec,
    ) -> DalResult<()> {
        trace!(self.log, "mirror session set"; "tgt" => %tgt,
            "session_id" => session_id, "port_id" => spec.port_id);
        Ok(())
    }
}
