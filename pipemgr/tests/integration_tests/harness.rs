// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Fixtures shared by the integration tests: a small pipeline program, device
//! profiles built from it, and a mock backend.

use slog::Logger;

use backend::chaos::{ChaosDal, DalConfig};
use backend::stub::StubDal;
use common::logging::{self, LogFormat};
use common::profile::{DevFamily, DevId, DeviceProfile, PipeId, PipelineProfile};
use common::table::{
    ActionFnHandle, ActionInfo, KeyField, MatchType, PipelineContext,
    TableContext, TableHandle, TableKind,
};
use dal::{
    ActionSpec, DalHdl, DalOps, DalResult, DataSpec, DevTarget, EntryHandle,
    EntryLoc, MatchSpec, MirrorSessionSpec, StatData,
};
use pipemgr::{Config, PipeMgr, SessionHandle};

pub const DEV: DevId = 0;

/// Exact match, one byte of key, duplicate checking on
pub const MAT_EXACT: TableHandle = 0x01;
/// Ternary match, two bytes of key
pub const MAT_TERNARY: TableHandle = 0x02;
/// Exact match with indirect actions through ADT and SEL
pub const MAT_INDIRECT: TableHandle = 0x03;
/// Exact match with no run-time entry state
pub const MAT_PASSTHRU: TableHandle = 0x04;
/// Exact match with duplicate checking off
pub const MAT_NODUP: TableHandle = 0x05;
/// Exact match with room for four entries
pub const MAT_SMALL: TableHandle = 0x06;
pub const ADT: TableHandle = 0x10;
pub const SEL: TableHandle = 0x20;
pub const SEL_PASSTHRU: TableHandle = 0x21;
pub const VALUE_LOOKUP: TableHandle = 0x30;
/// Sixteen counter cells
pub const COUNTER: TableHandle = 0x40;
/// Eight register cells
pub const REGISTER: TableHandle = 0x41;

pub const ACT_FORWARD: ActionFnHandle = 0x100;
pub const ACT_DROP: ActionFnHandle = 0x101;

pub fn test_log() -> Logger {
    logging::init("pipemgr-test", &None, LogFormat::Human).unwrap()
}

pub fn tgt(pipe_id: PipeId) -> DevTarget {
    DevTarget::new(DEV, pipe_id)
}

fn key(name: &str, bit_width: u32, match_type: MatchType) -> KeyField {
    KeyField {
        name: name.to_string(),
        start_bit: 0,
        bit_width,
        position: 0,
        match_type,
        is_valid: false,
    }
}

fn action(name: &str, handle: ActionFnHandle) -> ActionInfo {
    ActionInfo {
        name: name.to_string(),
        handle,
        allowed_as_hit_action: true,
        allowed_as_default_action: true,
        parameters: Vec::new(),
    }
}

fn table(handle: TableHandle, name: &str, kind: TableKind) -> TableContext {
    TableContext {
        handle,
        name: name.to_string(),
        kind,
        match_type: MatchType::Exact,
        size: None,
        key_fields: Vec::new(),
        actions: vec![action("forward", ACT_FORWARD), action("drop", ACT_DROP)],
        store_entries: true,
        duplicate_entry_check: None,
        adt_handle: None,
        sel_handle: None,
    }
}

fn exact_mat(handle: TableHandle, name: &str) -> TableContext {
    TableContext {
        key_fields: vec![key("dst", 8, MatchType::Exact)],
        ..table(handle, name, TableKind::MatchAction)
    }
}

/// The pipeline program used by most tests
pub fn pipeline_context() -> PipelineContext {
    let mut ternary = table(MAT_TERNARY, "acl", TableKind::MatchAction);
    ternary.match_type = MatchType::Ternary;
    ternary.key_fields = vec![
        key("src", 8, MatchType::Ternary),
        key("dst", 8, MatchType::Ternary),
    ];

    let mut indirect = exact_mat(MAT_INDIRECT, "ecmp");
    indirect.adt_handle = Some(ADT);
    indirect.sel_handle = Some(SEL);

    let mut passthru = exact_mat(MAT_PASSTHRU, "counters");
    passthru.store_entries = false;

    let mut nodup = exact_mat(MAT_NODUP, "nodup");
    nodup.duplicate_entry_check = Some(false);

    let mut small = exact_mat(MAT_SMALL, "small");
    small.size = Some(4);

    let mut sel = table(SEL, "ecmp_sel", TableKind::Selector);
    sel.adt_handle = Some(ADT);
    sel.actions.clear();

    let mut sel_passthru = table(SEL_PASSTHRU, "lag_sel", TableKind::Selector);
    sel_passthru.adt_handle = Some(ADT);
    sel_passthru.store_entries = false;
    sel_passthru.actions.clear();

    let mut vl = table(VALUE_LOOKUP, "port_map", TableKind::ValueLookup);
    vl.key_fields = vec![key("port", 16, MatchType::Exact)];
    vl.actions.clear();

    let mut counter = table(COUNTER, "port_stats", TableKind::Counter);
    counter.size = Some(16);
    counter.actions.clear();

    let mut register = table(REGISTER, "flow_state", TableKind::Register);
    register.size = Some(8);
    register.actions.clear();

    PipelineContext {
        tables: vec![
            exact_mat(MAT_EXACT, "route"),
            ternary,
            indirect,
            passthru,
            nodup,
            small,
            table(ADT, "ecmp_adt", TableKind::ActionData),
            sel,
            sel_passthru,
            vl,
            counter,
            register,
        ],
    }
}

/// A device with one profile loaded on every listed pipe
pub fn device_profile(pipes: &[PipeId]) -> DeviceProfile {
    DeviceProfile {
        family: DevFamily::Software,
        pipelines: vec![PipelineProfile {
            name: "sidecar".to_string(),
            program: "sidecar".to_string(),
            pipes: pipes.to_vec(),
            context: pipeline_context(),
        }],
    }
}

/// Build a manager over `dal` with device 0 loaded on pipes 0 and 1, and
/// open a session on it.
pub fn init_with<D: DalOps>(dal: D) -> (PipeMgr<D>, SessionHandle) {
    let log = test_log();
    let mgr = PipeMgr::init(Config::default(), &log, dal).unwrap();
    mgr.device_add(DEV, &device_profile(&[0, 1])).unwrap();
    let sess = mgr.session_create().unwrap();
    (mgr, sess)
}

pub fn init_stub() -> (PipeMgr<StubDal>, SessionHandle) {
    init_with(StubDal::new(&test_log()))
}

pub fn init_chaos(config: &DalConfig) -> (PipeMgr<ChaosDal>, SessionHandle) {
    init_with(ChaosDal::new(&test_log(), config))
}

pub fn forward(port: u8) -> ActionSpec {
    ActionSpec::direct(vec![port])
}

mockall::mock! {
    pub Dal {}

    impl DalOps for Dal {
        fn device_add(&self, dev_id: DevId, family: DevFamily) -> DalResult<()>;
        fn device_remove(&self, dev_id: DevId) -> DalResult<()>;
        fn mat_ent_add(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            ent_hdl: EntryHandle,
            match_spec: &MatchSpec,
            act_fn_hdl: ActionFnHandle,
            action_spec: &ActionSpec,
        ) -> DalResult<DalHdl>;
        fn mat_ent_del(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            match_spec: &MatchSpec,
            loc: Option<EntryLoc>,
        ) -> DalResult<()>;
        fn mat_ent_set_action(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            loc: EntryLoc,
            act_fn_hdl: ActionFnHandle,
            action_spec: &ActionSpec,
        ) -> DalResult<()>;
        fn adt_ent_add(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            ent_hdl: EntryHandle,
            mbr_id: u32,
            act_fn_hdl: ActionFnHandle,
            action_spec: &ActionSpec,
        ) -> DalResult<DalHdl>;
        fn adt_ent_del(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            mbr_id: u32,
            loc: Option<EntryLoc>,
        ) -> DalResult<()>;
        fn sel_grp_add(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            grp_hdl: EntryHandle,
            grp_id: u32,
            max_grp_size: u32,
        ) -> DalResult<DalHdl>;
        fn sel_grp_del(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            grp_id: u32,
            loc: Option<EntryLoc>,
        ) -> DalResult<()>;
        fn sel_grp_mbrs_set(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            loc: EntryLoc,
            members: &[EntryHandle],
        ) -> DalResult<()>;
        fn value_lookup_ent_add(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            ent_hdl: EntryHandle,
            match_spec: &MatchSpec,
            data: &DataSpec,
        ) -> DalResult<DalHdl>;
        fn value_lookup_ent_del(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            match_spec: &MatchSpec,
            loc: Option<EntryLoc>,
        ) -> DalResult<()>;
        fn stat_ent_query(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            index: u32,
        ) -> DalResult<StatData>;
        fn stful_ent_query(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            index: u32,
        ) -> DalResult<u64>;
        fn stful_ent_set(
            &self,
            tgt: DevTarget,
            tbl: &TableContext,
            index: u32,
            value: u64,
        ) -> DalResult<()>;
        fn mirror_session_set(
            &self,
            tgt: DevTarget,
            session_id: u32,
            spec: &MirrorSessionSpec,
        ) -> DalResult<()>;
    }
}

/// A mock backend that accepts device bring-up and tear-down
pub fn mock_dal() -> MockDal {
    let mut dal = MockDal::new();
    dal.expect_device_add().returning(|_, _| Ok(()));
    dal.expect_device_remove().returning(|_| Ok(()));
    dal
}
