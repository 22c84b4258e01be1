// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Counter and register tables, and mirror sessions.
//!
//! Counter and register cells live in the device and are addressed by index,
//! so there is no run-time state to keep or lock here.  Every call still runs
//! under the registry, session and profile locks.

use slog::{error, o, trace, Logger};

use common::table::{TableContext, TableHandle, TableKind};
use dal::{DalOps, DevTarget, MirrorSessionSpec, StatData};

use crate::types::{PipeError, PipeResult, SessionHandle};
use crate::PipeMgr;

/// A counter or register table
pub struct ResourceTable {
    pub ctx: TableContext,
    pub log: Logger,
}

impl ResourceTable {
    pub fn new(log: &Logger, ctx: &TableContext) -> Self {
        ResourceTable {
            ctx: ctx.clone(),
            log: log.new(o!("table" => ctx.name.clone())),
        }
    }

    /// Validated contexts always size their resource tables
    pub fn size(&self) -> u32 {
        self.ctx.size.unwrap_or(0)
    }

    fn check_index(&self, index: u32) -> PipeResult<()> {
        if index >= self.size() {
            return Err(PipeError::Invalid(format!(
                "{}: index {index} out of range, table has {} cells",
                self.ctx.name,
                self.size()
            )));
        }
        Ok(())
    }
}

impl<D: DalOps> PipeMgr<D> {
    /// Read the packet and byte totals of one counter cell
    pub fn stat_ent_query(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        index: u32,
    ) -> PipeResult<StatData> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.resource(tbl_hdl, TableKind::Counter)?;
            tbl.check_index(index)?;
            op.dal.stat_ent_query(tgt, &tbl.ctx, index).map_err(|e| {
                error!(tbl.log, "backend counter read failed";
                    "tgt" => %tgt, "index" => index, "error" => %e);
                e.into()
            })
        })
    }

    /// Read one register cell
    pub fn stful_ent_query(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        index: u32,
    ) -> PipeResult<u64> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.resource(tbl_hdl, TableKind::Register)?;
            tbl.check_index(index)?;
            op.dal.stful_ent_query(tgt, &tbl.ctx, index).map_err(|e| {
                error!(tbl.log, "backend register read failed";
                    "tgt" => %tgt, "index" => index, "error" => %e);
                e.into()
            })
        })
    }

    /// Overwrite one register cell
    pub fn stful_ent_set(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        index: u32,
        value: u64,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let tbl = op.tables.resource(tbl_hdl, TableKind::Register)?;
            tbl.check_index(index)?;
            match op.dal.stful_ent_set(tgt, &tbl.ctx, index, value) {
                Ok(()) => {
                    trace!(tbl.log, "register set";
                        "tgt" => %tgt, "index" => index, "value" => value);
                    Ok(())
                }
                Err(e) => {
                    error!(tbl.log, "backend register write failed";
                        "tgt" => %tgt, "index" => index, "error" => %e);
                    Err(e.into())
                }
            }
        })
    }

    /// Configure where a mirror session sends its copies
    pub fn mirror_session_set(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        session_id: u32,
        spec: &MirrorSessionSpec,
    ) -> PipeResult<()> {
        self.api_call(sess, tgt, |op| {
            let spec = spec.clone();
            op.dal.mirror_session_set(tgt, session_id, &spec).map_err(|e| {
                error!(self.log(), "backend mirror session update failed";
                    "tgt" => %tgt, "session_id" => session_id, "error" => %e);
                PipeError::from(e)
            })?;
            trace!(self.log(), "mirror session set";
                "tgt" => %tgt, "session_id" => session_id,
                "port_id" => spec.port_id);
            Ok(())
        })
    }
}
