// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A backend that fails on purpose.  Each operation is assigned a probability
//! of returning a synthetic error, either globally or per table, and the
//! configuration may be replaced while the backend is in use.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rand::random;
use serde::{Deserialize, Serialize};
use slog::{o, Logger};

use common::profile::{DevFamily, DevId};
use common::table::{ActionFnHandle, TableContext, TableHandle};
use dal::{
    ActionSpec, DalError, DalHdl, DalOps, DalResult, DataSpec, DevTarget,
    EntryHandle, EntryLoc, MatchSpec, MirrorSessionSpec, StatData,
};

use crate::TokenSource;

pub mod table;
use table::{EntryKey, Programmed, Programming};

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }

    /// Set the chaos value. Panics if value is outside the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            panic!("probability out of range");
        }
        self.value = value;
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> DalResult<()> {
        if random::<f64>() < self.value {
            slog::error!(log, "chaos error: {}", message);
            return Err(DalError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// A form of chaos that applies to tables.
#[derive(Default, Debug, Serialize, Deserialize, Clone)]
pub struct TableChaos {
    /// Track a set of chaos probabilities keyed by table name.
    pub values: HashMap<String, f64>,
    /// The probability used for tables without their own entry
    pub default: f64,
}

/// A convenience function for creating chaos tables.
#[macro_export]
macro_rules! table_chaos {
    ( $( ($entry:expr, $prob:expr) ),* ) => {
        $crate::chaos::TableChaos {
            values: std::collections::HashMap::from([
                $( ($entry.into(), $prob) ),*
            ]),
            default: 0.0,
        }
    }
}

impl TableChaos {
    /// Every table fails with the same probability
    pub fn uniform(v: f64) -> Self {
        TableChaos {
            values: HashMap::new(),
            default: Chaos::new(v).get(),
        }
    }

    /// Return a chaos error according to the underlying probability value for
    /// the given table `id`.
    pub fn unfurled(
        &self,
        log: &Logger,
        id: &str,
        message: &str,
    ) -> DalResult<()> {
        let value = self.values.get(id).copied().unwrap_or(self.default);
        if random::<f64>() < value {
            slog::error!(log, "chaos table error: {}", message; "table" => id);
            return Err(DalError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// The chaos backend config contains chaos values for each operation.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct DalConfig {
    pub device_add: Chaos,
    pub device_remove: Chaos,
    pub mat_ent_add: TableChaos,
    pub mat_ent_del: TableChaos,
    pub mat_ent_set_action: TableChaos,
    pub adt_ent_add: TableChaos,
    pub adt_ent_del: TableChaos,
    pub sel_grp_add: TableChaos,
    pub sel_grp_del: TableChaos,
    pub sel_grp_mbrs_set: TableChaos,
    pub value_lookup_ent_add: TableChaos,
    pub value_lookup_ent_del: TableChaos,
    pub stat_ent_query: TableChaos,
    pub stful_ent_query: TableChaos,
    pub stful_ent_set: TableChaos,
    pub mirror_session_set: Chaos,
}

impl DalConfig {
    /// The uniform chaos config applies a uniform underlying probability to
    /// each chaos value.
    pub fn uniform(v: f64) -> Self {
        Self {
            device_add: Chaos::new(v),
            device_remove: Chaos::new(v),
            mirror_session_set: Chaos::new(v),
            ..Self::uniform_tables(v)
        }
    }

    /// Apply a uniform probability to every table operation, leaving device
    /// bring-up and tear-down reliable.
    pub fn uniform_tables(v: f64) -> Self {
        Self {
            mat_ent_add: TableChaos::uniform(v),
            mat_ent_del: TableChaos::uniform(v),
            mat_ent_set_action: TableChaos::uniform(v),
            adt_ent_add: TableChaos::uniform(v),
            adt_ent_del: TableChaos::uniform(v),
            sel_grp_add: TableChaos::uniform(v),
            sel_grp_del: TableChaos::uniform(v),
            sel_grp_mbrs_set: TableChaos::uniform(v),
            value_lookup_ent_add: TableChaos::uniform(v),
            value_lookup_ent_del: TableChaos::uniform(v),
            stat_ent_query: TableChaos::uniform(v),
            stful_ent_query: TableChaos::uniform(v),
            stful_ent_set: TableChaos::uniform(v),
            ..Default::default()
        }
    }
}

/// A handle for a chaos backend.
pub struct ChaosDal {
    config: Mutex<DalConfig>,
    programming: Mutex<Programming>,
    tokens: TokenSource,
    log: Logger,
}

/// A convenience macro for unfurling chaos. The $name should be a regular
/// `Chaos` member of [`DalConfig`].
macro_rules! unfurl {
    ($handle:ident, $name:ident) => {
        $handle
            .config()?
            .$name
            .unfurled(&$handle.log, stringify!($name))?
    };
}

/// A convenience macro for unfurling tabular chaos. The $name should be a
/// `TableChaos` member of [`DalConfig`].
macro_rules! table_unfurl {
    ($handle:ident, $tbl: expr, $name:ident) => {
        $handle
            .config()?
            .$name
            .unfurled(&$handle.log, &$tbl.name, stringify!($name))?
    };
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> DalError {
    DalError::Internal("chaos backend lock poisoned".into())
}

impl ChaosDal {
    /// Create a new chaos backend with the provided logger and config.
    pub fn new(log: &Logger, config: &DalConfig) -> Self {
        ChaosDal {
            config: Mutex::new(config.clone()),
            programming: Mutex::new(Programming::default()),
            tokens: TokenSource::default(),
            log: log.new(o!("unit" => "chaos_dal")),
        }
    }

    /// Replace the active chaos config
    pub fn set_config(&self, config: DalConfig) -> DalResult<()> {
        *self.config.lock().map_err(poisoned)? = config;
        Ok(())
    }

    fn config(&self) -> DalResult<MutexGuard<'_, DalConfig>> {
        self.config.lock().map_err(poisoned)
    }

    fn programming(&self) -> DalResult<MutexGuard<'_, Programming>> {
        self.programming.lock().map_err(poisoned)
    }

    /// The number of objects programmed into a table on a device
    pub fn entry_count(
        &self,
        dev_id: DevId,
        tbl_hdl: TableHandle,
    ) -> DalResult<usize> {
        Ok(self.programming()?.count(dev_id, tbl_hdl))
    }

    /// Whether the entry with this handle is programmed
    pub fn is_programmed(
        &self,
        dev_id: DevId,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> DalResult<bool> {
        Ok(self
            .programming()?
            .find_handle(dev_id, tbl_hdl, ent_hdl)
            .is_some())
    }

    /// The member list of a programmed selector group
    pub fn group_members(
        &self,
        dev_id: DevId,
        tbl_hdl: TableHandle,
        grp_hdl: EntryHandle,
    ) -> DalResult<Vec<EntryHandle>> {
        self.programming()?
            .find_handle(dev_id, tbl_hdl, grp_hdl)
            .map(|p| p.members.clone())
            .ok_or_else(|| DalError::Missing(format!("group {grp_hdl}")))
    }

    /// Simulate traffic hitting a counter cell
    pub fn add_traffic(
        &self,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        index: u32,
        packets: u64,
        bytes: u64,
    ) -> DalResult<()> {
        self.programming()?
            .add_traffic((tgt, tbl_hdl, index), packets, bytes);
        Ok(())
    }

    /// The configuration of a mirror session, if one has been set
    pub fn mirror_session(
        &self,
        tgt: DevTarget,
        session_id: u32,
    ) -> DalResult<Option<MirrorSessionSpec>> {
        Ok(self.programming()?.mirror(tgt, session_id).cloned())
    }

    fn add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        key: EntryKey,
    ) -> DalResult<DalHdl> {
        let token = self.tokens.next();
        self.programming()?.insert(
            token,
            Programmed {
                tgt,
                tbl_hdl: tbl.handle,
                ent_hdl,
                key,
                members: Vec::new(),
            },
        )?;
        Ok(token)
    }

    fn del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        key: EntryKey,
        loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        let mut programming = self.programming()?;
        let token = programming.resolve(
            tgt,
            tbl.handle,
            &key,
            loc.map(|l| l.dal_hdl),
        )?;
        programming.remove(token);
        Ok(())
    }
}

impl DalOps for ChaosDal {
    fn device_add(&self, dev_id: DevId, family: DevFamily) -> DalResult<()> {
        unfurl!(self, device_add);
        slog::debug!(self.log, "device add";
            "dev_id" => dev_id, "family" => %family);
        Ok(())
    }

    fn device_remove(&self, dev_id: DevId) -> DalResult<()> {
        unfurl!(self, device_remove);
        self.programming()?.remove_device(dev_id);
        Ok(())
    }

    fn mat_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        match_spec: &MatchSpec,
        _act_fn_hdl: ActionFnHandle,
        _action_spec: &ActionSpec,
    ) -> DalResult<DalHdl> {
        table_unfurl!(self, tbl, mat_ent_add);
        self.add(tgt, tbl, ent_hdl, EntryKey::Match(match_spec.clone()))
    }

    fn mat_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        match_spec: &MatchSpec,
        loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        table_unfurl!(self, tbl, mat_ent_del);
        self.del(tgt, tbl, EntryKey::Match(match_spec.clone()), loc)
    }

    fn mat_ent_set_action(
        &self,
        _tgt: DevTarget,
        tbl: &TableContext,
        loc: EntryLoc,
        _act_fn_hdl: ActionFnHandle,
        _action_spec: &ActionSpec,
    ) -> DalResult<()> {
        table_unfurl!(self, tbl, mat_ent_set_action);
        self.programming()?.get_mut(loc.dal_hdl).map(|_| ())
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
        table_unfurl!(self, tbl, adt_ent_add);
        self.add(tgt, tbl, ent_hdl, EntryKey::Id(mbr_id))
    }

    fn adt_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        mbr_id: u32,
        loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        table_unfurl!(self, tbl, adt_ent_del);
        self.del(tgt, tbl, EntryKey::Id(mbr_id), loc)
    }

    fn sel_grp_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        grp_hdl: EntryHandle,
        grp_id: u32,
        _max_grp_size: u32,
    ) -> DalResult<DalHdl> {
        table_unfurl!(self, tbl, sel_grp_add);
        self.add(tgt, tbl, grp_hdl, EntryKey::Id(grp_id))
    }

    fn sel_grp_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        grp_id: u32,
        loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        table_unfurl!(self, tbl, sel_grp_del);
        self.del(tgt, tbl, EntryKey::Id(grp_id), loc)
    }

    fn sel_grp_mbrs_set(
        &self,
        _tgt: DevTarget,
        tbl: &TableContext,
        loc: EntryLoc,
        members: &[EntryHandle],
    ) -> DalResult<()> {
        table_unfurl!(self, tbl, sel_grp_mbrs_set);
        self.programming()?.get_mut(loc.dal_hdl)?.members = members.to_vec();
        Ok(())
    }

    fn value_lookup_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        match_spec: &MatchSpec,
        _data: &DataSpec,
    ) -> DalResult<DalHdl> {
        table_unfurl!(self, tbl, value_lookup_ent_add);
        self.add(tgt, tbl, ent_hdl, EntryKey::Match(match_spec.clone()))
    }

    fn value_lookup_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        match_spec: &MatchSpec,
        loc: Option<EntryLoc>,
    ) -> DalResult<()> {
        table_unfurl!(self, tbl, value_lookup_ent_del);
        self.del(tgt, tbl, EntryKey::Match(match_spec.clone()), loc)
    }

    fn stat_ent_query(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
    ) -> DalResult<StatData> {
        table_unfurl!(self, tbl, stat_ent_query);
        Ok(self.programming()?.counter((tgt, tbl.handle, index)))
    }

    fn stful_ent_query(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
    ) -> DalResult<u64> {
        table_unfurl!(self, tbl, stful_ent_query);
        Ok(self.programming()?.register((tgt, tbl.handle, index)))
    }

    fn stful_ent_set(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
        value: u64,
    ) -> DalResult<()> {
        table_unfurl!(self, tbl, stful_ent_set);
        self.programming()?
            .set_register((tgt, tbl.handle, index), value);
        Ok(())
    }

    fn mirror_session_set(
        &self,
        tgt: DevTarget,
        session_id: u32,
        spec: &MirrorSessionSpec,
    ) -> DalResult<()> {
        unfurl!(self, mirror_session_set);
        self.programming()?
            .set_mirror(tgt, session_id, spec.clone());
        Ok(())
    }
}
