// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Bookkeeping for everything the chaos backend has "programmed".  This lets
//! tests check that the pipeline manager and the device agree on what is
//! installed.  Counter and register cells and mirror sessions are tracked
//! here too.

use std::collections::BTreeMap;

use common::table::TableHandle;
use dal::{
    DalError, DalHdl, DalResult, DevTarget, EntryHandle, MatchSpec,
    MirrorSessionSpec, StatData,
};

/// How an entry is addressed when the caller has no token for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKey {
    Match(MatchSpec),
    Id(u32),
}

/// A single programmed object
#[derive(Debug, Clone)]
pub struct Programmed {
    pub tgt: DevTarget,
    pub tbl_hdl: TableHandle,
    pub ent_hdl: EntryHandle,
    pub key: EntryKey,
    /// Selector group members
    pub members: Vec<EntryHandle>,
}

/// One cell of a counter or register table
pub type CellKey = (DevTarget, TableHandle, u32);

#[derive(Debug, Default)]
pub struct Programming {
    entries: BTreeMap<DalHdl, Programmed>,
    counters: BTreeMap<CellKey, StatData>,
    registers: BTreeMap<CellKey, u64>,
    mirrors: BTreeMap<(DevTarget, u32), MirrorSessionSpec>,
}

impl Programming {
    fn find_key(
        &self,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        key: &EntryKey,
    ) -> Option<DalHdl> {
        self.entries
            .iter()
            .find(|(_, p)| p.tgt == tgt && p.tbl_hdl == tbl_hdl && &p.key == key)
            .map(|(token, _)| *token)
    }

    pub fn insert(&mut self, token: DalHdl, entry: Programmed) -> DalResult<()> {
        if self.find_key(entry.tgt, entry.tbl_hdl, &entry.key).is_some() {
            return Err(DalError::Exists);
        }
        self.entries.insert(token, entry);
        Ok(())
    }

    /// Find the token for an entry, either directly or by its key
    pub fn resolve(
        &self,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
        key: &EntryKey,
        token: Option<DalHdl>,
    ) -> DalResult<DalHdl> {
        let found = match token {
            Some(t) => self.entries.contains_key(&t).then_some(t),
            None => self.find_key(tgt, tbl_hdl, key),
        };
        found.ok_or_else(|| {
            DalError::Missing(format!("no entry in table {tbl_hdl:#x}"))
        })
    }

    pub fn remove(&mut self, token: DalHdl) -> Option<Programmed> {
        self.entries.remove(&token)
    }

    pub fn get_mut(&mut self, token: DalHdl) -> DalResult<&mut Programmed> {
        self.entries
            .get_mut(&token)
            .ok_or_else(|| DalError::Missing(format!("no token {token}")))
    }

    pub fn remove_device(&mut self, dev_id: u32) {
        self.entries.retain(|_, p| p.tgt.dev_id != dev_id);
        self.counters.retain(|(tgt, _, _), _| tgt.dev_id != dev_id);
        self.registers.retain(|(tgt, _, _), _| tgt.dev_id != dev_id);
        self.mirrors.retain(|(tgt, _), _| tgt.dev_id != dev_id);
    }

    /// Cells that have never counted anything read as zero
    pub fn counter(&self, cell: CellKey) -> StatData {
        self.counters.get(&cell).copied().unwrap_or_default()
    }

    pub fn add_traffic(&mut self, cell: CellKey, packets: u64, bytes: u64) {
        let c = self.counters.entry(cell).or_default();
        c.packets = c.packets.wrapping_add(packets);
        c.bytes = c.bytes.wrapping_add(bytes);
    }

    pub fn register(&self, cell: CellKey) -> u64 {
        self.registers.get(&cell).copied().unwrap_or(0)
    }

    pub fn set_register(&mut self, cell: CellKey, value: u64) {
        self.registers.insert(cell, value);
    }

    pub fn set_mirror(
        &mut self,
        tgt: DevTarget,
        session_id: u32,
        spec: MirrorSessionSpec,
    ) {
        self.mirrors.insert((tgt, session_id), spec);
    }

    pub fn mirror(
        &self,
        tgt: DevTarget,
        session_id: u32,
    ) -> Option<&MirrorSessionSpec> {
        self.mirrors.get(&(tgt, session_id))
    }

    pub fn count(&self, dev_id: u32, tbl_hdl: TableHandle) -> usize {
        self.entries
            .values()
            .filter(|p| p.tgt.dev_id == dev_id && p.tbl_hdl == tbl_hdl)
            .count()
    }

    pub fn find_handle(
        &self,
        dev_id: u32,
        tbl_hdl: TableHandle,
        ent_hdl: EntryHandle,
    ) -> Option<&Programmed> {
        self.entries.values().find(|p| {
            p.tgt.dev_id == dev_id
                && p.tbl_hdl == tbl_hdl
                && p.ent_hdl == ent_hdl
        })
    }
}
