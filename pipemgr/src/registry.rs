// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Devices, the pipeline profiles loaded on them, and the tables belonging to
//! each profile.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::RwLock;

use slog::{o, Logger};

use common::profile::{DevFamily, DevId, DeviceProfile, PipeId};
use common::table::{PipelineContext, TableHandle, TableKind};

use crate::adt::AdtEntry;
use crate::mat::MatEntry;
use crate::resource::ResourceTable;
use crate::sel::SelGroup;
use crate::table::{Table, TableUsage};
use crate::types::{PipeError, PipeResult, ProfileId};
use crate::value_lookup::ValueLookupEntry;

/// Every table of one profile, split by kind
pub struct PipelineTables {
    mat: BTreeMap<TableHandle, Table<MatEntry>>,
    adt: BTreeMap<TableHandle, Table<AdtEntry>>,
    sel: BTreeMap<TableHandle, Table<SelGroup>>,
    value_lookup: BTreeMap<TableHandle, Table<ValueLookupEntry>>,
    resources: BTreeMap<TableHandle, ResourceTable>,
}

impl PipelineTables {
    /// Build the run-time state for every table in a pipeline program.  Each
    /// key index gets one slot per pipe the program is loaded on.
    pub fn new(
        log: &Logger,
        ctx: &PipelineContext,
        replicas: usize,
        default_dup_check: bool,
    ) -> PipeResult<Self> {
        ctx.validate()?;
        let mut tables = PipelineTables {
            mat: BTreeMap::new(),
            adt: BTreeMap::new(),
            sel: BTreeMap::new(),
            value_lookup: BTreeMap::new(),
            resources: BTreeMap::new(),
        };
        for t in &ctx.tables {
            match t.kind {
                TableKind::MatchAction => {
                    let table = Table::new(log, t, replicas, default_dup_check);
                    tables.mat.insert(t.handle, table);
                }
                TableKind::ActionData => {
                    let table = Table::new(log, t, replicas, default_dup_check);
                    tables.adt.insert(t.handle, table);
                }
                TableKind::Selector => {
                    let table = Table::new(log, t, replicas, default_dup_check);
                    tables.sel.insert(t.handle, table);
                }
                TableKind::ValueLookup => {
                    let table = Table::new(log, t, replicas, default_dup_check);
                    tables.value_lookup.insert(t.handle, table);
                }
                TableKind::Counter | TableKind::Register => {
                    let table = ResourceTable::new(log, t);
                    tables.resources.insert(t.handle, table);
                }
            }
        }
        Ok(tables)
    }

    pub fn kind_of(&self, handle: TableHandle) -> Option<TableKind> {
        if self.mat.contains_key(&handle) {
            Some(TableKind::MatchAction)
        } else if self.adt.contains_key(&handle) {
            Some(TableKind::ActionData)
        } else if self.sel.contains_key(&handle) {
            Some(TableKind::Selector)
        } else if self.value_lookup.contains_key(&handle) {
            Some(TableKind::ValueLookup)
        } else {
            self.resources.get(&handle).map(|t| t.ctx.kind)
        }
    }

    fn wrong_kind(&self, handle: TableHandle, want: TableKind) -> PipeError {
        match self.kind_of(handle) {
            Some(kind) => PipeError::Invalid(format!(
                "table {handle:#x} is a {kind} table, not a {want} table"
            )),
            None => PipeError::NoSuchTable(handle),
        }
    }

    pub fn mat(&self, handle: TableHandle) -> PipeResult<&Table<MatEntry>> {
        self.mat
            .get(&handle)
            .ok_or_else(|| self.wrong_kind(handle, TableKind::MatchAction))
    }

    pub fn adt(&self, handle: TableHandle) -> PipeResult<&Table<AdtEntry>> {
        self.adt
            .get(&handle)
            .ok_or_else(|| self.wrong_kind(handle, TableKind::ActionData))
    }

    pub fn sel(&self, handle: TableHandle) -> PipeResult<&Table<SelGroup>> {
        self.sel
            .get(&handle)
            .ok_or_else(|| self.wrong_kind(handle, TableKind::Selector))
    }

    pub fn value_lookup(
        &self,
        handle: TableHandle,
    ) -> PipeResult<&Table<ValueLookupEntry>> {
        self.value_lookup
            .get(&handle)
            .ok_or_else(|| self.wrong_kind(handle, TableKind::ValueLookup))
    }

    /// A counter or register table of the given kind
    pub fn resource(
        &self,
        handle: TableHandle,
        want: TableKind,
    ) -> PipeResult<&ResourceTable> {
        self.resources
            .get(&handle)
            .filter(|t| t.ctx.kind == want)
            .ok_or_else(|| self.wrong_kind(handle, want))
    }

    pub fn usage(&self, handle: TableHandle) -> PipeResult<TableUsage> {
        match self.kind_of(handle) {
            Some(TableKind::MatchAction) => self.mat(handle)?.usage(),
            Some(TableKind::ActionData) => self.adt(handle)?.usage(),
            Some(TableKind::Selector) => self.sel(handle)?.usage(),
            Some(TableKind::ValueLookup) => self.value_lookup(handle)?.usage(),
            Some(kind @ (TableKind::Counter | TableKind::Register)) => {
                Err(PipeError::NotSupported(format!(
                    "{kind} table {handle:#x} holds no entries"
                )))
            }
            None => Err(PipeError::NoSuchTable(handle)),
        }
    }

    /// Number of live entries across all tables
    pub fn occupancy(&self) -> PipeResult<u64> {
        let mut total = 0u64;
        for t in self.mat.values() {
            total += t.usage()?.occupancy as u64;
        }
        for t in self.adt.values() {
            total += t.usage()?.occupancy as u64;
        }
        for t in self.sel.values() {
            total += t.usage()?.occupancy as u64;
        }
        for t in self.value_lookup.values() {
            total += t.usage()?.occupancy as u64;
        }
        Ok(total)
    }
}

/// One compiled pipeline program as loaded on a set of pipes
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub program: String,
    pub pipes: Vec<PipeId>,
    pub tables: RwLock<PipelineTables>,
}

pub struct Device {
    pub id: DevId,
    pub family: DevFamily,
    pub log: Logger,
    pub profiles: Vec<Profile>,
}

impl Device {
    /// Build every profile and table for a device.  No pipe may belong to
    /// more than one profile.
    pub fn new(
        log: &Logger,
        id: DevId,
        profile: &DeviceProfile,
        default_dup_check: bool,
    ) -> PipeResult<Self> {
        let log = log.new(o!("dev_id" => id));
        if profile.pipelines.is_empty() {
            return Err(PipeError::Invalid(format!(
                "device {id} has no pipelines"
            )));
        }

        let mut seen = BTreeSet::new();
        let mut profiles = Vec::with_capacity(profile.pipelines.len());
        for (idx, p) in profile.pipelines.iter().enumerate() {
            if p.pipes.is_empty() {
                return Err(PipeError::Invalid(format!(
                    "profile {} is not loaded on any pipe",
                    p.name
                )));
            }
            for pipe in &p.pipes {
                if !seen.insert(*pipe) {
                    return Err(PipeError::Invalid(format!(
                        "pipe {pipe} assigned to more than one profile"
                    )));
                }
            }
            let plog = log.new(o!("profile" => p.name.clone()));
            let tables = PipelineTables::new(
                &plog,
                &p.context,
                p.pipes.len(),
                default_dup_check,
            )?;
            profiles.push(Profile {
                id: idx as ProfileId,
                name: p.name.clone(),
                program: p.program.clone(),
                pipes: p.pipes.clone(),
                tables: RwLock::new(tables),
            });
        }

        Ok(Device {
            id,
            family: profile.family,
            log,
            profiles,
        })
    }

    /// Map a pipe to the profile loaded on it, and to that pipe's replica
    /// index within the profile.
    pub fn resolve(&self, pipe_id: PipeId) -> PipeResult<(&Profile, usize)> {
        self.profiles
            .iter()
            .find_map(|p| {
                p.pipes
                    .iter()
                    .position(|x| *x == pipe_id)
                    .map(|replica| (p, replica))
            })
            .ok_or(PipeError::NoSuchPipe {
                dev_id: self.id,
                pipe_id,
            })
    }

    pub fn profile(&self, id: ProfileId) -> PipeResult<&Profile> {
        self.profiles.get(id as usize).ok_or_else(|| {
            PipeError::Missing(format!("device {} has no profile {id}", self.id))
        })
    }
}

#[derive(Default)]
pub struct Registry {
    pub devices: BTreeMap<DevId, Device>,
}

impl Registry {
    pub fn device(&self, id: DevId) -> PipeResult<&Device> {
        self.devices.get(&id).ok_or(PipeError::NoSuchDevice(id))
    }
}
