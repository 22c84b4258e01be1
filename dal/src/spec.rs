// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

/// The pipeline manager accepts keys and actions from its callers as packed,
/// bit-level byte buffers.  It takes its own copy of every buffer before an
/// entry is stored, and it is that copy which is handed to the backend, so a
/// backend never sees memory owned by the caller.  Because every type here
/// owns its storage, "packing" an entry is a `clone()`, and freeing it is a
/// `drop()`.
use serde::{Deserialize, Serialize};

use common::table::TableHandle;

use crate::EntryHandle;

/// A match key: validity bits for optional fields, the packed field values,
/// and, for ternary / lpm / range tables, a mask and a priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchSpec {
    /// One bit per optional key field, set when that field is present
    pub validity: u64,
    /// Number of significant bits in `value`
    pub num_valid_match_bits: u32,
    pub value: Vec<u8>,
    /// Ignored by exact-match tables
    pub mask: Vec<u8>,
    /// Ignored by exact-match tables
    pub priority: u32,
}

impl MatchSpec {
    /// Build an exact-match key.  Every bit of `value` is significant.
    pub fn exact(value: impl Into<Vec<u8>>) -> Self {
        let value = value.into();
        MatchSpec {
            num_valid_match_bits: (value.len() * 8) as u32,
            mask: vec![0xff; value.len()],
            value,
            ..Default::default()
        }
    }

    /// Build a ternary key
    pub fn ternary(
        value: impl Into<Vec<u8>>,
        mask: impl Into<Vec<u8>>,
        priority: u32,
    ) -> Self {
        let value = value.into();
        MatchSpec {
            num_valid_match_bits: (value.len() * 8) as u32,
            value,
            mask: mask.into(),
            priority,
            ..Default::default()
        }
    }

    pub fn with_validity(mut self, validity: u64) -> Self {
        self.validity = validity;
        self
    }
}

/// Where an entry's action data lives
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
pub enum ActionRef {
    /// The parameters are carried inline in the action spec
    #[default]
    Direct,
    /// An entry in the associated action-data table
    Member(EntryHandle),
    /// A group in the associated selector table
    Group(EntryHandle),
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
pub enum ResourceKind {
    Counter,
    Meter,
    Register,
    Lpf,
    Wred,
}

/// A counter, meter or register attached to an action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub tbl_hdl: TableHandle,
    pub kind: ResourceKind,
    /// Index into an indirectly addressed resource table
    pub index: Option<u32>,
    pub data: Vec<u8>,
}

/// The programmed behavior for a matched entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_ref: ActionRef,
    /// Number of significant bits in `data`
    pub num_valid_action_data_bits: u32,
    pub data: Vec<u8>,
    pub resources: Vec<ResourceSpec>,
}

impl ActionSpec {
    /// Inline action parameters
    pub fn direct(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        ActionSpec {
            num_valid_action_data_bits: (data.len() * 8) as u32,
            data,
            ..Default::default()
        }
    }

    /// Point at an action-data table entry
    pub fn member(adt_ent_hdl: EntryHandle) -> Self {
        ActionSpec {
            action_ref: ActionRef::Member(adt_ent_hdl),
            ..Default::default()
        }
    }

    /// Point at a selector group
    pub fn group(sel_grp_hdl: EntryHandle) -> Self {
        ActionSpec {
            action_ref: ActionRef::Group(sel_grp_hdl),
            ..Default::default()
        }
    }

    pub fn with_resource(mut self, resource: ResourceSpec) -> Self {
        self.resources.push(resource);
        self
    }
}

/// The value half of a value-lookup entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSpec {
    pub num_valid_bits: u32,
    pub data: Vec<u8>,
}

impl DataSpec {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        DataSpec {
            num_valid_bits: (data.len() * 8) as u32,
            data,
        }
    }
}

/// Packet and byte totals read back from one counter cell
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct StatData {
    pub packets: u64,
    pub bytes: u64,
}

impl StatData {
    pub fn new(packets: u64, bytes: u64) -> Self {
        StatData { packets, bytes }
    }
}

/// Where mirrored copies of a packet are sent
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MirrorSessionSpec {
    pub port_id: u32,
    /// Copy the packet before the rest of the pipeline runs
    pub fast_clone: bool,
    /// Bytes kept from each mirrored packet.  0 keeps all of them.
    pub truncate_length: u32,
}
