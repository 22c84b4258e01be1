// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The device abstraction layer: the interface the pipeline manager uses to
//! push entries into a hardware or software switch.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use common::profile::{DevFamily, DevId, PipeId};
use common::table::{ActionFnHandle, TableContext};

mod spec;
pub use spec::*;

/// Identifies a live entry within a single table
pub type EntryHandle = u32;

/// An opaque token returned by the backend when an entry is programmed.  It is
/// handed back, unexamined, when that entry is later modified or removed.
pub type DalHdl = u64;

/// A specialized Result type for backend operations
pub type DalResult<T> = Result<T, DalError>;

/// The device, and the pipe within that device, that an operation targets
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DevTarget {
    pub dev_id: DevId,
    pub pipe_id: PipeId,
}

impl DevTarget {
    pub fn new(dev_id: DevId, pipe_id: PipeId) -> Self {
        DevTarget { dev_id, pipe_id }
    }
}

impl fmt::Display for DevTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.dev_id, self.pipe_id)
    }
}

/// Where a previously added entry lives in the backend.  Tables that keep no
/// run-time state have no record of either value, so deletions from those
/// tables are addressed by key alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLoc {
    pub ent_hdl: EntryHandle,
    pub dal_hdl: DalHdl,
}

/// Status codes shared by every backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DalError {
    /// Error reported by the vendor SDE.  This will report both the location
    /// in the backend that detected the error, as well as the detailed error
    /// message from the SDE.
    #[error("SDE error at {ctx}: {err}")]
    Sde { ctx: String, err: String },
    /// An argument passed to the backend is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// This operation is unsupported by the backend being used
    #[error("Operation unsupported by the backend")]
    OperationUnsupported,
    /// The backend has no room for another entry
    #[error("No space: {}", .0)]
    NoSpace(String),
    /// The backend detected some internal inconsistency
    #[error("Internal error: {}", .0)]
    Internal(String),
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic backend error: {}", .0)]
    Synthetic(String),
    /// A general indication that a caller is trying to create something that
    /// already exists.
    #[error("Already exists")]
    Exists,
    /// A general indication that a caller is trying to modify something that
    /// is not present.
    #[error("Missing: {}", .0)]
    Missing(String),
}

/// The `DalOps` trait contains every call the pipeline manager makes into a
/// backend.  Each call is synchronous, and is made with the lock for the
/// affected table held.
pub trait DalOps: Send + Sync {
    /// Prepare a newly discovered device
    fn device_add(&self, dev_id: DevId, family: DevFamily) -> DalResult<()>;

    /// Release everything the backend holds for a device
    fn device_remove(&self, dev_id: DevId) -> DalResult<()>;

    /// Program a match-action entry
    fn mat_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        match_spec: &MatchSpec,
        act_fn_hdl: ActionFnHandle,
        action_spec: &ActionSpec,
    ) -> DalResult<DalHdl>;

    /// Remove a match-action entry
    fn mat_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        match_spec: &MatchSpec,
        loc: Option<EntryLoc>,
    ) -> DalResult<()>;

    /// Replace the action of an existing match-action entry
    fn mat_ent_set_action(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        loc: EntryLoc,
        act_fn_hdl: ActionFnHandle,
        action_spec: &ActionSpec,
    ) -> DalResult<()>;

    /// Program an action-data table member
    fn adt_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        mbr_id: u32,
        act_fn_hdl: ActionFnHandle,
        action_spec: &ActionSpec,
    ) -> DalResult<DalHdl>;

    /// Remove an action-data table member
    fn adt_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        mbr_id: u32,
        loc: Option<EntryLoc>,
    ) -> DalResult<()>;

    /// Create an empty selector group
    fn sel_grp_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        grp_hdl: EntryHandle,
        grp_id: u32,
        max_grp_size: u32,
    ) -> DalResult<DalHdl>;

    /// Destroy a selector group
    fn sel_grp_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        grp_id: u32,
        loc: Option<EntryLoc>,
    ) -> DalResult<()>;

    /// Replace the membership of a selector group.  `members` are handles of
    /// entries in the associated action-data table.
    fn sel_grp_mbrs_set(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        loc: EntryLoc,
        members: &[EntryHandle],
    ) -> DalResult<()>;

    /// Program a value-lookup entry
    fn value_lookup_ent_add(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        ent_hdl: EntryHandle,
        match_spec: &MatchSpec,
        data: &DataSpec,
    ) -> DalResult<DalHdl>;

    /// Remove a value-lookup entry
    fn value_lookup_ent_del(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        match_spec: &MatchSpec,
        loc: Option<EntryLoc>,
    ) -> DalResult<()>;

    /// Read one cell of a counter table
    fn stat_ent_query(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
    ) -> DalResult<StatData>;

    /// Read one cell of a register table
    fn stful_ent_query(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
    ) -> DalResult<u64>;

    /// Write one cell of a register table
    fn stful_ent_set(
        &self,
        tgt: DevTarget,
        tbl: &TableContext,
        index: u32,
        value: u64,
    ) -> DalResult<()>;

    /// Configure a mirror session
    fn mirror_session_set(
        &self,
        tgt: DevTarget,
        session_id: u32,
        spec: &MirrorSessionSpec,
    ) -> DalResult<()>;
}
