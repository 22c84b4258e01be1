// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The static, per-table schema produced when a compiled pipeline program is
//! loaded.  None of this changes once a profile has been built.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a table within a pipeline program
pub type TableHandle = u32;

/// Identifies an action function within a pipeline program
pub type ActionFnHandle = u32;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("No such table: {0}")]
    NoSuchTable(String),
    #[error("Invalid table context: {0}")]
    InvalidContext(String),
    #[error("Failed to parse pipeline context: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The kinds of logical table managed at run-time.  Counter and register
/// tables are arrays of cells addressed by index, and hold no entries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    MatchAction,
    ActionData,
    Selector,
    ValueLookup,
    Counter,
    Register,
}

/// How a table (or an individual key field) is matched
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    #[default]
    Exact,
    Ternary,
    Lpm,
    Range,
}

impl MatchType {
    /// Only exact-match tables ignore the mask and priority of a key.
    pub fn is_exact(&self) -> bool {
        matches!(self, MatchType::Exact)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    pub name: String,
    pub start_bit: u32,
    pub bit_width: u32,
    pub position: u32,
    #[serde(default)]
    pub match_type: MatchType,
    /// The field carries a validity bit, and may be absent from a key
    #[serde(default)]
    pub is_valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParam {
    pub name: String,
    pub start_bit: u32,
    pub bit_width: u32,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInfo {
    pub name: String,
    pub handle: ActionFnHandle,
    #[serde(default = "default_true")]
    pub allowed_as_hit_action: bool,
    #[serde(default = "default_true")]
    pub allowed_as_default_action: bool,
    #[serde(default)]
    pub parameters: Vec<ActionParam>,
}

fn default_true() -> bool {
    true
}

/// Everything known about a single table before any entries are added
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableContext {
    pub handle: TableHandle,
    pub name: String,
    pub kind: TableKind,
    #[serde(default)]
    pub match_type: MatchType,
    /// Maximum number of entries.  Tables without a size are limited only by
    /// the handle namespace.
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub key_fields: Vec<KeyField>,
    #[serde(default)]
    pub actions: Vec<ActionInfo>,
    /// Whether run-time entry state is kept for this table at all
    #[serde(default = "default_true")]
    pub store_entries: bool,
    /// Unset means "use the process-wide default"
    #[serde(default)]
    pub duplicate_entry_check: Option<bool>,
    /// The action-data table referenced by this table's indirect actions
    #[serde(default)]
    pub adt_handle: Option<TableHandle>,
    /// The selector table referenced by this table's indirect actions
    #[serde(default)]
    pub sel_handle: Option<TableHandle>,
}

impl TableContext {
    /// The number of bytes needed to hold the packed key, or 0 when the table
    /// has no key fields.
    pub fn match_bytes(&self) -> usize {
        let bits: u32 = self.key_fields.iter().map(|f| f.bit_width).sum();
        bits.div_ceil(8) as usize
    }

    /// Counter and register tables
    pub fn is_resource(&self) -> bool {
        matches!(self.kind, TableKind::Counter | TableKind::Register)
    }

    pub fn action(&self, handle: ActionFnHandle) -> Option<&ActionInfo> {
        self.actions.iter().find(|a| a.handle == handle)
    }

    /// Bitmap covering every key field that carries a validity bit.  A
    /// validated context has at most [`MAX_VALID_FIELDS`] of them.
    pub fn validity_mask(&self) -> u64 {
        match self.valid_fields() {
            0 => 0,
            n if n >= MAX_VALID_FIELDS => u64::MAX,
            n => (1u64 << n) - 1,
        }
    }

    fn valid_fields(&self) -> usize {
        self.key_fields.iter().filter(|f| f.is_valid).count()
    }
}

/// Optional key fields are tracked in a 64-bit validity bitmap
pub const MAX_VALID_FIELDS: usize = 64;

/// The static context for every table in one compiled pipeline program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContext {
    #[serde(default)]
    pub tables: Vec<TableContext>,
}

impl PipelineContext {
    pub fn from_json(json: &str) -> Result<Self, TableError> {
        let ctx: PipelineContext = serde_json::from_str(json)?;
        ctx.validate()?;
        Ok(ctx)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn table(&self, handle: TableHandle) -> Option<&TableContext> {
        self.tables.iter().find(|t| t.handle == handle)
    }

    pub fn table_by_name(&self, name: &str) -> Option<&TableContext> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Check that table handles are unique and that every indirect reference
    /// names a table of the right kind.
    pub fn validate(&self) -> Result<(), TableError> {
        let mut seen = std::collections::BTreeSet::new();
        for t in &self.tables {
            if !seen.insert(t.handle) {
                return Err(TableError::InvalidContext(format!(
                    "duplicate table handle {:#x}",
                    t.handle
                )));
            }
            if t.size == Some(0) {
                return Err(TableError::InvalidContext(format!(
                    "table {} has size 0",
                    t.name
                )));
            }
            if t.valid_fields() > MAX_VALID_FIELDS {
                return Err(TableError::InvalidContext(format!(
                    "table {} has more than {MAX_VALID_FIELDS} optional key \
                     fields",
                    t.name
                )));
            }
            if t.is_resource() && t.size.is_none() {
                return Err(TableError::InvalidContext(format!(
                    "{} table {} has no size",
                    t.kind, t.name
                )));
            }
        }

        let check = |tbl: &TableContext,
                     reference: Option<TableHandle>,
                     want: TableKind|
         -> Result<(), TableError> {
            let Some(hdl) = reference else {
                return Ok(());
            };
            match self.table(hdl) {
                Some(t) if t.kind == want => Ok(()),
                Some(t) => Err(TableError::InvalidContext(format!(
                    "table {} references {} as {want}, but it is {}",
                    tbl.name, t.name, t.kind
                ))),
                None => Err(TableError::NoSuchTable(format!(
                    "{:#x} (referenced by {})",
                    hdl, tbl.name
                ))),
            }
        };

        for t in &self.tables {
            check(t, t.adt_handle, TableKind::ActionData)?;
            check(t, t.sel_handle, TableKind::Selector)?;
        }
        Ok(())
    }
}
