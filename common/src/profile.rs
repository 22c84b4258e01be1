// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use serde::{Deserialize, Serialize};

use crate::table::PipelineContext;

/// Identifies a single device
pub type DevId = u32;

/// Identifies a single pipe within a device
pub type PipeId = u32;

/// The family of device being programmed
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
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DevFamily {
    Tofino,
    Tofino2,
    Tofino3,
    /// A software switch
    Software,
}

/// One compiled pipeline program and the pipes it is loaded on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineProfile {
    pub name: String,
    #[serde(default)]
    pub program: String,
    pub pipes: Vec<PipeId>,
    pub context: PipelineContext,
}

/// Everything needed to bring up a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub family: DevFamily,
    pub pipelines: Vec<PipelineProfile>,
}
