// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for the pipeline manager.

use std::path::Path;

use serde::Deserialize;

use crate::types::{PipeError, PipeResult};

/// The number of session slots when the config doesn't say otherwise
pub const DEFAULT_MAX_SESSIONS: usize = 256;

/// Run-time settings, loaded from a TOML file or built in code.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: common::logging::LogFormat,

    /// Size of the fixed session pool
    pub max_sessions: usize,

    /// Whether duplicate keys are rejected in tables whose context doesn't
    /// specify.
    pub default_duplicate_entry_check: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: common::logging::LogFormat::Human,
            max_sessions: DEFAULT_MAX_SESSIONS,
            default_duplicate_entry_check: true,
        }
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> PipeResult<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> PipeResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipeError::Config(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> PipeResult<()> {
        if self.max_sessions == 0 || self.max_sessions > u32::MAX as usize {
            return Err(PipeError::Config(format!(
                "max_sessions out of range: {}",
                self.max_sessions
            )));
        }
        Ok(())
    }

    /// Build the root logger described by this config
    pub fn logger(&self, name: &str) -> PipeResult<slog::Logger> {
        common::logging::init(name, &self.log_file, self.log_format)
            .map_err(|e| PipeError::Config(format!("logging: {e:#}")))
    }
}
