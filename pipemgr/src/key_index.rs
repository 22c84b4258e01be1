// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Per-replica indexes from an encoded match key to the handle of the entry
//! holding that key.  These back duplicate detection and key-to-handle lookup.

use std::collections::HashMap;

use common::table::MatchType;
use dal::{EntryHandle, MatchSpec};

use crate::types::{PipeError, PipeResult};

/// The portion of a match spec that identifies an entry.  Exact-match tables
/// are keyed on value alone.  Every other match kind also keys on the mask and
/// the priority, as two entries differing only in those are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    Exact {
        validity: u64,
        value: Vec<u8>,
    },
    Range {
        validity: u64,
        value: Vec<u8>,
        mask: Vec<u8>,
        priority: u32,
    },
}

/// Chosen once per table from its match type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    Exact,
    Range,
}

impl KeyEncoding {
    pub fn for_match_type(match_type: MatchType) -> Self {
        if match_type.is_exact() {
            KeyEncoding::Exact
        } else {
            KeyEncoding::Range
        }
    }

    pub fn encode(&self, spec: &MatchSpec) -> IndexKey {
        match self {
            KeyEncoding::Exact => IndexKey::Exact {
                validity: spec.validity,
                value: spec.value.clone(),
            },
            KeyEncoding::Range => IndexKey::Range {
                validity: spec.validity,
                value: spec.value.clone(),
                mask: spec.mask.clone(),
                priority: spec.priority,
            },
        }
    }
}

pub struct KeyIndex {
    encoding: KeyEncoding,
    enabled: bool,
    // One map per replica, built on the first insert for that replica
    replicas: Vec<Option<HashMap<IndexKey, EntryHandle>>>,
}

impl KeyIndex {
    /// A disabled index never records anything, and every lookup misses.
    pub fn new(match_type: MatchType, replicas: usize, enabled: bool) -> Self {
        KeyIndex {
            encoding: KeyEncoding::for_match_type(match_type),
            enabled,
            replicas: (0..replicas).map(|_| None).collect(),
        }
    }

    #[cfg(test)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[cfg(test)]
    pub fn encoding(&self) -> KeyEncoding {
        self.encoding
    }

    pub fn exists(
        &self,
        replica: usize,
        spec: &MatchSpec,
    ) -> Option<EntryHandle> {
        if !self.enabled {
            return None;
        }
        self.replicas
            .get(replica)?
            .as_ref()?
            .get(&self.encoding.encode(spec))
            .copied()
    }

    /// Record the handle for a key.  The caller must have already checked that
    /// the key isn't present.
    pub fn insert(
        &mut self,
        replica: usize,
        spec: &MatchSpec,
        handle: EntryHandle,
    ) -> PipeResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let key = self.encoding.encode(spec);
        let map = self
            .replicas
            .get_mut(replica)
            .ok_or_else(|| {
                PipeError::Invalid(format!("no key index for replica {replica}"))
            })?
            .get_or_insert_with(HashMap::new);
        if let Some(old) = map.get(&key) {
            return Err(PipeError::Unexpected(format!(
                "key for handle {handle} already indexed by handle {old}"
            )));
        }
        map.insert(key, handle);
        Ok(())
    }

    pub fn remove(
        &mut self,
        replica: usize,
        spec: &MatchSpec,
    ) -> Option<EntryHandle> {
        if !self.enabled {
            return None;
        }
        self.replicas
            .get_mut(replica)?
            .as_mut()?
            .remove(&self.encoding.encode(spec))
    }

    /// Number of keys indexed across all replicas
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.replicas.iter().flatten().map(|m| m.len()).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn replica_built(&self, replica: usize) -> bool {
        matches!(self.replicas.get(replica), Some(Some(_)))
    }
}
