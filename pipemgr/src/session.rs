// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A fixed pool of sessions.  A session owns no table data.  It exists so that
//! calls made on the same session are serialized with respect to each other.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use slog::{debug, o, Logger};

use crate::types::{PipeError, PipeResult, SessionHandle};

struct Session {
    in_use: AtomicBool,
    lock: Mutex<()>,
}

/// Proof that the caller is inside a critical section for a session.  The
/// session mutex is released when this is dropped.
pub struct SessionGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

pub struct SessionPool {
    log: Logger,
    slots: Vec<Session>,
}

impl SessionPool {
    pub fn new(log: &Logger, size: usize) -> Self {
        SessionPool {
            log: log.new(o!("unit" => "sessions")),
            slots: (0..size)
                .map(|_| Session {
                    in_use: AtomicBool::new(false),
                    lock: Mutex::new(()),
                })
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// The number of sessions currently allocated
    pub fn active(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.in_use.load(Ordering::Acquire))
            .count()
    }

    fn slot(&self, sess: SessionHandle) -> PipeResult<&Session> {
        self.slots
            .get(sess as usize)
            .ok_or(PipeError::NoSuchSession(sess))
    }

    /// Claim the first free slot
    pub fn create(&self) -> PipeResult<SessionHandle> {
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let sess = idx as SessionHandle;
                debug!(self.log, "session created"; "session" => sess);
                return Ok(sess);
            }
        }
        Err(PipeError::NoFreeSessions)
    }

    /// Return a session to the pool.  This waits for any call already running
    /// on the session to finish.
    pub fn destroy(&self, sess: SessionHandle) -> PipeResult<()> {
        let slot = self.slot(sess)?;
        let _guard = slot.lock.lock()?;
        if slot
            .in_use
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipeError::NoSuchSession(sess));
        }
        debug!(self.log, "session destroyed"; "session" => sess);
        Ok(())
    }

    /// Enter the critical section for a session.  A second caller on the same
    /// session blocks here until the first is done.
    pub fn enter(&self, sess: SessionHandle) -> PipeResult<SessionGuard<'_>> {
        let slot = self.slot(sess)?;
        if !slot.in_use.load(Ordering::Acquire) {
            return Err(PipeError::NoSuchSession(sess));
        }
        let guard = slot.lock.lock()?;
        // The session may have been destroyed while we waited.
        if !slot.in_use.load(Ordering::Acquire) {
            return Err(PipeError::NoSuchSession(sess));
        }
        Ok(SessionGuard { _guard: guard })
    }
}
