// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The table manager for a programmable packet pipeline.
//!
//! A [`PipeMgr`] owns every device added to it, the pipeline profiles loaded
//! on those devices, and the run-time entries of every table in those
//! profiles.  Entries are programmed into a device through a [`dal::DalOps`]
//! backend.
//!
//! Every table operation runs inside the same lock hierarchy, acquired
//! outermost first:
//!
//! 1. the registry lock: shared for table operations, exclusive for device
//!    add and remove
//! 2. the session mutex, serializing calls made on one session
//! 3. the profile lock: shared for table operations, exclusive when a
//!    profile's tables are rebuilt
//! 4. table mutexes, in the order match-action, selector, action-data
//!
//! Locks are released in the reverse order on every exit path.

use std::sync::RwLock;

use slog::{debug, info, o, Logger};

use common::profile::{DevId, DeviceProfile};
use common::table::{PipelineContext, TableHandle};
use dal::{DalOps, DevTarget};

pub mod adt;
pub mod config;
pub mod freemap;
pub mod key_index;
pub mod mat;
pub mod refs;
pub mod registry;
pub mod resource;
mod rollback;
pub mod sel;
pub mod session;
pub mod table;
pub mod types;
pub mod value_lookup;

pub use adt::AdtEntry;
pub use config::Config;
pub use mat::MatEntry;
pub use sel::SelGroup;
pub use table::TableUsage;
pub use types::*;
pub use value_lookup::ValueLookupEntry;

use registry::{Device, PipelineTables, Registry};
use session::SessionPool;

/// Everything an operation can reach once the registry, session and profile
/// locks are held
pub(crate) struct OpCtx<'a, D> {
    pub dal: &'a D,
    pub tgt: DevTarget,
    /// The index of the target pipe within its profile
    pub replica: usize,
    pub tables: &'a PipelineTables,
}

impl<D> OpCtx<'_, D> {
    /// The target for an entry that may live on a different pipe of the same
    /// profile
    pub fn target_pipe(&self, pipe_id: common::profile::PipeId) -> DevTarget {
        DevTarget::new(self.tgt.dev_id, pipe_id)
    }
}

pub struct PipeMgr<D: DalOps> {
    log: Logger,
    config: Config,
    dal: D,
    sessions: SessionPool,
    registry: RwLock<Registry>,
}

impl<D: DalOps> PipeMgr<D> {
    /// Create an empty table manager, with no devices and no open sessions
    pub fn init(config: Config, log: &Logger, dal: D) -> PipeResult<Self> {
        config.validate()?;
        let log = log.new(o!("unit" => "pipemgr"));
        let sessions = SessionPool::new(&log, config.max_sessions);
        info!(log, "pipeline manager initialized";
            "max_sessions" => config.max_sessions);
        Ok(PipeMgr {
            log,
            config,
            dal,
            sessions,
            registry: RwLock::new(Registry::default()),
        })
    }

    /// Remove every device and tear down the manager.  Backend failures are
    /// logged, and don't stop the remaining devices from being removed.
    pub fn shutdown(self) -> PipeResult<()> {
        let mut registry = self.registry.write()?;
        while let Some((dev_id, _device)) = registry.devices.pop_first() {
            rollback::log_rollback_error(
                &self.log,
                "device_remove",
                &format!("device {dev_id} at shutdown"),
                self.dal.device_remove(dev_id),
            );
        }
        info!(self.log, "pipeline manager shut down");
        Ok(())
    }

    pub fn dal(&self) -> &D {
        &self.dal
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn session_create(&self) -> PipeResult<SessionHandle> {
        self.sessions.create()
    }

    pub fn session_destroy(&self, sess: SessionHandle) -> PipeResult<()> {
        self.sessions.destroy(sess)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.active()
    }

    /// Bring up a device and build the state for every table of every profile
    /// loaded on it.
    pub fn device_add(
        &self,
        dev_id: DevId,
        profile: &DeviceProfile,
    ) -> PipeResult<()> {
        let mut registry = self.registry.write()?;
        if registry.devices.contains_key(&dev_id) {
            return Err(PipeError::Exists(format!("device {dev_id}")));
        }
        let device = Device::new(
            &self.log,
            dev_id,
            profile,
            self.config.default_duplicate_entry_check,
        )?;
        self.dal.device_add(dev_id, profile.family)?;
        debug!(device.log, "device added";
            "family" => %profile.family,
            "profiles" => device.profiles.len());
        registry.devices.insert(dev_id, device);
        Ok(())
    }

    /// Tear down a device and everything built for it.  The device is removed
    /// even if the backend reports an error, which is then returned.
    pub fn device_remove(&self, dev_id: DevId) -> PipeResult<()> {
        let mut registry = self.registry.write()?;
        let device = registry
            .devices
            .remove(&dev_id)
            .ok_or(PipeError::NoSuchDevice(dev_id))?;
        debug!(device.log, "device removed");
        self.dal.device_remove(dev_id).map_err(|e| {
            slog::error!(self.log, "backend device remove failed";
                "dev_id" => dev_id, "error" => %e);
            e.into()
        })
    }

    pub fn num_profiles(&self, dev_id: DevId) -> PipeResult<usize> {
        Ok(self.registry.read()?.device(dev_id)?.profiles.len())
    }

    /// The ids of every device currently added
    pub fn devices(&self) -> PipeResult<Vec<DevId>> {
        Ok(self.registry.read()?.devices.keys().copied().collect())
    }

    /// Replace the table set of a profile.  Every table in the profile must be
    /// empty.
    pub fn profile_reload(
        &self,
        sess: SessionHandle,
        dev_id: DevId,
        profile_id: ProfileId,
        ctx: &PipelineContext,
    ) -> PipeResult<()> {
        let registry = self.registry.read()?;
        let _session = self.sessions.enter(sess)?;
        let device = registry.device(dev_id)?;
        let profile = device.profile(profile_id)?;
        let mut tables = profile.tables.write()?;
        if tables.occupancy()? != 0 {
            return Err(PipeError::InUse(format!(
                "profile {} still has entries",
                profile.name
            )));
        }
        let plog = device.log.new(o!("profile" => profile.name.clone()));
        *tables = PipelineTables::new(
            &plog,
            ctx,
            profile.pipes.len(),
            self.config.default_duplicate_entry_check,
        )?;
        debug!(plog, "profile reloaded"; "tables" => ctx.tables.len());
        Ok(())
    }

    /// Usage statistics for any table
    pub fn table_usage(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        tbl_hdl: TableHandle,
    ) -> PipeResult<TableUsage> {
        self.api_call(sess, tgt, |op| op.tables.usage(tbl_hdl))
    }

    /// Run `f` with the registry, session and profile locks held.  The guards
    /// are dropped in the reverse order they were taken.
    pub(crate) fn api_call<T, F>(
        &self,
        sess: SessionHandle,
        tgt: DevTarget,
        f: F,
    ) -> PipeResult<T>
    where
        F: FnOnce(&OpCtx<'_, D>) -> PipeResult<T>,
    {
        let registry = self.registry.read()?;
        let _session = self.sessions.enter(sess)?;
        let device = registry.device(tgt.dev_id)?;
        let (profile, replica) = device.resolve(tgt.pipe_id)?;
        let tables = profile.tables.read()?;
        let op = OpCtx {
            dal: &self.dal,
            tgt,
            replica,
            tables: &tables,
        };
        f(&op)
    }
}
