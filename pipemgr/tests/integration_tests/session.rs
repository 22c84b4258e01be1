// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use pretty_assertions::assert_eq;

use backend::chaos::{Chaos, ChaosDal, DalConfig};
use backend::stub::StubDal;
use common::profile::{DevFamily, DeviceProfile, PipelineProfile};
use common::table::PipelineContext;
use dal::MatchSpec;
use pipemgr::{Config, ErrorKind, PipeError, PipeMgr};

use super::harness::*;

#[test]
fn test_sessions() -> anyhow::Result<()> {
    let config = Config {
        max_sessions: 2,
        ..Default::default()
    };
    let mgr = PipeMgr::init(config, &test_log(), StubDal::new(&test_log()))?;
    let s1 = mgr.session_create()?;
    let s2 = mgr.session_create()?;
    assert_ne!(s1, s2);
    assert!(matches!(
        mgr.session_create(),
        Err(PipeError::NoFreeSessions)
    ));
    assert_eq!(mgr.active_sessions(), 2);

    mgr.session_destroy(s1)?;
    assert_eq!(
        mgr.session_destroy(s1).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    let s3 = mgr.session_create()?;
    assert_eq!(mgr.active_sessions(), 2);
    mgr.session_destroy(s2)?;
    mgr.session_destroy(s3)?;
    Ok(())
}

#[test]
fn test_calls_need_live_session() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    mgr.session_destroy(sess)?;
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_EXACT, &MatchSpec::exact([1]), ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert!(matches!(err, PipeError::NoSuchSession(_)));
    Ok(())
}

#[test]
fn test_devices() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    assert_eq!(mgr.devices()?, vec![DEV]);
    assert_eq!(mgr.num_profiles(DEV)?, 1);

    let err = mgr.device_add(DEV, &device_profile(&[0])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    // No pipe may belong to two profiles
    let mut profile = device_profile(&[0, 1]);
    profile.pipelines.push(PipelineProfile {
        name: "second".to_string(),
        program: "second".to_string(),
        pipes: vec![1, 2],
        context: PipelineContext::default(),
    });
    let err = mgr.device_add(1, &profile).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let empty = DeviceProfile {
        family: DevFamily::Tofino2,
        pipelines: Vec::new(),
    };
    assert!(mgr.device_add(2, &empty).is_err());
    assert_eq!(mgr.devices()?, vec![DEV]);

    mgr.device_remove(DEV)?;
    let err = mgr
        .mat_ent_get_first_handle(sess, tgt(0), MAT_EXACT)
        .unwrap_err();
    assert!(matches!(err, PipeError::NoSuchDevice(DEV)));
    assert!(matches!(
        mgr.device_remove(DEV),
        Err(PipeError::NoSuchDevice(DEV))
    ));
    Ok(())
}

#[test]
fn test_multiple_profiles() -> anyhow::Result<()> {
    let log = test_log();
    let mgr = PipeMgr::init(Config::default(), &log, StubDal::new(&log))?;
    let mut profile = device_profile(&[0, 1]);
    profile.pipelines.push(PipelineProfile {
        name: "second".to_string(),
        program: "second".to_string(),
        pipes: vec![2, 3],
        context: pipeline_context(),
    });
    mgr.device_add(DEV, &profile)?;
    let sess = mgr.session_create()?;
    assert_eq!(mgr.num_profiles(DEV)?, 2);

    // Each profile has its own copy of every table
    let key = MatchSpec::exact([1]);
    mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    mgr.mat_ent_add(sess, tgt(2), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    assert_eq!(mgr.table_usage(sess, tgt(1), MAT_EXACT)?.occupancy, 1);
    assert_eq!(mgr.table_usage(sess, tgt(3), MAT_EXACT)?.occupancy, 1);
    Ok(())
}

#[test]
fn test_profile_reload() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let key = MatchSpec::exact([1]);
    let h = mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;

    let mut ctx = pipeline_context();
    ctx.tables.retain(|t| t.handle != MAT_TERNARY);

    let err = mgr.profile_reload(sess, DEV, 0, &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InUse);

    mgr.mat_ent_del(sess, tgt(0), MAT_EXACT, h)?;
    mgr.profile_reload(sess, DEV, 0, &ctx)?;
    assert!(matches!(
        mgr.table_usage(sess, tgt(0), MAT_TERNARY),
        Err(PipeError::NoSuchTable(MAT_TERNARY))
    ));
    assert_eq!(mgr.table_usage(sess, tgt(0), MAT_EXACT)?.inserts, 0);

    let err = mgr.profile_reload(sess, DEV, 4, &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn test_device_remove_backend_failure() -> anyhow::Result<()> {
    let config = DalConfig {
        device_remove: Chaos::new(1.0),
        ..Default::default()
    };
    let log = test_log();
    let mgr = PipeMgr::init(Config::default(), &log, ChaosDal::new(&log, &config))?;
    mgr.device_add(DEV, &device_profile(&[0]))?;

    let err = mgr.device_remove(DEV).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unexpected);
    assert!(mgr.devices()?.is_empty());
    Ok(())
}

#[test]
fn test_device_add_backend_failure() -> anyhow::Result<()> {
    let config = DalConfig {
        device_add: Chaos::new(1.0),
        ..Default::default()
    };
    let log = test_log();
    let mgr = PipeMgr::init(Config::default(), &log, ChaosDal::new(&log, &config))?;
    assert!(mgr.device_add(DEV, &device_profile(&[0])).is_err());
    assert!(mgr.devices()?.is_empty());
    Ok(())
}

#[test]
fn test_shutdown() -> anyhow::Result<()> {
    let mut dal = MockDal::new();
    dal.expect_device_add().times(2).returning(|_, _| Ok(()));
    dal.expect_device_remove().times(2).returning(|_| Ok(()));
    let log = test_log();
    let mgr = PipeMgr::init(Config::default(), &log, dal)?;
    mgr.device_add(0, &device_profile(&[0]))?;
    mgr.device_add(1, &device_profile(&[0]))?;
    mgr.shutdown()?;
    Ok(())
}

#[test]
fn test_bad_config() {
    let config = Config {
        max_sessions: 0,
        ..Default::default()
    };
    let log = test_log();
    let err = PipeMgr::init(config, &log, backend::DefaultDal::new(&log))
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
