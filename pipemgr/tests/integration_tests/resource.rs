// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use mockall::predicate::*;
use pretty_assertions::assert_eq;

use backend::chaos::{Chaos, DalConfig};
use backend::table_chaos;
use dal::{DalError, MirrorSessionSpec, StatData};
use pipemgr::{ErrorKind, PipeError};

use super::harness::*;

#[test]
fn test_counter_query() -> anyhow::Result<()> {
    let (mgr, sess) = init_chaos(&Default::default());
    assert_eq!(
        mgr.stat_ent_query(sess, tgt(0), COUNTER, 3)?,
        StatData::default()
    );

    mgr.dal().add_traffic(tgt(0), COUNTER, 3, 10, 1500)?;
    mgr.dal().add_traffic(tgt(0), COUNTER, 3, 2, 128)?;
    assert_eq!(
        mgr.stat_ent_query(sess, tgt(0), COUNTER, 3)?,
        StatData::new(12, 1628)
    );
    // Each pipe counts separately
    assert_eq!(
        mgr.stat_ent_query(sess, tgt(1), COUNTER, 3)?,
        StatData::default()
    );

    let err = mgr.stat_ent_query(sess, tgt(0), COUNTER, 16).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = mgr.stat_ent_query(sess, tgt(0), REGISTER, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = mgr.stat_ent_query(sess, tgt(0), 0x99, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = mgr.stat_ent_query(sess, tgt(5), COUNTER, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    Ok(())
}

#[test]
fn test_register_set_query() -> anyhow::Result<()> {
    let (mgr, sess) = init_chaos(&Default::default());
    mgr.stful_ent_set(sess, tgt(0), REGISTER, 7, 0xdead_beef)?;
    assert_eq!(mgr.stful_ent_query(sess, tgt(0), REGISTER, 7)?, 0xdead_beef);
    assert_eq!(mgr.stful_ent_query(sess, tgt(1), REGISTER, 7)?, 0);

    mgr.stful_ent_set(sess, tgt(0), REGISTER, 7, 1)?;
    assert_eq!(mgr.stful_ent_query(sess, tgt(0), REGISTER, 7)?, 1);

    let err = mgr.stful_ent_set(sess, tgt(0), REGISTER, 8, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = mgr.stful_ent_query(sess, tgt(0), COUNTER, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = mgr.stful_ent_query(sess, tgt(0), MAT_EXACT, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Cells aren't entries
    let err = mgr.table_usage(sess, tgt(0), REGISTER).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupported);
    Ok(())
}

#[test]
fn test_register_backend_failure() -> anyhow::Result<()> {
    let config = DalConfig {
        stful_ent_set: table_chaos!(("flow_state", 1.0)),
        ..Default::default()
    };
    let (mgr, sess) = init_chaos(&config);
    let err = mgr.stful_ent_set(sess, tgt(0), REGISTER, 2, 5).unwrap_err();
    assert!(matches!(err, PipeError::Dal(DalError::Synthetic(_))));
    assert_eq!(mgr.stful_ent_query(sess, tgt(0), REGISTER, 2)?, 0);

    // The failed call released every lock it took
    mgr.dal().set_config(DalConfig::default())?;
    mgr.stful_ent_set(sess, tgt(0), REGISTER, 2, 5)?;
    assert_eq!(mgr.stful_ent_query(sess, tgt(0), REGISTER, 2)?, 5);
    mgr.session_destroy(sess)?;
    Ok(())
}

#[test]
fn test_mirror_session() -> anyhow::Result<()> {
    let (mgr, sess) = init_chaos(&Default::default());
    let spec = MirrorSessionSpec {
        port_id: 4,
        fast_clone: true,
        truncate_length: 128,
    };
    mgr.mirror_session_set(sess, tgt(1), 2, &spec)?;
    assert_eq!(mgr.dal().mirror_session(tgt(1), 2)?, Some(spec.clone()));
    assert_eq!(mgr.dal().mirror_session(tgt(0), 2)?, None);

    let err = mgr.mirror_session_set(sess, tgt(9), 2, &spec).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    mgr.dal().set_config(DalConfig {
        mirror_session_set: Chaos::new(1.0),
        ..Default::default()
    })?;
    let other = MirrorSessionSpec {
        port_id: 5,
        ..Default::default()
    };
    let err = mgr.mirror_session_set(sess, tgt(1), 2, &other).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unexpected);
    assert_eq!(mgr.dal().mirror_session(tgt(1), 2)?, Some(spec));
    Ok(())
}

#[test]
fn test_counter_read_reaches_backend() -> anyhow::Result<()> {
    let mut dal = mock_dal();
    dal.expect_stat_ent_query()
        .withf(|tgt, tbl, index| {
            tgt.pipe_id == 1 && tbl.handle == COUNTER && *index == 9
        })
        .times(1)
        .returning(|_, _, _| Ok(StatData::new(1, 64)));
    dal.expect_stful_ent_set()
        .with(always(), always(), eq(0), eq(42))
        .times(1)
        .returning(|_, _, _, _| Err(DalError::NoSpace("register".into())));
    let (mgr, sess) = init_with(dal);

    assert_eq!(
        mgr.stat_ent_query(sess, tgt(1), COUNTER, 9)?,
        StatData::new(1, 64)
    );
    let err = mgr.stful_ent_set(sess, tgt(0), REGISTER, 0, 42).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    // Out-of-range indexes never reach the backend
    let err = mgr.stat_ent_query(sess, tgt(1), COUNTER, 99).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    Ok(())
}
