// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use mockall::predicate::*;
use pretty_assertions::assert_eq;

use dal::{ActionSpec, DalError, MatchSpec, ResourceKind, ResourceSpec};
use pipemgr::{ErrorKind, PipeError, TableUsage};

use super::harness::*;

#[test]
fn test_add_duplicate_delete() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let key = MatchSpec::exact([0x01]);

    let h1 = mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_DROP, &forward(2))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    let entry = mgr.mat_ent_get(sess, tgt(0), MAT_EXACT, h1)?;
    assert_eq!(entry.match_spec, key);
    assert_eq!(entry.act_fn_hdl, ACT_FORWARD);
    assert_eq!(entry.action_spec, forward(1));

    mgr.mat_ent_del(sess, tgt(0), MAT_EXACT, h1)?;
    let err = mgr.mat_ent_get(sess, tgt(0), MAT_EXACT, h1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = mgr
        .mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_EXACT, &key)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The rejected add consumed no handle
    let h2 = mgr.mat_ent_add(
        sess,
        tgt(0),
        MAT_EXACT,
        &MatchSpec::exact([0x02]),
        ACT_FORWARD,
        &forward(1),
    )?;
    assert_ne!(h2, 0);
    assert_eq!(mgr.mat_ent_get_first_handle(sess, tgt(0), MAT_EXACT)?, h2);
    Ok(())
}

#[test]
fn test_handles_unique() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let mut live = std::collections::BTreeSet::new();
    for i in 0..64u8 {
        let key = MatchSpec::exact([i]);
        let h = mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(i))?;
        assert!(live.insert(h), "handle {h} issued twice");
    }
    for i in (0..64u8).step_by(2) {
        let key = MatchSpec::exact([i]);
        let h = mgr.mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_EXACT, &key)?;
        mgr.mat_ent_del_by_match_spec(sess, tgt(0), MAT_EXACT, &key)?;
        live.remove(&h);
    }
    for i in 64..96u8 {
        let key = MatchSpec::exact([i]);
        let h = mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(i))?;
        assert!(live.insert(h), "handle {h} issued twice");
    }
    Ok(())
}

#[test]
fn test_ternary_priority_is_part_of_key() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let low = MatchSpec::ternary([10, 0], [0xff, 0], 1);
    let high = MatchSpec::ternary([10, 0], [0xff, 0], 2);

    let h1 = mgr.mat_ent_add(sess, tgt(0), MAT_TERNARY, &low, ACT_DROP, &forward(0))?;
    let h2 = mgr.mat_ent_add(sess, tgt(0), MAT_TERNARY, &high, ACT_DROP, &forward(0))?;
    assert_ne!(h1, h2);
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_TERNARY, &high, ACT_DROP, &forward(0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);

    assert_eq!(mgr.mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_TERNARY, &low)?, h1);
    assert_eq!(mgr.mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_TERNARY, &high)?, h2);
    Ok(())
}

#[test]
fn test_exact_ignores_priority() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let mut key = MatchSpec::exact([7]);
    mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    key.priority = 9;
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    Ok(())
}

#[test]
fn test_keys_are_per_pipe() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let key = MatchSpec::exact([3]);
    let h0 = mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    let h1 = mgr.mat_ent_add(sess, tgt(1), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    assert_ne!(h0, h1);
    assert_eq!(mgr.mat_match_spec_to_ent_hdl(sess, tgt(1), MAT_EXACT, &key)?, h1);
    assert_eq!(mgr.mat_ent_get(sess, tgt(0), MAT_EXACT, h1)?.pipe_id, 1);

    let err = mgr
        .mat_ent_add(sess, tgt(7), MAT_EXACT, &key, ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert!(matches!(err, PipeError::NoSuchPipe { dev_id: 0, pipe_id: 7 }));
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    Ok(())
}

#[test]
fn test_duplicates_allowed_without_check() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let key = MatchSpec::exact([0x42]);
    let h1 = mgr.mat_ent_add(sess, tgt(0), MAT_NODUP, &key, ACT_FORWARD, &forward(1))?;
    let h2 = mgr.mat_ent_add(sess, tgt(0), MAT_NODUP, &key, ACT_FORWARD, &forward(2))?;
    assert_ne!(h1, h2);

    // With no key index, lookups by key never find anything
    let err = mgr
        .mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_NODUP, &key)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = mgr
        .mat_ent_del_by_match_spec(sess, tgt(0), MAT_NODUP, &key)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    mgr.mat_ent_del(sess, tgt(0), MAT_NODUP, h1)?;
    assert_eq!(mgr.mat_ent_get(sess, tgt(0), MAT_NODUP, h2)?.action_spec, forward(2));
    Ok(())
}

#[test]
fn test_next_n_boundaries() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let err = mgr.mat_ent_get_first_handle(sess, tgt(0), MAT_EXACT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let mut handles = Vec::new();
    for i in 0..5u8 {
        handles.push(mgr.mat_ent_add(
            sess,
            tgt(0),
            MAT_EXACT,
            &MatchSpec::exact([i]),
            ACT_FORWARD,
            &forward(i),
        )?);
    }
    let first = mgr.mat_ent_get_first_handle(sess, tgt(0), MAT_EXACT)?;
    assert_eq!(first, handles[0]);

    let next = mgr.mat_ent_get_next_n_handles(sess, tgt(0), MAT_EXACT, first, 2)?;
    assert_eq!(next, handles[1..3].to_vec());

    // Asking for more than remain returns only what remains
    let rest = mgr.mat_ent_get_next_n_handles(sess, tgt(0), MAT_EXACT, first, 100)?;
    assert_eq!(rest, handles[1..].to_vec());

    // Past the last handle is an empty success
    let last = handles[4];
    let none = mgr.mat_ent_get_next_n_handles(sess, tgt(0), MAT_EXACT, last, 3)?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn test_table_full() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let mut handles = Vec::new();
    for i in 0..4u8 {
        handles.push(mgr.mat_ent_add(
            sess,
            tgt(0),
            MAT_SMALL,
            &MatchSpec::exact([i]),
            ACT_FORWARD,
            &forward(i),
        )?);
    }
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_SMALL, &MatchSpec::exact([9]), ACT_FORWARD, &forward(9))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

    mgr.mat_ent_del(sess, tgt(0), MAT_SMALL, handles[2])?;
    mgr.mat_ent_add(sess, tgt(0), MAT_SMALL, &MatchSpec::exact([9]), ACT_FORWARD, &forward(9))?;

    let usage = mgr.table_usage(sess, tgt(0), MAT_SMALL)?;
    assert_eq!(
        usage,
        TableUsage {
            size: 4,
            occupancy: 4,
            inserts: 5,
            deletes: 1,
            exhaustion: 1,
            ..Default::default()
        }
    );
    Ok(())
}

#[test]
fn test_validation() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();

    // Two bytes of key for a one byte table
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_EXACT, &MatchSpec::exact([1, 2]), ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Unknown action function
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_EXACT, &MatchSpec::exact([1]), 0x999, &forward(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Indirect action in a table with no action-data table
    let err = mgr
        .mat_ent_add(
            sess,
            tgt(0),
            MAT_EXACT,
            &MatchSpec::exact([1]),
            ACT_FORWARD,
            &ActionSpec::member(1),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // Validity bit for a key with no optional fields
    let key = MatchSpec::exact([1]).with_validity(1);
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    // A selector table is not a match-action table
    let err = mgr
        .mat_ent_add(sess, tgt(0), SEL, &MatchSpec::exact([1]), ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = mgr
        .mat_ent_add(sess, tgt(0), 0xdead, &MatchSpec::exact([1]), ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert!(matches!(err, PipeError::NoSuchTable(0xdead)));

    assert_eq!(mgr.table_usage(sess, tgt(0), MAT_EXACT)?.inserts, 0);
    Ok(())
}

#[test]
fn test_set_action() -> anyhow::Result<()> {
    let (mgr, sess) = init_stub();
    let key = MatchSpec::exact([5]);
    let h = mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    mgr.mat_ent_set_action(sess, tgt(0), MAT_EXACT, h, ACT_DROP, &forward(0))?;
    let entry = mgr.mat_ent_get(sess, tgt(0), MAT_EXACT, h)?;
    assert_eq!(entry.act_fn_hdl, ACT_DROP);
    assert_eq!(entry.action_spec, forward(0));

    let err = mgr
        .mat_ent_set_action(sess, tgt(0), MAT_EXACT, h + 100, ACT_DROP, &forward(0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let usage = mgr.table_usage(sess, tgt(0), MAT_EXACT)?;
    assert_eq!(usage.updates, 1);
    assert_eq!(usage.update_misses, 1);

    // Attached resources are carried through untouched
    let counted = forward(2).with_resource(ResourceSpec {
        tbl_hdl: 0x40,
        kind: ResourceKind::Counter,
        index: Some(3),
        data: vec![],
    });
    mgr.mat_ent_set_action(sess, tgt(0), MAT_EXACT, h, ACT_FORWARD, &counted)?;
    let entry = mgr.mat_ent_get(sess, tgt(0), MAT_EXACT, h)?;
    assert_eq!(entry.action_spec.resources.len(), 1);
    assert_eq!(entry.action_spec, counted);
    Ok(())
}

#[test]
fn test_passthru_table() -> anyhow::Result<()> {
    let (mgr, sess) = init_chaos(&Default::default());
    let key = MatchSpec::exact([0x11]);
    let h = mgr.mat_ent_add(sess, tgt(0), MAT_PASSTHRU, &key, ACT_FORWARD, &forward(1))?;
    assert!(mgr.dal().is_programmed(DEV, MAT_PASSTHRU, h)?);

    for r in [
        mgr.mat_ent_get(sess, tgt(0), MAT_PASSTHRU, h).map(|_| ()),
        mgr.mat_ent_get_first_handle(sess, tgt(0), MAT_PASSTHRU).map(|_| ()),
        mgr.mat_ent_get_next_n_handles(sess, tgt(0), MAT_PASSTHRU, h, 1)
            .map(|_| ()),
        mgr.mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_PASSTHRU, &key)
            .map(|_| ()),
        mgr.mat_ent_del(sess, tgt(0), MAT_PASSTHRU, h),
    ] {
        assert_eq!(r.unwrap_err().kind(), ErrorKind::NotSupported);
    }

    // Deletion by key goes straight to the backend
    mgr.mat_ent_del_by_match_spec(sess, tgt(0), MAT_PASSTHRU, &key)?;
    assert_eq!(mgr.dal().entry_count(DEV, MAT_PASSTHRU)?, 0);

    let usage = mgr.table_usage(sess, tgt(0), MAT_PASSTHRU)?;
    assert_eq!(usage.inserts, 1);
    assert_eq!(usage.deletes, 1);
    assert_eq!(usage.occupancy, 0);
    Ok(())
}

#[test]
fn test_backend_add_failure_leaves_no_state() -> anyhow::Result<()> {
    let mut dal = mock_dal();
    dal.expect_mat_ent_add()
        .times(1)
        .returning(|_, _, _, _, _, _| Err(DalError::NoSpace("tcam".into())));
    let (mgr, sess) = init_with(dal);

    let key = MatchSpec::exact([1]);
    let err = mgr
        .mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(
        mgr.mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_EXACT, &key)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        mgr.mat_ent_get_first_handle(sess, tgt(0), MAT_EXACT)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    Ok(())
}

#[test]
fn test_backend_delete_failure_keeps_entry() -> anyhow::Result<()> {
    let mut dal = mock_dal();
    dal.expect_mat_ent_add()
        .times(1)
        .returning(|_, _, _, _, _, _| Ok(77));
    dal.expect_mat_ent_del()
        .with(always(), always(), eq(MatchSpec::exact([1])), always())
        .times(1)
        .returning(|_, _, _, _| Err(DalError::Internal("stuck".into())));
    let (mgr, sess) = init_with(dal);

    let key = MatchSpec::exact([1]);
    let h = mgr.mat_ent_add(sess, tgt(0), MAT_EXACT, &key, ACT_FORWARD, &forward(1))?;
    assert_eq!(mgr.mat_ent_get(sess, tgt(0), MAT_EXACT, h)?.dal_hdl, 77);

    let err = mgr.mat_ent_del(sess, tgt(0), MAT_EXACT, h).unwrap_err();
    assert!(matches!(err, PipeError::Dal(DalError::Internal(_))));
    assert_eq!(mgr.mat_match_spec_to_ent_hdl(sess, tgt(0), MAT_EXACT, &key)?, h);
    assert_eq!(mgr.table_usage(sess, tgt(0), MAT_EXACT)?.occupancy, 1);
    Ok(())
}
