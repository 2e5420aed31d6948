//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use chrono::TimeDelta;
use maplit::btreemap;
use p4rt_engine::Code;
use p4rt_engine::arbiter::{Arbitration, ArbitrationUpdate, SessionRole};
use p4rt_engine::config::DeviceCfg;
use p4rt_engine::error::Error;

use super::{
    Controller, DEVICE_ID, ROLE_ID, config_with_limits, eid, engine,
    engine_with,
};

#[test]
fn primary_takeover_and_failover() {
    let (engine, _dataplane_rx) = engine();

    // First controller becomes primary.
    let mut a = Controller::connect(&engine, Some(100));
    let notif = a.last();
    assert_eq!(notif.status, Code::Ok);
    assert_eq!(notif.election_id, Some(eid(100)));
    assert_eq!(notif.device_id, DEVICE_ID);
    assert_eq!(notif.role_id, ROLE_ID);

    // A higher election ID takes over and everybody is told.
    let mut b = Controller::connect(&engine, Some(101));
    let notif = a.last();
    assert_eq!(notif.status, Code::AlreadyExists);
    assert_eq!(notif.election_id, Some(eid(101)));
    let notif = b.last();
    assert_eq!(notif.status, Code::Ok);
    assert_eq!(notif.election_id, Some(eid(101)));

    // Only the new primary may write.
    let error = engine
        .authorize(DEVICE_ID, ROLE_ID, Some(eid(100)))
        .unwrap_err();
    assert_eq!(error.code(), Code::PermissionDenied);
    assert_eq!(engine.authorize(DEVICE_ID, ROLE_ID, Some(eid(101))), Ok(()));

    // The remaining controller is promoted when the primary goes away.
    drop(b);
    let notif = a.last();
    assert_eq!(notif.status, Code::Ok);
    assert_eq!(notif.election_id, Some(eid(100)));
    assert_eq!(engine.session_role(&a.session), SessionRole::Primary);
    assert_eq!(engine.authorize(DEVICE_ID, ROLE_ID, Some(eid(100))), Ok(()));
}

#[test]
fn unknown_device() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::open(&engine);
    let error = a.arbitrate(&engine, 99, ROLE_ID, Some(1)).unwrap_err();
    assert_eq!(error, Error::DeviceNotFound(99));
    assert_eq!(error.code(), Code::NotFound);
    assert!(error.is_fatal());
    assert!(a.session.is_terminated());
    assert_eq!(engine.session_role(&a.session), SessionRole::Terminated);
    assert!(a.drain().is_empty());

    // Nothing else may happen on a terminated session.
    let error = a.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(1)).unwrap_err();
    assert_eq!(error.code(), Code::FailedPrecondition);
}

#[test]
fn at_most_one_primary() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(5));
    let mut b = Controller::connect(&engine, Some(9));
    let mut c = Controller::connect(&engine, Some(7));
    let d = Controller::connect(&engine, None);

    let roles = [&a, &b, &c, &d]
        .iter()
        .map(|controller| {
            (controller.session.id(), engine.session_role(&controller.session))
        })
        .collect::<std::collections::BTreeMap<_, _>>();
    assert_eq!(
        roles,
        btreemap! {
            a.session.id() => SessionRole::Backup,
            b.session.id() => SessionRole::Primary,
            c.session.id() => SessionRole::Backup,
            d.session.id() => SessionRole::BackupNoElection,
        }
    );

    // The primary downgrades below another backup.
    a.drain();
    b.drain();
    c.drain();
    b.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(6)).unwrap();
    assert_eq!(engine.session_role(&c.session), SessionRole::Primary);
    assert_eq!(engine.session_role(&b.session), SessionRole::Backup);
    assert_eq!(a.last().status, Code::AlreadyExists);
    assert_eq!(b.last().election_id, Some(eid(7)));
    assert_eq!(c.last().status, Code::Ok);
}

#[test]
fn concurrent_arbitration() {
    let (engine, _dataplane_rx) = engine();
    let engine = Arc::new(engine);

    let handles = (1..=8u64)
        .map(|election_id| {
            let engine = engine.clone();
            thread::spawn(move || {
                let mut controller = Controller::open(&engine);
                controller
                    .arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(election_id))
                    .unwrap();
                controller
            })
        })
        .collect::<Vec<_>>();
    let controllers = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    let primaries = controllers
        .iter()
        .filter(|controller| {
            engine.session_role(&controller.session) == SessionRole::Primary
        })
        .collect::<Vec<_>>();
    assert_eq!(primaries.len(), 1);
    assert_eq!(primaries[0].session.election_id(), Some(eid(8)));
    assert_eq!(engine.device(DEVICE_ID).unwrap().session_count(), 8);

    drop(primaries);
    drop(controllers);
    assert_eq!(engine.device(DEVICE_ID).unwrap().session_count(), 0);
    assert_eq!(engine.device(DEVICE_ID).unwrap().primary(ROLE_ID), None);
    assert_eq!(engine.open_streams(), 0);
}

#[test]
fn duplicate_primary_election_id() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(10));
    a.drain();

    let mut b = Controller::open(&engine);
    let error = b.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(10)).unwrap_err();
    assert_eq!(error, Error::DuplicateElectionId(eid(10)));
    assert_eq!(error.code(), Code::InvalidArgument);
    assert!(b.session.is_terminated());
    assert!(b.drain().is_empty());

    // The primary is unaffected.
    assert_eq!(engine.session_role(&a.session), SessionRole::Primary);
    assert!(a.drain().is_empty());
    assert_eq!(engine.device(DEVICE_ID).unwrap().session_count(), 1);
}

#[test]
fn duplicate_backup_election_id() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(10));
    let mut b = Controller::connect(&engine, Some(5));
    let mut c = Controller::connect(&engine, Some(3));
    a.drain();
    b.drain();
    c.drain();

    // Reusing a backup's election ID is a no-op.
    let result = c.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(5));
    assert_eq!(result, Ok(Arbitration::Ignored));
    assert!(!c.session.is_terminated());
    assert_eq!(c.session.election_id(), Some(eid(3)));
    assert!(a.drain().is_empty());
    assert!(b.drain().is_empty());
    assert!(c.drain().is_empty());

    // A new session still joins, without an election ID.
    let mut d = Controller::open(&engine);
    let result = d.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(5));
    assert_eq!(result, Ok(Arbitration::Ignored));
    assert_eq!(engine.session_role(&d.session), SessionRole::BackupNoElection);
    assert!(d.drain().is_empty());
}

#[test]
fn backup_without_election_id() {
    let (engine, _dataplane_rx) = engine();

    // No primary yet.
    let mut a = Controller::connect(&engine, None);
    let notif = a.last();
    assert_eq!(notif.status, Code::NotFound);
    assert_eq!(notif.election_id, None);
    assert_eq!(engine.session_role(&a.session), SessionRole::BackupNoElection);

    let mut b = Controller::connect(&engine, None);
    let notif = b.last();
    assert_eq!(notif.status, Code::NotFound);
    assert_eq!(notif.election_id, None);
    assert!(a.drain().is_empty());

    let error = engine.authorize(DEVICE_ID, ROLE_ID, None).unwrap_err();
    assert_eq!(error, Error::NoPrimary(DEVICE_ID, ROLE_ID));

    // A primary shows up.
    let mut c = Controller::connect(&engine, Some(1));
    for controller in [&mut a, &mut b] {
        let notif = controller.last();
        assert_eq!(notif.status, Code::AlreadyExists);
        assert_eq!(notif.election_id, Some(eid(1)));
    }
    assert_eq!(c.last().status, Code::Ok);

    // And leaves, leaving the group without a primary.
    drop(c);
    for controller in [&mut a, &mut b] {
        let notif = controller.last();
        assert_eq!(notif.status, Code::NotFound);
        assert_eq!(notif.election_id, None);
    }
}

#[test]
fn primary_clears_election_id() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(4));
    let mut b = Controller::connect(&engine, Some(2));
    a.drain();
    b.drain();

    a.arbitrate(&engine, DEVICE_ID, ROLE_ID, None).unwrap();
    assert_eq!(engine.session_role(&a.session), SessionRole::BackupNoElection);
    assert_eq!(engine.session_role(&b.session), SessionRole::Primary);
    assert_eq!(a.last().election_id, Some(eid(2)));
    assert_eq!(b.last().status, Code::Ok);
}

#[test]
fn response_without_change() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(8));
    let mut b = Controller::connect(&engine, Some(3));
    a.drain();
    b.drain();

    // Re-sending the same update yields a response to the requester only.
    let result = b.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(3));
    assert_eq!(
        result,
        Ok(Arbitration::Accepted {
            role: SessionRole::Backup,
            changed: false,
        })
    );
    let notif = b.last();
    assert_eq!(notif.status, Code::AlreadyExists);
    assert_eq!(notif.election_id, Some(eid(8)));
    assert!(a.drain().is_empty());

    // A backup leaving doesn't change the primary.
    drop(b);
    assert!(a.drain().is_empty());
}

#[tokio::test]
async fn primary_stream_closed() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(1));
    let b = Controller::connect(&engine, Some(2));
    a.drain();

    let task = tokio::spawn(async move {
        let _b = b;
        std::future::pending::<()>().await;
    });
    task.abort();
    let _ = task.await;

    let notif = a.rx.recv().await.unwrap();
    assert_eq!(notif.status, Code::Ok);
    assert_eq!(notif.election_id, Some(eid(1)));
}

#[test]
fn zero_election_id() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::open(&engine);
    let error = a.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(0)).unwrap_err();
    assert_eq!(error, Error::ZeroElectionId);
    assert_eq!(error.code(), Code::InvalidArgument);
    assert!(a.session.is_terminated());
    assert_eq!(engine.device(DEVICE_ID).unwrap().session_count(), 0);
}

#[test]
fn device_and_role_mismatch() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(1));
    let error = a.arbitrate(&engine, 2, ROLE_ID, Some(1)).unwrap_err();
    assert_eq!(error, Error::DeviceIdMismatch(DEVICE_ID, 2));
    assert_eq!(error.code(), Code::FailedPrecondition);
    assert!(a.session.is_terminated());
    assert_eq!(engine.device(DEVICE_ID).unwrap().primary(ROLE_ID), None);

    let mut b = Controller::connect(&engine, Some(1));
    let error = b.arbitrate(&engine, DEVICE_ID, 7, Some(1)).unwrap_err();
    assert_eq!(error, Error::RoleIdMismatch(ROLE_ID, 7));
    assert_eq!(error.code(), Code::FailedPrecondition);
    assert!(b.session.is_terminated());
}

#[test]
fn role_config_change() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::connect(&engine, Some(1));
    let mut b = Controller::connect(&engine, Some(2));
    a.drain();
    b.drain();

    // Changing the role config requires a new election ID.
    let config = Some(Bytes::from_static(b"role-config"));
    let election_id = Some(eid(2));
    let update =
        ArbitrationUpdate::new(DEVICE_ID, ROLE_ID, config.clone(), election_id);
    let error = engine.arbitrate(&mut b.session, update).unwrap_err();
    assert_eq!(error.code(), Code::InvalidArgument);
    assert!(!error.is_fatal());
    assert!(!b.session.is_terminated());
    assert_eq!(b.session.role_config(), None);
    assert_eq!(engine.session_role(&b.session), SessionRole::Primary);
    assert!(a.drain().is_empty());

    let election_id = Some(eid(3));
    let update =
        ArbitrationUpdate::new(DEVICE_ID, ROLE_ID, config.clone(), election_id);
    engine.arbitrate(&mut b.session, update).unwrap();
    assert_eq!(b.session.role_config(), config.as_ref());

    // Advisories carry the primary's role config.
    assert_eq!(a.last().role_config, config);
    assert_eq!(b.last().role_config, config);
}

#[test]
fn roles_are_independent() {
    let (engine, _dataplane_rx) = engine();

    let mut a = Controller::open(&engine);
    a.arbitrate(&engine, DEVICE_ID, 1, Some(10)).unwrap();
    let mut b = Controller::open(&engine);
    b.arbitrate(&engine, DEVICE_ID, 2, Some(5)).unwrap();
    let mut c = Controller::open(&engine);
    c.arbitrate(&engine, 2, 1, Some(1)).unwrap();

    assert_eq!(engine.session_role(&a.session), SessionRole::Primary);
    assert_eq!(engine.session_role(&b.session), SessionRole::Primary);
    assert_eq!(engine.session_role(&c.session), SessionRole::Primary);
    assert_eq!(a.last().role_id, 1);
    assert_eq!(b.last().role_id, 2);
    assert_eq!(c.last().device_id, 2);

    assert_eq!(engine.authorize(DEVICE_ID, 1, Some(eid(10))), Ok(()));
    assert_eq!(engine.authorize(DEVICE_ID, 2, Some(eid(5))), Ok(()));
    assert!(engine.authorize(DEVICE_ID, 2, Some(eid(10))).is_err());
    assert!(engine.authorize(DEVICE_ID, ROLE_ID, Some(eid(10))).is_err());
}

#[test]
fn group_recreated() {
    let (engine, _dataplane_rx) = engine();

    let a = Controller::connect(&engine, Some(10));
    drop(a);
    assert_eq!(engine.device(DEVICE_ID).unwrap().primary(ROLE_ID), None);

    // A lower election ID wins once the old group is gone.
    let mut b = Controller::connect(&engine, Some(1));
    assert_eq!(b.last().status, Code::Ok);
    assert_eq!(engine.session_role(&b.session), SessionRole::Primary);
}

#[test]
fn session_limit() {
    let (engine, _dataplane_rx) = engine_with(config_with_limits(8, 2));

    let a = Controller::connect(&engine, Some(1));
    let _b = Controller::connect(&engine, Some(2));

    let mut c = Controller::open(&engine);
    let error = c.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(3)).unwrap_err();
    assert_eq!(error, Error::SessionLimitReached(DEVICE_ID, 2));
    assert_eq!(error.code(), Code::ResourceExhausted);
    assert!(c.session.is_terminated());
    assert_eq!(engine.authorize(DEVICE_ID, ROLE_ID, Some(eid(2))), Ok(()));

    // Room is made when a session leaves.
    drop(a);
    let mut d = Controller::open(&engine);
    assert!(d.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(3)).is_ok());
}

#[test]
fn stream_limit() {
    let (engine, _dataplane_rx) = engine_with(config_with_limits(1, 2));

    let a = Controller::open(&engine);
    let error = engine.open_session().unwrap_err();
    assert_eq!(error, Error::StreamLimitReached(1));
    assert_eq!(error.code(), Code::ResourceExhausted);
    assert_eq!(engine.open_streams(), 1);

    drop(a);
    assert_eq!(engine.open_streams(), 0);
    assert!(engine.open_session().is_ok());
}

#[test]
fn duplicate_device_ids() {
    let mut config = config_with_limits(8, 2);
    let mut device = DeviceCfg::new(DEVICE_ID);
    device.max_sessions = 5;
    config.devices.push(device);
    let (engine, _dataplane_rx) = engine_with(config);

    // The first entry is kept.
    let device = engine.device(DEVICE_ID).unwrap();
    assert_eq!(device.max_sessions, 2);
    let _a = Controller::connect(&engine, Some(1));
    let _b = Controller::connect(&engine, Some(2));
    let mut c = Controller::open(&engine);
    let error = c.arbitrate(&engine, DEVICE_ID, ROLE_ID, Some(3)).unwrap_err();
    assert_eq!(error, Error::SessionLimitReached(DEVICE_ID, 2));
}

#[test]
fn session_uptime() {
    let (engine, _dataplane_rx) = engine();

    let a = Controller::connect(&engine, Some(1));
    let before = a.session.uptime();
    thread::sleep(std::time::Duration::from_millis(5));
    let after = a.session.uptime();
    assert!(before >= TimeDelta::zero());
    assert!(after - before >= TimeDelta::milliseconds(5));
}
