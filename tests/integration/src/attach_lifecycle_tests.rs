//! Attach lifecycle tests
//!
//! Walks children through attach, re-verification, timeout, eviction and
//! persistence using only the public table API.

use crate::test_utils::*;
use meshlink_core::{DeviceMode, Rloc16};
use meshlink_topology::{
    Challenge, ChildRecord, DeliveryOutcome, EntryHandle, EntryKind, FrameClass,
    LinkFailureOutcome, NeighborState, TopologyError, TxResult,
};
use std::net::Ipv6Addr;

#[test]
fn test_full_table_evicts_least_recently_heard_sleepy_child() {
    let config = test_config();
    let mut table = create_test_table(&config);

    let handles: Vec<_> = (1..=4)
        .map(|n| attach_child(&mut table, n, n as u64 * 1_000).unwrap())
        .collect();
    // child 1 is rx-on and must never be chosen
    table
        .child_mut(handles[0])
        .unwrap()
        .set_mode(DeviceMode::from_bits(DeviceMode::RX_ON_WHEN_IDLE));

    let err = table.allocate(EntryKind::Child, ext_address(5), 10_000).unwrap_err();
    assert_eq!(err, TopologyError::TableFull { kind: EntryKind::Child });
    assert_eq!(table.valid_children().count(), 4);

    let victim = table
        .least_recently_heard_child(|c| c.neighbor().mode().is_sleepy())
        .unwrap();
    assert_eq!(victim, handles[1]);
    table.release(EntryHandle::Child(victim), 10_000).unwrap();

    let new = attach_child(&mut table, 5, 10_000).unwrap();
    assert_eq!(new.index(), victim.index());
    assert_eq!(table.child(victim).unwrap_err(), TopologyError::StaleHandle);
    assert_eq!(
        table.find_by_ext_address(&ext_address(5)),
        Ok(EntryHandle::Child(new))
    );
    assert_eq!(table.stats().allocation_failures, 1);
}

#[test]
fn test_handshake_data_follows_state() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let handle = table.allocate_child(ext_address(1)).unwrap();

    let child = table.child_mut(handle).unwrap();
    child
        .begin_attach(Challenge::new(&[1; 8]).unwrap(), Challenge::new(&[2; 8]).unwrap(), 0)
        .unwrap();
    assert_eq!(child.state(), NeighborState::ParentRequest);
    assert_eq!(child.attach_challenge().unwrap().as_bytes(), &[2; 8]);
    assert_eq!(child.neighbor().challenge().unwrap().as_bytes(), &[1; 8]);
    assert!(matches!(
        child.request_tlvs(),
        Err(TopologyError::InvalidStateAccess {
            state: NeighborState::ParentRequest
        })
    ));
    assert!(child.neighbor().rloc16().is_err());

    child
        .complete_attach(completion(Rloc16::from_child(0, 1), 0), &[0x01, 0x0b], 5)
        .unwrap();
    assert_eq!(child.request_tlvs().unwrap(), &[0x01, 0x0b]);
    assert!(child.attach_challenge().is_err());
    assert!(child.neighbor().challenge().is_err());
    assert_eq!(child.neighbor().rloc16(), Ok(Rloc16::from_child(0, 1)));
}

#[test]
fn test_out_of_order_handshake_rejected() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let handle = attach_child(&mut table, 1, 0).unwrap();

    let child = table.child_mut(handle).unwrap();
    assert_eq!(
        child.progress_child_id_request(Challenge::default(), 10),
        Err(TopologyError::InvalidTransition {
            from: NeighborState::Valid,
            to: NeighborState::ChildIdRequest,
        })
    );
    assert_eq!(child.state(), NeighborState::Valid);
}

#[test]
fn test_reverify_keeps_child_reachable() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let handle = attach_child(&mut table, 1, 0).unwrap();
    let rloc16 = Rloc16::from_child(0, 1);

    table.child_mut(handle).unwrap().begin_reverify().unwrap();
    assert_eq!(
        table.child(handle).unwrap().state(),
        NeighborState::ChildUpdateRequest
    );
    // still found and still accepting frames while re-verifying
    assert_eq!(table.find_by_rloc16(rloc16), Ok(EntryHandle::Child(handle)));
    table
        .accept_frame(handle.into(), FrameClass::Mle, 1, 0, 100, None)
        .unwrap();

    table
        .child_mut(handle)
        .unwrap()
        .complete_attach(completion(rloc16, 0), &[], 200)
        .unwrap();
    assert_eq!(table.child(handle).unwrap().state(), NeighborState::Valid);
}

#[test]
fn test_keep_alive_timeout_expires_children() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let quiet = attach_child(&mut table, 1, 0).unwrap();
    let chatty = attach_child(&mut table, 2, 0).unwrap();
    for h in [quiet, chatty] {
        table.child_mut(h).unwrap().set_timeout_secs(30);
    }
    table
        .enqueue_indirect(quiet, "pending".to_string(), &CountingSecurity::new(0))
        .unwrap();
    table
        .accept_frame(chatty.into(), FrameClass::Link, 1, 0, 25_000, None)
        .unwrap();

    assert!(table.expire_children(30_000).is_empty());

    let expired = table.expire_children(30_001);
    assert_eq!(expired, vec![(ext_address(1), vec!["pending".to_string()])]);
    assert!(table.child(chatty).is_ok());
    assert_eq!(table.child_count(), 1);
}

#[test]
fn test_registered_addresses_route_to_child() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let handle = attach_child(&mut table, 1, 0).unwrap();
    let mesh_local: Ipv6Addr = "fd00:db8::1".parse().unwrap();
    let global: Ipv6Addr = "2001:db8::1".parse().unwrap();

    let child = table.child_mut(handle).unwrap();
    assert_eq!(child.register_address(mesh_local), Ok(true));
    assert_eq!(child.register_address(mesh_local), Ok(false));
    assert_eq!(child.register_address(global), Ok(true));
    assert_eq!(
        child.register_address("2001:db8::2".parse().unwrap()),
        Err(TopologyError::AddressTableFull { max: 2 })
    );

    assert_eq!(table.find_child_by_ip6_address(&global), Ok(handle));

    table.child_mut(handle).unwrap().remove_address(&global);
    assert_eq!(
        table.find_child_by_ip6_address(&global),
        Err(TopologyError::NotFound)
    );
}

#[test]
fn test_link_failures_release_child_and_hand_back_messages() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let handle = attach_child(&mut table, 1, 0).unwrap();
    let security = CountingSecurity::new(0);
    table.enqueue_indirect(handle, "a".into(), &security).unwrap();
    table.enqueue_indirect(handle, "b".into(), &security).unwrap();

    let entry = EntryHandle::from(handle);
    for _ in 0..2 {
        assert_eq!(
            table.record_link_failure(entry, 0).unwrap(),
            LinkFailureOutcome::Counted
        );
    }
    assert_eq!(
        table.record_link_failure(entry, 0).unwrap(),
        LinkFailureOutcome::Released(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(table.child_count(), 0);
    assert_eq!(table.stats().indirect_discarded, 2);
}

#[test]
fn test_children_survive_persist_and_restore() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let h1 = attach_child(&mut table, 1, 0).unwrap();
    let h2 = attach_child(&mut table, 2, 0).unwrap();
    table.child_mut(h1).unwrap().set_timeout_secs(240);
    table.child_mut(h2).unwrap().set_network_data_version(7);
    // pending children are not persisted
    table.allocate_child(ext_address(3)).unwrap();

    let records: Vec<ChildRecord> = table
        .valid_children()
        .map(|(_, c)| c.record().unwrap())
        .collect();
    let json = serde_json::to_string(&records).unwrap();

    let mut rebooted = create_test_table(&config);
    let loaded: Vec<ChildRecord> = serde_json::from_str(&json).unwrap();
    for record in &loaded {
        rebooted.restore_child(record, 0).unwrap();
    }

    assert_eq!(rebooted.child_count(), 2);
    let EntryHandle::Child(restored) = rebooted.find_by_rloc16(Rloc16::from_child(0, 1)).unwrap()
    else {
        panic!("expected a child entry");
    };
    let child = rebooted.child(restored).unwrap();
    assert_eq!(child.state(), NeighborState::Restored);
    assert_eq!(child.timeout_secs(), 240);

    // first frame after reboot is accepted, then the child re-verifies
    rebooted
        .accept_frame(restored.into(), FrameClass::Mle, 1, 0, 50, Some(-80))
        .unwrap();
    rebooted
        .child_mut(restored)
        .unwrap()
        .complete_attach(completion(Rloc16::from_child(0, 1), 0), &[], 60)
        .unwrap();
    assert_eq!(rebooted.child(restored).unwrap().state(), NeighborState::Valid);

    // restoring the same child twice is a duplicate
    assert_eq!(
        rebooted.restore_child(&loaded[0], 0),
        Err(TopologyError::DuplicateEntry(loaded[0].ext_address))
    );
}

#[test]
fn test_restored_child_keep_alive_runs_from_restore() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let handle = attach_child(&mut table, 1, 0).unwrap();
    table.child_mut(handle).unwrap().set_timeout_secs(240);
    let record = table.child(handle).unwrap().record().unwrap();

    // node comes back an hour later
    let boot = 3_600_000;
    let mut rebooted = create_test_table(&config);
    let restored = rebooted.restore_child(&record, boot).unwrap();
    assert_eq!(rebooted.child(restored).unwrap().neighbor().last_heard(), boot);

    assert!(rebooted.expire_children(boot + 1).is_empty());
    assert!(rebooted.expire_children(boot + 240_000).is_empty());
    assert_eq!(rebooted.child(restored).unwrap().state(), NeighborState::Restored);

    let expired = rebooted.expire_children(boot + 240_001);
    assert_eq!(expired, vec![(ext_address(1), vec![])]);
}

#[test]
fn test_successful_exchanges_reset_child_link_failures() {
    let config = test_config();
    assert_eq!(config.table.link_failure_threshold, 3);
    let mut table = create_test_table(&config);
    let handle = attach_child(&mut table, 1, 0).unwrap();
    let entry = EntryHandle::from(handle);
    let security = CountingSecurity::new(0);

    for _ in 0..2 {
        assert_eq!(
            table.record_link_failure(entry, 0).unwrap(),
            LinkFailureOutcome::Counted
        );
    }
    table
        .accept_frame(entry, FrameClass::Link, 1, 0, 100, Some(-70))
        .unwrap();
    assert_eq!(table.child(handle).unwrap().neighbor().link_failures(), 0);

    for _ in 0..2 {
        assert_eq!(
            table.record_link_failure(entry, 100).unwrap(),
            LinkFailureOutcome::Counted
        );
    }
    table.enqueue_indirect(handle, "update".into(), &security).unwrap();
    assert!(table.handle_data_poll(handle).unwrap().is_some());
    let acked = TxResult::Success {
        next_fragment_offset: None,
    };
    assert_eq!(
        table.handle_transmit_done(handle, acked, &security).unwrap(),
        DeliveryOutcome::Delivered("update".to_string())
    );

    assert_eq!(
        table.record_link_failure(entry, 200).unwrap(),
        LinkFailureOutcome::Counted
    );
    assert_eq!(table.child(handle).unwrap().state(), NeighborState::Valid);
}

#[test]
fn test_failed_transmit_does_not_reset_link_failures() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let handle = attach_child(&mut table, 1, 0).unwrap();
    let entry = EntryHandle::from(handle);
    let security = CountingSecurity::new(0);

    for _ in 0..2 {
        table.record_link_failure(entry, 0).unwrap();
    }
    table.enqueue_indirect(handle, "update".into(), &security).unwrap();
    assert!(table.handle_data_poll(handle).unwrap().is_some());
    table
        .handle_transmit_done(handle, TxResult::Failure, &security)
        .unwrap();

    assert_eq!(
        table.record_link_failure(entry, 0).unwrap(),
        LinkFailureOutcome::Released(vec!["update".to_string()])
    );
}
