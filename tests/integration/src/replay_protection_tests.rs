//! Replay protection tests
//!
//! Frame counters are tracked per peer and per frame class under the
//! peer's key sequence. A rejected frame must leave the entry untouched.

use crate::test_utils::*;
use meshlink_core::Rloc16;
use meshlink_topology::{
    AttachRequest, AttachedLink, Challenge, EntryHandle, FrameClass, NeighborState,
    TopologyError, TopologyTable,
};
use proptest::prelude::*;

fn counters(table: &TopologyTable<TestMessage>, h: EntryHandle) -> AttachedLink {
    *table.neighbor(h).unwrap().attached().unwrap()
}

#[test]
fn test_replayed_frame_leaves_entry_untouched() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let h = EntryHandle::from(attach_child(&mut table, 1, 0).unwrap());

    table.accept_frame(h, FrameClass::Link, 10, 0, 100, Some(-60)).unwrap();
    let before = counters(&table, h);

    for counter in [10, 9, 0] {
        let err = table
            .accept_frame(h, FrameClass::Link, counter, 0, 200, Some(-95))
            .unwrap_err();
        assert_eq!(
            err,
            TopologyError::ReplayRejected {
                peer: ext_address(1),
                counter,
                stored: 10,
            }
        );
    }

    let neighbor = table.neighbor(h).unwrap();
    assert_eq!(neighbor.last_heard(), 100);
    assert_eq!(neighbor.link_info().last_rss(), Some(-60));
    assert_eq!(counters(&table, h), before);
    assert_eq!(table.stats().replay_rejections, 3);
}

#[test]
fn test_link_and_mle_counters_are_independent() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let h = EntryHandle::from(attach_child(&mut table, 1, 0).unwrap());

    table.accept_frame(h, FrameClass::Link, 1_000, 0, 1, None).unwrap();
    table.accept_frame(h, FrameClass::Mle, 1, 0, 2, None).unwrap();

    let link = counters(&table, h);
    assert_eq!(link.link_frame_counter, 1_000);
    assert_eq!(link.mle_frame_counter, 1);
}

#[test]
fn test_key_sequence_rollover() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let h = EntryHandle::from(attach_child(&mut table, 1, 0).unwrap());
    table.accept_frame(h, FrameClass::Link, 5_000, 0, 1, None).unwrap();
    table.accept_frame(h, FrameClass::Mle, 800, 0, 2, None).unwrap();

    // a newer key restarts the counters
    table.accept_frame(h, FrameClass::Link, 1, 1, 3, None).unwrap();
    assert_eq!(table.neighbor(h).unwrap().key_sequence(), 1);
    table.accept_frame(h, FrameClass::Mle, 1, 1, 4, None).unwrap();

    // frames under the previous key are replays now
    assert!(matches!(
        table.accept_frame(h, FrameClass::Link, 9_999, 0, 5, None),
        Err(TopologyError::ReplayRejected { .. })
    ));
    assert_eq!(table.neighbor(h).unwrap().key_sequence(), 1);
}

#[test]
fn test_frames_from_unattached_peers_rejected() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let h = table.allocate_child(ext_address(1)).unwrap();

    assert_eq!(
        table.accept_frame(h.into(), FrameClass::Link, 1, 0, 0, None),
        Err(TopologyError::InvalidStateAccess {
            state: NeighborState::Invalid
        })
    );
    assert_eq!(table.stats().replay_rejections, 0);
}

#[test]
fn test_parent_frames_checked() {
    let config = test_config();
    let mut table = create_test_table(&config);
    let parent = table.set_parent(ext_address(9));
    parent
        .begin_attach(AttachRequest::LinkRequest, Challenge::default(), 0)
        .unwrap();
    parent
        .complete_attach(completion(Rloc16::from_router_id(3), 0), 0)
        .unwrap();

    table.accept_frame(EntryHandle::Parent, FrameClass::Mle, 4, 0, 1, None).unwrap();
    assert!(table
        .accept_frame(EntryHandle::Parent, FrameClass::Mle, 4, 0, 2, None)
        .is_err());
    assert_eq!(
        table.find_by_rloc16(Rloc16::from_router_id(3)),
        Ok(EntryHandle::Parent)
    );
}

proptest! {
    #[test]
    fn test_accepted_iff_counter_advances(
        frames in prop::collection::vec((any::<bool>(), 0u32..64), 1..64)
    ) {
        let config = test_config();
        let mut table = create_test_table(&config);
        let h = EntryHandle::from(attach_child(&mut table, 1, 0).unwrap());
        let mut highest = [0u32; 2];

        for (is_mle, counter) in frames {
            let (class, slot) = if is_mle { (FrameClass::Mle, 1) } else { (FrameClass::Link, 0) };
            let accepted = table.accept_frame(h, class, counter, 0, 0, None).is_ok();
            prop_assert_eq!(accepted, counter > highest[slot]);
            if accepted {
                highest[slot] = counter;
            }
        }

        let link = counters(&table, h);
        prop_assert_eq!(link.link_frame_counter, highest[0]);
        prop_assert_eq!(link.mle_frame_counter, highest[1]);
    }
}
