//! Test utilities for topology integration tests

use meshlink_core::{Config, ExtAddress, Rloc16, Timestamp};
use meshlink_topology::{
    AttachCompletion, Challenge, ChildHandle, FrameSecurity, IndirectSender, RouterHandle,
    TopologyResult, TopologyTable,
};
use std::cell::Cell;

/// Message type carried by the indirect queues in these tests
pub type TestMessage = String;

/// Build a configuration with small, test-friendly capacities
pub fn test_config() -> Config {
    let mut config = Config::default_config();
    config.table.max_children = 4;
    config.table.max_routers = 4;
    config.table.max_ip6_addresses_per_child = 2;
    config.table.router_reclaim_delay_ms = 10_000;
    config.table.link_failure_threshold = 3;
    config.indirect.retry_cap = 3;
    config.indirect.max_queued_per_child = 3;
    config
}

/// Build a table with a deterministic link-layer sequence number
pub fn create_test_table(config: &Config) -> TopologyTable<TestMessage> {
    meshlink_core::logging::init_for_tests();
    let sender = IndirectSender::with_initial_sequence(&config.indirect, 0);
    TopologyTable::with_sender(config, sender).expect("test config is valid")
}

/// Extended address whose last byte is `n`
pub fn ext_address(n: u8) -> ExtAddress {
    ExtAddress::new([0x02, 0x00, 0x5e, 0x10, 0x00, 0x00, 0x00, n])
}

/// Attach values with zeroed counters
pub fn completion(rloc16: Rloc16, key_sequence: u32) -> AttachCompletion {
    AttachCompletion {
        rloc16,
        link_frame_counter: 0,
        mle_frame_counter: 0,
        key_sequence,
    }
}

/// Run the full Parent Request / Child ID Request handshake for a new child
pub fn attach_child(
    table: &mut TopologyTable<TestMessage>,
    n: u8,
    now: Timestamp,
) -> TopologyResult<ChildHandle> {
    let handle = table.allocate_child(ext_address(n))?;
    let child = table.child_mut(handle)?;
    child.begin_attach(Challenge::new(&[n; 8])?, Challenge::new(&[!n; 8])?, now)?;
    child.progress_child_id_request(Challenge::new(&[n, n])?, now)?;
    child.complete_attach(completion(Rloc16::from_child(0, n as u16), 0), &[0x0b], now)?;
    Ok(handle)
}

/// Run the Link Request handshake for a new router neighbor
pub fn attach_router(
    table: &mut TopologyTable<TestMessage>,
    n: u8,
    now: Timestamp,
) -> TopologyResult<RouterHandle> {
    let handle = table.allocate_router(ext_address(n), now)?;
    let id = handle.router_id();
    let router = table.router_mut(handle)?;
    router.begin_attach(Challenge::new(&[n; 8])?, now)?;
    router.complete_attach(completion(Rloc16::from_router_id(id), 0), now)?;
    Ok(handle)
}

/// Outgoing frame security that counts up from a starting value
pub struct CountingSecurity {
    next: Cell<u32>,
    key_id: u8,
}

impl CountingSecurity {
    pub fn new(start: u32) -> Self {
        Self {
            next: Cell::new(start),
            key_id: 1,
        }
    }

    /// Next frame counter that will be handed out
    pub fn peek(&self) -> u32 {
        self.next.get()
    }
}

impl FrameSecurity for CountingSecurity {
    fn frame_counter(&self) -> u32 {
        let value = self.next.get();
        self.next.set(value + 1);
        value
    }

    fn key_id(&self) -> u8 {
        self.key_id
    }
}
