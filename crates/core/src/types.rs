//! Identifier and flag types shared across the meshlink crates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic time in milliseconds, supplied by the node's timer collaborator.
pub type Timestamp = u64;

/// Security key rotation epoch.
pub type KeySequence = u32;

/// IEEE 802.15.4 extended address (globally unique per device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ExtAddress(pub [u8; ExtAddress::LEN]);

impl ExtAddress {
    /// Length of an extended address in bytes
    pub const LEN: usize = 8;

    /// Create an extended address from raw bytes
    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl From<[u8; ExtAddress::LEN]> for ExtAddress {
    fn from(bytes: [u8; ExtAddress::LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ExtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Short routing locator.
///
/// The upper six bits carry the router id, the low nine bits the child id.
/// A child id of zero addresses the router itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rloc16(pub u16);

impl Rloc16 {
    const ROUTER_ID_OFFSET: u16 = 10;
    const CHILD_ID_MASK: u16 = 0x01ff;

    /// Largest router id representable in an RLOC16
    pub const MAX_ROUTER_ID: u8 = 62;

    /// Reserved value meaning "no locator assigned"
    pub const INVALID: Rloc16 = Rloc16(0xfffe);

    /// Build the locator of a router
    pub fn from_router_id(router_id: u8) -> Self {
        Self((router_id as u16) << Self::ROUTER_ID_OFFSET)
    }

    /// Build the locator of a child attached to `router_id`
    pub fn from_child(router_id: u8, child_id: u16) -> Self {
        Self(((router_id as u16) << Self::ROUTER_ID_OFFSET) | (child_id & Self::CHILD_ID_MASK))
    }

    /// Router id portion
    pub fn router_id(self) -> u8 {
        (self.0 >> Self::ROUTER_ID_OFFSET) as u8
    }

    /// Child id portion
    pub fn child_id(self) -> u16 {
        self.0 & Self::CHILD_ID_MASK
    }

    /// Whether this locator names a router rather than a child
    pub fn is_router(self) -> bool {
        self.child_id() == 0
    }
}

impl fmt::Display for Rloc16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// 4-bit device mode flags advertised during attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceMode(u8);

impl DeviceMode {
    /// Receiver stays on while idle
    pub const RX_ON_WHEN_IDLE: u8 = 0x08;
    /// Data requests are secured at the link layer
    pub const SECURE_DATA_REQUESTS: u8 = 0x04;
    /// Full thread device
    pub const FULL_THREAD_DEVICE: u8 = 0x02;
    /// Requests the full network data set
    pub const FULL_NETWORK_DATA: u8 = 0x01;

    const MASK: u8 = 0x0f;

    /// Create a mode from raw bits; bits above the low nibble are discarded.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::MASK)
    }

    /// Raw 4-bit value
    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_rx_on_when_idle(self) -> bool {
        self.0 & Self::RX_ON_WHEN_IDLE != 0
    }

    pub fn is_secure_data_request(self) -> bool {
        self.0 & Self::SECURE_DATA_REQUESTS != 0
    }

    pub fn is_full_thread_device(self) -> bool {
        self.0 & Self::FULL_THREAD_DEVICE != 0
    }

    pub fn is_full_network_data(self) -> bool {
        self.0 & Self::FULL_NETWORK_DATA != 0
    }

    /// A sleepy device only receives buffered traffic when it polls.
    pub fn is_sleepy(self) -> bool {
        !self.is_rx_on_when_idle()
    }
}
