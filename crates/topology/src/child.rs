//! Child entries
//!
//! A child is a neighbor that attached to this node. On top of the neighbor
//! state it carries its registered IPv6 addresses, its keep-alive timeout,
//! the buffered messages waiting for it to poll, and a piece of handshake
//! data whose meaning depends on the attach phase (see [`ChildExchange`]).

use crate::error::{TopologyError, TopologyResult};
use crate::indirect::IndirectQueue;
use crate::neighbor::{
    AttachCompletion, AttachRequest, Challenge, FrameClass, Neighbor, NeighborState, RssSample,
};
use meshlink_core::{DeviceMode, ExtAddress, KeySequence, Rloc16, Timestamp};
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

/// Most TLV types a child may request in one exchange
pub const MAX_REQUEST_TLVS: usize = 5;

/// TLV types requested by an attached child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestTlvs {
    tlvs: [u8; MAX_REQUEST_TLVS],
    len: u8,
}

impl RequestTlvs {
    pub fn new(tlvs: &[u8]) -> TopologyResult<Self> {
        if tlvs.len() > MAX_REQUEST_TLVS {
            return Err(TopologyError::TooManyRequestTlvs {
                count: tlvs.len(),
                max: MAX_REQUEST_TLVS,
            });
        }
        let mut buf = [0u8; MAX_REQUEST_TLVS];
        buf[..tlvs.len()].copy_from_slice(tlvs);
        Ok(Self {
            tlvs: buf,
            len: tlvs.len() as u8,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.tlvs[..self.len as usize]
    }
}

/// Handshake data held by a child, keyed by attach phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChildExchange {
    /// Nothing held (detached)
    #[default]
    None,
    /// Challenge this node issued, awaiting the child's response
    AttachChallenge(Challenge),
    /// TLVs the attached child asked for
    RequestTlvs(RequestTlvs),
}

/// Hardware source-address-match bookkeeping for a child.
///
/// Radios that support it auto-set the frame-pending bit in acks for
/// children registered in their match table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SrcMatch {
    short: bool,
    pending: bool,
}

impl SrcMatch {
    /// Register by short address instead of extended address
    pub fn use_short(&self) -> bool {
        self.short
    }

    pub fn set_use_short(&mut self, short: bool) {
        self.short = short;
    }

    /// Entry should be in the table but has not been added yet
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Ask for the child to be added to the match table
    pub fn request(&mut self) {
        self.pending = true;
    }

    /// The radio driver added the entry
    pub fn confirm(&mut self) {
        self.pending = false;
    }

    /// Forget both the flag and the pending request
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Persistable summary of an attached child
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRecord {
    pub ext_address: ExtAddress,
    pub rloc16: Rloc16,
    pub timeout_secs: u32,
    pub mode: DeviceMode,
    pub network_data_version: u8,
    pub key_sequence: KeySequence,
}

/// A child attached (or attaching) to this node
#[derive(Debug)]
pub struct Child<M> {
    neighbor: Neighbor,
    addresses: Vec<Ipv6Addr>,
    max_addresses: usize,
    timeout_secs: u32,
    indirect: IndirectQueue<M>,
    exchange: ChildExchange,
    network_data_version: u8,
    src_match: SrcMatch,
}

impl<M> Child<M> {
    pub fn new(ext_address: ExtAddress, max_addresses: usize) -> Self {
        Self {
            neighbor: Neighbor::new(ext_address),
            addresses: Vec::with_capacity(max_addresses),
            max_addresses,
            timeout_secs: 0,
            indirect: IndirectQueue::new(),
            exchange: ChildExchange::None,
            network_data_version: 0,
            src_match: SrcMatch::default(),
        }
    }

    /// Link state shared with routers and the parent
    pub fn neighbor(&self) -> &Neighbor {
        &self.neighbor
    }

    /// Current link state
    pub fn state(&self) -> NeighborState {
        self.neighbor.state()
    }

    /// Messages buffered for this child
    pub fn indirect(&self) -> &IndirectQueue<M> {
        &self.indirect
    }

    pub(crate) fn indirect_mut(&mut self) -> &mut IndirectQueue<M> {
        &mut self.indirect
    }

    /// Source-match table flags
    pub fn src_match(&self) -> &SrcMatch {
        &self.src_match
    }

    /// Mutable source-match table flags
    pub fn src_match_mut(&mut self) -> &mut SrcMatch {
        &mut self.src_match
    }

    /// Record the device mode the child advertised
    pub fn set_mode(&mut self, mode: DeviceMode) {
        self.neighbor.set_mode(mode);
    }

    /// Mark or clear an outstanding data poll
    pub fn set_data_request_pending(&mut self, pending: bool) {
        self.neighbor.set_data_request_pending(pending);
    }

    /// Keep-alive timeout in seconds
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Set the keep-alive timeout requested by the child
    pub fn set_timeout_secs(&mut self, timeout_secs: u32) {
        self.timeout_secs = timeout_secs;
    }

    /// Last network data version sent to the child
    pub fn network_data_version(&self) -> u8 {
        self.network_data_version
    }

    /// Record the network data version sent to the child
    pub fn set_network_data_version(&mut self, version: u8) {
        self.network_data_version = version;
    }

    /// Messages waiting behind the in-flight one
    pub fn queued_indirect_message_count(&self) -> usize {
        self.indirect.queued_count()
    }

    /// Whether the keep-alive interval elapsed since the child was last heard.
    pub fn is_timed_out(&self, now: Timestamp) -> bool {
        self.neighbor.is_state_valid_or_restoring()
            && now.saturating_sub(self.neighbor.last_heard()) > self.timeout_secs as u64 * 1000
    }

    /// Data carried by the current attach phase
    pub fn exchange(&self) -> &ChildExchange {
        &self.exchange
    }

    /// Challenge issued to this child; only held during the handshake.
    pub fn attach_challenge(&self) -> TopologyResult<&Challenge> {
        match (&self.exchange, self.state().is_pending()) {
            (ChildExchange::AttachChallenge(c), true) => Ok(c),
            _ => Err(TopologyError::InvalidStateAccess { state: self.state() }),
        }
    }

    /// TLVs requested by the child; only held once attached.
    pub fn request_tlvs(&self) -> TopologyResult<&[u8]> {
        if !self.neighbor.is_state_valid_or_restoring() {
            return Err(TopologyError::InvalidStateAccess { state: self.state() });
        }
        match &self.exchange {
            ChildExchange::RequestTlvs(tlvs) => Ok(tlvs.as_slice()),
            _ => Ok(&[]),
        }
    }

    pub fn set_request_tlvs(&mut self, tlvs: &[u8]) -> TopologyResult<()> {
        if !self.neighbor.is_state_valid_or_restoring() {
            return Err(TopologyError::InvalidStateAccess { state: self.state() });
        }
        self.exchange = ChildExchange::RequestTlvs(RequestTlvs::new(tlvs)?);
        Ok(())
    }

    /// A Parent Request arrived. `peer_challenge` must be answered,
    /// `issued_challenge` is what the child has to echo back.
    pub fn begin_attach(
        &mut self,
        peer_challenge: Challenge,
        issued_challenge: Challenge,
        now: Timestamp,
    ) -> TopologyResult<()> {
        self.neighbor
            .begin_attach(AttachRequest::ParentRequest, peer_challenge, now)?;
        self.exchange = ChildExchange::AttachChallenge(issued_challenge);
        Ok(())
    }

    pub fn progress_child_id_request(
        &mut self,
        peer_challenge: Challenge,
        now: Timestamp,
    ) -> TopologyResult<()> {
        self.neighbor.progress_child_id_request(peer_challenge, now)
    }

    /// Complete the attach (or re-verification). The attach challenge is
    /// replaced by the child's requested TLVs.
    pub fn complete_attach(
        &mut self,
        completion: AttachCompletion,
        request_tlvs: &[u8],
        now: Timestamp,
    ) -> TopologyResult<()> {
        let tlvs = RequestTlvs::new(request_tlvs)?;
        self.neighbor.complete_attach(completion, now)?;
        self.exchange = ChildExchange::RequestTlvs(tlvs);
        Ok(())
    }

    pub fn begin_reverify(&mut self) -> TopologyResult<()> {
        self.neighbor.begin_reverify()
    }

    /// Load a persisted child; its keep-alive interval starts at `now`.
    pub(crate) fn restore(&mut self, record: &ChildRecord, now: Timestamp) -> TopologyResult<()> {
        self.neighbor.restore(
            crate::neighbor::AttachedLink {
                link_frame_counter: 0,
                mle_frame_counter: 0,
                rloc16: record.rloc16,
            },
            record.key_sequence,
            now,
        )?;
        self.neighbor.set_mode(record.mode);
        self.timeout_secs = record.timeout_secs;
        self.network_data_version = record.network_data_version;
        self.exchange = ChildExchange::None;
        Ok(())
    }

    /// Snapshot for persistence; only attached children have one.
    pub fn record(&self) -> TopologyResult<ChildRecord> {
        Ok(ChildRecord {
            ext_address: self.neighbor.ext_address(),
            rloc16: self.neighbor.rloc16()?,
            timeout_secs: self.timeout_secs,
            mode: self.neighbor.mode(),
            network_data_version: self.network_data_version,
            key_sequence: self.neighbor.key_sequence(),
        })
    }

    /// Detach the child, returning any buffered messages undelivered.
    pub fn invalidate(&mut self) -> Vec<M> {
        self.neighbor.invalidate();
        self.exchange = ChildExchange::None;
        self.addresses.clear();
        self.src_match.clear();
        self.indirect.discard_all()
    }

    /// Replay check and liveness update for a received frame.
    pub fn accept_frame(
        &mut self,
        class: FrameClass,
        counter: u32,
        key_sequence: KeySequence,
        now: Timestamp,
        rss: Option<RssSample>,
    ) -> TopologyResult<()> {
        self.neighbor
            .accept_frame(class, counter, key_sequence, now, rss)
    }

    /// Count a link failure; on reaching `threshold` the child is detached
    /// and its buffered messages are returned.
    pub fn record_link_failure(&mut self, threshold: u8) -> Option<Vec<M>> {
        if self.neighbor.record_link_failure(threshold) {
            return Some(self.invalidate());
        }
        None
    }

    /// Clear the failure count after a successful exchange
    pub fn reset_link_failures(&mut self) {
        self.neighbor.reset_link_failures();
    }

    /// Registered IPv6 addresses in registration order
    pub fn addresses(&self) -> &[Ipv6Addr] {
        &self.addresses
    }

    pub fn has_address(&self, address: &Ipv6Addr) -> bool {
        self.addresses.contains(address)
    }

    /// Register an address. Returns `false` if it was already registered.
    pub fn register_address(&mut self, address: Ipv6Addr) -> TopologyResult<bool> {
        if self.has_address(&address) {
            return Ok(false);
        }
        if self.addresses.len() >= self.max_addresses {
            return Err(TopologyError::AddressTableFull {
                max: self.max_addresses,
            });
        }
        self.addresses.push(address);
        Ok(true)
    }

    pub fn remove_address(&mut self, address: &Ipv6Addr) -> bool {
        let before = self.addresses.len();
        self.addresses.retain(|a| a != address);
        self.addresses.len() != before
    }

    pub fn clear_addresses(&mut self) {
        self.addresses.clear();
    }
}
