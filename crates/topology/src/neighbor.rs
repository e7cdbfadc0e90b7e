//! Neighbor entries and the per-peer link state machine
//!
//! A neighbor is either detached, in the middle of a handshake (holding the
//! challenge it must answer), or attached (holding frame counters and its
//! RLOC16). [`LinkSession`] carries exactly one of those payloads, so the
//! state alone decides which data can be read.

use crate::error::{TopologyError, TopologyResult};
use crate::link_quality::{LinkQuality, LinkQualityInfo};
use meshlink_core::{DeviceMode, ExtAddress, KeySequence, Rloc16, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Link states of a neighbor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NeighborState {
    /// No relationship tracked
    Invalid,
    /// Loaded from persisted state, not yet re-verified
    Restored,
    /// Received a Parent Request
    ParentRequest,
    /// Received a Child ID Request
    ChildIdRequest,
    /// Sent a Link Request
    LinkRequest,
    /// Sent a Child Update Request to re-verify an attached child
    ChildUpdateRequest,
    /// Fully attached
    Valid,
}

impl NeighborState {
    /// States in which frames may be exchanged with the peer.
    pub fn is_valid_or_restoring(self) -> bool {
        matches!(
            self,
            NeighborState::Valid | NeighborState::Restored | NeighborState::ChildUpdateRequest
        )
    }

    /// States that hold a handshake challenge.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            NeighborState::ParentRequest
                | NeighborState::ChildIdRequest
                | NeighborState::LinkRequest
        )
    }
}

/// Handshake challenge, at most [`Challenge::MAX_LEN`] bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Challenge {
    bytes: [u8; Challenge::MAX_LEN],
    len: u8,
}

impl Challenge {
    /// Largest challenge the handshake carries
    pub const MAX_LEN: usize = 8;

    /// Copy a received challenge, rejecting one longer than [`Challenge::MAX_LEN`].
    pub fn new(bytes: &[u8]) -> TopologyResult<Self> {
        if bytes.len() > Self::MAX_LEN {
            return Err(TopologyError::ChallengeTooLong {
                len: bytes.len(),
                max: Self::MAX_LEN,
            });
        }
        let mut buf = [0u8; Self::MAX_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            bytes: buf,
            len: bytes.len() as u8,
        })
    }

    /// Challenge bytes as received
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether no challenge bytes were supplied
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Payload that exists only once the security handshake has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedLink {
    /// Last accepted link-layer frame counter
    pub link_frame_counter: u32,
    /// Last accepted MLE frame counter
    pub mle_frame_counter: u32,
    /// Routing locator assigned during the handshake
    pub rloc16: Rloc16,
}

/// State together with the payload that state owns.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkSession {
    Invalid,
    Restored(AttachedLink),
    ParentRequest(Challenge),
    ChildIdRequest(Challenge),
    LinkRequest(Challenge),
    ChildUpdateRequest(AttachedLink),
    Valid(AttachedLink),
}

impl LinkSession {
    fn state(&self) -> NeighborState {
        match self {
            LinkSession::Invalid => NeighborState::Invalid,
            LinkSession::Restored(_) => NeighborState::Restored,
            LinkSession::ParentRequest(_) => NeighborState::ParentRequest,
            LinkSession::ChildIdRequest(_) => NeighborState::ChildIdRequest,
            LinkSession::LinkRequest(_) => NeighborState::LinkRequest,
            LinkSession::ChildUpdateRequest(_) => NeighborState::ChildUpdateRequest,
            LinkSession::Valid(_) => NeighborState::Valid,
        }
    }

    fn attached(&self) -> Option<&AttachedLink> {
        match self {
            LinkSession::Restored(link)
            | LinkSession::ChildUpdateRequest(link)
            | LinkSession::Valid(link) => Some(link),
            _ => None,
        }
    }

    fn attached_mut(&mut self) -> Option<&mut AttachedLink> {
        match self {
            LinkSession::Restored(link)
            | LinkSession::ChildUpdateRequest(link)
            | LinkSession::Valid(link) => Some(link),
            _ => None,
        }
    }

    fn challenge(&self) -> Option<&Challenge> {
        match self {
            LinkSession::ParentRequest(c)
            | LinkSession::ChildIdRequest(c)
            | LinkSession::LinkRequest(c) => Some(c),
            _ => None,
        }
    }
}

/// First handshake message that creates a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachRequest {
    /// A prospective child sent a Parent Request
    ParentRequest,
    /// This node sent a Link Request to a router
    LinkRequest,
}

/// Values established by a successful handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachCompletion {
    pub rloc16: Rloc16,
    pub link_frame_counter: u32,
    pub mle_frame_counter: u32,
    pub key_sequence: KeySequence,
}

/// Frame class selecting which counter a frame is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameClass {
    /// Secured at the link layer
    Link,
    /// Secured at the MLE layer
    Mle,
}

/// Received signal sample attached to an incoming frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssSample {
    pub rss_dbm: i8,
    pub noise_floor_dbm: i8,
}

/// A directly reachable peer
#[derive(Debug, Clone)]
pub struct Neighbor {
    ext_address: ExtAddress,
    last_heard: Timestamp,
    session: LinkSession,
    key_sequence: KeySequence,
    mode: DeviceMode,
    data_request_pending: bool,
    link_failures: u8,
    link_info: LinkQualityInfo,
}

impl Neighbor {
    /// Create a detached neighbor
    pub fn new(ext_address: ExtAddress) -> Self {
        Self {
            ext_address,
            last_heard: 0,
            session: LinkSession::Invalid,
            key_sequence: 0,
            mode: DeviceMode::default(),
            data_request_pending: false,
            link_failures: 0,
            link_info: LinkQualityInfo::new(),
        }
    }

    /// Extended address identifying the peer
    pub fn ext_address(&self) -> ExtAddress {
        self.ext_address
    }

    /// Time of the most recent authenticated frame
    pub fn last_heard(&self) -> Timestamp {
        self.last_heard
    }

    /// Current link state
    pub fn state(&self) -> NeighborState {
        self.session.state()
    }

    /// Whether frames may be sent to or received from this neighbor.
    pub fn is_state_valid_or_restoring(&self) -> bool {
        self.state().is_valid_or_restoring()
    }

    /// Key sequence the stored frame counters belong to
    pub fn key_sequence(&self) -> KeySequence {
        self.key_sequence
    }

    /// Device mode advertised by the peer
    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    /// Record the device mode advertised by the peer
    pub fn set_mode(&mut self, mode: DeviceMode) {
        self.mode = mode;
    }

    /// Whether a data poll from this peer is being answered
    pub fn data_request_pending(&self) -> bool {
        self.data_request_pending
    }

    /// Mark or clear an outstanding data poll
    pub fn set_data_request_pending(&mut self, pending: bool) {
        self.data_request_pending = pending;
    }

    /// Consecutive failed exchanges since the last success
    pub fn link_failures(&self) -> u8 {
        self.link_failures
    }

    /// Smoothed RSS and link margin
    pub fn link_info(&self) -> &LinkQualityInfo {
        &self.link_info
    }

    /// Current inbound link quality class
    pub fn link_quality(&self) -> LinkQuality {
        self.link_info.link_quality()
    }

    /// Attached payload; only readable in Valid, Restored or ChildUpdateRequest.
    pub fn attached(&self) -> TopologyResult<&AttachedLink> {
        self.session.attached().ok_or(TopologyError::InvalidStateAccess {
            state: self.state(),
        })
    }

    /// Routing locator; only readable in attached states.
    pub fn rloc16(&self) -> TopologyResult<Rloc16> {
        self.attached().map(|link| link.rloc16)
    }

    /// Handshake challenge; only readable while a handshake is in progress.
    pub fn challenge(&self) -> TopologyResult<&Challenge> {
        self.session.challenge().ok_or(TopologyError::InvalidStateAccess {
            state: self.state(),
        })
    }

    fn transition_error(&self, to: NeighborState) -> TopologyError {
        TopologyError::InvalidTransition {
            from: self.state(),
            to,
        }
    }

    /// Start a handshake with a detached peer.
    pub fn begin_attach(
        &mut self,
        request: AttachRequest,
        challenge: Challenge,
        now: Timestamp,
    ) -> TopologyResult<()> {
        let next = match request {
            AttachRequest::ParentRequest => LinkSession::ParentRequest(challenge),
            AttachRequest::LinkRequest => LinkSession::LinkRequest(challenge),
        };
        if self.session != LinkSession::Invalid {
            return Err(self.transition_error(next.state()));
        }

        debug!(peer = %self.ext_address, state = ?next.state(), "handshake started");
        self.session = next;
        self.last_heard = now;
        Ok(())
    }

    /// Move a child handshake from Parent Request to Child ID Request.
    pub fn progress_child_id_request(
        &mut self,
        challenge: Challenge,
        now: Timestamp,
    ) -> TopologyResult<()> {
        if self.state() != NeighborState::ParentRequest {
            return Err(self.transition_error(NeighborState::ChildIdRequest));
        }

        debug!(peer = %self.ext_address, "child id request received");
        self.session = LinkSession::ChildIdRequest(challenge);
        self.last_heard = now;
        Ok(())
    }

    /// Finish a handshake or re-verification, installing the attached payload.
    ///
    /// Any challenge held so far is discarded.
    pub fn complete_attach(
        &mut self,
        completion: AttachCompletion,
        now: Timestamp,
    ) -> TopologyResult<()> {
        match self.state() {
            NeighborState::ParentRequest
            | NeighborState::ChildIdRequest
            | NeighborState::LinkRequest
            | NeighborState::Restored
            | NeighborState::ChildUpdateRequest => {}
            _ => return Err(self.transition_error(NeighborState::Valid)),
        }

        self.session = LinkSession::Valid(AttachedLink {
            link_frame_counter: completion.link_frame_counter,
            mle_frame_counter: completion.mle_frame_counter,
            rloc16: completion.rloc16,
        });
        self.key_sequence = completion.key_sequence;
        self.link_failures = 0;
        self.last_heard = now;

        debug!(peer = %self.ext_address, rloc16 = %completion.rloc16, "neighbor attached");
        Ok(())
    }

    /// Start re-verifying an attached peer without dropping it.
    pub fn begin_reverify(&mut self) -> TopologyResult<()> {
        match self.session {
            LinkSession::Valid(link) | LinkSession::Restored(link) => {
                self.session = LinkSession::ChildUpdateRequest(link);
                debug!(peer = %self.ext_address, "re-verification started");
                Ok(())
            }
            _ => Err(self.transition_error(NeighborState::ChildUpdateRequest)),
        }
    }

    /// Load persisted attach state for a peer that has not been heard yet.
    ///
    /// `now` starts the peer's keep-alive interval.
    pub fn restore(
        &mut self,
        link: AttachedLink,
        key_sequence: KeySequence,
        now: Timestamp,
    ) -> TopologyResult<()> {
        if self.session != LinkSession::Invalid {
            return Err(self.transition_error(NeighborState::Restored));
        }
        self.session = LinkSession::Restored(link);
        self.key_sequence = key_sequence;
        self.last_heard = now;
        Ok(())
    }

    /// Drop the relationship and every state-dependent field.
    pub fn invalidate(&mut self) {
        if self.session != LinkSession::Invalid {
            debug!(peer = %self.ext_address, from = ?self.state(), "neighbor invalidated");
        }
        self.session = LinkSession::Invalid;
        self.key_sequence = 0;
        self.data_request_pending = false;
        self.link_failures = 0;
        self.link_info.clear();
    }

    /// Validate a secured frame's counter and, when accepted, record it.
    ///
    /// A rejected frame leaves every field untouched.
    pub fn accept_frame(
        &mut self,
        class: FrameClass,
        counter: u32,
        key_sequence: KeySequence,
        now: Timestamp,
        rss: Option<RssSample>,
    ) -> TopologyResult<()> {
        let state = self.state();
        let peer = self.ext_address;
        let link = self
            .session
            .attached_mut()
            .ok_or(TopologyError::InvalidStateAccess { state })?;

        let (stored, other) = match class {
            FrameClass::Link => (&mut link.link_frame_counter, &mut link.mle_frame_counter),
            FrameClass::Mle => (&mut link.mle_frame_counter, &mut link.link_frame_counter),
        };

        if key_sequence > self.key_sequence {
            debug!(%peer, from = self.key_sequence, to = key_sequence, "key sequence rollover");
            self.key_sequence = key_sequence;
            *other = 0;
        } else if key_sequence < self.key_sequence || counter <= *stored {
            warn!(%peer, ?class, counter, stored = *stored, "frame counter replay rejected");
            return Err(TopologyError::ReplayRejected {
                peer,
                counter,
                stored: *stored,
            });
        }

        *stored = counter;
        self.last_heard = now;
        self.link_failures = 0;
        if let Some(sample) = rss {
            self.link_info.add_rss(sample.rss_dbm, sample.noise_floor_dbm);
        }
        Ok(())
    }

    /// Count a failed link-layer exchange; invalidates the neighbor once
    /// `threshold` consecutive failures are reached. Returns whether it did.
    pub fn record_link_failure(&mut self, threshold: u8) -> bool {
        self.link_failures = self.link_failures.saturating_add(1);
        if self.link_failures >= threshold {
            warn!(
                peer = %self.ext_address,
                failures = self.link_failures,
                "link failure threshold reached"
            );
            self.invalidate();
            return true;
        }
        false
    }

    /// Clear the failure count after a successful exchange.
    pub fn reset_link_failures(&mut self) {
        self.link_failures = 0;
    }
}
