//! Indirect (buffered) delivery to sleepy children
//!
//! A sleepy child only receives traffic right after it polls. Each child
//! keeps a FIFO of buffered messages; the head of the queue is the message
//! in flight, and it alone carries transmit metadata. The flow is:
//!
//! 1. [`IndirectSender::enqueue`] appends a message. If the queue was empty
//!    the message is in flight immediately, with the device frame counter
//!    and key id captured so every retry reuses them.
//! 2. [`IndirectSender::handle_data_poll`] hands out the in-flight message
//!    with a fresh link-layer sequence number.
//! 3. [`IndirectSender::handle_transmit_done`] either advances the fragment
//!    offset, completes the message, or counts a failed attempt. Completed or
//!    exhausted messages are returned to the caller and the next queued
//!    message is promoted.

use crate::child::Child;
use crate::error::{EnqueueError, TopologyError};
use meshlink_core::IndirectConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Source of the device's outgoing security parameters
pub trait FrameSecurity {
    /// Frame counter the next secured frame would use
    fn frame_counter(&self) -> u32;

    /// Key id of the active key
    fn key_id(&self) -> u8;
}

/// Transmit metadata of the in-flight message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InFlightInfo {
    /// Frame counter captured when the message went in flight
    pub frame_counter: u32,
    /// Key id captured when the message went in flight
    pub key_id: u8,
    /// Offset of the next fragment to send
    pub fragment_offset: u16,
    /// Failed poll-triggered attempts for the current fragment
    pub tx_attempts: u8,
    /// Link-layer sequence number of the latest attempt
    pub sequence_number: Option<u8>,
}

/// Per-child FIFO whose head is the in-flight message
#[derive(Debug, Clone)]
pub struct IndirectQueue<M> {
    messages: VecDeque<M>,
    in_flight: Option<InFlightInfo>,
}

impl<M> Default for IndirectQueue<M> {
    fn default() -> Self {
        Self {
            messages: VecDeque::new(),
            in_flight: None,
        }
    }
}

impl<M> IndirectQueue<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight_message(&self) -> Option<&M> {
        self.messages.front()
    }

    pub fn in_flight_info(&self) -> Option<&InFlightInfo> {
        self.in_flight.as_ref()
    }

    /// Messages waiting behind the in-flight one
    pub fn queued_count(&self) -> usize {
        self.messages.len().saturating_sub(1)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove every message without delivering it.
    pub fn discard_all(&mut self) -> Vec<M> {
        self.in_flight = None;
        self.messages.drain(..).collect()
    }

    fn push(&mut self, message: M, security: &impl FrameSecurity) -> bool {
        self.messages.push_back(message);
        if self.in_flight.is_none() {
            self.in_flight = Some(snapshot(security));
            return true;
        }
        false
    }

    /// Pop the in-flight message and put the next one in flight.
    fn complete_head(&mut self, security: &impl FrameSecurity) -> Option<M> {
        let done = self.messages.pop_front();
        self.in_flight = if self.messages.is_empty() {
            None
        } else {
            Some(snapshot(security))
        };
        done
    }
}

fn snapshot(security: &impl FrameSecurity) -> InFlightInfo {
    InFlightInfo {
        frame_counter: security.frame_counter(),
        key_id: security.key_id(),
        ..InFlightInfo::default()
    }
}

/// Result of a successful enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queue was empty; the message is now in flight
    InFlight,
    /// Message waits behind others; `queued` is the new queued count
    Queued { queued: usize },
}

/// Frame to send in response to a data poll
#[derive(Debug)]
pub struct IndirectFrame<'a, M> {
    pub message: &'a M,
    pub frame_counter: u32,
    pub key_id: u8,
    pub fragment_offset: u16,
    pub sequence_number: u8,
    /// 1-based attempt number for the current fragment
    pub attempt: u8,
}

/// Link-layer transmit result for the in-flight message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxResult {
    /// Frame acknowledged; `next_fragment_offset` is set when more fragments remain
    Success { next_fragment_offset: Option<u16> },
    /// No acknowledgement or channel access failure
    Failure,
}

/// What happened to the in-flight message after a transmit completed
#[derive(Debug, PartialEq, Eq)]
pub enum DeliveryOutcome<M> {
    /// No message was in flight
    Idle,
    /// A fragment went out; the message stays in flight
    FragmentSent { next_offset: u16 },
    /// Message fully delivered and returned to the sender
    Delivered(M),
    /// Attempt failed; the message waits for the next poll
    WillRetry { attempts: u8 },
    /// Retry cap reached; the message is dropped and returned to the sender
    RetryExhausted(M),
}

/// Drives the single-in-flight delivery protocol for sleepy children
#[derive(Debug, Clone)]
pub struct IndirectSender {
    retry_cap: u8,
    max_queued: usize,
    next_sequence: u8,
}

impl IndirectSender {
    /// Create a sender with a random initial link-layer sequence number.
    pub fn new(config: &IndirectConfig) -> Self {
        Self::with_initial_sequence(config, rand::thread_rng().gen())
    }

    pub fn with_initial_sequence(config: &IndirectConfig, sequence: u8) -> Self {
        Self {
            retry_cap: config.retry_cap.max(1),
            max_queued: config.max_queued_per_child,
            next_sequence: sequence,
        }
    }

    pub fn retry_cap(&self) -> u8 {
        self.retry_cap
    }

    fn allocate_sequence(&mut self) -> u8 {
        let seq = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        seq
    }

    /// Buffer a message for `child`.
    ///
    /// Fails, returning the message, when `max_queued` messages already wait
    /// behind the in-flight one.
    pub fn enqueue<M: Debug>(
        &mut self,
        child: &mut Child<M>,
        message: M,
        security: &impl FrameSecurity,
    ) -> Result<EnqueueOutcome, EnqueueError<M>> {
        let peer = child.neighbor().ext_address();
        let queue = child.indirect();
        if !queue.is_empty() && queue.queued_count() >= self.max_queued {
            warn!(%peer, queued = queue.queued_count(), "indirect queue overflow");
            return Err(EnqueueError {
                error: TopologyError::QueueOverflow { child: peer },
                message,
            });
        }

        if child.indirect_mut().push(message, security) {
            child.src_match_mut().request();
            debug!(%peer, "indirect message in flight");
            Ok(EnqueueOutcome::InFlight)
        } else {
            let queued = child.indirect().queued_count();
            debug!(%peer, queued, "indirect message queued");
            Ok(EnqueueOutcome::Queued { queued })
        }
    }

    /// Handle a data poll from `child`, returning the frame to send if any.
    pub fn handle_data_poll<'a, M>(
        &mut self,
        child: &'a mut Child<M>,
    ) -> Option<IndirectFrame<'a, M>> {
        if child.indirect().is_empty() {
            child.set_data_request_pending(false);
            return None;
        }

        let sequence_number = self.allocate_sequence();
        child.set_data_request_pending(true);
        let peer = child.neighbor().ext_address();

        let queue = child.indirect_mut();
        let info = queue.in_flight.as_mut()?;
        info.sequence_number = Some(sequence_number);
        let info = *info;

        debug!(%peer, sequence_number, offset = info.fragment_offset, "indirect transmit on poll");
        Some(IndirectFrame {
            message: queue.messages.front()?,
            frame_counter: info.frame_counter,
            key_id: info.key_id,
            fragment_offset: info.fragment_offset,
            sequence_number,
            attempt: info.tx_attempts.saturating_add(1),
        })
    }

    /// Handle the link-layer result of the last poll-triggered transmit.
    pub fn handle_transmit_done<M>(
        &mut self,
        child: &mut Child<M>,
        result: TxResult,
        security: &impl FrameSecurity,
    ) -> DeliveryOutcome<M> {
        let peer = child.neighbor().ext_address();
        child.set_data_request_pending(false);

        let retry_cap = self.retry_cap;
        let queue = child.indirect_mut();
        let Some(info) = queue.in_flight.as_mut() else {
            return DeliveryOutcome::Idle;
        };

        let outcome = match result {
            TxResult::Success {
                next_fragment_offset: Some(next_offset),
            } => {
                info.fragment_offset = next_offset;
                info.tx_attempts = 0;
                info.sequence_number = None;
                debug!(%peer, next_offset, "indirect fragment sent");
                return DeliveryOutcome::FragmentSent { next_offset };
            }
            TxResult::Success {
                next_fragment_offset: None,
            } => match queue.complete_head(security) {
                Some(message) => {
                    debug!(%peer, remaining = queue.len(), "indirect message delivered");
                    DeliveryOutcome::Delivered(message)
                }
                None => DeliveryOutcome::Idle,
            },
            TxResult::Failure => {
                info.tx_attempts = info.tx_attempts.saturating_add(1);
                let attempts = info.tx_attempts;
                if attempts < retry_cap {
                    debug!(%peer, attempts, "indirect transmit failed, will retry");
                    return DeliveryOutcome::WillRetry { attempts };
                }
                match queue.complete_head(security) {
                    Some(message) => {
                        warn!(%peer, attempts, "indirect retry cap reached, message dropped");
                        DeliveryOutcome::RetryExhausted(message)
                    }
                    None => DeliveryOutcome::Idle,
                }
            }
        };

        if child.indirect().is_empty() {
            child.src_match_mut().clear();
        }
        outcome
    }
}
