//! Topology table
//!
//! Owns every tracked peer: a bounded arena of children, a bounded arena of
//! routers indexed by router id, and at most one parent. All mutation goes
//! through `&mut self`, which gives the single-writer discipline the node's
//! event loop relies on; iterators borrow the table, so it cannot change
//! underneath them.
//!
//! The table never evicts on its own. When [`TopologyTable::allocate`]
//! reports [`TopologyError::TableFull`] the caller may pick a victim (for
//! example with [`TopologyTable::least_recently_heard_child`]), release it,
//! and retry.

use crate::arena::{Arena, SlotHandle, SlotStatus};
use crate::child::{Child, ChildRecord};
use crate::error::{EnqueueError, EntryKind, TopologyError, TopologyResult};
use crate::indirect::{
    DeliveryOutcome, EnqueueOutcome, FrameSecurity, IndirectFrame, IndirectSender, TxResult,
};
use crate::neighbor::{FrameClass, Neighbor, RssSample};
use crate::router::{NextHop, RouteInfo, Router};
use meshlink_core::{
    Config, CoreResult, ExtAddress, KeySequence, Rloc16, TableConfig, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::net::Ipv6Addr;
use tracing::{debug, info, warn};

/// Handle to a child slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildHandle(SlotHandle);

impl ChildHandle {
    /// Index of the child slot
    pub fn index(&self) -> u16 {
        self.0.index()
    }
}

/// Handle to a router slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouterHandle(SlotHandle);

impl RouterHandle {
    /// Router id of the slot
    pub fn router_id(&self) -> u8 {
        self.0.index() as u8
    }
}

/// Handle to any tracked peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryHandle {
    /// The single parent of this node
    Parent,
    Child(ChildHandle),
    Router(RouterHandle),
}

impl From<ChildHandle> for EntryHandle {
    fn from(handle: ChildHandle) -> Self {
        EntryHandle::Child(handle)
    }
}

impl From<RouterHandle> for EntryHandle {
    fn from(handle: RouterHandle) -> Self {
        EntryHandle::Router(handle)
    }
}

/// Result of counting a link failure
#[derive(Debug, PartialEq, Eq)]
pub enum LinkFailureOutcome<M> {
    /// Still under the threshold
    Counted,
    /// Threshold reached; the entry was released along with its buffered messages
    Released(Vec<M>),
}

/// Counters surfaced for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub replay_rejections: u64,
    pub allocation_failures: u64,
    pub indirect_delivered: u64,
    pub indirect_retry_exhausted: u64,
    pub indirect_overflows: u64,
    pub indirect_discarded: u64,
}

/// The node's record of every directly reachable peer
#[derive(Debug)]
pub struct TopologyTable<M> {
    config: TableConfig,
    noise_floor_dbm: i8,
    children: Arena<Child<M>>,
    routers: Arena<Router>,
    parent: Option<Neighbor>,
    indirect: IndirectSender,
    stats: TableStats,
}

impl<M: Debug> TopologyTable<M> {
    /// Create an empty table sized from `config`.
    ///
    /// Fails if `config` does not validate, e.g. when `max_routers` exceeds
    /// the router id space.
    pub fn new(config: &Config) -> CoreResult<Self> {
        Self::with_sender(config, IndirectSender::new(&config.indirect))
    }

    /// Create an empty table driving indirect delivery with `indirect`
    pub fn with_sender(config: &Config, indirect: IndirectSender) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config: config.table.clone(),
            noise_floor_dbm: config.link.noise_floor_dbm,
            children: Arena::with_capacity(config.table.max_children),
            routers: Arena::with_capacity(config.table.max_routers),
            parent: None,
            indirect,
            stats: TableStats::default(),
        })
    }

    /// Counters accumulated since the table was created
    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    /// Occupied child slots in any state
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Occupied router slots in any state
    pub fn router_count(&self) -> usize {
        self.routers.len()
    }

    // ---- lookup ----

    /// Find any tracked entry, whatever its state.
    pub fn find_by_ext_address(&self, address: &ExtAddress) -> TopologyResult<EntryHandle> {
        if self
            .parent
            .as_ref()
            .is_some_and(|p| p.ext_address() == *address)
        {
            return Ok(EntryHandle::Parent);
        }
        if let Some((h, _)) = self
            .children
            .iter()
            .find(|(_, c)| c.neighbor().ext_address() == *address)
        {
            return Ok(EntryHandle::Child(ChildHandle(h)));
        }
        self.routers
            .iter()
            .find(|(_, r)| r.neighbor().ext_address() == *address)
            .map(|(h, _)| EntryHandle::Router(RouterHandle(h)))
            .ok_or(TopologyError::NotFound)
    }

    /// Find an attached (or restoring) entry by its routing locator.
    pub fn find_by_rloc16(&self, rloc16: Rloc16) -> TopologyResult<EntryHandle> {
        let is_match = |n: &Neighbor| n.is_state_valid_or_restoring() && n.rloc16() == Ok(rloc16);

        if self.parent.as_ref().is_some_and(is_match) {
            return Ok(EntryHandle::Parent);
        }
        if let Some((h, _)) = self.children.iter().find(|(_, c)| is_match(c.neighbor())) {
            return Ok(EntryHandle::Child(ChildHandle(h)));
        }
        self.routers
            .iter()
            .find(|(_, r)| is_match(r.neighbor()))
            .map(|(h, _)| EntryHandle::Router(RouterHandle(h)))
            .ok_or(TopologyError::NotFound)
    }

    /// Find the attached child that registered `address`.
    pub fn find_child_by_ip6_address(&self, address: &Ipv6Addr) -> TopologyResult<ChildHandle> {
        self.valid_children()
            .find(|(_, c)| c.has_address(address))
            .map(|(h, _)| h)
            .ok_or(TopologyError::NotFound)
    }

    /// Neighbor state of any entry
    pub fn neighbor(&self, handle: EntryHandle) -> TopologyResult<&Neighbor> {
        match handle {
            EntryHandle::Parent => self.parent.as_ref().ok_or(TopologyError::NotFound),
            EntryHandle::Child(h) => self.child(h).map(Child::neighbor),
            EntryHandle::Router(h) => self.router(h).map(Router::neighbor),
        }
    }

    /// Child behind `handle`, or `StaleHandle` if the slot moved on
    pub fn child(&self, handle: ChildHandle) -> TopologyResult<&Child<M>> {
        self.children.get(handle.0).ok_or(TopologyError::StaleHandle)
    }

    pub fn child_mut(&mut self, handle: ChildHandle) -> TopologyResult<&mut Child<M>> {
        self.children
            .get_mut(handle.0)
            .ok_or(TopologyError::StaleHandle)
    }

    /// Router behind `handle`, or `StaleHandle` if the slot moved on
    pub fn router(&self, handle: RouterHandle) -> TopologyResult<&Router> {
        self.routers.get(handle.0).ok_or(TopologyError::StaleHandle)
    }

    pub fn router_mut(&mut self, handle: RouterHandle) -> TopologyResult<&mut Router> {
        self.routers
            .get_mut(handle.0)
            .ok_or(TopologyError::StaleHandle)
    }

    /// Handle of the router currently holding `router_id`
    pub fn router_by_id(&self, router_id: u8) -> TopologyResult<RouterHandle> {
        self.routers
            .iter()
            .find(|(h, _)| h.index() == router_id as u16)
            .map(|(h, _)| RouterHandle(h))
            .ok_or(TopologyError::NotFound)
    }

    /// Occupancy of a router id, including its reclaim delay
    pub fn router_slot_status(&self, router_id: u8, now: Timestamp) -> Option<SlotStatus> {
        self.routers.status(router_id as u16, now)
    }

    // ---- parent ----

    /// Current parent, if any
    pub fn parent(&self) -> Option<&Neighbor> {
        self.parent.as_ref()
    }

    pub fn parent_mut(&mut self) -> Option<&mut Neighbor> {
        self.parent.as_mut()
    }

    /// Start tracking a new parent, replacing any previous one.
    pub fn set_parent(&mut self, address: ExtAddress) -> &mut Neighbor {
        if let Some(old) = &self.parent {
            info!(old = %old.ext_address(), new = %address, "parent replaced");
        }
        self.parent.insert(Neighbor::new(address))
    }

    /// Stop tracking the parent
    pub fn clear_parent(&mut self) -> Option<Neighbor> {
        self.parent.take()
    }

    // ---- allocation ----

    /// Allocate a detached entry of `kind` for `address`.
    pub fn allocate(
        &mut self,
        kind: EntryKind,
        address: ExtAddress,
        now: Timestamp,
    ) -> TopologyResult<EntryHandle> {
        match kind {
            EntryKind::Child => self.allocate_child(address).map(EntryHandle::Child),
            EntryKind::Router => self
                .allocate_router(address, now)
                .map(EntryHandle::Router),
        }
    }

    fn check_duplicate(&self, address: ExtAddress) -> TopologyResult<()> {
        match self.find_by_ext_address(&address) {
            Ok(EntryHandle::Parent) | Err(_) => Ok(()),
            Ok(_) => Err(TopologyError::DuplicateEntry(address)),
        }
    }

    fn table_full(&mut self, kind: EntryKind) -> TopologyError {
        self.stats.allocation_failures += 1;
        warn!(?kind, "topology table full");
        TopologyError::TableFull { kind }
    }

    /// Allocate a detached child slot.
    pub fn allocate_child(&mut self, address: ExtAddress) -> TopologyResult<ChildHandle> {
        self.check_duplicate(address)?;
        let max_addresses = self.config.max_ip6_addresses_per_child;
        match self
            .children
            .insert_with(0, |_| Child::new(address, max_addresses))
        {
            Some(h) => {
                info!(peer = %address, index = h.index(), "child slot allocated");
                Ok(ChildHandle(h))
            }
            None => Err(self.table_full(EntryKind::Child)),
        }
    }

    /// Allocate the lowest router id that is free and out of its reclaim delay.
    pub fn allocate_router(
        &mut self,
        address: ExtAddress,
        now: Timestamp,
    ) -> TopologyResult<RouterHandle> {
        self.check_duplicate(address)?;
        match self
            .routers
            .insert_with(now, |id| Router::new(address, id as u8))
        {
            Some(h) => {
                info!(peer = %address, router_id = h.index(), "router slot allocated");
                Ok(RouterHandle(h))
            }
            None => Err(self.table_full(EntryKind::Router)),
        }
    }

    /// Allocate a specific router id, e.g. one assigned by the network.
    pub fn allocate_router_with_id(
        &mut self,
        address: ExtAddress,
        router_id: u8,
        now: Timestamp,
    ) -> TopologyResult<RouterHandle> {
        self.check_duplicate(address)?;
        match self
            .routers
            .insert_at(router_id as u16, now, |id| Router::new(address, id as u8))
        {
            Some(h) => {
                info!(peer = %address, router_id, "router slot allocated");
                Ok(RouterHandle(h))
            }
            None => Err(self.table_full(EntryKind::Router)),
        }
    }

    /// Recreate a child from a persisted record in the Restored state.
    ///
    /// The child counts as heard at `now`, so its keep-alive timeout runs
    /// from the restore rather than from the original attach.
    pub fn restore_child(
        &mut self,
        record: &ChildRecord,
        now: Timestamp,
    ) -> TopologyResult<ChildHandle> {
        let handle = self.allocate_child(record.ext_address)?;
        if let Err(e) = self.child_mut(handle)?.restore(record, now) {
            self.children.remove(handle.0);
            return Err(e);
        }
        debug!(peer = %record.ext_address, rloc16 = %record.rloc16, "child restored");
        Ok(handle)
    }

    // ---- release ----

    /// Release an entry. Buffered messages of a released child are returned
    /// undelivered.
    pub fn release(&mut self, handle: EntryHandle, now: Timestamp) -> TopologyResult<Vec<M>> {
        match handle {
            EntryHandle::Parent => {
                self.clear_parent().ok_or(TopologyError::NotFound)?;
                Ok(Vec::new())
            }
            EntryHandle::Child(h) => self.release_child(h),
            EntryHandle::Router(h) => self.release_router(h, now).map(|_| Vec::new()),
        }
    }

    /// Free a child slot immediately, discarding its buffered messages.
    pub fn release_child(&mut self, handle: ChildHandle) -> TopologyResult<Vec<M>> {
        let mut child = self
            .children
            .remove(handle.0)
            .ok_or(TopologyError::StaleHandle)?;
        let discarded = child.invalidate();
        self.stats.indirect_discarded += discarded.len() as u64;
        info!(
            peer = %child.neighbor().ext_address(),
            discarded = discarded.len(),
            "child released"
        );
        Ok(discarded)
    }

    /// Free a router slot; its id stays unavailable for the reclaim delay.
    /// Routes that went through this router become unreachable.
    pub fn release_router(&mut self, handle: RouterHandle, now: Timestamp) -> TopologyResult<()> {
        let until = now.saturating_add(self.config.router_reclaim_delay_ms);
        let mut router = self
            .routers
            .retire(handle.0, Some(until))
            .ok_or(TopologyError::StaleHandle)?;
        router.invalidate();

        let router_id = handle.router_id();
        for (_, other) in self.routers.iter_mut() {
            if other.next_hop() == NextHop::Via(router_id) {
                other.set_unreachable();
            }
        }
        info!(peer = %router.neighbor().ext_address(), router_id, until, "router released");
        Ok(())
    }

    /// Make router ids whose reclaim delay elapsed available again.
    pub fn process_reclaim(&mut self, now: Timestamp) -> usize {
        let freed = self.routers.sweep(now);
        if freed > 0 {
            debug!(freed, "router ids reclaimed");
        }
        freed
    }

    /// Release every child whose keep-alive timeout elapsed.
    pub fn expire_children(&mut self, now: Timestamp) -> Vec<(ExtAddress, Vec<M>)> {
        let expired: Vec<(ChildHandle, ExtAddress)> = self
            .children
            .iter()
            .filter(|(_, c)| c.is_timed_out(now))
            .map(|(h, c)| (ChildHandle(h), c.neighbor().ext_address()))
            .collect();

        expired
            .into_iter()
            .filter_map(|(h, address)| {
                debug!(peer = %address, "child timed out");
                self.release_child(h).ok().map(|msgs| (address, msgs))
            })
            .collect()
    }

    /// Child with the oldest `last_heard` among those accepted by `evictable`.
    pub fn least_recently_heard_child(
        &self,
        evictable: impl Fn(&Child<M>) -> bool,
    ) -> Option<ChildHandle> {
        self.children
            .iter()
            .filter(|(_, c)| evictable(*c))
            .min_by_key(|(_, c)| c.neighbor().last_heard())
            .map(|(h, _)| ChildHandle(h))
    }

    // ---- iteration ----

    /// Children in an attached or restoring state
    pub fn valid_children(&self) -> impl Iterator<Item = (ChildHandle, &Child<M>)> + '_ {
        self.children
            .iter()
            .filter(|(_, c)| c.neighbor().is_state_valid_or_restoring())
            .map(|(h, c)| (ChildHandle(h), c))
    }

    /// Routers in an attached or restoring state
    pub fn valid_routers(&self) -> impl Iterator<Item = (RouterHandle, &Router)> + '_ {
        self.routers
            .iter()
            .filter(|(_, r)| r.neighbor().is_state_valid_or_restoring())
            .map(|(h, r)| (RouterHandle(h), r))
    }

    /// Attached or restoring entries of `kind`
    pub fn iter_valid(
        &self,
        kind: EntryKind,
    ) -> Box<dyn Iterator<Item = (EntryHandle, &Neighbor)> + '_> {
        match kind {
            EntryKind::Child => Box::new(
                self.valid_children()
                    .map(|(h, c)| (EntryHandle::Child(h), c.neighbor())),
            ),
            EntryKind::Router => Box::new(
                self.valid_routers()
                    .map(|(h, r)| (EntryHandle::Router(h), r.neighbor())),
            ),
        }
    }

    /// Route inputs of every valid router, for the route computation
    pub fn route_infos(&self) -> Vec<RouteInfo> {
        self.valid_routers().map(|(_, r)| r.route_info()).collect()
    }

    // ---- link events ----

    /// Check and record a secured frame from `handle`.
    pub fn accept_frame(
        &mut self,
        handle: EntryHandle,
        class: FrameClass,
        counter: u32,
        key_sequence: KeySequence,
        now: Timestamp,
        rss_dbm: Option<i8>,
    ) -> TopologyResult<()> {
        let rss = rss_dbm.map(|rss_dbm| RssSample {
            rss_dbm,
            noise_floor_dbm: self.noise_floor_dbm,
        });
        let result = match handle {
            EntryHandle::Parent => self
                .parent
                .as_mut()
                .ok_or(TopologyError::NotFound)?
                .accept_frame(class, counter, key_sequence, now, rss),
            EntryHandle::Child(h) => self
                .child_mut(h)?
                .accept_frame(class, counter, key_sequence, now, rss),
            EntryHandle::Router(h) => self
                .router_mut(h)?
                .accept_frame(class, counter, key_sequence, now, rss),
        };
        if let Err(TopologyError::ReplayRejected { .. }) = result {
            self.stats.replay_rejections += 1;
        }
        result
    }

    /// Count a failed exchange with `handle`, releasing the entry when the
    /// configured threshold is reached.
    pub fn record_link_failure(
        &mut self,
        handle: EntryHandle,
        now: Timestamp,
    ) -> TopologyResult<LinkFailureOutcome<M>> {
        let threshold = self.config.link_failure_threshold;
        match handle {
            EntryHandle::Parent => {
                let parent = self.parent.as_mut().ok_or(TopologyError::NotFound)?;
                if parent.record_link_failure(threshold) {
                    self.parent = None;
                    return Ok(LinkFailureOutcome::Released(Vec::new()));
                }
            }
            EntryHandle::Child(h) => {
                if let Some(mut discarded) = self.child_mut(h)?.record_link_failure(threshold) {
                    self.stats.indirect_discarded += discarded.len() as u64;
                    discarded.extend(self.release_child(h)?);
                    return Ok(LinkFailureOutcome::Released(discarded));
                }
            }
            EntryHandle::Router(h) => {
                if self.router_mut(h)?.record_link_failure(threshold) {
                    self.release_router(h, now)?;
                    return Ok(LinkFailureOutcome::Released(Vec::new()));
                }
            }
        }
        Ok(LinkFailureOutcome::Counted)
    }

    // ---- indirect delivery ----

    /// Buffer `message` for an attached child.
    pub fn enqueue_indirect(
        &mut self,
        handle: ChildHandle,
        message: M,
        security: &impl FrameSecurity,
    ) -> Result<EnqueueOutcome, EnqueueError<M>> {
        let Some(child) = self.children.get_mut(handle.0) else {
            return Err(EnqueueError {
                error: TopologyError::StaleHandle,
                message,
            });
        };
        if !child.neighbor().is_state_valid_or_restoring() {
            return Err(EnqueueError {
                error: TopologyError::InvalidStateAccess {
                    state: child.state(),
                },
                message,
            });
        }

        let result = self.indirect.enqueue(child, message, security);
        if result.is_err() {
            self.stats.indirect_overflows += 1;
        }
        result
    }

    /// A data poll arrived from a child.
    pub fn handle_data_poll(
        &mut self,
        handle: ChildHandle,
    ) -> TopologyResult<Option<IndirectFrame<'_, M>>> {
        let child = self
            .children
            .get_mut(handle.0)
            .ok_or(TopologyError::StaleHandle)?;
        Ok(self.indirect.handle_data_poll(child))
    }

    /// The transmit triggered by the last poll completed.
    pub fn handle_transmit_done(
        &mut self,
        handle: ChildHandle,
        result: TxResult,
        security: &impl FrameSecurity,
    ) -> TopologyResult<DeliveryOutcome<M>> {
        let child = self
            .children
            .get_mut(handle.0)
            .ok_or(TopologyError::StaleHandle)?;
        let outcome = self.indirect.handle_transmit_done(child, result, security);
        if let TxResult::Success { .. } = result {
            child.reset_link_failures();
        }
        match &outcome {
            DeliveryOutcome::Delivered(_) => self.stats.indirect_delivered += 1,
            DeliveryOutcome::RetryExhausted(_) => self.stats.indirect_retry_exhausted += 1,
            _ => {}
        }
        Ok(outcome)
    }
}
