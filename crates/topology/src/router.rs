//! Router entries
//!
//! Routers are neighbors identified by a router id (their slot index). Each
//! entry stores what route computation needs: the next hop towards the
//! router, the path cost through that hop, and this node's outbound link
//! quality to it.

use crate::error::TopologyResult;
use crate::link_quality::{LinkQuality, RouteCost};
use crate::neighbor::{
    AttachCompletion, AttachRequest, Challenge, FrameClass, Neighbor, RssSample,
};
use meshlink_core::{ExtAddress, KeySequence, Rloc16, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Where traffic for a router is sent first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NextHop {
    /// Reached over a direct link
    Direct,
    /// Reached through another router
    Via(u8),
}

/// Route inputs exported to the route computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub router_id: u8,
    pub rloc16: Rloc16,
    pub next_hop: NextHop,
    pub cost: RouteCost,
    pub link_quality_in: LinkQuality,
    pub link_quality_out: LinkQuality,
}

/// A router neighbor
#[derive(Debug, Clone)]
pub struct Router {
    neighbor: Neighbor,
    router_id: u8,
    next_hop: NextHop,
    link_quality_out: LinkQuality,
    cost: RouteCost,
}

impl Router {
    pub fn new(ext_address: ExtAddress, router_id: u8) -> Self {
        Self {
            neighbor: Neighbor::new(ext_address),
            router_id,
            next_hop: NextHop::Direct,
            link_quality_out: LinkQuality::ZERO,
            cost: RouteCost::UNREACHABLE,
        }
    }

    pub fn neighbor(&self) -> &Neighbor {
        &self.neighbor
    }

    pub fn router_id(&self) -> u8 {
        self.router_id
    }

    pub fn rloc16(&self) -> Rloc16 {
        Rloc16::from_router_id(self.router_id)
    }

    pub fn next_hop(&self) -> NextHop {
        self.next_hop
    }

    pub fn cost(&self) -> RouteCost {
        self.cost
    }

    pub fn link_quality_out(&self) -> LinkQuality {
        self.link_quality_out
    }

    /// Record the outbound link quality this router reported for us.
    pub fn set_link_quality_out(&mut self, link_quality: LinkQuality) {
        self.link_quality_out = link_quality;
    }

    /// Route directly over our own link to this router.
    pub fn set_direct_route(&mut self) {
        self.next_hop = NextHop::Direct;
        self.cost = self.neighbor.link_quality().link_cost();
    }

    /// Route through `next_hop`, which advertises `next_hop_cost` to the
    /// destination, over a link of quality `link_quality` to that hop.
    pub fn set_route_via(
        &mut self,
        next_hop: u8,
        next_hop_cost: RouteCost,
        link_quality: LinkQuality,
    ) {
        self.next_hop = NextHop::Via(next_hop);
        self.cost = RouteCost::via(link_quality, next_hop_cost);
        debug!(router_id = self.router_id, next_hop, cost = self.cost.value(), "route updated");
    }

    pub fn set_unreachable(&mut self) {
        self.next_hop = NextHop::Direct;
        self.cost = RouteCost::UNREACHABLE;
    }

    pub fn route_info(&self) -> RouteInfo {
        RouteInfo {
            router_id: self.router_id,
            rloc16: self.rloc16(),
            next_hop: self.next_hop,
            cost: self.cost,
            link_quality_in: self.neighbor.link_quality(),
            link_quality_out: self.link_quality_out,
        }
    }

    /// Start a Link Request handshake.
    pub fn begin_attach(&mut self, challenge: Challenge, now: Timestamp) -> TopologyResult<()> {
        self.neighbor
            .begin_attach(AttachRequest::LinkRequest, challenge, now)
    }

    pub fn complete_attach(
        &mut self,
        completion: AttachCompletion,
        now: Timestamp,
    ) -> TopologyResult<()> {
        self.neighbor.complete_attach(completion, now)?;
        self.set_direct_route();
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.neighbor.invalidate();
        self.link_quality_out = LinkQuality::ZERO;
        self.set_unreachable();
    }

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

    /// Count a link failure; returns whether the router was invalidated.
    pub fn record_link_failure(&mut self, threshold: u8) -> bool {
        if self.neighbor.record_link_failure(threshold) {
            self.invalidate();
            return true;
        }
        false
    }

    pub fn reset_link_failures(&mut self) {
        self.neighbor.reset_link_failures();
    }
}
