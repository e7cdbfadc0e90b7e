//! Meshlink Topology - Neighbor and Topology Table for Thread-style Meshes
//!
//! Tracks every peer a node talks to directly and the per-peer state the
//! link and MLE layers depend on.
//!
//! # Core Components
//!
//! - **Neighbor state machine**: attach handshakes, re-verification and
//!   restoration, with state-specific data stored in the state itself
//! - **Link quality**: RSS averaging, link margin and quality classes with
//!   hysteresis, and route costs derived from them
//! - **Children**: registered addresses, keep-alive timeout, requested TLVs,
//!   source-match flags and a buffered message queue per child
//! - **Routers**: next hop, path cost and outbound link quality per router id
//! - **Indirect delivery**: one in-flight message per sleepy child, released
//!   on data polls with bounded retries
//! - **Replay protection**: per-peer link and MLE frame counters under a key
//!   sequence
//!
//! # Example Usage
//!
//! ```rust
//! use meshlink_core::{Config, ExtAddress};
//! use meshlink_topology::{EntryKind, TopologyTable};
//!
//! let mut table: TopologyTable<Vec<u8>> = TopologyTable::new(&Config::default()).unwrap();
//! let child = table
//!     .allocate(EntryKind::Child, ExtAddress::new([1; 8]), 0)
//!     .unwrap();
//! assert!(table.neighbor(child).is_ok());
//! ```

pub mod arena;
pub mod child;
pub mod error;
pub mod indirect;
pub mod link_quality;
pub mod neighbor;
pub mod router;
pub mod table;

// Re-export main types
pub use arena::SlotStatus;
pub use child::{Child, ChildExchange, ChildRecord, RequestTlvs, SrcMatch, MAX_REQUEST_TLVS};
pub use error::{EnqueueError, EntryKind, TopologyError, TopologyResult};
pub use indirect::{
    DeliveryOutcome, EnqueueOutcome, FrameSecurity, InFlightInfo, IndirectFrame, IndirectQueue,
    IndirectSender, TxResult,
};
pub use link_quality::{LinkQuality, LinkQualityInfo, RouteCost};
pub use neighbor::{
    AttachCompletion, AttachRequest, AttachedLink, Challenge, FrameClass, Neighbor, NeighborState,
    RssSample,
};
pub use router::{NextHop, RouteInfo, Router};
pub use table::{
    ChildHandle, EntryHandle, LinkFailureOutcome, RouterHandle, TableStats, TopologyTable,
};
