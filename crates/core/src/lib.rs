//! Core functionality shared by the meshlink crates.
//!
//! Provides the identifier types consumed from the link layer, node
//! configuration, and logging setup.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{Config, IndirectConfig, LinkConfig, TableConfig};
pub use error::{CoreError, CoreResult};
pub use types::{DeviceMode, ExtAddress, KeySequence, Rloc16, Timestamp};
