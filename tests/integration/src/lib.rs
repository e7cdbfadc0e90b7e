//! Integration tests for the meshlink topology table
//!
//! This test suite validates, through the public API only:
//! - Child and router attach lifecycles, including eviction when full
//! - Indirect delivery to sleepy children across polls and failures
//! - Replay protection across key sequence rollover
//! - Route bookkeeping and router id reclaim
//! - Persisting and restoring children

pub mod test_utils;

#[cfg(test)]
mod attach_lifecycle_tests;


#[cfg(test)]
mod replay_protection_tests;
