//! Edge daemon side of the mesh bridge.
//!
//! Hosts the `metamanager` module, which connects the node's internal bus to
//! the mesh agent and relays pod readiness changes while the node is offline.

pub mod bus;
pub mod config;
pub mod endpoints;
pub mod module;
pub mod readiness;
pub mod registry;
