//! Tiered admission control.
//!
//! `core` decides, accounts and fans out; `transport` carries commands to nodes
//! in other processes.

pub mod core;

#[cfg(feature = "transport")]
pub mod transport;

// Re-export the everyday surface
pub use crate::core::*;
