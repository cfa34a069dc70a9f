//! Engine supervisor module
//!
//! Periodic health probes for the shared browser engine plus zombie
//! process cleanup.

mod monitor;
mod zombie;

pub use monitor::{EngineSupervisor, SupervisorConfig};
pub use zombie::cleanup_zombie_engines;
