//! Statistics module
//!
//! Lock-free task statistics tracking using atomic operations.

mod atomic;

pub use atomic::{TaskStats, TaskStatsSnapshot};
