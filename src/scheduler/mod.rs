//! Scheduling module
//!
//! Weekly trigger for the calendar scrape.

mod runner;

pub use runner::{ScheduleConfig, Scheduler};
