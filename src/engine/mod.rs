//! Headless browser engine
//!
//! Owns one Chromium process behind injectable driver traits and hands out
//! isolated page sessions, one per task.

mod chromium;
mod errors;
mod handle;
mod session;

#[cfg(test)]
pub mod fake;

pub use chromium::{verify_browser_binary, ChromiumDriver, ChromiumSettings};
pub use errors::EngineError;
pub use handle::{EngineDriver, EngineHandle, EngineProcess, EngineSettings, EngineState};
pub use session::{PageSession, SessionStatus};
