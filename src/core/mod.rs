//! # Core Infrastructure Module
//!
//! Small building blocks shared by the cache, the ledger and the gateway:
//! an injectable clock and the integer money unit.

pub mod clock;
pub mod money;

pub use clock::{Clock, ManualClock, SystemClock};
pub use money::Micros;
