//! # Scan Module
//!
//! Whole-table reads that can resume from a checkpoint.
//!
//! - [`cursor`]: restore column binding and the serialized checkpoint
//! - [`driver`]: the `ScanDriver` state machine

pub mod cursor;
pub mod driver;

pub use cursor::{ScanCheckpoint, ScanCursor};
pub use driver::{ScanDriver, ScanState};
