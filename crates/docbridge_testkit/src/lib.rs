//! # docbridge testkit
//!
//! Test utilities for docbridge.
//!
//! This crate provides:
//! - Asset fixtures matching the canonical ten-record scenario
//! - An emulator harness wiring trust material, configuration and lifecycle
//! - Property-based test generators using proptest
//! - Concurrent write stress helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docbridge_testkit::prelude::*;
//!
//! #[test]
//! fn saves_and_queries() {
//!     let harness = TestEmulator::start();
//!     let client = harness.client();
//!     let result = client.writer().unwrap().write(asset_records(10), 4).unwrap();
//!     assert!(result.is_complete_success());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod harness;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::harness::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use harness::*;
pub use stress::*;
