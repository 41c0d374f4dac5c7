//! # Rowgate Testkit
//!
//! Test utilities for rowgate.
//!
//! This crate provides:
//! - A fault-injecting store wrapper with connection accounting
//! - Schemas, seeded stores and CSV fixtures
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rowgate_testkit::prelude::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn recovers_from_one_timeout() {
//!     let store = FaultyStore::new(users_store());
//!     store.script([Fault::Timeout]);
//!     // ... run an operation through the retry executor
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
