//! # apimsync Testkit
//!
//! Test utilities for apimsync.
//!
//! This crate provides:
//! - A [`TestPlatform`] wrapping an in-memory platform and a recording sleeper
//! - Definition, certificate and manifest fixtures
//! - Property-based generators for identities and definitions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apimsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn deploys() {
//!     let platform = TestPlatform::new();
//!     let report = platform.reconciler("admin").deploy(&apis(3)).await.unwrap();
//!     assert!(report.is_converged());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
