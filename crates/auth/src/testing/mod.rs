//! Testing utilities and helpers
//!
//! Compiled for this crate's unit tests and, for downstream crates, behind
//! the `test-utils` feature.
//!
//! - **[`fixtures`]**: unsigned token and token-response builders
//! - **[`mocks`]**: [`MockTransport`], [`MemorySecretStore`],
//!   [`FailingStorage`]
//!
//! For time control use [`ManualClock`](crate::time::ManualClock).

pub mod fixtures;
pub mod mocks;

pub use mocks::{FailingStorage, MemorySecretStore, MockTransport};
