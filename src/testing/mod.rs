//! Testing utilities and mock implementations
//!
//! These let both agents run end to end without a broker or a host.

pub mod mocks;

pub use mocks::*;
