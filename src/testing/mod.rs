//! Testing utilities and mock implementations
//!
//! This module provides a scriptable mock engine for exercising the client
//! shell without a broker.

pub mod mocks;

pub use mocks::*;
