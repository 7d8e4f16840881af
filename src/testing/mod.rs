//! Testing utilities and mock implementations
//!
//! This module provides mocks for exercising the relay pipeline without a
//! running broker.

pub mod mocks;

pub use mocks::*;
