//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - The test application and response wrapper
//! - Account fixtures and a login helper

pub mod fixtures;
pub mod test_app;

pub use fixtures::*;
pub use test_app::*;
