//! Integration tests for Upload Gate
//!
//! These tests drive the full router (every middleware layer) against the
//! in-memory store.

mod account_tests;
mod admin_tests;
mod api_key_tests;
mod csrf_tests;
mod rate_limit_tests;
mod routing_tests;
