// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the pod serving-condition pass.
//!
//! These tests run whole passes WITHOUT requiring a live Kubernetes cluster.
//! The management API is either mocked or served by a local HTTP endpoint,
//! and condition writes are recorded instead of patched.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_gated_member_follows_availability_check
//! ```
//!
//! ## Test Categories
//!
//! - **Scenario tests**: one pass over a set of pods, checking verdicts,
//!   management API call counts, write failures and cancellation
//! - **Management API tests**: gated members checked over real HTTP on localhost

#[path = "../common/fixtures.rs"]
mod fixtures;
mod scenario_tests;
