//! Controller module for emqx-operator.
//!
//! Contains the reconciliation loop, error handling, condition management
//! and the pieces of the serving decision:
//! - `ownership`: is the pod part of the generation being rolled out
//! - `membership`: does the broker list the pod as a node, and does it need probing
//! - `rebalance`: the management API availability probe
//! - `pod_conditions`: the per-pod pass that writes the `OnServing` condition

// Shared modules
pub mod common;
pub mod context;
pub mod error;
pub mod status;

// Serving decision
pub mod membership;
pub mod ownership;
pub mod pod_conditions;
pub mod rebalance;
pub mod update_target;

// EMQX controller
pub mod reconciler;
