//! # Reconciler
//!
//! Core reconciliation logic for `Instance` resources.
//!
//! The reconciler:
//! - Resolves the database and broker admin endpoints of the instance
//! - Provisions database roles, broker users, encryption keys and tokens
//! - Issues tokens for `AccessToken` resources
//! - Renders the Taskcluster chart and runs the database upgrade Job
//! - Applies the rendered children and prunes the ones no longer rendered
//! - Reports the outcome as the `Progressing` condition

pub mod access_tokens;
pub mod conditions;
pub mod instance;
pub mod types;

pub use instance::{reconcile, NextPass};
pub use types::{reason, BackoffState, Reconciler, ReconcilerError};
