//! # Controller
//!
//! Orchestration of an `Instance` reconcile pass.
//!
//! - `backoff`: Fibonacci backoff for failed passes
//! - `database_ref`: Database and broker admin endpoint discovery
//! - `patches`: Kind-specific fix-ups of rendered objects
//! - `reconciler`: The reconcile flow, AccessTokens and status
//! - `render`: Chart rendering
//! - `upgrade`: Database upgrade Job
//! - `values`: Values assembled for the chart

pub mod backoff;
pub mod database_ref;
pub mod patches;
pub mod reconciler;
pub mod render;
pub mod upgrade;
pub mod values;
