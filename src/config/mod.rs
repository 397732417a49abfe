//! # Configuration
//!
//! Operator settings loaded from environment variables, optionally
//! overridden by command line flags.

mod controller;

pub use controller::ControllerConfig;
