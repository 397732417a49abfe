//! # Custom Resource Definitions
//!
//! CRD types for the Taskcluster operator.
//!
//! ## Module Structure
//!
//! - `instance.rs` - `Instance`, one Taskcluster deployment
//! - `access_token.rs` - `AccessToken`, an extra static client of an instance
//! - `status.rs` - Status types and conditions

mod access_token;
mod instance;
mod status;

// Re-export all public types
pub use access_token::{AccessToken, AccessTokenSpec, AccessTokenStatus, InstanceRef};
pub use instance::{
    BrokerSpec, GitHubSpec, Instance, InstanceSpec, LocalRef, StaticAccessToken,
};
pub use status::{Condition, InstanceStatus, CONDITION_PROGRESSING};
