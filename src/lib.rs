//! Taskcluster Operator Library
//!
//! Deploys Taskcluster instances into Kubernetes and provisions the database
//! roles, broker users, encryption keys and access tokens their services use.
//!
//! ## Quick Start
//!
//! ```rust
//! use taskcluster_operator::prelude::*;
//! ```
//!
//! The two engines underneath the controller can be used on their own:
//! [`composite::CompositeReconciler`] converges a dynamic set of child
//! resources, and [`provisioner::CredentialProvisioner`] maintains the
//! credentials recorded in a [`state::PersistedState`].

pub mod composite;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod provisioner;
pub mod pwgen;
pub mod runtime;
pub mod server;
pub mod state;
