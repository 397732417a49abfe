//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use taskcluster_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Engines and their seams
pub use crate::composite::{ClusterApi, CompositeError, CompositeReconciler, ParentRef};
pub use crate::provisioner::{
    BrokerAdmin, CredentialProvisioner, DatabaseConnector, DatabaseSession, ProvisionError,
    ProvisionerSettings, ServiceCatalog,
};
pub use crate::state::{CryptoKey, PersistedState, ServiceAccount, StateError, StateStore};

// Reconciler types
pub use crate::controller::reconciler::{reconcile, BackoffState, Reconciler, ReconcilerError};
pub use crate::controller::render::Renderer;

pub use crate::config::ControllerConfig;
