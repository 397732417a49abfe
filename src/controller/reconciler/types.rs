//! # Types
//!
//! Core types for the reconciler.

use crate::composite::{CompositeError, KubeCluster};
use crate::config::ControllerConfig;
use crate::constants::{BACKOFF_MAX_MINUTES, BACKOFF_MIN_MINUTES};
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::render::Renderer;
use crate::provisioner::{ProvisionError, ServiceCatalog};
use crate::state::StateError;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Reason codes reported on the `Progressing` condition.
pub mod reason {
    pub const RECONCILED: &str = "Reconciled";
    pub const PERMANENT_ERROR: &str = "PermanentError";
    pub const PARTIAL_FAILURE: &str = "PartialFailure";
    pub const EXTERNAL_DEPENDENCY_UNAVAILABLE: &str = "ExternalDependencyUnavailable";
    pub const RENDER_FAILED: &str = "RenderFailed";
    pub const STATE_UNAVAILABLE: &str = "StateUnavailable";
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    /// The instance itself cannot be reconciled as written.
    #[error("invalid instance: {0}")]
    InvalidInstance(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("failed to render children: {0:#}")]
    Render(anyhow::Error),
    #[error(transparent)]
    Composite(#[from] CompositeError),
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

impl ReconcilerError {
    /// Machine-readable reason placed on the status condition.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::InvalidInstance(_) => reason::PERMANENT_ERROR,
            ReconcilerError::State(e) | ReconcilerError::Provision(ProvisionError::State(e)) => {
                if e.is_permanent() {
                    reason::PERMANENT_ERROR
                } else {
                    reason::STATE_UNAVAILABLE
                }
            }
            ReconcilerError::Provision(_) | ReconcilerError::ReconciliationFailed(_) => {
                reason::EXTERNAL_DEPENDENCY_UNAVAILABLE
            }
            ReconcilerError::Render(_) => reason::RENDER_FAILED,
            ReconcilerError::Composite(e) if e.is_permanent() => reason::PERMANENT_ERROR,
            ReconcilerError::Composite(_) => reason::PARTIAL_FAILURE,
        }
    }

    /// Permanent errors wait for a spec change instead of being retried.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.reason() == reason::PERMANENT_ERROR
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackoffState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(BACKOFF_MIN_MINUTES, BACKOFF_MAX_MINUTES),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context of every reconcile pass.
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    pub cluster: Arc<KubeCluster>,
    pub config: ControllerConfig,
    pub renderer: Arc<dyn Renderer>,
    pub catalog: ServiceCatalog,
    // Keyed by namespace/name
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(client: Client, config: ControllerConfig, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            cluster: Arc::new(KubeCluster::new(client.clone())),
            client,
            config,
            renderer,
            catalog: ServiceCatalog::taskcluster(),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Forget the backoff of a resource after a clean pass.
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::AggregateError;
    use std::time::Duration;

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            ReconcilerError::InvalidInstance("no namespace".to_string()).reason(),
            reason::PERMANENT_ERROR
        );
        assert_eq!(
            ReconcilerError::Render(anyhow::anyhow!("helm exited 1")).reason(),
            reason::RENDER_FAILED
        );
        assert_eq!(
            ReconcilerError::Provision(ProvisionError::Timeout {
                operation: "database connect".to_string(),
                after: Duration::from_secs(30),
            })
            .reason(),
            reason::EXTERNAL_DEPENDENCY_UNAVAILABLE
        );

        let mut failures = AggregateError::new();
        failures.push(anyhow::anyhow!("apply failed"));
        let partial = ReconcilerError::Composite(CompositeError::Aggregate(failures));
        assert_eq!(partial.reason(), reason::PARTIAL_FAILURE);
        assert!(!partial.is_permanent());
    }

    #[test]
    fn test_state_reasons() {
        let access = StateError::Access {
            location: "secret ns/prod-state".to_string(),
            error: anyhow::anyhow!("forbidden"),
        };
        assert_eq!(
            ReconcilerError::State(access).reason(),
            reason::STATE_UNAVAILABLE
        );

        let invalid = StateError::Invalid {
            location: "secret ns/prod-state".to_string(),
            error: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        };
        let error = ReconcilerError::Provision(ProvisionError::State(invalid));
        assert_eq!(error.reason(), reason::PERMANENT_ERROR);
        assert!(error.is_permanent());
    }

    #[test]
    fn test_composite_permanent() {
        let error = ReconcilerError::Composite(CompositeError::Permanent(anyhow::anyhow!(
            "child without kind"
        )));
        assert!(error.is_permanent());
    }

    #[test]
    fn test_backoff_state_reset() {
        let mut state = BackoffState::new();
        state.increment_error();
        state.increment_error();
        assert_eq!(state.error_count, 2);
        assert_eq!(state.backoff.next_backoff_seconds(), 60);

        state.reset();
        assert_eq!(state.error_count, 0);
        assert_eq!(state.backoff.next_backoff_seconds(), 60);
    }
}
