//! # Composite Errors
//!
//! Error taxonomy of a composite reconcile pass.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompositeError {
    /// Unresolvable kind, missing metadata or an unreadable composite state.
    /// Nothing was mutated and retrying will fail the same way.
    #[error("permanent composite error: {0:#}")]
    Permanent(anyhow::Error),
    /// A cluster call needed before any child was touched failed.
    #[error("composite pass interrupted: {0:#}")]
    Transient(anyhow::Error),
    /// Recording the deployed kinds on the parent failed.
    #[error("failed to update composite state: {0:#}")]
    StateUpdate(anyhow::Error),
    /// Some applies or deletions failed; the rest of the pass went ahead.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl CompositeError {
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, CompositeError::Permanent(_))
    }

    pub(crate) fn permanent(message: impl fmt::Display) -> Self {
        CompositeError::Permanent(anyhow::anyhow!("{message}"))
    }
}

/// Independent failures collected during one pass.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<anyhow::Error>,
}

impl AggregateError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: anyhow::Error) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.errors.iter()
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), AggregateError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [single] = self.errors.as_slice() {
            return write!(f, "{single:#}");
        }

        write!(f, "multiple errors occurred: ")?;
        for (idx, error) in self.errors.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{error:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_single_message() {
        let mut agg = AggregateError::new();
        agg.push(anyhow::anyhow!("apply failed"));
        assert_eq!(agg.to_string(), "apply failed");
    }

    #[test]
    fn test_aggregate_multiple_messages() {
        let mut agg = AggregateError::new();
        agg.push(anyhow::anyhow!("a"));
        agg.push(anyhow::anyhow!("b"));
        assert_eq!(agg.to_string(), "multiple errors occurred: a, b");
        assert_eq!(agg.len(), 2);
    }

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(AggregateError::new().into_result().is_ok());
    }

    #[test]
    fn test_only_permanent_is_permanent() {
        assert!(CompositeError::permanent("bad kind").is_permanent());
        assert!(!CompositeError::Transient(anyhow::anyhow!("timeout")).is_permanent());
        assert!(!CompositeError::Aggregate(AggregateError::new()).is_permanent());
    }
}
