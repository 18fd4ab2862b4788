use loopscope_state::StateError;
use thiserror::Error;

/// Error type returned by user-defined stateful functions.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type for the loopscope-debug crate.
#[derive(Debug, Error)]
pub enum DebugError {
    #[error("no active call context")]
    ContextNotFound,
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("stateful function '{func_name}' failed in lineage {lineage_id}: {message}")]
    FunctionExecution {
        func_name: String,
        lineage_id: String,
        message: String,
    },
    #[error("call cancelled")]
    Cancelled,
    /// A nested call failed and its failure was already pushed to the observer.
    #[error("'{func_name}' halted in lineage {lineage_id} after a reported failure")]
    Halted { func_name: String, lineage_id: String },
    #[error("unknown stateful function: {0}")]
    UnknownFunction(String),
    #[error("push channel error: {0}")]
    Channel(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DebugError {
    /// True when a function error is a cancellation rather than a failure.
    pub fn is_cancellation(error: &FunctionError) -> bool {
        matches!(error.downcast_ref::<DebugError>(), Some(DebugError::Cancelled))
    }

    /// True when the observer has nothing new to learn from this error:
    /// cancellations and halts caused by an already reported failure.
    pub fn is_reported(error: &FunctionError) -> bool {
        matches!(
            error.downcast_ref::<DebugError>(),
            Some(DebugError::Cancelled | DebugError::Halted { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_cancellation_boxed_cancelled_expected_true() {
        let cancelled: FunctionError = Box::new(DebugError::Cancelled);
        let failed: FunctionError = "boom".into();

        assert!(DebugError::is_cancellation(&cancelled));
        assert!(!DebugError::is_cancellation(&failed));
    }

    #[test]
    fn is_reported_halted_expected_true_and_not_cancellation() {
        let halted: FunctionError = Box::new(DebugError::Halted {
            func_name: "support_agent".to_string(),
            lineage_id: "L1".to_string(),
        });
        let cancelled: FunctionError = Box::new(DebugError::Cancelled);
        let failed: FunctionError = "boom".into();

        assert!(DebugError::is_reported(&halted));
        assert!(!DebugError::is_cancellation(&halted));
        assert!(DebugError::is_reported(&cancelled));
        assert!(!DebugError::is_reported(&failed));
    }
}
