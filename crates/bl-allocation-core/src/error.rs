use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Invalid input: {field} — {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Unknown {kind} '{label}' (available: {})", .available.join(", "))]
    UnknownLabel {
        kind: String,
        label: String,
        available: Vec<String>,
    },

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Index out of range: {field} = {index} (len {len})")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Numerical instability in {context}: condition number {} exceeds {threshold}", condition_display(.condition_number))]
    NumericalInstability {
        context: String,
        condition_number: Option<Decimal>,
        threshold: Decimal,
    },

    #[error("Optimization failure: {method} — {reason} (iterations: {iterations}, objective: {objective}, constraint violation: {constraint_violation})")]
    OptimizationFailure {
        method: String,
        reason: String,
        iterations: u32,
        objective: Decimal,
        constraint_violation: Decimal,
    },

    #[error("Unknown scenario type: {0}")]
    UnknownScenarioType(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AllocationError {
    /// True for the input-validation family: malformed documents, unknown
    /// labels, empty view lists, bad indices and insufficient data.
    pub fn is_input_validation(&self) -> bool {
        matches!(
            self,
            AllocationError::InvalidInput { .. }
                | AllocationError::UnknownLabel { .. }
                | AllocationError::EmptyInput(_)
                | AllocationError::IndexOutOfRange { .. }
                | AllocationError::InsufficientData(_)
        )
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AllocationError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_label(kind: &str, label: &str, available: &[String]) -> Self {
        AllocationError::UnknownLabel {
            kind: kind.to_string(),
            label: label.to_string(),
            available: available.to_vec(),
        }
    }
}

fn condition_display(condition: &Option<Decimal>) -> String {
    match condition {
        Some(c) => c.to_string(),
        None => "inf (singular)".to_string(),
    }
}

impl From<serde_json::Error> for AllocationError {
    fn from(e: serde_json::Error) -> Self {
        AllocationError::SerializationError(e.to_string())
    }
}
