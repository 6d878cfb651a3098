pub mod error;
pub mod types;

pub mod settings;

pub mod linalg;

pub mod prior;
pub mod views;
pub mod factor_views;
pub mod combiner;
pub mod posterior;
pub mod optimizer;

pub mod recipe;
pub mod pipeline;

#[cfg(feature = "stress")]
pub mod stress;

pub use error::AllocationError;
pub use types::*;

/// Standard result type for all allocation operations
pub type AllocationResult<T> = Result<T, AllocationError>;
