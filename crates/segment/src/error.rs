use cohort_core::CohortError;
use cohort_rules::schema::DependentMetadata;
use cohort_rules::validation::ValidationResult;
use cohort_rules::ConditionError;
use thiserror::Error;

/// Errors returned by the segmentation service.
#[derive(Error, Debug)]
pub enum SegmentError {
    /// The definition was rejected; nothing was persisted.
    #[error("validation failed: {}", .0.error_summary())]
    Validation(ValidationResult),

    /// Removal refused because other definitions reference the id.
    #[error(
        "{} segment(s) and {} scoring plan(s) depend on this definition",
        .0.segments.len(),
        .0.scorings.len()
    )]
    DependencyConflict(DependentMetadata),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// Backend failure, fatal to the current operation.
    #[error("backend error: {0}")]
    Backend(#[from] CohortError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SegmentError>;
