//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Power-quality event grouping and cascade trees."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GroupingError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupingError {
    /// Malformed or contradictory input to a grouping operation.
    #[error("invalid grouping request: {0}")]
    Validation(String),
    /// The referenced event is absent from the snapshot or lacks the expected flag.
    #[error("event not found: {0}")]
    NotFound(String),
}

impl GroupingError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        GroupingError::Validation(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        GroupingError::NotFound(message.into())
    }
}
