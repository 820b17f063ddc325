//! Error types for configuration, topology and communication failures.
//!
//! Element-level routines (basis evaluation, local assembly) report failures through
//! [`eyre::Result`], while setup and hierarchy construction use the structured [`Error`] below
//! so that callers can distinguish the failure classes.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid setup parameters, e.g. too few multigrid levels.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A field function returned a number of components different from what a term requires.
    #[error(
        "type mismatch in term '{term}': function returns {actual} component(s), but the term expects {expected}"
    )]
    TypeMismatch {
        term: String,
        expected: usize,
        actual: usize,
    },
    #[error("term '{term}' was configured without a target field")]
    MissingField { term: String },
    /// The mesh violates the assumptions of geometric coarsening.
    #[error("topology error at multigrid level {level}: {message}")]
    Topology { level: usize, message: String },
    #[error("communication error: {0}")]
    Communication(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn topology(level: usize, message: impl Into<String>) -> Self {
        Self::Topology {
            level,
            message: message.into(),
        }
    }
}
