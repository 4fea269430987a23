//! Error taxonomy.
//!
//! Record-level errors stop only their own record and end up in the report.
//! The only batch-aborting error is a validator hard failure.

use crate::report::ValidationReport;
use crate::validate::HardFailure;
use kgforge_model::IdentifierError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordError {
    #[error("invalid identifier for record at {origin}: {source}")]
    InvalidIdentifier {
        origin: String,
        #[source]
        source: IdentifierError,
    },

    #[error("record at {origin} is unidentifiable: {reason}")]
    UnidentifiableRecord { origin: String, reason: String },

    #[error("failed to load record at {origin}: {message}")]
    RecordLoad { origin: String, message: String },
}

impl RecordError {
    pub fn origin(&self) -> &str {
        match self {
            RecordError::InvalidIdentifier { origin, .. }
            | RecordError::UnidentifiableRecord { origin, .. }
            | RecordError::RecordLoad { origin, .. } => origin,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RecordError::InvalidIdentifier { .. } => "invalid_identifier",
            RecordError::UnidentifiableRecord { .. } => "unidentifiable_record",
            RecordError::RecordLoad { .. } => "record_load",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("batch rejected: {} hard failure(s) in the final graph", .failures.len())]
    HardFailure {
        failures: Vec<HardFailure>,
        report: Box<ValidationReport>,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
