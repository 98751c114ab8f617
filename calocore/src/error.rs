use thiserror::Error;

use crate::data::hit::CellId;

/// Errors raised by cell-id decoding and geometry lookups
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid cell id {cell_id:#018x}: {reason}")]
    InvalidCellId { cell_id: CellId, reason: String },

    #[error("Unknown field '{0}' in readout descriptor")]
    UnknownField(String),

    #[error("Unknown readout: {0}")]
    UnknownReadout(String),

    #[error("Unknown detector element: {0}")]
    UnknownDetElement(String),

    #[error("Invalid readout descriptor: {0}")]
    Descriptor(String),

    #[error("Geometry lookup failed for cell id {cell_id:#018x}: {reason}")]
    Geometry { cell_id: CellId, reason: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
