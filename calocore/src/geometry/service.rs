use nalgebra::{Isometry3, Point3};

use crate::data::hit::{CellId, Position};
use crate::error::Result;
use crate::geometry::id_spec::IdSpec;

/// Placement of a detector element: maps element-local coordinates to the
/// global frame.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalFrame {
    pub name: String,
    pub transform: Isometry3<f64>,
}

impl LocalFrame {
    pub fn new(name: &str, transform: Isometry3<f64>) -> Self {
        LocalFrame { name: name.to_string(), transform }
    }

    pub fn identity(name: &str) -> Self {
        Self::new(name, Isometry3::identity())
    }

    #[inline]
    pub fn world_to_local(&self, global: &Position) -> Position {
        self.transform.inverse_transform_point(&Point3::from(*global)).coords
    }

    #[inline]
    pub fn local_to_world(&self, local: &Position) -> Position {
        self.transform.transform_point(&Point3::from(*local)).coords
    }
}

/// Cell-id decoding and placement lookups consumed by the reconstruction.
/// Implementations are shared across worker threads and must only be read.
pub trait GeometryService: Send + Sync {
    /// Bit-field layout of the named readout
    fn id_spec(&self, readout: &str) -> Result<IdSpec>;

    /// Global position of the cell center
    fn position(&self, cell_id: CellId) -> Result<Position>;

    /// Cell extent along the local axes
    fn cell_dimensions(&self, cell_id: CellId) -> Result<Vec<f64>>;

    /// Detector element by name
    fn det_element(&self, name: &str) -> Result<LocalFrame>;

    /// Deepest detector element addressed by a (possibly masked) cell id
    fn lookup_det_element(&self, cell_id: CellId) -> Result<LocalFrame>;
}
