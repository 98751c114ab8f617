// unit system
pub mod units;
pub mod error;
pub mod random;

// data module
pub mod data {
    pub mod hit;
    pub mod cluster;
}

// geometry module
pub mod geometry {
    pub mod id_spec;
    pub mod service;
    pub mod grid;
}

// algorithm module
pub mod algorithm {
    pub mod vector;
}

// Re-export commonly used types
pub use data::cluster::{Cluster, ProtoCluster, ShapeParameter};
pub use data::hit::{CaloHitContribution, CalorimeterHit, CellId, Position, RawCalorimeterHit, SimCalorimeterHit};
pub use error::CoreError;
pub use geometry::id_spec::{BitField, IdSpec};
pub use geometry::service::{GeometryService, LocalFrame};
