use serde::{Deserialize, Serialize};

use crate::algorithm::vector::{angle_azimuthal, angle_polar, eta};
use crate::data::hit::{CalorimeterHit, CellId, Position};

/// Weighted set of hit references. `hits` index into the hit collection the
/// proto-cluster was built from; `weights[i]` is the fraction of hit `hits[i]`
/// attributed to this proto-cluster.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtoCluster {
    pub hits: Vec<usize>,
    pub weights: Vec<f64>,
}

impl ProtoCluster {
    pub fn new() -> Self {
        ProtoCluster { hits: Vec::new(), weights: Vec::new() }
    }

    pub fn add_hit(&mut self, index: usize, weight: f64) {
        self.hits.push(index);
        self.weights.push(weight);
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Iterate `(hit index, weight)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.hits.iter().copied().zip(self.weights.iter().copied())
    }

    /// Weighted energy sum; indices outside `hits` are ignored
    pub fn energy(&self, hits: &[CalorimeterHit]) -> f64 {
        self.iter()
            .filter_map(|(idx, w)| hits.get(idx).map(|h| h.energy * w))
            .sum()
    }
}

/// Layout of `Cluster::shape_parameters`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeParameter {
    Radius = 0,
    Dispersion = 1,
    // covariance eigenvalues, ascending
    ThetaPhiEigen1 = 2,
    ThetaPhiEigen2 = 3,
    XyzEigen1 = 4,
    XyzEigen2 = 5,
    XyzEigen3 = 6,
}

impl ShapeParameter {
    pub const COUNT: usize = 7;
}

/// Reconstructed cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub energy: f64,
    pub energy_error: f64,
    pub time: f64,
    pub time_error: f64,
    pub n_hits: usize,
    pub position: Position,
    pub position_error: Position,   // per-axis variance
    pub intrinsic_theta: f64,
    pub intrinsic_phi: f64,
    pub shape_parameters: Vec<f64>,
    pub hits: Vec<CellId>,
    pub hit_contributions: Vec<f64>, // weighted energy of each entry in `hits`
    pub sub_clusters: Vec<Cluster>,
}

impl Cluster {
    pub fn eta(&self) -> f64 {
        eta(&self.position)
    }

    pub fn phi(&self) -> f64 {
        angle_azimuthal(&self.position)
    }

    pub fn theta(&self) -> f64 {
        angle_polar(&self.position)
    }

    pub fn shape(&self, parameter: ShapeParameter) -> Option<f64> {
        self.shape_parameters.get(parameter as usize).copied()
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            energy: 0.0,
            energy_error: 0.0,
            time: 0.0,
            time_error: 0.0,
            n_hits: 0,
            position: Position::zeros(),
            position_error: Position::zeros(),
            intrinsic_theta: 0.0,
            intrinsic_phi: 0.0,
            shape_parameters: Vec::new(),
            hits: Vec::new(),
            hit_contributions: Vec::new(),
            sub_clusters: Vec::new(),
        }
    }
}
