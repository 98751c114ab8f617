use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Opaque 64-bit readout channel key
pub type CellId = u64;
/// 3D position (or extent) in canonical length units
pub type Position = Vector3<f64>;

/// One step of simulated energy deposit inside a cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CaloHitContribution {
    pub pdg: i32,                 // particle type id
    pub particle: u64,            // key of the generating MC particle
    pub energy: f64,
    pub time: f64,
    pub step_position: Position,
}

impl CaloHitContribution {
    pub fn new(pdg: i32, particle: u64, energy: f64, time: f64, step_position: Position) -> Self {
        CaloHitContribution { pdg, particle, energy, time, step_position }
    }
}

/// Simulated energy deposit at a readout cell
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimCalorimeterHit {
    pub cell_id: CellId,
    pub energy: f64,
    pub position: Position,
    pub contributions: Vec<CaloHitContribution>,
}

impl SimCalorimeterHit {
    /// Create a hit whose energy is the sum of its contributions
    pub fn new(cell_id: CellId, position: Position, contributions: Vec<CaloHitContribution>) -> Self {
        let energy = contributions.iter().map(|c| c.energy).sum();
        SimCalorimeterHit { cell_id, energy, position, contributions }
    }

    /// Earliest contribution time; exact ties resolve to the first contribution
    pub fn earliest_time(&self) -> Option<f64> {
        self.contributions.iter().map(|c| c.time).fold(None, |acc, t| match acc {
            Some(best) if best <= t => Some(best),
            _ => Some(t),
        })
    }

    /// Key of the MC particle that produced the first contribution
    pub fn mc_particle(&self) -> Option<u64> {
        self.contributions.first().map(|c| c.particle)
    }
}

/// Digitized per-cell reading
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawCalorimeterHit {
    pub cell_id: CellId,
    pub amplitude: u32,    // ADC counts including pedestal
    pub time_stamp: u32,   // TDC counts
}

impl RawCalorimeterHit {
    pub fn new(cell_id: CellId, amplitude: u32, time_stamp: u32) -> Self {
        RawCalorimeterHit { cell_id, amplitude, time_stamp }
    }
}

/// Calibrated hit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalorimeterHit {
    pub cell_id: CellId,
    pub energy: f64,
    pub energy_error: f64,
    pub time: f64,
    pub time_error: f64,
    pub position: Position,   // global
    pub dimension: Position,  // cell size along the local axes
    pub sector: i32,
    pub layer: i32,
    pub local: Position,      // position in the frame of the local detector element
}

impl CalorimeterHit {
    pub fn new(
        cell_id: CellId,
        energy: f64,
        energy_error: f64,
        time: f64,
        time_error: f64,
        position: Position,
        dimension: Position,
        sector: i32,
        layer: i32,
        local: Position,
    ) -> Self {
        CalorimeterHit {
            cell_id,
            energy,
            energy_error,
            time,
            time_error,
            position,
            dimension,
            sector,
            layer,
            local,
        }
    }
}

impl Default for CalorimeterHit {
    fn default() -> Self {
        Self {
            cell_id: 0,
            energy: 0.0,
            energy_error: 0.0,
            time: 0.0,
            time_error: 0.0,
            position: Position::zeros(),
            dimension: Position::zeros(),
            sector: -1,
            layer: -1,
            local: Position::zeros(),
        }
    }
}
