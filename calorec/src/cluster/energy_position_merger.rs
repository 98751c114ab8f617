use calocore::algorithm::vector::{angle_azimuthal, eta};
use calocore::data::cluster::{Cluster, ShapeParameter};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::error::{RecoError, Result};

/// Matching windows, a value of 0 switches the corresponding test off
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyPositionClusterMergerConfig {
    pub energy_rel_tolerance: f64,
    pub eta_tolerance: f64,
    pub phi_tolerance: f64,  // rad, compared as |sin(dphi / 2)| so it wraps
}

impl Default for EnergyPositionClusterMergerConfig {
    fn default() -> Self {
        EnergyPositionClusterMergerConfig { energy_rel_tolerance: 0.5, eta_tolerance: 0.2, phi_tolerance: 0.1 }
    }
}

/// Pairs clusters of an energy-measuring section with clusters of a
/// position-measuring section.
///
/// Position clusters are visited in order. Each takes the unconsumed energy
/// cluster inside all windows whose energy is closest to its own; the first
/// one wins a tie. The result has the energy of the energy cluster and the
/// position and time of the position cluster, with both as sub-clusters.
/// Clusters left without a partner are not emitted.
pub struct EnergyPositionClusterMerger {
    name: String,
    config: EnergyPositionClusterMergerConfig,
    sin_half_phi: f64,
}

impl EnergyPositionClusterMerger {
    fn within_tolerance(&self, pc: &Cluster, ec: &Cluster) -> bool {
        let cfg = &self.config;
        let de_rel = ((pc.energy - ec.energy) / ec.energy).abs();
        let deta = (eta(&pc.position) - eta(&ec.position)).abs();
        let dsphi = (0.5 * (angle_azimuthal(&pc.position) - angle_azimuthal(&ec.position))).sin().abs();

        (cfg.energy_rel_tolerance <= 0.0 || de_rel <= cfg.energy_rel_tolerance)
            && (cfg.eta_tolerance <= 0.0 || deta <= cfg.eta_tolerance)
            && (cfg.phi_tolerance <= 0.0 || dsphi <= self.sin_half_phi)
    }
}

fn combine(pc: &Cluster, ec: &Cluster) -> Cluster {
    let mut hits = pc.hits.clone();
    hits.extend_from_slice(&ec.hits);
    let mut hit_contributions = pc.hit_contributions.clone();
    hit_contributions.extend_from_slice(&ec.hit_contributions);

    Cluster {
        energy: ec.energy,
        energy_error: ec.energy_error,
        time: pc.time,
        time_error: pc.time_error,
        n_hits: pc.n_hits + ec.n_hits,
        position: pc.position,
        position_error: pc.position_error,
        intrinsic_theta: pc.intrinsic_theta,
        intrinsic_phi: pc.intrinsic_phi,
        shape_parameters: vec![0.0; ShapeParameter::COUNT],
        hits,
        hit_contributions,
        sub_clusters: vec![pc.clone(), ec.clone()],
    }
}

impl Algorithm for EnergyPositionClusterMerger {
    type Config = EnergyPositionClusterMergerConfig;
    /// (energy clusters, position clusters)
    type Input<'a> = (&'a [Cluster], &'a [Cluster]);
    type Output = Vec<Cluster>;

    fn init(name: &str, config: Self::Config, _services: &Services) -> Result<Self> {
        for (parameter, value) in [
            ("energy_rel_tolerance", config.energy_rel_tolerance),
            ("eta_tolerance", config.eta_tolerance),
            ("phi_tolerance", config.phi_tolerance),
        ] {
            if !(value >= 0.0) {
                return Err(RecoError::config(parameter, "must not be negative"));
            }
        }
        info!(
            target: name,
            "tolerances: energy {}, eta {}, phi {} rad",
            config.energy_rel_tolerance,
            config.eta_tolerance,
            config.phi_tolerance
        );
        let sin_half_phi = (0.5 * config.phi_tolerance).sin();
        Ok(EnergyPositionClusterMerger { name: name.to_string(), config, sin_half_phi })
    }

    fn process(&self, input: Self::Input<'_>, _ctx: &EventContext) -> Result<Vec<Cluster>> {
        let (energy_clusters, position_clusters) = input;

        let mut consumed = vec![false; energy_clusters.len()];
        let mut merged = Vec::new();
        for (ip, pc) in position_clusters.iter().enumerate() {
            let mut best: Option<(usize, f64)> = None;
            for (ie, ec) in energy_clusters.iter().enumerate() {
                if consumed[ie] || !self.within_tolerance(pc, ec) {
                    continue;
                }
                let delta = (pc.energy - ec.energy).abs();
                if best.map_or(true, |(_, d)| delta < d) {
                    best = Some((ie, delta));
                }
            }
            match best {
                Some((ie, _)) => {
                    consumed[ie] = true;
                    trace!(
                        target: self.name.as_str(),
                        "position cluster {} ({} GeV) matched energy cluster {} ({} GeV)",
                        ip,
                        pc.energy,
                        ie,
                        energy_clusters[ie].energy
                    );
                    merged.push(combine(pc, &energy_clusters[ie]));
                }
                None => debug!(target: self.name.as_str(), "unmatched position cluster {}", ip),
            }
        }

        debug!(
            target: self.name.as_str(),
            "{} energy + {} position clusters -> {} merged",
            energy_clusters.len(),
            position_clusters.len(),
            merged.len()
        );
        Ok(merged)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
