use std::str::FromStr;

use calocore::algorithm::vector::{angle_azimuthal, angle_polar, eta, eta_to_angle, from_spherical};
use calocore::data::cluster::{Cluster, ProtoCluster};
use calocore::data::hit::{CalorimeterHit, Position};
use calocore::units::MEV;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::cluster::shape::cluster_shape;
use crate::error::{RecoError, Result};

/// Position weighting of the constituent hits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyWeight {
    None,
    Linear,
    Log,
}

impl FromStr for EnergyWeight {
    type Err = RecoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(EnergyWeight::None),
            "linear" => Ok(EnergyWeight::Linear),
            "log" => Ok(EnergyWeight::Log),
            other => Err(RecoError::config("energy_weight", format!("unknown weighting '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorimeterClusterRecoCoGConfig {
    pub energy_weight: EnergyWeight,
    pub sampling_fraction: f64,
    pub log_weight_base: f64,
    /// `w0 = sum_i c_i * ln(E / E0)^i`; replaces `log_weight_base` when set
    pub log_weight_base_coeffs: Vec<f64>,
    pub log_weight_base_e_ref: f64,
    pub enable_eta_bounds: bool,
    pub compute_shape: bool,
    pub longitudinal_shower_info_available: bool,
}

impl Default for CalorimeterClusterRecoCoGConfig {
    fn default() -> Self {
        CalorimeterClusterRecoCoGConfig {
            energy_weight: EnergyWeight::Log,
            sampling_fraction: 1.0,
            log_weight_base: 3.6,
            log_weight_base_coeffs: Vec::new(),
            log_weight_base_e_ref: 50.0 * MEV,
            enable_eta_bounds: false,
            compute_shape: true,
            longitudinal_shower_info_available: false,
        }
    }
}

/// Center-of-gravity cluster reconstruction
pub struct CalorimeterClusterRecoCoG {
    name: String,
    config: CalorimeterClusterRecoCoGConfig,
}

impl CalorimeterClusterRecoCoG {
    /// Log-weight offset `w0` for a cluster of the given (corrected) energy
    pub fn log_weight_base(&self, cluster_energy: f64) -> f64 {
        let cfg = &self.config;
        if cfg.log_weight_base_coeffs.is_empty() {
            return cfg.log_weight_base;
        }
        let l = (cluster_energy / cfg.log_weight_base_e_ref).ln();
        cfg.log_weight_base_coeffs
            .iter()
            .enumerate()
            .map(|(i, c)| c * l.powi(i as i32))
            .sum()
    }

    #[inline]
    pub fn position_weight(&self, energy: f64, total: f64, base: f64) -> f64 {
        match self.config.energy_weight {
            EnergyWeight::None => 1.0,
            EnergyWeight::Linear => energy,
            EnergyWeight::Log => (base + (energy / total).ln()).max(0.0),
        }
    }

    fn reconstruct(&self, pcl: &ProtoCluster, hits: &[CalorimeterHit]) -> Result<Cluster> {
        let cfg = &self.config;
        if pcl.weights.len() != pcl.hits.len() {
            return Err(RecoError::Input(format!(
                "proto-cluster with {} hits and {} weights",
                pcl.hits.len(),
                pcl.weights.len()
            )));
        }
        let members: Vec<(&CalorimeterHit, f64)> = pcl
            .iter()
            .map(|(idx, w)| {
                hits.get(idx)
                    .map(|h| (h, w))
                    .ok_or_else(|| RecoError::Input(format!("hit index {} out of range ({} hits)", idx, hits.len())))
            })
            .collect::<Result<_>>()?;

        let mut cl = Cluster { n_hits: members.len(), ..Default::default() };

        let mut total_e = 0.0;
        let mut time = 0.0;
        let mut energy_var = 0.0;
        for &(hit, w) in &members {
            let e = hit.energy * w;
            total_e += e;
            if total_e > 0.0 {
                time += (hit.time - time) * e / total_e;
            }
            energy_var += (hit.energy_error * w).powi(2);
            cl.hits.push(hit.cell_id);
            cl.hit_contributions.push(e);
        }
        let hit_refs: Vec<&CalorimeterHit> = members.iter().map(|(h, _)| *h).collect();
        let n = members.len() as f64;
        let arithmetic_mean = hit_refs.iter().map(|h| h.position).sum::<Position>() / n;

        if !(total_e > 0.0) {
            debug!(target: self.name.as_str(), "proto-cluster with {} hits has no weighted energy", members.len());
            cl.energy = 0.0;
            cl.time = hit_refs.iter().map(|h| h.time).sum::<f64>() / n;
            cl.position = arithmetic_mean;
            cl.intrinsic_theta = angle_polar(&cl.position);
            cl.intrinsic_phi = angle_azimuthal(&cl.position);
            if cfg.compute_shape {
                cl.shape_parameters = cluster_shape(&cl.position, &hit_refs, &vec![0.0; members.len()]).parameters;
            }
            return Ok(cl);
        }

        cl.energy = total_e / cfg.sampling_fraction;
        cl.energy_error = energy_var.sqrt() / cfg.sampling_fraction;
        cl.time = time;

        let base = self.log_weight_base(cl.energy);
        let weights: Vec<f64> = members
            .iter()
            .map(|&(h, w)| self.position_weight(h.energy * w, total_e, base))
            .collect();
        let w_sum: f64 = weights.iter().sum();
        if w_sum > 0.0 {
            cl.position = hit_refs.iter().zip(&weights).map(|(h, w)| h.position * *w).sum::<Position>() / w_sum;
            cl.position_error = hit_refs
                .iter()
                .zip(&weights)
                .map(|(h, w)| (h.position - cl.position).component_mul(&(h.position - cl.position)) * *w)
                .sum::<Position>()
                / w_sum;
        } else {
            warn!(target: self.name.as_str(), "all position weights vanish, using the arithmetic mean");
            cl.position = arithmetic_mean;
        }

        if cfg.enable_eta_bounds {
            let (eta_min, eta_max) = hit_refs
                .iter()
                .map(|h| eta(&h.position))
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), e| (lo.min(e), hi.max(e)));
            let cl_eta = eta(&cl.position);
            if cl_eta < eta_min || cl_eta > eta_max {
                let clamped = cl_eta.clamp(eta_min, eta_max);
                cl.position = from_spherical(cl.position.norm(), eta_to_angle(clamped), angle_azimuthal(&cl.position));
            }
        }

        cl.intrinsic_theta = angle_polar(&cl.position);
        cl.intrinsic_phi = angle_azimuthal(&cl.position);

        if cfg.compute_shape {
            let shape = cluster_shape(&cl.position, &hit_refs, &weights);
            if cfg.longitudinal_shower_info_available {
                if let Some(axis) = shape.principal_axis {
                    cl.intrinsic_theta = angle_polar(&axis);
                    cl.intrinsic_phi = angle_azimuthal(&axis);
                }
            }
            cl.shape_parameters = shape.parameters;
        }

        Ok(cl)
    }
}

impl Algorithm for CalorimeterClusterRecoCoG {
    type Config = CalorimeterClusterRecoCoGConfig;
    type Input<'a> = (&'a [CalorimeterHit], &'a [ProtoCluster]);
    type Output = Vec<Cluster>;

    fn init(name: &str, config: Self::Config, _services: &Services) -> Result<Self> {
        if !(config.sampling_fraction > 0.0) {
            return Err(RecoError::config("sampling_fraction", format!("must be positive, got {}", config.sampling_fraction)));
        }
        if !(config.log_weight_base_e_ref > 0.0) {
            return Err(RecoError::config("log_weight_base_e_ref", "must be positive"));
        }
        if !config.log_weight_base.is_finite() || config.log_weight_base_coeffs.iter().any(|c| !c.is_finite()) {
            return Err(RecoError::config("log_weight_base", "must be finite"));
        }
        info!(
            target: name,
            "{:?} weighting, sampling fraction {}, log weight base {}",
            config.energy_weight,
            config.sampling_fraction,
            config.log_weight_base
        );
        Ok(CalorimeterClusterRecoCoG { name: name.to_string(), config })
    }

    fn process(&self, input: Self::Input<'_>, _ctx: &EventContext) -> Result<Vec<Cluster>> {
        let (hits, proto_clusters) = input;
        let mut clusters = Vec::with_capacity(proto_clusters.len());
        for pcl in proto_clusters {
            if pcl.is_empty() {
                debug!(target: self.name.as_str(), "skipping empty proto-cluster");
                continue;
            }
            clusters.push(self.reconstruct(pcl, hits)?);
        }
        Ok(clusters)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
