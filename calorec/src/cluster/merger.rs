use calocore::algorithm::vector::{angle_azimuthal, angle_polar, delta_r};
use calocore::data::cluster::{Cluster, ShapeParameter};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::error::{RecoError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MergeScheme {
    /// concatenate A then B
    Vacuum = 0,
    /// greedy nearest match in (eta, phi)
    EtaPhi = 1,
}

impl TryFrom<u8> for MergeScheme {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(MergeScheme::Vacuum),
            1 => Ok(MergeScheme::EtaPhi),
            other => Err(format!("unknown merge scheme {}", other)),
        }
    }
}

impl From<MergeScheme> for u8 {
    fn from(scheme: MergeScheme) -> u8 {
        scheme as u8
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossCaloClusterMergerConfig {
    pub merge_scheme: MergeScheme,
    pub energy_fraction_a: f64,  // e.g. electromagnetic section
    pub energy_fraction_b: f64,  // e.g. hadronic section
    pub merge_distance: f64,     // in (eta, phi)
}

impl Default for CrossCaloClusterMergerConfig {
    fn default() -> Self {
        CrossCaloClusterMergerConfig {
            merge_scheme: MergeScheme::Vacuum,
            energy_fraction_a: 1.0,
            energy_fraction_b: 1.0,
            merge_distance: 0.1,
        }
    }
}

/// Combines cluster collections of two calorimeter sections. Unmatched
/// clusters pass through unchanged, those of A first. Inputs are never
/// modified; merged clusters keep both partners as sub-clusters.
pub struct CrossCaloClusterMerger {
    name: String,
    config: CrossCaloClusterMergerConfig,
}

/// Fraction-weighted combination of two clusters
pub fn merge_pair(a: &Cluster, fa: f64, b: &Cluster, fb: f64) -> Cluster {
    let ea = fa * a.energy;
    let eb = fb * b.energy;
    let energy = ea + eb;
    let (wa, wb) = if energy > 0.0 { (ea / energy, eb / energy) } else { (0.5, 0.5) };

    let position = a.position * wa + b.position * wb;
    let mut hits = a.hits.clone();
    hits.extend_from_slice(&b.hits);
    let mut hit_contributions = a.hit_contributions.clone();
    hit_contributions.extend_from_slice(&b.hit_contributions);

    Cluster {
        energy,
        energy_error: (fa * a.energy_error).hypot(fb * b.energy_error),
        time: a.time * wa + b.time * wb,
        time_error: (wa * a.time_error).hypot(wb * b.time_error),
        n_hits: a.n_hits + b.n_hits,
        position,
        position_error: a.position_error * wa.powi(2) + b.position_error * wb.powi(2),
        intrinsic_theta: angle_polar(&position),
        intrinsic_phi: angle_azimuthal(&position),
        shape_parameters: vec![0.0; ShapeParameter::COUNT],
        hits,
        hit_contributions,
        sub_clusters: vec![a.clone(), b.clone()],
    }
}

impl Algorithm for CrossCaloClusterMerger {
    type Config = CrossCaloClusterMergerConfig;
    type Input<'a> = (&'a [Cluster], &'a [Cluster]);
    type Output = Vec<Cluster>;

    fn init(name: &str, config: Self::Config, _services: &Services) -> Result<Self> {
        if !(config.energy_fraction_a > 0.0) {
            return Err(RecoError::config("energy_fraction_a", "must be positive"));
        }
        if !(config.energy_fraction_b > 0.0) {
            return Err(RecoError::config("energy_fraction_b", "must be positive"));
        }
        if !(config.merge_distance >= 0.0) {
            return Err(RecoError::config("merge_distance", "must not be negative"));
        }
        info!(target: name, "merge scheme {:?}, distance {}", config.merge_scheme, config.merge_distance);
        Ok(CrossCaloClusterMerger { name: name.to_string(), config })
    }

    fn process(&self, input: Self::Input<'_>, _ctx: &EventContext) -> Result<Vec<Cluster>> {
        let (a, b) = input;
        let cfg = &self.config;

        if cfg.merge_scheme == MergeScheme::Vacuum {
            return Ok(a.iter().chain(b.iter()).cloned().collect());
        }

        let mut consumed = vec![false; b.len()];
        let mut merged = Vec::with_capacity(a.len() + b.len());
        for ca in a {
            let mut best: Option<(usize, f64)> = None;
            for (j, cb) in b.iter().enumerate() {
                if consumed[j] {
                    continue;
                }
                let dr = delta_r(&ca.position, &cb.position);
                if dr <= cfg.merge_distance && best.map_or(true, |(_, d)| dr < d) {
                    best = Some((j, dr));
                }
            }
            match best {
                Some((j, dr)) => {
                    consumed[j] = true;
                    trace!(target: self.name.as_str(), "merging clusters at dR {}", dr);
                    merged.push(merge_pair(ca, cfg.energy_fraction_a, &b[j], cfg.energy_fraction_b));
                }
                None => merged.push(ca.clone()),
            }
        }
        merged.extend(b.iter().zip(&consumed).filter(|(_, used)| !**used).map(|(cb, _)| cb.clone()));

        debug!(
            target: self.name.as_str(),
            "{} + {} clusters -> {}",
            a.len(),
            b.len(),
            merged.len()
        );
        Ok(merged)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use calocore::algorithm::vector::from_spherical;
    use calocore::geometry::grid::CartesianGridGeometry;
    use calocore::random::SeededStreams;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    fn services() -> Services {
        Services::new(Arc::new(CartesianGridGeometry::new(vec![]).unwrap()), Arc::new(SeededStreams::new(1)))
    }

    fn cluster(energy: f64, phi: f64, r: f64, time: f64) -> Cluster {
        Cluster {
            energy,
            time,
            n_hits: 1,
            position: from_spherical(r, FRAC_PI_2, phi),
            hits: vec![(phi * 1000.0) as u64],
            hit_contributions: vec![energy],
            ..Default::default()
        }
    }

    fn merger(config: CrossCaloClusterMergerConfig) -> CrossCaloClusterMerger {
        CrossCaloClusterMerger::init("merger", config, &services()).unwrap()
    }

    #[test]
    fn test_vacuum_is_concatenation() {
        let m = merger(Default::default());
        let a = vec![cluster(1.0, 0.1, 1000.0, 1.0), cluster(2.0, 0.2, 1000.0, 1.0)];
        let b = vec![cluster(3.0, 0.1, 2000.0, 2.0)];
        let out = m.process((&a, &b), &EventContext::default()).unwrap();
        assert_eq!(out, vec![a[0].clone(), a[1].clone(), b[0].clone()]);
    }

    #[test]
    fn test_eta_phi_merge() {
        let m = merger(CrossCaloClusterMergerConfig {
            merge_scheme: MergeScheme::EtaPhi,
            energy_fraction_a: 1.0,
            energy_fraction_b: 0.5,
            merge_distance: 0.1,
        });
        let a = vec![cluster(1.0, 0.0, 1000.0, 2.0), cluster(1.0, 1.0, 1000.0, 1.0)];
        let b = vec![cluster(2.0, 0.05, 2000.0, 4.0), cluster(1.0, 2.0, 2000.0, 1.0)];
        let out = m.process((&a, &b), &EventContext::default()).unwrap();

        assert_eq!(out.len(), 3);
        let combined = &out[0];
        assert_relative_eq!(combined.energy, 2.0, epsilon = 1e-12);
        assert_relative_eq!(combined.time, 3.0, epsilon = 1e-12);
        assert_relative_eq!(combined.position, (a[0].position + b[0].position) * 0.5, epsilon = 1e-9);
        assert_eq!(combined.n_hits, 2);
        assert_eq!(combined.sub_clusters, vec![a[0].clone(), b[0].clone()]);
        assert_eq!(out[1], a[1]);
        assert_eq!(out[2], b[1]);
    }

    #[test]
    fn test_merged_cluster_keeps_shape_layout() {
        let mut a = cluster(1.0, 0.0, 1000.0, 0.0);
        a.shape_parameters = vec![1.0; ShapeParameter::COUNT];
        let merged = merge_pair(&a, 1.0, &cluster(1.0, 0.0, 2000.0, 0.0), 1.0);
        assert_eq!(merged.shape_parameters, vec![0.0; ShapeParameter::COUNT]);
        assert_eq!(merged.sub_clusters[0].shape_parameters.len(), ShapeParameter::COUNT);
    }

    #[test]
    fn test_nearest_candidate_wins_and_is_consumed_once() {
        let m = merger(CrossCaloClusterMergerConfig { merge_scheme: MergeScheme::EtaPhi, ..Default::default() });
        let a = vec![cluster(1.0, 0.0, 1000.0, 0.0), cluster(1.0, 0.01, 1000.0, 0.0)];
        let b = vec![cluster(1.0, 0.08, 2000.0, 0.0), cluster(1.0, 0.02, 2000.0, 0.0)];
        let out = m.process((&a, &b), &EventContext::default()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sub_clusters[1], b[1]);
        assert_eq!(out[1].sub_clusters[1], b[0]);
    }

    #[test]
    fn test_ties_go_to_first_candidate() {
        let m = merger(CrossCaloClusterMergerConfig { merge_scheme: MergeScheme::EtaPhi, ..Default::default() });
        let a = vec![cluster(1.0, 0.0, 1000.0, 0.0)];
        let b = vec![cluster(1.0, 0.05, 2000.0, 0.0), cluster(2.0, -0.05, 2000.0, 0.0)];
        let out = m.process((&a, &b), &EventContext::default()).unwrap();
        assert_eq!(out[0].sub_clusters[1], b[0]);
        assert_eq!(out[1], b[1]);
    }

    #[test]
    fn test_scheme_from_json() {
        let config: CrossCaloClusterMergerConfig = serde_json::from_str(r#"{"merge_scheme": 1}"#).unwrap();
        assert_eq!(config.merge_scheme, MergeScheme::EtaPhi);
        assert!(serde_json::from_str::<CrossCaloClusterMergerConfig>(r#"{"merge_scheme": 7}"#).is_err());
    }

    #[test]
    fn test_invalid_configuration() {
        for config in [
            CrossCaloClusterMergerConfig { energy_fraction_a: 0.0, ..Default::default() },
            CrossCaloClusterMergerConfig { energy_fraction_b: -1.0, ..Default::default() },
            CrossCaloClusterMergerConfig { merge_distance: -0.1, ..Default::default() },
        ] {
            assert!(CrossCaloClusterMerger::init("merger", config, &services()).is_err());
        }
    }
}
