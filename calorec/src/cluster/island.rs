use std::cmp::Reverse;

use calocore::algorithm::vector::{angle_azimuthal, eta, phi_mpi_pi};
use calocore::data::cluster::ProtoCluster;
use calocore::data::hit::CalorimeterHit;
use calocore::geometry::id_spec::BitField;
use calocore::units::{CM, MEV};
use log::{debug, info, trace};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::error::{RecoError, Result};

/// Two-component distance between hits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    LocalDistXy,
    LocalDistXz,
    LocalDistYz,
    /// local x/y distance in units of the mean cell size
    DimScaledLocalDistXy,
    /// (radius, azimuth) difference of the global positions
    GlobalDistRPhi,
    /// (pseudorapidity, azimuth) difference of the global positions
    GlobalDistEtaPhi,
}

impl DistanceMetric {
    #[inline]
    pub fn delta(&self, a: &CalorimeterHit, b: &CalorimeterHit) -> [f64; 2] {
        match self {
            DistanceMetric::LocalDistXy => [a.local.x - b.local.x, a.local.y - b.local.y],
            DistanceMetric::LocalDistXz => [a.local.x - b.local.x, a.local.z - b.local.z],
            DistanceMetric::LocalDistYz => [a.local.y - b.local.y, a.local.z - b.local.z],
            DistanceMetric::DimScaledLocalDistXy => [
                2.0 * (a.local.x - b.local.x) / (a.dimension.x + b.dimension.x),
                2.0 * (a.local.y - b.local.y) / (a.dimension.y + b.dimension.y),
            ],
            DistanceMetric::GlobalDistRPhi => [
                a.position.norm() - b.position.norm(),
                phi_mpi_pi(angle_azimuthal(&a.position) - angle_azimuthal(&b.position)),
            ],
            DistanceMetric::GlobalDistEtaPhi => [
                eta(&a.position) - eta(&b.position),
                phi_mpi_pi(angle_azimuthal(&a.position) - angle_azimuthal(&b.position)),
            ],
        }
    }

    #[inline]
    pub fn distance(&self, a: &CalorimeterHit, b: &CalorimeterHit) -> f64 {
        let [d0, d1] = self.delta(a, b);
        d0.hypot(d1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridNorm {
    Manhattan,
    Chebyshev,
}

/// Neighbour test between two hits
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Adjacency {
    /// `|delta[i]| <= max[i]` for hits in the same sector
    Distance { metric: DistanceMetric, max: [f64; 2] },
    /// norm of the field-wise index differences in `1..=max_steps`
    CellGrid { fields: Vec<String>, norm: GridNorm, max_steps: i64 },
    /// Imaging layers: local (x, y) within a layer, global (eta, phi) for
    /// layers at most `layer_range` apart, never beyond
    Layered { same_layer: [f64; 2], layer_range: i32, layer_dist_eta_phi: [f64; 2] },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorimeterIslandClusterConfig {
    pub readout: String,
    pub adjacency: Adjacency,
    pub peak_neighbourhood: Option<Adjacency>,  // local maximum test, defaults to `adjacency`
    pub sector_dist: f64,                        // neighbour distance for hits in different sectors
    pub time_window: Option<f64>,
    pub min_cluster_hit_edep: f64,
    pub min_cluster_center_edep: f64,
    pub min_cluster_edep: f64,
    pub split_cluster: bool,
    pub transverse_energy_profile_metric: DistanceMetric,
    pub transverse_energy_profile_scale: f64,
}

impl Default for CalorimeterIslandClusterConfig {
    fn default() -> Self {
        CalorimeterIslandClusterConfig {
            readout: String::new(),
            adjacency: Adjacency::Distance { metric: DistanceMetric::DimScaledLocalDistXy, max: [1.8, 1.8] },
            peak_neighbourhood: None,
            sector_dist: 5.0 * CM,
            time_window: None,
            min_cluster_hit_edep: 0.0,
            min_cluster_center_edep: 50.0 * MEV,
            min_cluster_edep: 0.0,
            split_cluster: false,
            transverse_energy_profile_metric: DistanceMetric::GlobalDistEtaPhi,
            transverse_energy_profile_scale: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
enum Neighbourhood {
    Distance { metric: DistanceMetric, max: [f64; 2] },
    CellGrid { fields: Vec<BitField>, norm: GridNorm, max_steps: i64 },
    Layered { same_layer: [f64; 2], layer_range: i32, layer_dist_eta_phi: [f64; 2] },
}

impl Neighbourhood {
    fn resolve(parameter: &str, adjacency: &Adjacency, readout: &str, services: &Services) -> Result<Self> {
        match adjacency {
            Adjacency::Distance { metric, max } => {
                if max.iter().any(|m| !(*m >= 0.0)) {
                    return Err(RecoError::config(parameter, format!("distance limits must not be negative, got {:?}", max)));
                }
                Ok(Neighbourhood::Distance { metric: *metric, max: *max })
            }
            Adjacency::CellGrid { fields, norm, max_steps } => {
                if readout.is_empty() || fields.is_empty() {
                    return Err(RecoError::config(parameter, "cell grid adjacency needs a readout and fields"));
                }
                if *max_steps < 1 {
                    return Err(RecoError::config(parameter, "max_steps must be at least 1"));
                }
                let spec = services
                    .geometry
                    .id_spec(readout)
                    .map_err(|e| RecoError::config("readout", e.to_string()))?;
                let fields = fields
                    .iter()
                    .map(|f| spec.field(f).cloned().map_err(|e| RecoError::config(parameter, e.to_string())))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Neighbourhood::CellGrid { fields, norm: *norm, max_steps: *max_steps })
            }
            Adjacency::Layered { same_layer, layer_range, layer_dist_eta_phi } => {
                if same_layer.iter().chain(layer_dist_eta_phi).any(|m| !(*m >= 0.0)) {
                    return Err(RecoError::config(parameter, "layer distance limits must not be negative"));
                }
                if *layer_range < 0 {
                    return Err(RecoError::config(parameter, "layer_range must not be negative"));
                }
                Ok(Neighbourhood::Layered {
                    same_layer: *same_layer,
                    layer_range: *layer_range,
                    layer_dist_eta_phi: *layer_dist_eta_phi,
                })
            }
        }
    }

    fn contains(&self, a: &CalorimeterHit, b: &CalorimeterHit, sector_dist: f64) -> bool {
        match self {
            Neighbourhood::Distance { metric, max } => {
                if a.sector == b.sector {
                    let [d0, d1] = metric.delta(a, b);
                    d0.abs() <= max[0] && d1.abs() <= max[1]
                } else {
                    (a.position - b.position).norm() <= sector_dist
                }
            }
            Neighbourhood::CellGrid { fields, norm, max_steps } => {
                let steps = fields.iter().map(|f| (f.value(a.cell_id) - f.value(b.cell_id)).abs());
                let n = match norm {
                    GridNorm::Manhattan => steps.sum::<i64>(),
                    GridNorm::Chebyshev => steps.max().unwrap_or(0),
                };
                n >= 1 && n <= *max_steps
            }
            Neighbourhood::Layered { same_layer, layer_range, layer_dist_eta_phi } => {
                if a.sector != b.sector {
                    return (a.position - b.position).norm() <= sector_dist;
                }
                let layers = (a.layer - b.layer).abs();
                if layers == 0 {
                    let [dx, dy] = DistanceMetric::LocalDistXy.delta(a, b);
                    dx.abs() <= same_layer[0] && dy.abs() <= same_layer[1]
                } else if layers <= *layer_range {
                    let [deta, dphi] = DistanceMetric::GlobalDistEtaPhi.delta(a, b);
                    deta.abs() <= layer_dist_eta_phi[0] && dphi.abs() <= layer_dist_eta_phi[1]
                } else {
                    false
                }
            }
        }
    }
}

/// Island (flood-fill) proto-clustering.
///
/// Hits are ranked by descending energy, ties broken by ascending cell id and
/// then input position. Each unassigned hit passing the centre threshold seeds
/// an island that absorbs every unassigned neighbour of its members. With
/// `split_cluster` an island holding several local maxima is shared between
/// them: hit `i` goes to maximum `j` with weight proportional to
/// `E_j * exp(-d(i, j) / transverse_energy_profile_scale)`; weights at or
/// below 1e-6 are dropped.
pub struct CalorimeterIslandCluster {
    name: String,
    config: CalorimeterIslandClusterConfig,
    adjacency: Neighbourhood,
    peak: Neighbourhood,
}

const MIN_SHARED_WEIGHT: f64 = 1e-6;

impl CalorimeterIslandCluster {
    #[inline]
    fn is_neighbour(&self, a: &CalorimeterHit, b: &CalorimeterHit) -> bool {
        if let Some(window) = self.config.time_window {
            if (a.time - b.time).abs() > window {
                return false;
            }
        }
        self.adjacency.contains(a, b, self.config.sector_dist)
    }

    /// Members of `group` (sorted by rank) that outrank all their peak neighbours
    fn find_maxima(&self, hits: &[CalorimeterHit], group: &[usize], rank: &[usize]) -> Vec<usize> {
        if !self.config.split_cluster {
            return vec![group[0]];
        }
        group
            .iter()
            .copied()
            .filter(|&i| hits[i].energy >= self.config.min_cluster_center_edep)
            .filter(|&i| {
                group
                    .iter()
                    .all(|&j| j == i || rank[j] > rank[i] || !self.peak.contains(&hits[i], &hits[j], self.config.sector_dist))
            })
            .collect()
    }

    fn split_group(&self, hits: &[CalorimeterHit], group: &[usize], maxima: &[usize]) -> Vec<ProtoCluster> {
        if maxima.len() <= 1 {
            let mut pcl = ProtoCluster::new();
            for &i in group {
                pcl.add_hit(i, 1.0);
            }
            return vec![pcl];
        }

        let metric = self.config.transverse_energy_profile_metric;
        let scale = self.config.transverse_energy_profile_scale;
        let mut clusters = vec![ProtoCluster::new(); maxima.len()];
        let mut weights = vec![0.0; maxima.len()];
        for &i in group {
            for (w, &m) in weights.iter_mut().zip(maxima) {
                *w = hits[m].energy * (-metric.distance(&hits[i], &hits[m]) / scale).exp();
            }
            let total: f64 = weights.iter().sum();
            if !(total > 0.0) {
                // profile underflow, the hit goes whole to its nearest maximum
                let nearest = maxima
                    .iter()
                    .enumerate()
                    .min_by_key(|&(_, &m)| OrderedFloat(metric.distance(&hits[i], &hits[m])))
                    .map_or(0, |(k, _)| k);
                debug!(target: self.name.as_str(), "hit {} has no profile weight, assigned to maximum {}", i, maxima[nearest]);
                clusters[nearest].add_hit(i, 1.0);
                continue;
            }
            for (pcl, w) in clusters.iter_mut().zip(&weights) {
                let w = w / total;
                if w > MIN_SHARED_WEIGHT {
                    pcl.add_hit(i, w);
                }
            }
        }
        clusters
    }
}

impl Algorithm for CalorimeterIslandCluster {
    type Config = CalorimeterIslandClusterConfig;
    type Input<'a> = &'a [CalorimeterHit];
    type Output = Vec<ProtoCluster>;

    fn init(name: &str, config: Self::Config, services: &Services) -> Result<Self> {
        if !(config.sector_dist >= 0.0) {
            return Err(RecoError::config("sector_dist", "must not be negative"));
        }
        if let Some(window) = config.time_window {
            if !(window >= 0.0) {
                return Err(RecoError::config("time_window", "must not be negative"));
            }
        }
        if !(config.transverse_energy_profile_scale > 0.0) {
            return Err(RecoError::config("transverse_energy_profile_scale", "must be positive"));
        }

        let adjacency = Neighbourhood::resolve("adjacency", &config.adjacency, &config.readout, services)?;
        let peak = match &config.peak_neighbourhood {
            Some(p) => Neighbourhood::resolve("peak_neighbourhood", p, &config.readout, services)?,
            None => adjacency.clone(),
        };

        info!(
            target: name,
            "adjacency {:?}, seed threshold {} MeV, split clusters: {}",
            config.adjacency,
            config.min_cluster_center_edep / MEV,
            config.split_cluster
        );

        Ok(CalorimeterIslandCluster { name: name.to_string(), config, adjacency, peak })
    }

    fn process(&self, hits: Self::Input<'_>, _ctx: &EventContext) -> Result<Vec<ProtoCluster>> {
        let cfg = &self.config;

        let mut order: Vec<usize> = (0..hits.len())
            .filter(|&i| hits[i].energy >= cfg.min_cluster_hit_edep)
            .collect();
        order.sort_by_key(|&i| (Reverse(OrderedFloat(hits[i].energy)), hits[i].cell_id, i));

        let mut rank = vec![usize::MAX; hits.len()];
        for (r, &i) in order.iter().enumerate() {
            rank[i] = r;
        }

        let mut assigned = vec![false; hits.len()];
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for &seed in &order {
            if assigned[seed] || hits[seed].energy < cfg.min_cluster_center_edep {
                continue;
            }
            assigned[seed] = true;
            let mut group = vec![seed];
            let mut cursor = 0;
            while cursor < group.len() {
                let current = group[cursor];
                cursor += 1;
                for &j in &order {
                    if !assigned[j] && self.is_neighbour(&hits[current], &hits[j]) {
                        assigned[j] = true;
                        group.push(j);
                    }
                }
            }
            group.sort_by_key(|&i| rank[i]);
            trace!(target: self.name.as_str(), "island seeded by hit {} with {} hits", seed, group.len());
            groups.push(group);
        }

        let mut proto_clusters = Vec::new();
        for group in &groups {
            let maxima = self.find_maxima(hits, group, &rank);
            for pcl in self.split_group(hits, group, &maxima) {
                let energy = pcl.energy(hits);
                if pcl.is_empty() || energy < cfg.min_cluster_edep {
                    debug!(target: self.name.as_str(), "dropping proto-cluster with {} hits and {} GeV", pcl.len(), energy);
                    continue;
                }
                proto_clusters.push(pcl);
            }
        }

        debug!(
            target: self.name.as_str(),
            "{} hits -> {} islands -> {} proto-clusters",
            hits.len(),
            groups.len(),
            proto_clusters.len()
        );
        Ok(proto_clusters)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
