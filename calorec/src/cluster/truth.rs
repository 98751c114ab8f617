use std::collections::HashMap;

use calocore::data::cluster::ProtoCluster;
use calocore::data::hit::{CalorimeterHit, CellId, SimCalorimeterHit};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::error::Result;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorimeterTruthClusteringConfig {}

/// Groups reconstructed hits by the MC particle behind the first
/// contribution of the simulated hit in the same cell. Hits without a
/// simulated counterpart are left out.
pub struct CalorimeterTruthClustering {
    name: String,
    config: CalorimeterTruthClusteringConfig,
}

impl Algorithm for CalorimeterTruthClustering {
    type Config = CalorimeterTruthClusteringConfig;
    type Input<'a> = (&'a [CalorimeterHit], &'a [SimCalorimeterHit]);
    type Output = Vec<ProtoCluster>;

    fn init(name: &str, config: Self::Config, _services: &Services) -> Result<Self> {
        Ok(CalorimeterTruthClustering { name: name.to_string(), config })
    }

    fn process(&self, input: Self::Input<'_>, _ctx: &EventContext) -> Result<Vec<ProtoCluster>> {
        let (hits, sim_hits) = input;

        let mut sim_by_cell: HashMap<CellId, &SimCalorimeterHit> = HashMap::with_capacity(sim_hits.len());
        for sim in sim_hits {
            sim_by_cell.entry(sim.cell_id).or_insert(sim);
        }

        let mut cluster_of: HashMap<u64, usize> = HashMap::new();
        let mut clusters: Vec<ProtoCluster> = Vec::new();
        for (ix, hit) in hits.iter().enumerate() {
            let Some(particle) = sim_by_cell.get(&hit.cell_id).and_then(|s| s.mc_particle()) else {
                debug!(target: self.name.as_str(), "cell {:#018x}: no simulated hit with contributions", hit.cell_id);
                continue;
            };
            let slot = *cluster_of.entry(particle).or_insert_with(|| {
                clusters.push(ProtoCluster::new());
                clusters.len() - 1
            });
            clusters[slot].add_hit(ix, 1.0);
        }
        Ok(clusters)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
