use std::fs;
use std::path::Path;

use calocore::data::cluster::{Cluster, ProtoCluster};
use calocore::data::hit::{CalorimeterHit, RawCalorimeterHit, SimCalorimeterHit};
use log::{info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};

use crate::algorithm::{EventContext, Factory, Services};
use crate::cluster::island::{CalorimeterIslandCluster, CalorimeterIslandClusterConfig};
use crate::cluster::reco_cog::{CalorimeterClusterRecoCoG, CalorimeterClusterRecoCoGConfig};
use crate::digi::hit_digi::{CalorimeterHitDigi, CalorimeterHitDigiConfig};
use crate::error::Result;
use crate::reco::hit_reco::{CalorimeterHitReco, CalorimeterHitRecoConfig};
use crate::reco::hits_merger::{CalorimeterHitsMerger, CalorimeterHitsMergerConfig};

/// Configuration of the full chain of one calorimeter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub name: String,  // detector prefix for factory names, e.g. "EcalBarrel"
    pub digi: CalorimeterHitDigiConfig,
    pub reco: CalorimeterHitRecoConfig,
    pub merger: Option<CalorimeterHitsMergerConfig>,
    pub island: CalorimeterIslandClusterConfig,
    pub cluster: CalorimeterClusterRecoCoGConfig,
}

impl ChainConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// Every collection produced for one event
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChainOutput {
    pub raw_hits: Vec<RawCalorimeterHit>,
    pub rec_hits: Vec<CalorimeterHit>,
    pub merged_hits: Option<Vec<CalorimeterHit>>,
    pub proto_clusters: Vec<ProtoCluster>,
    pub clusters: Vec<Cluster>,
}

impl ChainOutput {
    /// Hits the proto-clusters index into
    pub fn cluster_hits(&self) -> &[CalorimeterHit] {
        self.merged_hits.as_deref().unwrap_or(&self.rec_hits)
    }
}

/// Digitization, hit reconstruction, optional hit merging, island
/// clustering and cluster reconstruction for one calorimeter
pub struct CalorimeterChain {
    name: String,
    digi: Factory<CalorimeterHitDigi>,
    reco: Factory<CalorimeterHitReco>,
    merger: Option<Factory<CalorimeterHitsMerger>>,
    island: Factory<CalorimeterIslandCluster>,
    cluster: Factory<CalorimeterClusterRecoCoG>,
}

impl CalorimeterChain {
    pub fn init(config: ChainConfig, services: &Services) -> Result<Self> {
        let name = config.name;
        let digi: Factory<CalorimeterHitDigi> = Factory::init(&format!("{}RawHits", name), config.digi, services)?;
        let reco: Factory<CalorimeterHitReco> = Factory::init(&format!("{}RecHits", name), config.reco, services)?;
        let merger: Option<Factory<CalorimeterHitsMerger>> = match config.merger {
            Some(merger) => Some(Factory::init(&format!("{}MergedHits", name), merger, services)?),
            None => None,
        };
        let island: Factory<CalorimeterIslandCluster> = Factory::init(&format!("{}IslandProtoClusters", name), config.island, services)?;
        let cluster: Factory<CalorimeterClusterRecoCoG> = Factory::init(&format!("{}Clusters", name), config.cluster, services)?;
        info!("calorimeter chain '{}' ready", name);
        Ok(CalorimeterChain { name, digi, reco, merger, island, cluster })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self, sim_hits: &[SimCalorimeterHit], ctx: &EventContext) -> Result<ChainOutput> {
        let raw_hits = self.digi.process(sim_hits, ctx)?;
        let rec_hits = self.reco.process(&raw_hits, ctx)?;
        let merged_hits = match &self.merger {
            Some(merger) => Some(merger.process(&rec_hits, ctx)?),
            None => None,
        };
        let hits = merged_hits.as_deref().unwrap_or(&rec_hits);
        let proto_clusters = self.island.process(hits, ctx)?;
        let clusters = self.cluster.process((hits, proto_clusters.as_slice()), ctx)?;
        Ok(ChainOutput { raw_hits, rec_hits, merged_hits, proto_clusters, clusters })
    }

    /// Process events in parallel; event `i` gets event number `first_event + i`.
    ///
    /// # Arguments
    ///
    /// * `events` - simulated hits of each event
    /// * `run` - run number
    /// * `first_event` - event number of `events[0]`
    /// * `num_threads` - worker threads
    ///
    /// # Returns
    ///
    /// * per-event results in input order; the outer error is the first fatal
    ///   error, after which the remaining results are meaningless
    pub fn process_events(
        &self,
        events: &[Vec<SimCalorimeterHit>],
        run: u32,
        first_event: u64,
        num_threads: usize,
    ) -> Result<Vec<Result<ChainOutput>>> {
        let pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;
        let results: Vec<Result<ChainOutput>> = pool.install(|| {
            events
                .par_iter()
                .enumerate()
                .map(|(i, sim_hits)| self.process(sim_hits, &EventContext::new(run, first_event + i as u64)))
                .collect()
        });

        let mut checked = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("{}: {}", self.name, e);
                    checked.push(Err(e));
                }
                ok => checked.push(ok),
            }
        }
        Ok(checked)
    }
}
