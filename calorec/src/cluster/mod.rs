pub mod island;
pub mod truth;
pub mod reco_cog;
pub mod shape;
pub mod merger;
pub mod energy_position_merger;

// Re-export commonly used types
pub use island::{Adjacency, CalorimeterIslandCluster, CalorimeterIslandClusterConfig, DistanceMetric, GridNorm};
pub use energy_position_merger::{EnergyPositionClusterMerger, EnergyPositionClusterMergerConfig};
pub use merger::{CrossCaloClusterMerger, CrossCaloClusterMergerConfig, MergeScheme};
pub use reco_cog::{CalorimeterClusterRecoCoG, CalorimeterClusterRecoCoGConfig, EnergyWeight};
pub use truth::{CalorimeterTruthClustering, CalorimeterTruthClusteringConfig};
