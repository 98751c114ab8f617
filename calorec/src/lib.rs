// src/lib.rs
pub mod error;
pub mod algorithm;
pub mod chain;

pub mod digi {
    pub mod hit_digi;
}

pub mod reco {
    pub mod hit_reco;
    pub mod hits_merger;
}

pub mod cluster;

// Re-export commonly used types
pub use algorithm::{Algorithm, EventContext, Factory, Services};
pub use chain::{CalorimeterChain, ChainConfig, ChainOutput};
pub use error::{RecoError, Result};
