use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Source of independent, reproducible random streams. A stream is fully
/// determined by the algorithm name and the event number, so results do not
/// depend on which thread processes which event.
pub trait RandomStreams: Send + Sync {
    fn stream(&self, name: &str, event: u64) -> Box<dyn RngCore + Send>;
}

/// `StdRng` streams keyed by `(seed, name, event)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeededStreams {
    pub seed: u64,
}

impl SeededStreams {
    pub fn new(seed: u64) -> Self {
        SeededStreams { seed }
    }

    pub fn stream_seed(&self, name: &str, event: u64) -> u64 {
        // FNV-1a over the name, then two splitmix rounds to decorrelate
        // neighbouring events
        let name_hash = name
            .bytes()
            .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0000_0100_0000_01b3));
        splitmix64(splitmix64(self.seed ^ name_hash) ^ event)
    }
}

impl Default for SeededStreams {
    fn default() -> Self {
        SeededStreams::new(1)
    }
}

impl RandomStreams for SeededStreams {
    fn stream(&self, name: &str, event: u64) -> Box<dyn RngCore + Send> {
        Box::new(StdRng::seed_from_u64(self.stream_seed(name, event)))
    }
}

#[inline]
fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
