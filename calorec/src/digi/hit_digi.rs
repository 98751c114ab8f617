use std::collections::HashMap;
use std::sync::Arc;

use calocore::data::hit::{CellId, RawCalorimeterHit, SimCalorimeterHit};
use calocore::geometry::id_spec::IdSpec;
use calocore::random::RandomStreams;
use calocore::units::{GEV, KEV, MEV, NS, PS};
use log::{debug, trace, warn};
use rand::distributions::Distribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::error::{RecoError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorimeterHitDigiConfig {
    pub energy_resolution: Vec<f64>,  // [a, b, c] of sqrt((a/sqrt(E))^2 + b^2 + (c/E)^2), empty for none
    pub time_resolution: f64,
    pub capture_time: f64,            // contributions later than this are not read out
    pub capacity_adc: u32,
    pub dynamic_range_adc: f64,
    pub pedestal_mean_adc: u32,
    pub pedestal_sigma_adc: f64,
    pub resolution_tdc: f64,
    pub capacity_tdc: u32,
    pub corr_mean_scale: f64,
    pub smearing_min_edep: f64,       // energy resolution is applied above this deposit only
    pub threshold_value: f64,         // zero suppression, ADC counts above pedestal
    pub threshold_factor: f64,        // zero suppression, in units of pedestal sigma
    pub readout: String,
    pub fields: Vec<String>,          // segmentation fields summed over
}

impl Default for CalorimeterHitDigiConfig {
    fn default() -> Self {
        CalorimeterHitDigiConfig {
            energy_resolution: Vec::new(),
            time_resolution: 0.0 * NS,
            capture_time: 1000.0 * NS,
            capacity_adc: 8096,
            dynamic_range_adc: 100.0 * MEV,
            pedestal_mean_adc: 400,
            pedestal_sigma_adc: 3.2,
            resolution_tdc: 10.0 * PS,
            capacity_tdc: u32::MAX,
            corr_mean_scale: 1.0,
            smearing_min_edep: 1.0 * KEV,
            threshold_value: 0.0,
            threshold_factor: 0.0,
            readout: String::new(),
            fields: Vec::new(),
        }
    }
}

/// Relative energy resolution for a deposit `edep` (in GeV)
#[inline]
pub fn relative_resolution(terms: &[f64; 3], edep: f64) -> f64 {
    let e = edep / GEV;
    ((terms[0] / e.sqrt()).powi(2) + terms[1].powi(2) + (terms[2] / e).powi(2)).sqrt()
}

/// Converts simulated deposits into ADC/TDC readings. Deposits are summed per
/// cell (or per group of cells when `fields` are configured), smeared, turned
/// into saturating counts and zero suppressed.
pub struct CalorimeterHitDigi {
    name: String,
    config: CalorimeterHitDigiConfig,
    resolution: [f64; 3],
    id_spec: Option<IdSpec>,
    id_mask: u64,
    gauss: Normal,
    random: Arc<dyn RandomStreams>,
}

impl CalorimeterHitDigi {
    fn group_key(&self, cell_id: CellId) -> Option<CellId> {
        if let Some(spec) = &self.id_spec {
            if let Err(e) = spec.validate(cell_id) {
                warn!(target: self.name.as_str(), "skipping sim hit: {}", e);
                return None;
            }
        }
        Some(cell_id & self.id_mask)
    }

    /// Amplitude for an already smeared deposit; saturates at `capacity_adc - 1`
    pub fn amplitude(&self, edep: f64, pedestal: f64, relative_smear: f64) -> u32 {
        let cfg = &self.config;
        let counts = (pedestal
            + edep * cfg.corr_mean_scale * (1.0 + relative_smear) / cfg.dynamic_range_adc * cfg.capacity_adc as f64)
            .round();
        counts.clamp(0.0, (cfg.capacity_adc - 1) as f64) as u32
    }

    /// Time stamp for a smeared time; saturates at `capacity_tdc - 1`
    pub fn time_stamp(&self, time: f64) -> u32 {
        let cfg = &self.config;
        (time / cfg.resolution_tdc).round().clamp(0.0, (cfg.capacity_tdc - 1) as f64) as u32
    }

    /// True when the amplitude survives zero suppression: the counts above
    /// pedestal reach both the absolute and the noise-scaled threshold
    pub fn passes_threshold(&self, amplitude: u32) -> bool {
        let cfg = &self.config;
        let threshold = cfg.threshold_value.max(cfg.threshold_factor * cfg.pedestal_sigma_adc);
        amplitude as f64 - cfg.pedestal_mean_adc as f64 >= threshold
    }
}

impl Algorithm for CalorimeterHitDigi {
    type Config = CalorimeterHitDigiConfig;
    type Input<'a> = &'a [SimCalorimeterHit];
    type Output = Vec<RawCalorimeterHit>;

    fn init(name: &str, config: Self::Config, services: &Services) -> Result<Self> {
        if config.capacity_adc == 0 {
            return Err(RecoError::config("capacity_adc", "must be positive"));
        }
        if config.capacity_tdc == 0 {
            return Err(RecoError::config("capacity_tdc", "must be positive"));
        }
        if !(config.dynamic_range_adc > 0.0) {
            return Err(RecoError::config("dynamic_range_adc", format!("must be positive, got {}", config.dynamic_range_adc)));
        }
        if !(config.resolution_tdc > 0.0) {
            return Err(RecoError::config("resolution_tdc", format!("must be positive, got {}", config.resolution_tdc)));
        }
        if !(config.time_resolution >= 0.0) {
            return Err(RecoError::config("time_resolution", "must not be negative"));
        }
        if !(config.pedestal_sigma_adc >= 0.0) {
            return Err(RecoError::config("pedestal_sigma_adc", "must not be negative"));
        }
        if !config.corr_mean_scale.is_finite() {
            return Err(RecoError::config("corr_mean_scale", "must be finite"));
        }

        let resolution = match config.energy_resolution.as_slice() {
            [] => [0.0; 3],
            [a, b, c] if [a, b, c].iter().all(|v| v.is_finite() && **v >= 0.0) => [*a, *b, *c],
            other => {
                return Err(RecoError::config(
                    "energy_resolution",
                    format!("expected none or three non-negative terms, got {:?}", other),
                ))
            }
        };

        let (id_spec, id_mask) = if config.readout.is_empty() {
            if !config.fields.is_empty() {
                return Err(RecoError::config("fields", "summing over fields requires a readout"));
            }
            (None, u64::MAX)
        } else {
            let spec = services
                .geometry
                .id_spec(&config.readout)
                .map_err(|e| RecoError::config("readout", e.to_string()))?;
            let mask = spec
                .mask_of(&config.fields)
                .map_err(|e| RecoError::config("fields", e.to_string()))?;
            (Some(spec), !mask)
        };

        let gauss = Normal::new(0.0, 1.0).map_err(|e| RecoError::config("random", e.to_string()))?;

        debug!(
            target: name,
            "readout '{}', id mask {:#018x}, capacity {} / {} GeV",
            config.readout, id_mask, config.capacity_adc, config.dynamic_range_adc / GEV
        );

        Ok(CalorimeterHitDigi {
            name: name.to_string(),
            config,
            resolution,
            id_spec,
            id_mask,
            gauss,
            random: services.random.clone(),
        })
    }

    fn process(&self, sim_hits: Self::Input<'_>, ctx: &EventContext) -> Result<Vec<RawCalorimeterHit>> {
        let cfg = &self.config;
        let mut rng = self.random.stream(&self.name, ctx.event);

        // groups in order of first appearance
        let mut order: Vec<CellId> = Vec::new();
        let mut groups: HashMap<CellId, Vec<usize>> = HashMap::new();
        for (ix, hit) in sim_hits.iter().enumerate() {
            if let Some(key) = self.group_key(hit.cell_id) {
                groups
                    .entry(key)
                    .or_insert_with(|| {
                        order.push(key);
                        Vec::new()
                    })
                    .push(ix);
            }
        }

        let mut raw_hits = Vec::with_capacity(order.len());
        for key in order {
            let members = &groups[&key];

            let mut edep = 0.0;
            let mut time: Option<f64> = None;
            let mut leading: Option<(usize, f64)> = None;
            for &ix in members {
                let hit = &sim_hits[ix];
                let t = match hit.earliest_time() {
                    Some(t) if t <= cfg.capture_time => t,
                    _ => {
                        trace!(target: self.name.as_str(), "cell {:#018x}: no contribution inside capture time", hit.cell_id);
                        continue;
                    }
                };
                edep += hit.energy;
                if time.map_or(true, |best| t < best) {
                    time = Some(t);
                }
                if leading.map_or(true, |(_, e)| hit.energy > e) {
                    leading = Some((ix, hit.energy));
                }
            }
            let (Some(time), Some((leading, _))) = (time, leading) else {
                continue;
            };

            // fixed draw order keeps the stream aligned whatever the sigmas are
            let z_energy: f64 = self.gauss.sample(&mut rng);
            let z_pedestal: f64 = self.gauss.sample(&mut rng);
            let z_time: f64 = self.gauss.sample(&mut rng);

            let relative_smear = if edep > cfg.smearing_min_edep {
                z_energy * relative_resolution(&self.resolution, edep)
            } else {
                0.0
            };
            let pedestal = cfg.pedestal_mean_adc as f64 + z_pedestal * cfg.pedestal_sigma_adc;
            let amplitude = self.amplitude(edep, pedestal, relative_smear);
            let time_stamp = self.time_stamp(time + z_time * cfg.time_resolution);

            let cell_id = sim_hits[leading].cell_id;
            if !self.passes_threshold(amplitude) {
                debug!(target: self.name.as_str(), "cell {:#018x}: amplitude {} below threshold", cell_id, amplitude);
                continue;
            }
            trace!(target: self.name.as_str(), "cell {:#018x}: edep {} -> adc {}, tdc {}", cell_id, edep, amplitude, time_stamp);
            raw_hits.push(RawCalorimeterHit::new(cell_id, amplitude, time_stamp));
        }

        Ok(raw_hits)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}
