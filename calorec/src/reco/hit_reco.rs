use std::sync::Arc;

use calocore::data::hit::{CalorimeterHit, Position, RawCalorimeterHit};
use calocore::geometry::id_spec::BitField;
use calocore::geometry::service::{GeometryService, LocalFrame};
use calocore::units::{GEV, MEV, PS};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::error::{RecoError, Result};

/// Sampling fraction, either global or indexed by the decoded layer number
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SamplingFraction {
    Scalar(f64),
    PerLayer(Vec<f64>),
}

impl SamplingFraction {
    pub fn for_layer(&self, layer: i64) -> Option<f64> {
        match self {
            SamplingFraction::Scalar(f) => Some(*f),
            SamplingFraction::PerLayer(v) => usize::try_from(layer).ok().and_then(|l| v.get(l).copied()),
        }
    }

    fn is_valid(&self) -> bool {
        match self {
            SamplingFraction::Scalar(f) => *f > 0.0 && f.is_finite(),
            SamplingFraction::PerLayer(v) => !v.is_empty() && v.iter().all(|f| *f > 0.0 && f.is_finite()),
        }
    }
}

impl Default for SamplingFraction {
    fn default() -> Self {
        SamplingFraction::Scalar(1.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorimeterHitRecoConfig {
    pub capacity_adc: u32,
    pub dynamic_range_adc: f64,
    pub pedestal_mean_adc: u32,
    pub pedestal_sigma_adc: f64,
    pub resolution_tdc: f64,
    pub threshold_factor: f64,
    pub threshold_value: f64,
    pub sampling_fraction: SamplingFraction,
    pub readout: String,
    pub layer_field: String,
    pub sector_field: String,
    pub local_det_element: String,       // name of the element defining the local frame
    pub local_det_fields: Vec<String>,   // otherwise: fields addressing it inside the cell id
    pub mask_pos: String,                // position components taken from the reference cell, e.g. "xy"
    pub mask_pos_fields: Vec<String>,    // fields zeroed to form the reference cell
}

impl Default for CalorimeterHitRecoConfig {
    fn default() -> Self {
        CalorimeterHitRecoConfig {
            capacity_adc: 8096,
            dynamic_range_adc: 100.0 * MEV,
            pedestal_mean_adc: 400,
            pedestal_sigma_adc: 3.2,
            resolution_tdc: 10.0 * PS,
            threshold_factor: 0.0,
            threshold_value: 0.0,
            sampling_fraction: SamplingFraction::default(),
            readout: String::new(),
            layer_field: String::new(),
            sector_field: String::new(),
            local_det_element: String::new(),
            local_det_fields: Vec::new(),
            mask_pos: String::new(),
            mask_pos_fields: Vec::new(),
        }
    }
}

enum LocalFrameSource {
    Fixed(LocalFrame),
    Lookup(u64),
}

/// Turns ADC/TDC readings back into calibrated hits placed by the geometry
pub struct CalorimeterHitReco {
    name: String,
    config: CalorimeterHitRecoConfig,
    geometry: Arc<dyn GeometryService>,
    layer: Option<BitField>,
    sector: Option<BitField>,
    local_frame: LocalFrameSource,
    mask_axes: [bool; 3],
    mask_pos_mask: u64,
    threshold: f64,
}

impl CalorimeterHitReco {
    /// Calibrated energy of an amplitude in a given layer
    pub fn energy(&self, amplitude: u32, layer: i64) -> Result<f64> {
        let cfg = &self.config;
        let fraction = cfg.sampling_fraction.for_layer(layer).ok_or_else(|| {
            RecoError::config("sampling_fraction", format!("no sampling fraction for layer {}", layer))
        })?;
        Ok((amplitude as f64 - cfg.pedestal_mean_adc as f64) / cfg.capacity_adc as f64 * cfg.dynamic_range_adc / fraction)
    }

    fn reconstruct(&self, raw: &RawCalorimeterHit) -> Result<CalorimeterHit> {
        let cell_id = raw.cell_id;
        let layer = self.layer.as_ref().map_or(-1, |f| f.value(cell_id));
        let sector = self.sector.as_ref().map_or(-1, |f| f.value(cell_id));

        let energy = self.energy(raw.amplitude, layer)?;
        let time = raw.time_stamp as f64 * self.config.resolution_tdc;

        let mut position = self.geometry.position(cell_id).map_err(RecoError::Geometry)?;
        if self.mask_axes.iter().any(|m| *m) {
            let reference = self.geometry.position(cell_id & !self.mask_pos_mask).map_err(RecoError::Geometry)?;
            for axis in 0..3 {
                if self.mask_axes[axis] {
                    position[axis] = reference[axis];
                }
            }
        }

        let looked_up: LocalFrame;
        let frame = match &self.local_frame {
            LocalFrameSource::Fixed(frame) => frame,
            LocalFrameSource::Lookup(mask) => {
                looked_up = self.geometry.lookup_det_element(cell_id & mask).map_err(RecoError::Geometry)?;
                &looked_up
            }
        };
        let local = frame.world_to_local(&position);

        let dims = self.geometry.cell_dimensions(cell_id).map_err(RecoError::Geometry)?;
        let dimension = Position::new(
            dims.first().copied().unwrap_or(0.0),
            dims.get(1).copied().unwrap_or(0.0),
            dims.get(2).copied().unwrap_or(0.0),
        );

        Ok(CalorimeterHit::new(
            cell_id,
            energy,
            0.0,
            time,
            0.0,
            position,
            dimension,
            sector as i32,
            layer as i32,
            local,
        ))
    }
}

impl Algorithm for CalorimeterHitReco {
    type Config = CalorimeterHitRecoConfig;
    type Input<'a> = &'a [RawCalorimeterHit];
    type Output = Vec<CalorimeterHit>;

    fn init(name: &str, config: Self::Config, services: &Services) -> Result<Self> {
        if config.capacity_adc == 0 {
            return Err(RecoError::config("capacity_adc", "must be positive"));
        }
        if !(config.dynamic_range_adc > 0.0) {
            return Err(RecoError::config("dynamic_range_adc", format!("must be positive, got {}", config.dynamic_range_adc)));
        }
        if !(config.resolution_tdc > 0.0) {
            return Err(RecoError::config("resolution_tdc", format!("must be positive, got {}", config.resolution_tdc)));
        }
        if !config.sampling_fraction.is_valid() {
            return Err(RecoError::config("sampling_fraction", "values must be positive"));
        }

        let mut mask_axes = [false; 3];
        for c in config.mask_pos.chars() {
            match c {
                'x' | 'X' => mask_axes[0] = true,
                'y' | 'Y' => mask_axes[1] = true,
                'z' | 'Z' => mask_axes[2] = true,
                other => return Err(RecoError::config("mask_pos", format!("unknown axis '{}'", other))),
            }
        }

        let geometry = services.geometry.clone();
        let spec = if config.readout.is_empty() {
            let needs_decoder = !config.layer_field.is_empty()
                || !config.sector_field.is_empty()
                || !config.local_det_fields.is_empty()
                || !config.mask_pos_fields.is_empty()
                || matches!(config.sampling_fraction, SamplingFraction::PerLayer(_));
            if needs_decoder {
                return Err(RecoError::config("readout", "field lookups require a readout"));
            }
            None
        } else {
            Some(geometry.id_spec(&config.readout).map_err(|e| RecoError::config("readout", e.to_string()))?)
        };

        let field = |parameter: &str, name: &str| -> Result<Option<BitField>> {
            match (&spec, name.is_empty()) {
                (_, true) => Ok(None),
                (Some(spec), false) => spec
                    .field(name)
                    .map(|f| Some(f.clone()))
                    .map_err(|e| RecoError::config(parameter, e.to_string())),
                (None, false) => Err(RecoError::config(parameter, "no readout configured")),
            }
        };
        let layer = field("layer_field", &config.layer_field)?;
        let sector = field("sector_field", &config.sector_field)?;
        if matches!(config.sampling_fraction, SamplingFraction::PerLayer(_)) && layer.is_none() {
            return Err(RecoError::config("sampling_fraction", "per-layer values require a layer_field"));
        }

        let mask_of = |parameter: &str, names: &[String]| -> Result<u64> {
            match &spec {
                Some(spec) => spec.mask_of(names).map_err(|e| RecoError::config(parameter, e.to_string())),
                None => Ok(0),
            }
        };
        let mask_pos_mask = mask_of("mask_pos_fields", &config.mask_pos_fields)?;

        let local_frame = if !config.local_det_element.is_empty() {
            let frame = geometry
                .det_element(&config.local_det_element)
                .map_err(|e| RecoError::config("local_det_element", e.to_string()))?;
            LocalFrameSource::Fixed(frame)
        } else if !config.local_det_fields.is_empty() {
            LocalFrameSource::Lookup(mask_of("local_det_fields", &config.local_det_fields)?)
        } else {
            LocalFrameSource::Lookup(u64::MAX)
        };

        let threshold = config.pedestal_mean_adc as f64
            + config.threshold_factor * config.pedestal_sigma_adc
            + config.threshold_value;

        info!(
            target: name,
            "readout '{}', threshold {} ADC, dynamic range {} GeV",
            config.readout, threshold, config.dynamic_range_adc / GEV
        );

        Ok(CalorimeterHitReco {
            name: name.to_string(),
            config,
            geometry,
            layer,
            sector,
            local_frame,
            mask_axes,
            mask_pos_mask,
            threshold,
        })
    }

    fn process(&self, raw_hits: Self::Input<'_>, _ctx: &EventContext) -> Result<Vec<CalorimeterHit>> {
        let mut hits = Vec::with_capacity(raw_hits.len());
        for raw in raw_hits {
            if (raw.amplitude as f64) < self.threshold {
                debug!(target: self.name.as_str(), "cell {:#018x}: amplitude {} below threshold", raw.cell_id, raw.amplitude);
                continue;
            }
            let hit = self.reconstruct(raw)?;
            trace!(target: self.name.as_str(), "cell {:#018x}: energy {} GeV at {:?}", hit.cell_id, hit.energy / GEV, hit.position);
            hits.push(hit);
        }
        Ok(hits)
    }

    fn config(&self) -> &Self::Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use calocore::geometry::grid::{CartesianGridGeometry, GridReadout};
    use calocore::random::SeededStreams;
    use calocore::units::NS;

    fn setup() -> (Services, Arc<CartesianGridGeometry>) {
        let geometry = Arc::new(
            CartesianGridGeometry::new(vec![
                GridReadout::endcap("EcalEndcapHits", 100, 1000.0, [20.0, 20.0], 10.0),
                GridReadout::barrel("EcalBarrelHits", 101, 4, 500.0, [25.0, 25.0], 5.0),
            ])
            .unwrap(),
        );
        (Services::new(geometry.clone(), Arc::new(SeededStreams::new(1))), geometry)
    }

    fn config() -> CalorimeterHitRecoConfig {
        CalorimeterHitRecoConfig {
            capacity_adc: 555,
            dynamic_range_adc: 5.0 * GEV,
            pedestal_mean_adc: 123,
            pedestal_sigma_adc: 0.0,
            resolution_tdc: 1.0 * NS,
            readout: "EcalEndcapHits".to_string(),
            layer_field: "layer".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_energy_round_trip() {
        let (services, geo) = setup();
        let reco = CalorimeterHitReco::init("reco", config(), &services).unwrap();
        let id = geo.cell_id("EcalEndcapHits", 0, 1, 2, 3).unwrap();
        let hits = reco.process(&[RawCalorimeterHit::new(id, 234, 7)], &EventContext::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0].energy, 1.0, epsilon = 1e-12);
        assert_relative_eq!(hits[0].time, 7.0, epsilon = 1e-12);
        assert_eq!(hits[0].layer, 1);
        assert_eq!(hits[0].sector, -1);
        assert_relative_eq!(hits[0].position, geo.position(id).unwrap(), epsilon = 1e-12);
        assert_relative_eq!(hits[0].dimension, Position::new(20.0, 20.0, 10.0), epsilon = 1e-12);
    }

    #[test]
    fn test_per_layer_sampling_fraction() {
        let (services, geo) = setup();
        let config = CalorimeterHitRecoConfig {
            sampling_fraction: SamplingFraction::PerLayer(vec![0.5, 0.25]),
            ..config()
        };
        let reco = CalorimeterHitReco::init("reco", config, &services).unwrap();
        let l0 = geo.cell_id("EcalEndcapHits", 0, 0, 0, 0).unwrap();
        let l1 = geo.cell_id("EcalEndcapHits", 0, 1, 0, 0).unwrap();
        let l5 = geo.cell_id("EcalEndcapHits", 0, 5, 0, 0).unwrap();
        let hits = reco
            .process(&[RawCalorimeterHit::new(l0, 234, 0), RawCalorimeterHit::new(l1, 234, 0)], &EventContext::default())
            .unwrap();
        assert_relative_eq!(hits[0].energy, 2.0, epsilon = 1e-12);
        assert_relative_eq!(hits[1].energy, 4.0, epsilon = 1e-12);

        let err = reco.process(&[RawCalorimeterHit::new(l5, 234, 0)], &EventContext::default()).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_threshold_skips_pedestal_hits() {
        let (services, geo) = setup();
        let config = CalorimeterHitRecoConfig { threshold_value: 5.0, ..config() };
        let reco = CalorimeterHitReco::init("reco", config, &services).unwrap();
        let id = geo.cell_id("EcalEndcapHits", 0, 0, 0, 0).unwrap();
        let hits = reco
            .process(&[RawCalorimeterHit::new(id, 127, 0), RawCalorimeterHit::new(id, 128, 0)], &EventContext::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0].energy, 5.0 / 555.0 * 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_local_frame_from_fields() {
        let (services, geo) = setup();
        let config = CalorimeterHitRecoConfig {
            readout: "EcalBarrelHits".to_string(),
            sector_field: "sector".to_string(),
            local_det_fields: vec!["system".to_string(), "sector".to_string()],
            ..config()
        };
        let reco = CalorimeterHitReco::init("reco", config, &services).unwrap();
        let id = geo.cell_id("EcalBarrelHits", 3, 2, -1, 4).unwrap();
        let hits = reco.process(&[RawCalorimeterHit::new(id, 300, 0)], &EventContext::default()).unwrap();
        assert_eq!(hits[0].sector, 3);
        assert_eq!(hits[0].layer, 2);
        assert_relative_eq!(hits[0].local, Position::new(-25.0, 100.0, 12.5), epsilon = 1e-9);
    }

    #[test]
    fn test_local_frame_from_element() {
        let (services, geo) = setup();
        let config = CalorimeterHitRecoConfig { local_det_element: "EcalEndcapHits".to_string(), ..config() };
        let reco = CalorimeterHitReco::init("reco", config, &services).unwrap();
        let id = geo.cell_id("EcalEndcapHits", 0, 0, 1, 1).unwrap();
        let hits = reco.process(&[RawCalorimeterHit::new(id, 300, 0)], &EventContext::default()).unwrap();
        assert_relative_eq!(hits[0].local, Position::new(20.0, 20.0, 5.0), epsilon = 1e-9);
    }

    #[test]
    fn test_mask_pos_uses_reference_cell() {
        let (services, geo) = setup();
        let config = CalorimeterHitRecoConfig {
            mask_pos: "xy".to_string(),
            mask_pos_fields: vec!["x".to_string(), "y".to_string()],
            ..config()
        };
        let reco = CalorimeterHitReco::init("reco", config, &services).unwrap();
        let id = geo.cell_id("EcalEndcapHits", 0, 3, 4, -2).unwrap();
        let hits = reco.process(&[RawCalorimeterHit::new(id, 300, 0)], &EventContext::default()).unwrap();
        assert_relative_eq!(hits[0].position, Position::new(0.0, 0.0, 1035.0), epsilon = 1e-9);
    }

    #[test]
    fn test_unresolvable_cell_is_fatal() {
        let (services, _) = setup();
        let reco = CalorimeterHitReco::init("reco", config(), &services).unwrap();
        let err = reco.process(&[RawCalorimeterHit::new(0x42, 300, 0)], &EventContext::default()).err().unwrap();
        assert!(matches!(err, RecoError::Geometry(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_invalid_configuration() {
        let (services, _) = setup();
        let bad = [
            CalorimeterHitRecoConfig { capacity_adc: 0, ..config() },
            CalorimeterHitRecoConfig { sampling_fraction: SamplingFraction::Scalar(0.0), ..config() },
            CalorimeterHitRecoConfig { readout: "Missing".to_string(), ..config() },
            CalorimeterHitRecoConfig { layer_field: "module".to_string(), ..config() },
            CalorimeterHitRecoConfig { mask_pos: "xw".to_string(), ..config() },
            CalorimeterHitRecoConfig { local_det_element: "Missing".to_string(), ..config() },
        ];
        for config in bad {
            let err = CalorimeterHitReco::init("reco", config, &services).err().unwrap();
            assert!(matches!(err, RecoError::Config { .. }));
        }
    }
}
