use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use calocore::data::hit::{CalorimeterHit, CellId};
use calocore::geometry::id_spec::{BitField, IdSpec};
use calocore::geometry::service::GeometryService;
use itertools::Itertools;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::algorithm::{Algorithm, EventContext, Services};
use crate::error::{RecoError, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalorimeterHitsMergerConfig {
    pub readout: String,
    /// `"field"` merges over the field (reference value 0), `"field:N"`
    /// fixes the reference value to N
    pub field_transformations: Vec<String>,
}

/// Merges hits that map onto the same reference cell, e.g. all layers of a
/// tower. The merged hit sits at the reference cell and carries the cell id
/// of its most energetic constituent.
pub struct CalorimeterHitsMerger {
    name: String,
    config: CalorimeterHitsMergerConfig,
    geometry: Arc<dyn GeometryService>,
    transformations: Vec<(BitField, i64)>,
}

impl CalorimeterHitsMerger {
    pub fn reference_cell(&self, cell_id: CellId) -> Result<CellId> {
        self.transformations
            .iter()
            .try_fold(cell_id, |id, (field, value)| field.set(id, *value))
            .map_err(RecoError::from)
    }

    fn merge(&self, reference: CellId, members: &[&CalorimeterHit]) -> Result<CalorimeterHit> {
        let n = members.len() as f64;
        let leading = members[0];

        let energy: f64 = members.iter().map(|h| h.energy).sum();
        let energy_error = members.iter().map(|h| h.energy_error.powi(2)).sum::<f64>().sqrt();
        let time = members.iter().map(|h| h.time).sum::<f64>() / n;
        let time_error = members.iter().map(|h| h.time_error.powi(2)).sum::<f64>().sqrt() / n;

        let position = self.geometry.position(reference).map_err(RecoError::Geometry)?;
        let local = self
            .geometry
            .lookup_det_element(reference)
            .map_err(RecoError::Geometry)?
            .world_to_local(&position);

        Ok(CalorimeterHit::new(
            leading.cell_id,
            energy,
            energy_error,
            time,
            time_error,
            position,
            leading.dimension,
            leading.sector,
            leading.layer,
            local,
        ))
    }
}

fn parse_transformation(spec: &IdSpec, re: &Regex, entry: &str) -> Result<(BitField, i64)> {
    let caps = re
        .captures(entry)
        .ok_or_else(|| RecoError::config("field_transformations", format!("cannot parse '{}'", entry)))?;
    let field = spec
        .field(&caps[1])
        .map_err(|e| RecoError::config("field_transformations", e.to_string()))?
        .clone();
    let value = match caps.get(2) {
        Some(m) => m
            .as_str()
            .parse::<i64>()
            .map_err(|e| RecoError::config("field_transformations", e.to_string()))?,
        None => 0,
    };
    field
        .set(0, value)
        .map_err(|e| RecoError::config("field_transformations", e.to_string()))?;
    Ok((field, value))
}

impl Algorithm for CalorimeterHitsMerger {
    type Config = CalorimeterHitsMergerConfig;
    type Input<'a> = &'a [CalorimeterHit];
    type Output = Vec<CalorimeterHit>;

    fn init(name: &str, config: Self::Config, services: &Services) -> Result<Self> {
        if config.readout.is_empty() {
            return Err(RecoError::config("readout", "a readout is required"));
        }
        if config.field_transformations.is_empty() {
            return Err(RecoError::config("field_transformations", "nothing to merge over"));
        }
        let spec = services
            .geometry
            .id_spec(&config.readout)
            .map_err(|e| RecoError::config("readout", e.to_string()))?;

        let re = Regex::new(r"^\s*(\w+)\s*(?::\s*(-?\d+)\s*)?$")
            .map_err(|e| RecoError::config("field_transformations", e.to_string()))?;
        let transformations = config
            .field_transformations
            .iter()
            .map(|entry| parse_transformation(&spec, &re, entry))
            .collect::<Result<Vec<_>>>()?;

        info!(
            target: name,
            "merging '{}' over {}",
            config.readout,
            transformations.iter().map(|(f, v)| format!("{}={}", f.name, v)).join(", ")
        );

        Ok(CalorimeterHitsMerger {
            name: name.to_string(),
            config,
            geometry: services.geometry.clone(),
            transformations,
        })
    }

    fn process(&self, hits: Self::Input<'_>, _ctx: &EventContext) -> Result<Vec<CalorimeterHit>> {
        let mut order: Vec<CellId> = Vec::new();
        let mut groups: HashMap<CellId, Vec<&CalorimeterHit>> = HashMap::new();
        for hit in hits {
            let reference = self.reference_cell(hit.cell_id)?;
            groups
                .entry(reference)
                .or_insert_with(|| {
                    order.push(reference);
                    Vec::new()
                })
                .push(hit);
        }

        let mut merged = Vec::with_capacity(order.len());
        for reference in order {
            let members: Vec<&CalorimeterHit> = groups[&reference]
                .iter()
                .copied()
                .sorted_by(|a, b| b.energy.partial_cmp(&a.energy).unwrap_or(Ordering::Equal))
                .collect();
            debug!(target: self.name.as_str(), "reference cell {:#018x}: {} hits", reference, members.len());
            merged.push(self.merge(reference, &members)?);
        }
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
    use calocore::data::hit::Position;
    use calocore::geometry::grid::{CartesianGridGeometry, GridReadout};
    use calocore::random::SeededStreams;

    fn setup() -> (Services, Arc<CartesianGridGeometry>) {
        let geometry = Arc::new(
            CartesianGridGeometry::new(vec![GridReadout::endcap("HcalEndcapHits", 113, 3000.0, [100.0, 100.0], 20.0)])
                .unwrap(),
        );
        (Services::new(geometry.clone(), Arc::new(SeededStreams::new(1))), geometry)
    }

    fn hit(geo: &CartesianGridGeometry, layer: i64, x: i64, energy: f64, time: f64) -> CalorimeterHit {
        let cell_id = geo.cell_id("HcalEndcapHits", 0, layer, x, 0).unwrap();
        CalorimeterHit {
            cell_id,
            energy,
            energy_error: 0.1,
            time,
            position: geo.position(cell_id).unwrap(),
            dimension: Position::new(100.0, 100.0, 20.0),
            layer: layer as i32,
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_layers_into_towers() {
        let (services, geo) = setup();
        let config = CalorimeterHitsMergerConfig {
            readout: "HcalEndcapHits".to_string(),
            field_transformations: vec!["layer".to_string()],
        };
        let merger = CalorimeterHitsMerger::init("merger", config, &services).unwrap();
        let hits = vec![
            hit(&geo, 0, 1, 0.2, 4.0),
            hit(&geo, 3, 1, 0.5, 6.0),
            hit(&geo, 1, 2, 0.3, 5.0),
        ];
        let merged = merger.process(&hits, &EventContext::default()).unwrap();
        assert_eq!(merged.len(), 2);

        let tower = &merged[0];
        assert_eq!(tower.cell_id, hits[1].cell_id);
        assert_eq!(tower.layer, 3);
        assert_relative_eq!(tower.energy, 0.7, epsilon = 1e-12);
        assert_relative_eq!(tower.energy_error, 0.02f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(tower.time, 5.0, epsilon = 1e-12);
        assert_relative_eq!(tower.position, Position::new(100.0, 0.0, 3010.0), epsilon = 1e-9);
        assert_relative_eq!(tower.local, Position::new(100.0, 0.0, 10.0), epsilon = 1e-9);

        assert_relative_eq!(merged[1].energy, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_fixed_reference_value() {
        let (services, geo) = setup();
        let config = CalorimeterHitsMergerConfig {
            readout: "HcalEndcapHits".to_string(),
            field_transformations: vec!["layer:2".to_string()],
        };
        let merger = CalorimeterHitsMerger::init("merger", config, &services).unwrap();
        let merged = merger.process(&[hit(&geo, 0, 0, 1.0, 0.0)], &EventContext::default()).unwrap();
        assert_relative_eq!(merged[0].position.z, 3050.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_transformations() {
        let (services, _) = setup();
        for entry in ["module", "layer:x", "layer:300", "layer:1:2"] {
            let config = CalorimeterHitsMergerConfig {
                readout: "HcalEndcapHits".to_string(),
                field_transformations: vec![entry.to_string()],
            };
            assert!(CalorimeterHitsMerger::init("merger", config, &services).is_err());
        }
    }
}
