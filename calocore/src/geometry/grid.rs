use std::f64::consts::TAU;

use log::debug;
use nalgebra::{Isometry3, Matrix3, Rotation3, Translation3, UnitQuaternion};
use serde::{Deserialize, Serialize};

use crate::data::hit::{CellId, Position};
use crate::error::{CoreError, Result};
use crate::geometry::id_spec::{BitField, IdSpec};
use crate::geometry::service::{GeometryService, LocalFrame};

/// Placement of the layer stack
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GridLayout {
    /// One module perpendicular to the beam, front face at `z_front`
    Endcap { z_front: f64 },
    /// `sectors` modules around the beam, front faces at radius `r_inner`;
    /// local x runs along the beam and local z points outwards
    Barrel { sectors: u32, r_inner: f64 },
}

/// Cartesian grid segmentation of a sampling calorimeter readout
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridReadout {
    pub name: String,
    pub descriptor: String,
    pub system_id: i64,
    pub layout: GridLayout,
    pub grid_size: [f64; 2],
    pub layer_thickness: f64,
    pub x_field: String,
    pub y_field: String,
    pub layer_field: String,
    pub sector_field: Option<String>,
}

impl GridReadout {
    pub fn endcap(name: &str, system_id: i64, z_front: f64, grid_size: [f64; 2], layer_thickness: f64) -> Self {
        GridReadout {
            name: name.to_string(),
            descriptor: "system:8,layer:8,x:32:-16,y:-16".to_string(),
            system_id,
            layout: GridLayout::Endcap { z_front },
            grid_size,
            layer_thickness,
            x_field: "x".to_string(),
            y_field: "y".to_string(),
            layer_field: "layer".to_string(),
            sector_field: None,
        }
    }

    pub fn barrel(name: &str, system_id: i64, sectors: u32, r_inner: f64, grid_size: [f64; 2], layer_thickness: f64) -> Self {
        GridReadout {
            name: name.to_string(),
            descriptor: "system:8,sector:8,layer:8,x:32:-16,y:-16".to_string(),
            system_id,
            layout: GridLayout::Barrel { sectors, r_inner },
            grid_size,
            layer_thickness,
            x_field: "x".to_string(),
            y_field: "y".to_string(),
            layer_field: "layer".to_string(),
            sector_field: Some("sector".to_string()),
        }
    }
}

#[derive(Clone, Debug)]
struct ResolvedReadout {
    readout: GridReadout,
    spec: IdSpec,
    system: BitField,
    x: BitField,
    y: BitField,
    layer: BitField,
    sector: Option<BitField>,
    detector: LocalFrame,
    modules: Vec<LocalFrame>,
}

impl ResolvedReadout {
    fn new(readout: GridReadout) -> Result<Self> {
        if readout.grid_size.iter().any(|g| !(*g > 0.0)) || !(readout.layer_thickness > 0.0) {
            return Err(CoreError::Descriptor(format!("readout '{}' needs positive cell sizes", readout.name)));
        }

        let spec = IdSpec::parse(&readout.descriptor)?;
        let system = spec.field("system")?.clone();
        let x = spec.field(&readout.x_field)?.clone();
        let y = spec.field(&readout.y_field)?.clone();
        let layer = spec.field(&readout.layer_field)?.clone();
        let sector = match &readout.sector_field {
            Some(name) => Some(spec.field(name)?.clone()),
            None => None,
        };

        let (detector, modules) = match readout.layout {
            GridLayout::Endcap { z_front } => {
                let frame = LocalFrame::new(
                    &readout.name,
                    Isometry3::translation(0.0, 0.0, z_front),
                );
                (frame.clone(), vec![frame])
            }
            GridLayout::Barrel { sectors, r_inner } => {
                if sectors == 0 || sector.is_none() {
                    return Err(CoreError::Descriptor(format!(
                        "barrel readout '{}' needs at least one sector and a sector field", readout.name
                    )));
                }
                let modules = (0..sectors)
                    .map(|s| {
                        let phi = TAU * s as f64 / sectors as f64;
                        let (sin, cos) = phi.sin_cos();
                        let ex = Position::new(0.0, 0.0, 1.0);
                        let ey = Position::new(sin, -cos, 0.0);
                        let ez = Position::new(cos, sin, 0.0);
                        let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_columns(&[ex, ey, ez]));
                        let transform = Isometry3::from_parts(
                            Translation3::from(ez * r_inner),
                            UnitQuaternion::from_rotation_matrix(&rotation),
                        );
                        LocalFrame::new(&format!("{}_sector{}", readout.name, s), transform)
                    })
                    .collect();
                (LocalFrame::identity(&readout.name), modules)
            }
        };

        Ok(ResolvedReadout { readout, spec, system, x, y, layer, sector, detector, modules })
    }

    fn owns(&self, cell_id: CellId) -> bool {
        self.spec.validate(cell_id).is_ok() && self.system.value(cell_id) == self.readout.system_id
    }

    fn module(&self, cell_id: CellId) -> Result<&LocalFrame> {
        let index = match &self.sector {
            Some(sector) => sector.value(cell_id),
            None => 0,
        };
        usize::try_from(index)
            .ok()
            .and_then(|i| self.modules.get(i))
            .ok_or_else(|| CoreError::Geometry {
                cell_id,
                reason: format!("no module {} in readout '{}'", index, self.readout.name),
            })
    }

    fn local_position(&self, cell_id: CellId) -> Position {
        let [gx, gy] = self.readout.grid_size;
        Position::new(
            self.x.value(cell_id) as f64 * gx,
            self.y.value(cell_id) as f64 * gy,
            (self.layer.value(cell_id) as f64 + 0.5) * self.readout.layer_thickness,
        )
    }
}

/// In-memory geometry made of layered, grid-segmented modules. Cells are
/// addressed by the `system` field of their identifier.
#[derive(Clone, Debug)]
pub struct CartesianGridGeometry {
    readouts: Vec<ResolvedReadout>,
}

impl CartesianGridGeometry {
    pub fn new(readouts: Vec<GridReadout>) -> Result<Self> {
        let mut resolved: Vec<ResolvedReadout> = Vec::with_capacity(readouts.len());
        for readout in readouts {
            if resolved
                .iter()
                .any(|r| r.readout.name == readout.name || r.readout.system_id == readout.system_id)
            {
                return Err(CoreError::Descriptor(format!(
                    "readout '{}' (system {}) is defined twice", readout.name, readout.system_id
                )));
            }
            debug!("grid readout '{}' with descriptor '{}'", readout.name, readout.descriptor);
            resolved.push(ResolvedReadout::new(readout)?);
        }
        Ok(CartesianGridGeometry { readouts: resolved })
    }

    /// Encode the identifier of a cell; `sector` is ignored for readouts without a sector field
    pub fn cell_id(&self, readout: &str, sector: i64, layer: i64, x: i64, y: i64) -> Result<CellId> {
        let r = self.readout(readout)?;
        let mut id = r.system.set(0, r.readout.system_id)?;
        if let Some(field) = &r.sector {
            id = field.set(id, sector)?;
        }
        id = r.layer.set(id, layer)?;
        id = r.x.set(id, x)?;
        r.y.set(id, y)
    }

    fn readout(&self, name: &str) -> Result<&ResolvedReadout> {
        self.readouts
            .iter()
            .find(|r| r.readout.name == name)
            .ok_or_else(|| CoreError::UnknownReadout(name.to_string()))
    }

    fn owner(&self, cell_id: CellId) -> Result<&ResolvedReadout> {
        self.readouts
            .iter()
            .find(|r| r.owns(cell_id))
            .ok_or_else(|| CoreError::Geometry { cell_id, reason: "no readout owns this cell".to_string() })
    }
}

impl GeometryService for CartesianGridGeometry {
    fn id_spec(&self, readout: &str) -> Result<IdSpec> {
        Ok(self.readout(readout)?.spec.clone())
    }

    fn position(&self, cell_id: CellId) -> Result<Position> {
        let r = self.owner(cell_id)?;
        Ok(r.module(cell_id)?.local_to_world(&r.local_position(cell_id)))
    }

    fn cell_dimensions(&self, cell_id: CellId) -> Result<Vec<f64>> {
        let r = self.owner(cell_id)?;
        Ok(vec![r.readout.grid_size[0], r.readout.grid_size[1], r.readout.layer_thickness])
    }

    fn det_element(&self, name: &str) -> Result<LocalFrame> {
        self.readouts
            .iter()
            .flat_map(|r| std::iter::once(&r.detector).chain(r.modules.iter()))
            .find(|frame| frame.name == name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownDetElement(name.to_string()))
    }

    fn lookup_det_element(&self, cell_id: CellId) -> Result<LocalFrame> {
        let r = self.owner(cell_id)?;
        match r.sector {
            Some(_) => r.module(cell_id).cloned(),
            None => Ok(r.detector.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn geometry() -> CartesianGridGeometry {
        CartesianGridGeometry::new(vec![
            GridReadout::endcap("EcalEndcapHits", 100, 2000.0, [20.0, 20.0], 10.0),
            GridReadout::barrel("EcalBarrelHits", 101, 4, 1000.0, [25.0, 25.0], 5.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_endcap_position() {
        let geo = geometry();
        let id = geo.cell_id("EcalEndcapHits", 0, 1, 2, -3).unwrap();
        let pos = geo.position(id).unwrap();
        assert_relative_eq!(pos, Position::new(40.0, -60.0, 2015.0), epsilon = 1e-9);
        assert_eq!(geo.cell_dimensions(id).unwrap(), vec![20.0, 20.0, 10.0]);
    }

    #[test]
    fn test_barrel_sector_placement() {
        let geo = geometry();
        let s0 = geo.cell_id("EcalBarrelHits", 0, 0, 4, 0).unwrap();
        assert_relative_eq!(geo.position(s0).unwrap(), Position::new(1002.5, 0.0, 100.0), epsilon = 1e-9);

        // sector 1 sits a quarter turn further
        let s1 = geo.cell_id("EcalBarrelHits", 1, 0, 0, 0).unwrap();
        assert_relative_eq!(geo.position(s1).unwrap(), Position::new(0.0, 1002.5, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_lookup_det_element() {
        let geo = geometry();
        let id = geo.cell_id("EcalBarrelHits", 2, 3, 1, -1).unwrap();
        let frame = geo.lookup_det_element(id).unwrap();
        assert_eq!(frame.name, "EcalBarrelHits_sector2");
        let local = frame.world_to_local(&geo.position(id).unwrap());
        assert_relative_eq!(local, Position::new(25.0, -25.0, 17.5), epsilon = 1e-9);

        assert_eq!(geo.det_element("EcalBarrelHits_sector2").unwrap(), frame);
        assert!(geo.det_element("HcalBarrel").is_err());
    }

    #[test]
    fn test_unknown_cells() {
        let geo = geometry();
        assert!(geo.position(0x55).is_err());
        assert!(geo.position(1 << 30).is_err());
        assert!(matches!(geo.id_spec("nope"), Err(CoreError::UnknownReadout(_))));
        let out_of_range = geo.cell_id("EcalBarrelHits", 7, 0, 0, 0).unwrap();
        assert!(geo.position(out_of_range).is_err());
    }

    #[test]
    fn test_duplicate_readouts_rejected() {
        let result = CartesianGridGeometry::new(vec![
            GridReadout::endcap("A", 1, 0.0, [1.0, 1.0], 1.0),
            GridReadout::endcap("B", 1, 0.0, [1.0, 1.0], 1.0),
        ]);
        assert!(result.is_err());
    }
}
