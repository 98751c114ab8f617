use calocore::algorithm::vector::{angle_azimuthal, angle_polar, phi_mpi_pi};
use calocore::data::cluster::ShapeParameter;
use calocore::data::hit::{CalorimeterHit, Position};
use nalgebra::{Matrix2, Matrix3, SymmetricEigen, Vector2};

/// Shape summary of a cluster, laid out as in `ShapeParameter`
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterShape {
    pub parameters: Vec<f64>,
    /// Direction of largest spread, oriented away from the origin
    pub principal_axis: Option<Position>,
}

impl ClusterShape {
    fn empty() -> Self {
        ClusterShape { parameters: vec![0.0; ShapeParameter::COUNT], principal_axis: None }
    }
}

#[inline]
fn sorted_ascending(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(|a, b| a.total_cmp(b));
    values.into_iter().map(|v| v.max(0.0)).collect()
}

/// Radius, dispersion and covariance eigenvalues of the hits around `center`.
///
/// # Arguments
///
/// * `center` - cluster position
/// * `hits` - constituent hits
/// * `weights` - position weight of each hit
///
/// # Returns
///
/// * `ClusterShape` - all parameters are zero for fewer than two hits; the
///   weighted quantities stay zero when all weights vanish
pub fn cluster_shape(center: &Position, hits: &[&CalorimeterHit], weights: &[f64]) -> ClusterShape {
    let n = hits.len();
    if n < 2 {
        return ClusterShape::empty();
    }
    let mut shape = ClusterShape::empty();

    let sum_sq: f64 = hits.iter().map(|h| (h.position - center).norm_squared()).sum();
    shape.parameters[ShapeParameter::Radius as usize] = (sum_sq / (n - 1) as f64).sqrt();

    let w_sum: f64 = weights.iter().sum();
    if !(w_sum > 0.0) {
        return shape;
    }

    let dispersion: f64 = hits
        .iter()
        .zip(weights)
        .map(|(h, w)| w * (h.position - center).norm_squared())
        .sum::<f64>()
        / w_sum;
    shape.parameters[ShapeParameter::Dispersion as usize] = dispersion.sqrt();

    // theta-phi covariance, phi taken relative to the cluster to stay clear of the wrap
    let theta_c = angle_polar(center);
    let phi_c = angle_azimuthal(center);
    let angles: Vec<Vector2<f64>> = hits
        .iter()
        .map(|h| Vector2::new(angle_polar(&h.position) - theta_c, phi_mpi_pi(angle_azimuthal(&h.position) - phi_c)))
        .collect();
    let mean2: Vector2<f64> = angles.iter().zip(weights).map(|(a, w)| a * *w).sum::<Vector2<f64>>() / w_sum;
    let cov2: Matrix2<f64> = angles
        .iter()
        .zip(weights)
        .map(|(a, w)| {
            let d = a - mean2;
            d * d.transpose() * *w
        })
        .sum::<Matrix2<f64>>()
        / w_sum;
    let eigen2 = sorted_ascending(cov2.symmetric_eigenvalues().iter().copied().collect());
    shape.parameters[ShapeParameter::ThetaPhiEigen1 as usize] = eigen2[0];
    shape.parameters[ShapeParameter::ThetaPhiEigen2 as usize] = eigen2[1];

    let mean3: Position = hits.iter().zip(weights).map(|(h, w)| h.position * *w).sum::<Position>() / w_sum;
    let cov3: Matrix3<f64> = hits
        .iter()
        .zip(weights)
        .map(|(h, w)| {
            let d = h.position - mean3;
            d * d.transpose() * *w
        })
        .sum::<Matrix3<f64>>()
        / w_sum;
    let eigen3 = SymmetricEigen::new(cov3);
    let values = sorted_ascending(eigen3.eigenvalues.iter().copied().collect());
    shape.parameters[ShapeParameter::XyzEigen1 as usize] = values[0];
    shape.parameters[ShapeParameter::XyzEigen2 as usize] = values[1];
    shape.parameters[ShapeParameter::XyzEigen3 as usize] = values[2];

    let largest = eigen3.eigenvalues.imax();
    let mut axis: Position = eigen3.eigenvectors.column(largest).into_owned();
    if axis.dot(center) < 0.0 {
        axis = -axis;
    }
    shape.principal_axis = Some(axis);

    shape
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hit_at(x: f64, y: f64, z: f64) -> CalorimeterHit {
        CalorimeterHit { position: Position::new(x, y, z), energy: 1.0, ..Default::default() }
    }

    #[test]
    fn test_single_hit_has_no_shape() {
        let h = hit_at(0.0, 0.0, 100.0);
        let shape = cluster_shape(&h.position, &[&h], &[1.0]);
        assert!(shape.parameters.iter().all(|p| *p == 0.0));
        assert_eq!(shape.principal_axis, None);
    }

    #[test]
    fn test_two_hits_along_z() {
        let a = hit_at(0.0, 0.0, 100.0);
        let b = hit_at(0.0, 0.0, 120.0);
        let center = Position::new(0.0, 0.0, 110.0);
        let shape = cluster_shape(&center, &[&a, &b], &[1.0, 1.0]);

        assert_relative_eq!(shape.parameters[ShapeParameter::Radius as usize], 200.0f64.sqrt(), epsilon = 1e-9);
        assert_relative_eq!(shape.parameters[ShapeParameter::Dispersion as usize], 10.0, epsilon = 1e-9);
        assert_relative_eq!(shape.parameters[ShapeParameter::XyzEigen3 as usize], 100.0, epsilon = 1e-9);
        assert_relative_eq!(shape.parameters[ShapeParameter::XyzEigen1 as usize], 0.0, epsilon = 1e-9);

        let axis = shape.principal_axis.unwrap();
        assert_relative_eq!(axis, Position::new(0.0, 0.0, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_axis_points_away_from_origin() {
        let a = hit_at(-100.0, 0.0, 0.0);
        let b = hit_at(-140.0, 0.0, 0.0);
        let center = Position::new(-120.0, 0.0, 0.0);
        let shape = cluster_shape(&center, &[&a, &b], &[0.5, 0.5]);
        let axis = shape.principal_axis.unwrap();
        assert!(axis.x < 0.0);
        assert_relative_eq!(axis.norm(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_weights_keep_only_radius() {
        let a = hit_at(0.0, 10.0, 100.0);
        let b = hit_at(0.0, -10.0, 100.0);
        let center = Position::new(0.0, 0.0, 100.0);
        let shape = cluster_shape(&center, &[&a, &b], &[0.0, 0.0]);
        assert!(shape.parameters[ShapeParameter::Radius as usize] > 0.0);
        assert_eq!(shape.parameters[ShapeParameter::Dispersion as usize], 0.0);
        assert_eq!(shape.principal_axis, None);
    }
}
