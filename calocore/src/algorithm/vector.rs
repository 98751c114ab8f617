use std::f64::consts::{PI, TAU};

use crate::data::hit::Position;

#[inline]
pub fn angle_polar(v: &Position) -> f64 {
    v.x.hypot(v.y).atan2(v.z)
}

#[inline]
pub fn angle_azimuthal(v: &Position) -> f64 {
    v.y.atan2(v.x)
}

/// Pseudorapidity `-ln(tan(theta / 2))`
#[inline]
pub fn eta(v: &Position) -> f64 {
    -(0.5 * angle_polar(v)).tan().ln()
}

/// Polar angle for a given pseudorapidity
#[inline]
pub fn eta_to_angle(eta: f64) -> f64 {
    2.0 * (-eta).exp().atan()
}

/// Wrap an angle into [-pi, pi]
#[inline]
pub fn phi_mpi_pi(phi: f64) -> f64 {
    let r = phi % TAU;
    if r > PI {
        r - TAU
    } else if r < -PI {
        r + TAU
    } else {
        r
    }
}

/// Distance in (eta, phi) with the phi difference wrapped
#[inline]
pub fn delta_r(a: &Position, b: &Position) -> f64 {
    let d_eta = eta(a) - eta(b);
    let d_phi = phi_mpi_pi(angle_azimuthal(a) - angle_azimuthal(b));
    d_eta.hypot(d_phi)
}

/// Vector of length `r` pointing along (theta, phi)
pub fn from_spherical(r: f64, theta: f64, phi: f64) -> Position {
    Position::new(
        r * theta.sin() * phi.cos(),
        r * theta.sin() * phi.sin(),
        r * theta.cos(),
    )
}
