// Purpose: canonical unit system. Every quantity handled by the reconstruction
// is expressed in GeV, mm, ns and rad; multiply a literal by one of these
// constants to convert it into canonical units, divide to convert back.
use std::f64::consts::PI;

// length
pub const MM: f64 = 1.0;
pub const UM: f64 = 1e-3 * MM;
pub const CM: f64 = 10.0 * MM;
pub const M: f64 = 1000.0 * MM;

// time
pub const NS: f64 = 1.0;
pub const PS: f64 = 1e-3 * NS;
pub const US: f64 = 1e3 * NS;
pub const S: f64 = 1e9 * NS;

// energy
pub const GEV: f64 = 1.0;
pub const EV: f64 = 1e-9 * GEV;
pub const KEV: f64 = 1e-6 * GEV;
pub const MEV: f64 = 1e-3 * GEV;
pub const TEV: f64 = 1e3 * GEV;

// angle
pub const RAD: f64 = 1.0;
pub const MRAD: f64 = 1e-3 * RAD;
pub const DEG: f64 = PI / 180.0 * RAD;

/// Express a canonical-unit value in the given unit, e.g. `in_units(0.005, MEV) == 5.0`.
#[inline]
pub fn in_units(value: f64, unit: f64) -> f64 {
    value / unit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_units_are_one() {
        assert_eq!(MM, 1.0);
        assert_eq!(NS, 1.0);
        assert_eq!(GEV, 1.0);
        assert_eq!(RAD, 1.0);
    }

    #[test]
    fn test_conversions() {
        assert!((5.0 * CM - 50.0).abs() < 1e-12);
        assert!((2.0 * M - 2000.0).abs() < 1e-9);
        assert!((100.0 * MEV - 0.1).abs() < 1e-12);
        assert!((10.0 * PS - 0.01).abs() < 1e-12);
        assert!((180.0 * DEG - PI).abs() < 1e-12);
        assert!((in_units(0.005, MEV) - 5.0).abs() < 1e-9);
        assert!((in_units(1.0 * S, US) - 1e6).abs() < 1e-6);
    }
}
