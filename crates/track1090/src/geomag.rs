/**
 * Magnetic declination, first-order dipole model.
 *
 * Magnetic headings broadcast by aircraft are converted to true headings
 * by adding the local declination. The consumer only uses the result when
 * it stays within 45° of the known ground track, so a tilted-dipole
 * approximation (a few degrees of error at mid latitudes) is sufficient
 * here; no spherical-harmonic table is carried.
 */
use libm::{atan2, cos, sin};

/// Geomagnetic north pole, epoch 2020 (IGRF-13 dipole axis)
const POLE_LAT: f64 = 80.65;
const POLE_LON: f64 = -72.68;

/// Declination in degrees at a position, positive east.
///
/// Computed as the initial great-circle bearing towards the geomagnetic
/// pole; the dipole field points along that bearing to first order.
pub fn declination(latitude: f64, longitude: f64) -> f64 {
    let lat = latitude.to_radians();
    let lon = longitude.to_radians();
    let plat = POLE_LAT.to_radians();
    let plon = POLE_LON.to_radians();

    let d_lon = plon - lon;
    let y = sin(d_lon) * cos(plat);
    let x = cos(lat) * sin(plat) - sin(lat) * cos(plat) * cos(d_lon);
    atan2(y, x).to_degrees()
}

/// Magnetic heading to true heading at a position
pub fn mag_to_true(mag_heading: f64, latitude: f64, longitude: f64) -> f64 {
    let mut heading = mag_heading + declination(latitude, longitude);
    if heading < 0. {
        heading += 360.;
    }
    if heading >= 360. {
        heading -= 360.;
    }
    heading
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declination_signs() {
        // on the pole meridian the field lines point due north
        let d = declination(10.0, POLE_LON);
        assert!(d.abs() < 1e-6, "unexpected declination {d}");
        // west of the pole meridian the pole bears east of north
        let d = declination(40.0, -100.0);
        assert!(d > 0.0 && d < 40.0, "unexpected declination {d}");
        // east of the pole meridian the pole bears west of north
        let d = declination(40.0, -40.0);
        assert!(d < 0.0 && d > -40.0, "unexpected declination {d}");
    }

    #[test]
    fn test_mag_to_true_wraps() {
        let t = mag_to_true(359.0, 48.0, 7.0);
        assert!((0. ..360.).contains(&t));
    }
}
