/**
* Compact Position Reporting.
*
* ADS-B squeezes a coordinate into 17 bits by transmitting only the
* position within a zone, never which zone. Two interleaved zone grids
* (the odd one runs one zone short, so they slide against each other)
* resolve the ambiguity: a message pair, one per grid, pins the zone
* globally, and a single message suffices once any reference within half
* a zone is known.
*
* Surface frames reuse the same bits at four times the resolution by
* shrinking the 360° span to 90°, which leaves a four-way ambiguity per
* axis even for a pair; a reference picks the right quadrant.
*/
use super::adsb::CprFormat;
use libm::{acos, asin, cos, fabs, floor, sin, sqrt};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

/// Latitude zones between the equator and a pole; Mode S fixes this at 15
const NZ: f64 = 15.0;

/// Encoded coordinates are 17-bit bins of their zone
const CPR_BINS: f64 = 131_072.0;

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Copy)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    /// Great-circle distance to another position, in km.
    ///
    /// Haversine in the arcsine form: solve the half-chord between the
    /// two points, then take twice its arc.
    pub fn distance_km(&self, other: &Position) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let half_dphi = (phi2 - phi1) / 2.0;
        let half_dlon = (other.longitude - self.longitude).to_radians() / 2.0;
        let chord = sin(half_dphi) * sin(half_dphi)
            + cos(phi1) * cos(phi2) * sin(half_dlon) * sin(half_dlon);
        2.0 * EARTH_RADIUS_KM * asin(sqrt(chord.min(1.0)))
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| "expected lat,lon".to_string())?;
        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|e| format!("bad latitude: {e}"))?;
        let longitude: f64 = lon
            .trim()
            .parse()
            .map_err(|e| format!("bad longitude: {e}"))?;

        if !(-90. ..=90.).contains(&latitude)
            || !(-180. ..=180.).contains(&longitude)
        {
            return Err("coordinates out of range".to_string());
        }

        Ok(Position {
            latitude,
            longitude,
        })
    }
}

/// One undecoded CPR frame, as cached per aircraft
#[derive(Debug, PartialEq, Serialize, Deserialize, Copy, Clone)]
pub struct CprCell {
    pub parity: CprFormat,
    pub lat_cpr: u32,
    pub lon_cpr: u32,
}

impl CprCell {
    /// Position within the latitude zone, as a fraction in [0, 1)
    fn lat_fraction(&self) -> f64 {
        f64::from(self.lat_cpr) / CPR_BINS
    }

    /// Position within the longitude zone, as a fraction in [0, 1)
    fn lon_fraction(&self) -> f64 {
        f64::from(self.lon_cpr) / CPR_BINS
    }

    /// Latitude zones of this parity: the odd grid drops one zone so the
    /// two grids interleave
    fn lat_zones(&self) -> f64 {
        match self.parity {
            CprFormat::Even => 4.0 * NZ,
            CprFormat::Odd => 4.0 * NZ - 1.0,
        }
    }

    /// Longitude zones of this parity at a given latitude
    fn lon_zones(&self, latitude: f64) -> u64 {
        match self.parity {
            CprFormat::Even => nl(latitude),
            CprFormat::Odd => nl(latitude).saturating_sub(1).max(1),
        }
    }
}

/**
 * Number of longitude zones at a latitude, between 1 and 59.
 *
 * Evaluated from the closed form of 1090-WP-9-14 instead of the usual
 * precomputed transition table: the zone count is the largest NL such
 * that a zone at this latitude still spans at least as much longitude as
 * one at the equator.
 */
pub fn nl(latitude: f64) -> u64 {
    let lat = fabs(latitude);
    // above 87° the zone formula leaves the unit circle; one zone remains
    if lat >= 87.0 {
        return 1;
    }
    let equator_step = 1.0 - cos(PI / (2.0 * NZ));
    let shrink = cos(lat.to_radians());
    let zones = 2.0 * PI / acos(1.0 - equator_step / (shrink * shrink));
    (zones as u64).clamp(1, 59)
}

/**
 * Latitude candidates from a matched pair.
 *
 * The difference of the two encoded fractions pins down how many whole
 * zones separate the aircraft from the equator; each parity then places
 * its own fraction inside that zone. `span` is 360 for airborne frames
 * and 90 for the quadrupled surface encoding.
 */
fn pair_latitudes(even: &CprCell, odd: &CprCell, span: f64) -> (f64, f64) {
    let zones_crossed = floor(
        (4.0 * NZ - 1.0) * even.lat_fraction()
            - 4.0 * NZ * odd.lat_fraction()
            + 0.5,
    );
    let even_width = span / even.lat_zones();
    let odd_width = span / odd.lat_zones();
    (
        even_width * (zones_crossed.rem_euclid(even.lat_zones()) + even.lat_fraction()),
        odd_width * (zones_crossed.rem_euclid(odd.lat_zones()) + odd.lat_fraction()),
    )
}

/**
 * Longitude from a matched pair at an already-solved latitude, in
 * [0, span). The fraction difference again counts whole zones, this time
 * east of the prime meridian.
 */
fn pair_longitude(
    even: &CprCell,
    odd: &CprCell,
    latitude: f64,
    latest: &CprCell,
    span: f64,
) -> f64 {
    let zones = nl(latitude);
    let zones_crossed = floor(
        even.lon_fraction() * (zones - 1) as f64
            - odd.lon_fraction() * zones as f64
            + 0.5,
    );
    let used = latest.lon_zones(latitude) as f64;
    (span / used) * (zones_crossed.rem_euclid(used) + latest.lon_fraction())
}

/**
 * Decode an airborne position from a matched pair of even and odd frames.
 * `latest` selects which of the two zone grids the answer lies in.
 */
pub fn airborne_from_pair(
    even: &CprCell,
    odd: &CprCell,
    latest: CprFormat,
) -> Option<Position> {
    if even.parity != CprFormat::Even || odd.parity != CprFormat::Odd {
        return None;
    }

    let (mut even_lat, mut odd_lat) = pair_latitudes(even, odd, 360.);
    // the southern hemisphere encodes into the top quarter of the span
    if even_lat >= 270.0 {
        even_lat -= 360.0;
    }
    if odd_lat >= 270.0 {
        odd_lat -= 360.0;
    }
    if !(-90. ..=90.).contains(&even_lat) || !(-90. ..=90.).contains(&odd_lat)
    {
        return None;
    }
    // a pair straddling a zone transition cannot resolve longitude
    if nl(even_lat) != nl(odd_lat) {
        return None;
    }

    let (latitude, latest_cell) = match latest {
        CprFormat::Even => (even_lat, even),
        CprFormat::Odd => (odd_lat, odd),
    };

    let mut longitude = pair_longitude(even, odd, latitude, latest_cell, 360.);
    if longitude >= 180.0 {
        longitude -= 360.0;
    }

    Some(Position {
        latitude,
        longitude,
    })
}

/**
 * Decode a surface position from a matched pair of even and odd frames.
 *
 * The 90° zones leave a four-fold ambiguity on each axis; the candidate
 * closest to `reference` wins. The reference must be within roughly 45 NM
 * for the answer to be meaningful.
 */
pub fn surface_from_pair(
    even: &CprCell,
    odd: &CprCell,
    latest: CprFormat,
    reference: &Position,
) -> Option<Position> {
    if even.parity != CprFormat::Even || odd.parity != CprFormat::Odd {
        return None;
    }

    let (even_lat, odd_lat) = pair_latitudes(even, odd, 90.);
    // candidates 90° apart, pick the one nearest the reference
    let base = match latest {
        CprFormat::Even => even_lat,
        CprFormat::Odd => odd_lat,
    };
    let latitude = [base - 180., base - 90., base, base + 90.]
        .into_iter()
        .filter(|l| (-90. ..=90.).contains(l))
        .min_by(|a, b| {
            fabs(a - reference.latitude)
                .partial_cmp(&fabs(b - reference.latitude))
                .expect("latitude candidates are finite")
        })?;

    // zone agreement still applies, computed on the raw solutions
    if nl(even_lat) != nl(odd_lat) {
        return None;
    }

    let latest_cell = match latest {
        CprFormat::Even => even,
        CprFormat::Odd => odd,
    };
    let base_lon = pair_longitude(even, odd, latitude, latest_cell, 90.);

    let longitude = (0..4)
        .map(|k| {
            let mut l = base_lon + 90. * k as f64;
            while l >= 180. {
                l -= 360.;
            }
            l
        })
        .min_by(|a, b| {
            lon_delta(*a, reference.longitude)
                .partial_cmp(&lon_delta(*b, reference.longitude))
                .expect("longitude candidates are finite")
        })?;

    Some(Position {
        latitude,
        longitude,
    })
}

fn lon_delta(a: f64, b: f64) -> f64 {
    let mut d = fabs(a - b) % 360.;
    if d > 180. {
        d = 360. - d;
    }
    d
}

/// Place an encoded zone fraction into the grid cell nearest the
/// reference coordinate. Within one axis, the encoding repeats every
/// `width` degrees; the cell index whose interpolation lands closest to
/// the reference is the only defensible choice, and a result more than
/// half a cell out means the reference was no good.
fn snap_to_reference(fraction: f64, width: f64, reference: f64) -> Option<f64> {
    let cells_to_reference = floor(reference / width);
    let adjust = floor(0.5 + reference.rem_euclid(width) / width - fraction);
    let value = width * (cells_to_reference + adjust + fraction);
    (fabs(value - reference) <= width / 2.).then_some(value)
}

/**
 * Decode an airborne position with only one message, knowing a reference
 * nearby location, such as a previously calculated position or the
 * receiver location. The reference shall be within 180 NM of the true
 * position.
 */
pub fn airborne_near_reference(
    msg: &CprCell,
    latitude_ref: f64,
    longitude_ref: f64,
) -> Option<Position> {
    single_frame_position(msg, latitude_ref, longitude_ref, 360.)
}

/**
 * Decode a surface position with only one message against a reference
 * within 45 NM of the true position.
 */
pub fn surface_near_reference(
    msg: &CprCell,
    latitude_ref: f64,
    longitude_ref: f64,
) -> Option<Position> {
    single_frame_position(msg, latitude_ref, longitude_ref, 90.)
}

/// The shared single-frame path: snap the latitude into the grid around
/// the reference, size the longitude zone at that latitude, snap again.
fn single_frame_position(
    msg: &CprCell,
    latitude_ref: f64,
    longitude_ref: f64,
    span: f64,
) -> Option<Position> {
    let latitude = snap_to_reference(
        msg.lat_fraction(),
        span / msg.lat_zones(),
        latitude_ref,
    )?;
    if !(-90. ..=90.).contains(&latitude) {
        return None;
    }

    let lon_width = span / msg.lon_zones(latitude) as f64;
    let longitude =
        snap_to_reference(msg.lon_fraction(), lon_width, longitude_ref)?;

    Some(Position {
        latitude,
        longitude,
    })
}

/// Half the width of a CPR cell at the given latitude, in km. Used to
/// shrink the acceptable receiver range for reference-based decoding.
pub fn half_cell_km(latitude: f64, surface: bool) -> f64 {
    let span = if surface { 90. } else { 360. };
    let d_lat = span / 60.;
    let zones = nl(latitude).max(1);
    let d_lon = span / zones as f64;
    let lat_km = d_lat / 2. * 111.2;
    let lon_km =
        d_lon / 2. * 111.2 * cos(latitude.to_radians()).abs().max(0.01);
    lat_km.min(lon_km)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::adsb::Me;
    use crate::decode::{Df, Frame};
    use approx::assert_relative_eq;
    use deku::prelude::*;
    use hexlit::hex;

    fn cell(bytes: &[u8]) -> CprCell {
        let frame = Frame::from_bytes((bytes, 0)).unwrap().1;
        match frame.df {
            Df::ExtendedSquitter(adsb) => match adsb.message {
                Me::AirbornePosition(pos) => CprCell {
                    parity: pos.parity,
                    lat_cpr: pos.lat_cpr,
                    lon_cpr: pos.lon_cpr,
                },
                Me::SurfacePosition(pos) => CprCell {
                    parity: pos.parity,
                    lat_cpr: pos.lat_cpr,
                    lon_cpr: pos.lon_cpr,
                },
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_nl_against_known_zones() {
        // spot checks against the published transition table
        assert_eq!(nl(0.0), 59);
        assert_eq!(nl(-5.0), 59);
        assert_eq!(nl(10.5), 58);
        assert_eq!(nl(45.0), 42);
        assert_eq!(nl(-48.05), 40);
        assert_eq!(nl(52.0), 36);
        assert_eq!(nl(86.6), 2);
        assert_eq!(nl(87.0), 1);
        assert_eq!(nl(-90.0), 1);
    }

    #[test]
    fn airborne_pair_decodes_known_frames() {
        let even = cell(&hex!("8D40058B58C901375147EFD09357"));
        let odd = cell(&hex!("8D40058B58C904A87F402D3B8C59"));
        let pos = airborne_from_pair(&even, &odd, CprFormat::Odd).unwrap();
        assert_relative_eq!(pos.latitude, 49.81755, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 6.08442, max_relative = 1e-3);

        let odd = cell(&hex!("8d4d224f58bf07c2d41a9a353d70"));
        let even = cell(&hex!("8d4d224f58bf003b221b34aa5b8d"));
        let pos = airborne_from_pair(&even, &odd, CprFormat::Even).unwrap();
        assert_relative_eq!(pos.latitude, 42.346, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 0.4347, max_relative = 1e-3);
    }

    #[test]
    fn airborne_single_frame_near_receiver() {
        let msg = cell(&hex!("8D40058B58C901375147EFD09357"));
        let pos = airborne_near_reference(&msg, 49.0, 6.0).unwrap();
        assert_relative_eq!(pos.latitude, 49.82410, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 6.06785, max_relative = 1e-3);

        let msg = cell(&hex!("8D40058B58C904A87F402D3B8C59"));
        let pos = airborne_near_reference(&msg, 49.0, 6.0).unwrap();
        assert_relative_eq!(pos.latitude, 49.81755, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 6.08442, max_relative = 1e-3);
    }

    #[test]
    fn surface_single_frame_near_receiver() {
        let msg = cell(&hex!("8c4841753aab238733c8cd4020b1"));
        let pos = surface_near_reference(&msg, 51.99, 4.375).unwrap();
        assert_relative_eq!(pos.latitude, 52.32061, max_relative = 1e-3);
        assert_relative_eq!(pos.longitude, 4.73473, max_relative = 1e-3);
    }

    #[test]
    fn decode_surface_global_matches_local() {
        // a surface pair built from the local solution must agree with it
        let msg = cell(&hex!("8c4841753aab238733c8cd4020b1"));
        let local = surface_near_reference(&msg, 51.99, 4.375).unwrap();
        // synthesize the counterpart parity at the very same position
        let other = encode_surface(local.latitude, local.longitude, match msg.parity {
            CprFormat::Even => CprFormat::Odd,
            CprFormat::Odd => CprFormat::Even,
        });
        let (even, odd) = match msg.parity {
            CprFormat::Even => (msg, other),
            CprFormat::Odd => (other, msg),
        };
        let reference = Position {
            latitude: 51.99,
            longitude: 4.375,
        };
        let global =
            surface_from_pair(&even, &odd, msg.parity, &reference).unwrap();
        assert_relative_eq!(global.latitude, local.latitude, max_relative = 1e-4);
        assert_relative_eq!(
            global.longitude,
            local.longitude,
            max_relative = 1e-3
        );
    }

    #[test]
    fn global_requires_zone_agreement() {
        // frames from latitudes in different longitude zones must not decode
        let even = CprCell {
            parity: CprFormat::Even,
            lat_cpr: 0,
            lon_cpr: 0,
        };
        let odd = CprCell {
            parity: CprFormat::Odd,
            lat_cpr: 65536,
            lon_cpr: 0,
        };
        assert!(airborne_from_pair(&even, &odd, CprFormat::Odd).is_none());
    }

    #[test]
    fn global_requires_parities() {
        let even = CprCell {
            parity: CprFormat::Even,
            lat_cpr: 1000,
            lon_cpr: 1000,
        };
        assert!(airborne_from_pair(&even, &even, CprFormat::Even).is_none());
    }

    #[test]
    fn test_distance_between_airports() {
        // Zurich to Frankfurt is a bit under 290 km
        let zrh = Position {
            latitude: 47.4647,
            longitude: 8.5492,
        };
        let fra = Position {
            latitude: 50.0379,
            longitude: 8.5622,
        };
        let d = zrh.distance_km(&fra);
        assert!((d - 286.).abs() < 5., "distance {d}");
        assert_relative_eq!(zrh.distance_km(&zrh), 0.0);
    }

    /// CPR-encode a surface position (test helper, inverse of the decoder)
    fn encode_surface(lat: f64, lon: f64, parity: CprFormat) -> CprCell {
        let cell = CprCell {
            parity,
            lat_cpr: 0,
            lon_cpr: 0,
        };
        let lat_width = 90. / cell.lat_zones();
        let yz = floor(CPR_BINS * lat.rem_euclid(lat_width) / lat_width + 0.5);
        let rlat = lat_width * (yz / CPR_BINS + floor(lat / lat_width));
        let lon_width = 90. / cell.lon_zones(rlat) as f64;
        let xz = floor(CPR_BINS * lon.rem_euclid(lon_width) / lon_width + 0.5);
        CprCell {
            parity,
            lat_cpr: (yz as u32) & 0x1FFFF,
            lon_cpr: (xz as u32) & 0x1FFFF,
        }
    }
}
