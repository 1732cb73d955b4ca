use crate::aircraft::{AirGround, Aircraft, NavModes};
use crate::decode::cpr::Position;
use serde::{Deserialize, Serialize};

/// Hard cap on trace length; eviction removes whole quads so the
/// quarter-rate snapshot invariant survives
pub const TRACE_SIZE: usize = 4096;

/// Number of points of the fast-update "recent" document
pub const TRACE_RECENT_POINTS: usize = 142;

/// Track change that forces a trace append, degrees
pub const TRACE_TRACK_DELTA: f64 = 2.0;

/// Altitude change that forces a trace append, ft
pub const TRACE_ALT_DELTA: i32 = 300;

/// Position jump that forces a trace append, km
pub const TRACE_JUMP_KM: f64 = 1.0;

/// Ground gap that starts a new leg after a major descent
const LEG_GROUND_GAP_MS: u64 = 25 * 60 * 1000;
/// Ground gap that starts a new leg without a major descent in the trace
const LEG_GROUND_GAP_LONG_MS: u64 = 45 * 60 * 1000;
/// A major climb this long after a major descent starts a new leg
const LEG_CLIMB_AFTER_DESCENT_MS: u64 = 10 * 60 * 1000;
/// Cap on the altitude band that separates climb from noise, ft
const LEG_THRESHOLD_CAP: i32 = 10_000;
const LEG_THRESHOLD_FLOOR: i32 = 900;

// Packed-altitude contract: bits 0..20 carry altitude + 100 000 ft,
// bit 21 = stale, bit 22 = on ground, bit 23 = altitude unknown,
// bit 24 = altitude is geometric, bit 25 = rate is geometric,
// bit 26 = leg marker.
const ALT_MASK: u32 = 0x1F_FFFF;
const ALT_OFFSET: i32 = 100_000;
const BIT_STALE: u32 = 1 << 21;
const BIT_ON_GROUND: u32 = 1 << 22;
const BIT_ALT_UNKNOWN: u32 = 1 << 23;
const BIT_ALT_GEOM: u32 = 1 << 24;
const BIT_RATE_GEOM: u32 = 1 << 25;
const BIT_LEG_MARKER: u32 = 1 << 26;

const GS_UNKNOWN: u16 = u16::MAX;
const TRACK_UNKNOWN: u16 = u16::MAX;
const RATE_UNKNOWN: i16 = i16::MIN;

/**
 * One fixed-size trajectory sample. Quantized on purpose: the packed form
 * is also the on-disk format of the persisted state.
 */
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Eq)]
pub struct TracePoint {
    /// ms since epoch
    pub ts: u64,
    /// microdegrees
    pub lat: i32,
    /// microdegrees
    pub lon: i32,
    /// altitude and flag bits, see the packing contract above
    packed: u32,
    /// 0.1 kt units, [`GS_UNKNOWN`] when absent
    gs: u16,
    /// 0.01 degree units, [`TRACK_UNKNOWN`] when absent
    track: u16,
    /// ft/min, [`RATE_UNKNOWN`] when absent
    rate: i16,
}

impl TracePoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ts: u64,
        latitude: f64,
        longitude: f64,
        altitude: Option<i32>,
        alt_geom: bool,
        on_ground: bool,
        stale: bool,
        gs: Option<f64>,
        track: Option<f64>,
        rate: Option<i32>,
        rate_geom: bool,
    ) -> Self {
        let mut packed: u32 = match altitude {
            Some(alt) => {
                ((alt + ALT_OFFSET).clamp(0, ALT_MASK as i32)) as u32
            }
            None => BIT_ALT_UNKNOWN,
        };
        if alt_geom && altitude.is_some() {
            packed |= BIT_ALT_GEOM;
        }
        if on_ground {
            packed |= BIT_ON_GROUND;
        }
        if stale {
            packed |= BIT_STALE;
        }
        if rate_geom && rate.is_some() {
            packed |= BIT_RATE_GEOM;
        }
        TracePoint {
            ts,
            lat: (latitude * 1e6) as i32,
            lon: (longitude * 1e6) as i32,
            packed,
            gs: gs.map_or(GS_UNKNOWN, |v| {
                (v * 10.).clamp(0., (GS_UNKNOWN - 1) as f64) as u16
            }),
            track: track.map_or(TRACK_UNKNOWN, |v| (v * 100.) as u16),
            rate: rate.map_or(RATE_UNKNOWN, |v| {
                v.clamp(i16::MIN as i32 + 1, i16::MAX as i32) as i16
            }),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.lat as f64 * 1e-6
    }

    pub fn longitude(&self) -> f64 {
        self.lon as f64 * 1e-6
    }

    pub fn altitude(&self) -> Option<i32> {
        if self.packed & BIT_ALT_UNKNOWN != 0 {
            None
        } else {
            Some((self.packed & ALT_MASK) as i32 - ALT_OFFSET)
        }
    }

    pub fn alt_geom(&self) -> bool {
        self.packed & BIT_ALT_GEOM != 0
    }

    pub fn on_ground(&self) -> bool {
        self.packed & BIT_ON_GROUND != 0
    }

    pub fn stale(&self) -> bool {
        self.packed & BIT_STALE != 0
    }

    pub fn rate_geom(&self) -> bool {
        self.packed & BIT_RATE_GEOM != 0
    }

    pub fn leg_marker(&self) -> bool {
        self.packed & BIT_LEG_MARKER != 0
    }

    pub fn set_leg_marker(&mut self, leg: bool) {
        if leg {
            self.packed |= BIT_LEG_MARKER;
        } else {
            self.packed &= !BIT_LEG_MARKER;
        }
    }

    pub fn groundspeed(&self) -> Option<f64> {
        if self.gs == GS_UNKNOWN {
            None
        } else {
            Some(self.gs as f64 / 10.)
        }
    }

    pub fn track(&self) -> Option<f64> {
        if self.track == TRACK_UNKNOWN {
            None
        } else {
            Some(self.track as f64 / 100.)
        }
    }

    pub fn rate(&self) -> Option<i32> {
        if self.rate == RATE_UNKNOWN {
            None
        } else {
            Some(self.rate as i32)
        }
    }

    /// The flag nibble of the compact JSON array form:
    /// `(geom_alt << 3) | (geom_rate << 2) | (leg << 1) | stale`
    pub fn bitfield(&self) -> u8 {
        ((self.alt_geom() as u8) << 3)
            | ((self.rate_geom() as u8) << 2)
            | ((self.leg_marker() as u8) << 1)
            | self.stale() as u8
    }
}

/**
 * Dense snapshot of the fused aircraft state, stored with every fourth
 * trace point so playback can reconstruct full context. Values are
 * quantized: altitudes in 25 ft units, angles in 0.01°, speeds in 0.1 kt.
 */
#[derive(Debug, Serialize, Deserialize, Copy, Clone, PartialEq, Default)]
pub struct StateAll {
    pub baro_alt: Option<i16>,
    pub geom_alt: Option<i16>,
    pub gs: Option<u16>,
    pub ias: Option<u16>,
    pub tas: Option<u16>,
    /// 0.001 Mach units
    pub mach: Option<u16>,
    pub track: Option<u16>,
    pub mag_heading: Option<u16>,
    pub true_heading: Option<u16>,
    pub baro_rate: Option<i16>,
    pub geom_rate: Option<i16>,
    pub squawk: Option<u16>,
    pub emergency: Option<u8>,
    pub category: Option<u8>,
    pub nav_altitude_mcp: Option<i32>,
    pub nav_altitude_fms: Option<i32>,
    /// 0.1 hPa units
    pub nav_qnh: Option<u16>,
    pub nav_heading: Option<u16>,
    pub nav_modes: NavModes,
    pub nac_p: Option<u8>,
    pub nac_v: Option<u8>,
    pub sil: Option<u8>,
    pub gva: Option<u8>,
    pub sda: Option<u8>,
    pub nic: u8,
    pub rc: u32,
    pub airground: AirGround,
}

fn q_alt(alt: Option<i32>) -> Option<i16> {
    alt.map(|a| (a / 25).clamp(i16::MIN as i32, i16::MAX as i32) as i16)
}

fn q_angle(angle: Option<f64>) -> Option<u16> {
    angle.map(|a| (a.rem_euclid(360.) * 100.) as u16)
}

impl StateAll {
    pub fn capture(aircraft: &Aircraft) -> Self {
        StateAll {
            baro_alt: q_alt(aircraft.baro_alt),
            geom_alt: q_alt(aircraft.geom_alt),
            gs: aircraft.gs.map(|v| (v * 10.) as u16),
            ias: aircraft.ias.map(|v| v as u16),
            tas: aircraft.tas.map(|v| v as u16),
            mach: aircraft.mach.map(|v| (v * 1000.) as u16),
            track: q_angle(aircraft.track),
            mag_heading: q_angle(aircraft.mag_heading),
            true_heading: q_angle(aircraft.true_heading),
            baro_rate: aircraft.baro_rate.map(|v| (v / 8) as i16),
            geom_rate: aircraft.geom_rate.map(|v| (v / 8) as i16),
            squawk: aircraft.squawk,
            emergency: aircraft.emergency,
            category: aircraft.category,
            nav_altitude_mcp: aircraft.nav_altitude_mcp,
            nav_altitude_fms: aircraft.nav_altitude_fms,
            nav_qnh: aircraft.nav_qnh.map(|v| (v * 10.) as u16),
            nav_heading: q_angle(aircraft.nav_heading),
            nav_modes: aircraft.nav_modes,
            nac_p: aircraft.nac_p,
            nac_v: aircraft.nac_v,
            sil: aircraft.sil,
            gva: aircraft.gva,
            sda: aircraft.sda,
            nic: aircraft.pos_nic,
            rc: aircraft.pos_rc,
            airground: aircraft.airground,
        }
    }

    /// Write the captured scalars back into a record (playback support).
    /// Validity bookkeeping is left to the caller.
    pub fn apply(&self, aircraft: &mut Aircraft) {
        aircraft.baro_alt = self.baro_alt.map(|a| a as i32 * 25);
        aircraft.geom_alt = self.geom_alt.map(|a| a as i32 * 25);
        aircraft.gs = self.gs.map(|v| v as f64 / 10.);
        aircraft.ias = self.ias.map(|v| v as u32);
        aircraft.tas = self.tas.map(|v| v as u32);
        aircraft.mach = self.mach.map(|v| v as f64 / 1000.);
        aircraft.track = self.track.map(|v| v as f64 / 100.);
        aircraft.mag_heading = self.mag_heading.map(|v| v as f64 / 100.);
        aircraft.true_heading = self.true_heading.map(|v| v as f64 / 100.);
        aircraft.baro_rate = self.baro_rate.map(|v| v as i32 * 8);
        aircraft.geom_rate = self.geom_rate.map(|v| v as i32 * 8);
        aircraft.squawk = self.squawk;
        aircraft.emergency = self.emergency;
        aircraft.category = self.category;
        aircraft.nav_altitude_mcp = self.nav_altitude_mcp;
        aircraft.nav_altitude_fms = self.nav_altitude_fms;
        aircraft.nav_qnh = self.nav_qnh.map(|v| v as f64 / 10.);
        aircraft.nav_heading = self.nav_heading.map(|v| v as f64 / 100.);
        aircraft.nav_modes = self.nav_modes;
        aircraft.nac_p = self.nac_p;
        aircraft.nac_v = self.nac_v;
        aircraft.sil = self.sil;
        aircraft.gva = self.gva;
        aircraft.sda = self.sda;
        aircraft.pos_nic = self.nic;
        aircraft.pos_rc = self.rc;
        aircraft.airground = self.airground;
    }
}

/// How often a full [`StateAll`] snapshot accompanies a trace point
pub const STATE_ALL_STRIDE: usize = 4;

/**
 * Per-aircraft append-only trajectory.
 *
 * `full[i]` is `Some` iff `i % 4 == 0`; eviction removes whole quads to
 * keep that invariant.
 */
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Trace {
    points: Vec<TracePoint>,
    full: Vec<Option<StateAll>>,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[TracePoint] {
        &self.points
    }

    pub fn last(&self) -> Option<&TracePoint> {
        self.points.last()
    }

    pub fn state_all(&self, index: usize) -> Option<&StateAll> {
        self.full.get(index).and_then(|o| o.as_ref())
    }

    /// The tail of the trace for the fast-update document
    pub fn recent(&self) -> &[TracePoint] {
        let start = self.points.len().saturating_sub(TRACE_RECENT_POINTS);
        &self.points[start..]
    }

    /// Points at or after a timestamp (the start-of-day boundary for the
    /// history tree)
    pub fn since(&self, ts: u64) -> &[TracePoint] {
        let start = self.points.partition_point(|p| p.ts < ts);
        &self.points[start..]
    }

    /// Append a sample; `capture` is only invoked when this index carries
    /// a full snapshot.
    pub fn push_with<F>(&mut self, point: TracePoint, capture: F)
    where
        F: FnOnce() -> StateAll,
    {
        if self.points.len() >= TRACE_SIZE {
            self.points.drain(..STATE_ALL_STRIDE);
            self.full.drain(..STATE_ALL_STRIDE);
        }
        let idx = self.points.len();
        self.points.push(point);
        self.full.push(if idx % STATE_ALL_STRIDE == 0 {
            Some(capture())
        } else {
            None
        });
    }

    /// Whether a new sample differs enough from the last one to be kept
    #[allow(clippy::too_many_arguments)]
    pub fn should_append(
        &self,
        now: u64,
        interval_ms: u64,
        latitude: f64,
        longitude: f64,
        altitude: Option<i32>,
        track: Option<f64>,
        on_ground: bool,
    ) -> bool {
        let last = match self.points.last() {
            Some(last) => last,
            None => return true,
        };
        if now.saturating_sub(last.ts) >= interval_ms {
            return true;
        }
        if on_ground != last.on_ground() {
            return true;
        }
        if let (Some(new), Some(old)) = (track, last.track()) {
            let mut delta = (new - old).abs() % 360.;
            if delta > 180. {
                delta = 360. - delta;
            }
            if delta > TRACE_TRACK_DELTA {
                return true;
            }
        }
        if let (Some(new), Some(old)) = (altitude, last.altitude()) {
            if (new - old).abs() > TRACE_ALT_DELTA {
                return true;
            }
        }
        let here = Position {
            latitude,
            longitude,
        };
        if here.distance_km(&Position {
            latitude: last.latitude(),
            longitude: last.longitude(),
        }) > TRACE_JUMP_KM
        {
            return true;
        }
        false
    }

    /// Leg detection: find flight-leg boundaries and set their markers.
    ///
    /// The climb threshold adapts to the aircraft (a third of the mean
    /// altitude, capped); rolling high/low water marks identify major
    /// climbs and descents; a major climb well after a major descent, or a
    /// long ground gap, starts a new leg. Returns the indices marked.
    pub fn mark_legs(&mut self) -> Vec<usize> {
        let mut marked = Vec::new();

        let alts: Vec<(usize, i32)> = self
            .points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.altitude().map(|a| (i, a)))
            .collect();

        let threshold = if alts.is_empty() {
            LEG_THRESHOLD_FLOOR
        } else {
            let mean: i64 = alts.iter().map(|&(_, a)| a as i64).sum::<i64>()
                / alts.len() as i64;
            ((mean / 3) as i32).clamp(LEG_THRESHOLD_FLOOR, LEG_THRESHOLD_CAP)
        };

        let mut high: i32 = i32::MIN;
        let mut low: i32 = i32::MAX;
        let mut last_high: (u64, usize) = (0, 0);
        let mut last_low: (u64, usize) = (0, 0);
        // (timestamp of the event, leg candidate index)
        let mut major_climb: Option<(u64, usize)> = None;
        let mut major_descent: Option<(u64, usize)> = None;

        for i in 0..self.points.len() {
            let point = self.points[i];

            // long ground gaps start a leg on the first point after them
            if i > 0 && point.on_ground() {
                let gap = point.ts.saturating_sub(self.points[i - 1].ts);
                let required = if major_descent.is_some() {
                    LEG_GROUND_GAP_MS
                } else {
                    LEG_GROUND_GAP_LONG_MS
                };
                if gap >= required {
                    marked.push(i);
                }
            }

            let alt = match point.altitude() {
                Some(alt) => alt,
                None => continue,
            };

            if alt > high {
                high = alt;
                last_high = (point.ts, i);
            } else if alt == high {
                last_high.0 = point.ts;
            }
            if alt < low {
                low = alt;
                last_low = (point.ts, i);
            } else if alt == low {
                last_low = (point.ts, i);
            }

            if high.saturating_sub(low) > threshold {
                if last_high.0 > last_low.0 {
                    major_climb = Some((last_high.0, last_low.1));
                    // partially reset so a later descent can register
                    low = high - threshold * 2 / 3;
                } else {
                    major_descent = Some((last_low.0, last_low.1));
                    high = low + threshold * 2 / 3;
                }
            }

            if let (Some((climb_ts, leg_idx)), Some((descent_ts, _))) =
                (major_climb, major_descent)
            {
                if climb_ts > descent_ts
                    && climb_ts.saturating_sub(descent_ts)
                        >= LEG_CLIMB_AFTER_DESCENT_MS
                {
                    marked.push(leg_idx);
                    // one leg per climb/descent pairing
                    major_descent = None;
                }
            }
        }

        marked.sort_unstable();
        marked.dedup();
        for &i in &marked {
            self.points[i].set_leg_marker(true);
        }
        marked
    }

    /// Straight-line distance between two points of the trace, km
    pub fn distance_km(&self, i: usize, j: usize) -> Option<f64> {
        let a = self.points.get(i)?;
        let b = self.points.get(j)?;
        let from = Position {
            latitude: a.latitude(),
            longitude: a.longitude(),
        };
        let to = Position {
            latitude: b.latitude(),
            longitude: b.longitude(),
        };
        Some(from.distance_km(&to))
    }

    pub fn last_position(&self) -> Option<Position> {
        self.points.last().map(|p| Position {
            latitude: p.latitude(),
            longitude: p.longitude(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: u64, alt: Option<i32>, on_ground: bool) -> TracePoint {
        TracePoint::new(
            ts,
            48.0,
            7.8,
            alt,
            false,
            on_ground,
            false,
            Some(200.),
            Some(90.),
            Some(0),
            false,
        )
    }

    #[test]
    fn test_packed_altitude_contract() {
        let p = point(0, Some(-1000), false);
        assert_eq!(p.altitude(), Some(-1000));
        assert!(!p.on_ground());
        assert!(!p.leg_marker());

        let mut p = point(0, None, true);
        assert_eq!(p.altitude(), None);
        assert!(p.on_ground());
        p.set_leg_marker(true);
        assert!(p.leg_marker());
        assert_eq!(p.bitfield() & 0b10, 0b10);
        p.set_leg_marker(false);
        assert!(!p.leg_marker());
        // flag bits never leak into the altitude
        let p = point(0, Some(126_000), false);
        assert!(p.altitude().unwrap() <= (ALT_MASK as i32 - ALT_OFFSET));
    }

    #[test]
    fn test_state_all_every_fourth() {
        let mut trace = Trace::default();
        for i in 0..10u64 {
            trace.push_with(point(i * 1000, Some(1000), false), || {
                StateAll::default()
            });
        }
        for i in 0..trace.len() {
            assert_eq!(trace.state_all(i).is_some(), i % 4 == 0);
        }
    }

    #[test]
    fn test_eviction_keeps_invariant_and_order() {
        let mut trace = Trace::default();
        for i in 0..(TRACE_SIZE + 10) as u64 {
            trace.push_with(point(i * 1000, Some(1000), false), || {
                StateAll::default()
            });
        }
        assert!(trace.len() <= TRACE_SIZE);
        for i in 0..trace.len() {
            assert_eq!(trace.state_all(i).is_some(), i % 4 == 0);
        }
        for pair in trace.points().windows(2) {
            assert!(pair[0].ts <= pair[1].ts);
        }
    }

    #[test]
    fn test_should_append_rules() {
        let mut trace = Trace::default();
        assert!(trace.should_append(0, 5000, 48., 7.8, Some(1000), Some(90.), false));
        trace.push_with(point(0, Some(1000), false), StateAll::default);

        // too soon, nothing changed
        assert!(!trace.should_append(1000, 5000, 48., 7.8, Some(1000), Some(90.), false));
        // interval elapsed
        assert!(trace.should_append(6000, 5000, 48., 7.8, Some(1000), Some(90.), false));
        // track swung
        assert!(trace.should_append(1000, 5000, 48., 7.8, Some(1000), Some(95.), false));
        // altitude jumped
        assert!(trace.should_append(1000, 5000, 48., 7.8, Some(1400), Some(90.), false));
        // ground state changed
        assert!(trace.should_append(1000, 5000, 48., 7.8, Some(1000), Some(90.), true));
        // position jumped
        assert!(trace.should_append(1000, 5000, 48.2, 7.8, Some(1000), Some(90.), false));
    }

    /// Climb to altitude and back with a ground gap: exactly one leg
    /// marker, on the first point after the gap.
    #[test]
    fn test_leg_detection_after_ground_gap() {
        let mut trace = Trace::default();
        let mut ts = 0u64;
        let step = 30_000u64; // 30 s between points

        // climb 0 -> 30000 ft
        for alt in (0..=30_000).step_by(1000) {
            trace.push_with(point(ts, Some(alt), alt == 0), StateAll::default);
            ts += step;
        }
        // descend 30000 -> 0 ft
        for alt in (0..30_000).step_by(1000).rev() {
            trace.push_with(point(ts, Some(alt), alt == 0), StateAll::default);
            ts += step;
        }
        // 15 minutes of silence on the ground
        ts += 15 * 60 * 1000;
        let first_after_gap = trace.len();
        trace.push_with(point(ts, Some(0), true), StateAll::default);
        ts += step;
        // next departure
        for alt in (1000..=30_000).step_by(1000) {
            trace.push_with(point(ts, Some(alt), false), StateAll::default);
            ts += step;
        }

        let marked = trace.mark_legs();
        assert_eq!(marked, vec![first_after_gap]);
        assert!(trace.points()[first_after_gap].leg_marker());
        let legs = trace.points().iter().filter(|p| p.leg_marker()).count();
        assert_eq!(legs, 1);

        // detection is idempotent
        let marked = trace.mark_legs();
        assert_eq!(marked, vec![first_after_gap]);
    }

    #[test]
    fn test_state_all_roundtrip_quantized() {
        use crate::aircraft::Aircraft;
        use crate::source::DataSource;

        let mut a = Aircraft::new(0x4b1803, false, 0);
        a.baro_alt = Some(37_012);
        a.geom_alt = Some(37_487);
        a.gs = Some(447.5);
        a.ias = Some(280);
        a.tas = Some(445);
        a.mach = Some(0.75);
        a.track = Some(271.37);
        a.mag_heading = Some(265.5);
        a.baro_rate = Some(-1_216);
        a.squawk = Some(0x2210);
        a.category = Some(0xA3);
        a.nav_altitude_mcp = Some(38_000);
        a.nav_qnh = Some(1013.5);
        a.nav_modes.autopilot = true;
        a.nac_p = Some(10);
        a.sil = Some(3);
        a.pos_nic = 8;
        a.pos_rc = 186;
        a.airground = AirGround::Airborne;
        a.pos_valid.accept(DataSource::Adsb, 1, 0);

        let snap = StateAll::capture(&a);
        let mut b = Aircraft::new(0x4b1803, false, 0);
        snap.apply(&mut b);

        // scalars survive modulo the documented quantization
        assert_eq!(b.baro_alt, Some(37_000)); // 25 ft units
        assert_eq!(b.geom_alt, Some(37_475));
        assert_eq!(b.gs, Some(447.5));
        assert_eq!(b.ias, Some(280));
        assert_eq!(b.tas, Some(445));
        assert_eq!(b.mach, Some(0.75));
        assert_eq!(b.track, Some(271.37)); // 0.01 degree units
        assert_eq!(b.mag_heading, Some(265.5));
        assert_eq!(b.baro_rate, Some(-1_216)); // 8 ft/min units
        assert_eq!(b.squawk, Some(0x2210));
        assert_eq!(b.category, Some(0xA3));
        assert_eq!(b.nav_altitude_mcp, Some(38_000));
        assert_eq!(b.nav_qnh, Some(1013.5));
        assert!(b.nav_modes.autopilot);
        assert_eq!(b.nac_p, Some(10));
        assert_eq!(b.sil, Some(3));
        assert_eq!(b.pos_nic, 8);
        assert_eq!(b.pos_rc, 186);
        assert_eq!(b.airground, AirGround::Airborne);
    }

    #[test]
    fn test_single_flight_has_no_leg() {
        let mut trace = Trace::default();
        let mut ts = 0u64;
        for alt in (0..=30_000).step_by(500) {
            trace.push_with(point(ts, Some(alt), false), StateAll::default);
            ts += 10_000;
        }
        for alt in (0..30_000).step_by(500).rev() {
            trace.push_with(point(ts, Some(alt), false), StateAll::default);
            ts += 10_000;
        }
        assert!(trace.mark_legs().is_empty());
    }
}
