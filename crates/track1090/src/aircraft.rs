use crate::decode::adsb::CprFormat;
use crate::decode::cpr::CprCell;
use crate::source::{DataSource, Validity, TRACK_EXPIRE_LONG_MS};
use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How long a trusted (address-reliable) message keeps the record open for
/// updates from untrusted ones
pub const TRUST_WINDOW_MS: u64 = 45_000;

/// Starting value of the altitude reliability counter
pub const ALT_RELIABLE_INIT: i32 = 8;

/// What kind of emitter the 24-bit address belongs to, refined as better
/// messages arrive
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Copy, Clone, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Adsb,
    AdsbNonIcao,
    Adsr,
    AdsrNonIcao,
    TisbIcao,
    TisbTrackfile,
    TisbOther,
    ModeS,
    Mlat,
    ModeAc,
    Other,
    #[default]
    Unknown,
}

impl AddressType {
    pub fn non_icao(self) -> bool {
        matches!(
            self,
            AddressType::AdsbNonIcao
                | AddressType::AdsrNonIcao
                | AddressType::TisbTrackfile
                | AddressType::TisbOther
        )
    }

    pub fn tag(self) -> &'static str {
        match self {
            AddressType::Adsb => "adsb_icao",
            AddressType::AdsbNonIcao => "adsb_other",
            AddressType::Adsr => "adsr_icao",
            AddressType::AdsrNonIcao => "adsr_other",
            AddressType::TisbIcao => "tisb_icao",
            AddressType::TisbTrackfile => "tisb_trackfile",
            AddressType::TisbOther => "tisb_other",
            AddressType::ModeS => "mode_s",
            AddressType::Mlat => "mlat",
            AddressType::ModeAc => "mode_ac",
            AddressType::Other => "other",
            AddressType::Unknown => "unknown",
        }
    }
}

/// The ground/air state machine of spec'd surveillance: certain states
/// only yield to fresher certain messages of the opposite value, or to age
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Copy, Clone, Default)]
#[serde(rename_all = "snake_case")]
pub enum AirGround {
    #[default]
    Invalid,
    Ground,
    Airborne,
    Uncertain,
}

impl AirGround {
    pub fn is_certain(self) -> bool {
        matches!(self, AirGround::Ground | AirGround::Airborne)
    }
}

impl fmt::Display for AirGround {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                AirGround::Invalid => "invalid",
                AirGround::Ground => "ground",
                AirGround::Airborne => "airborne",
                AirGround::Uncertain => "uncertain",
            }
        )
    }
}

/// Autopilot mode flags from the target state message
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Copy, Clone, Default)]
pub struct NavModes {
    pub autopilot: bool,
    pub vnav: bool,
    pub althold: bool,
    pub approach: bool,
    pub lnav: bool,
    pub tcas: bool,
}

/// Ring of the 8 most recent signal levels, plus a count of polls where
/// nothing was heard
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Default)]
pub struct SignalRing {
    levels: [f64; 8],
    next: usize,
    filled: usize,
    pub no_signal: u32,
}

impl SignalRing {
    pub fn push(&mut self, rssi: f64) {
        self.levels[self.next] = rssi;
        self.next = (self.next + 1) % self.levels.len();
        self.filled = (self.filled + 1).min(self.levels.len());
        self.no_signal = 0;
    }

    /// Mean of the stored power levels, in dBFS
    pub fn average(&self) -> Option<f64> {
        if self.filled == 0 {
            return None;
        }
        // average in the power domain, not in dB
        let sum: f64 = self.levels[..self.filled]
            .iter()
            .map(|dbfs| libm::pow(10., dbfs / 10.))
            .sum();
        Some(10. * libm::log10(sum / self.filled as f64))
    }
}

/// One cached CPR frame with everything needed to decide whether it can
/// pair up for a global decode
#[derive(Debug, PartialEq, Serialize, Deserialize, Copy, Clone)]
pub struct CprScratch {
    pub cell: CprCell,
    pub surface: bool,
    pub nic: u8,
    pub rc: u32,
    /// ms timestamp of reception
    pub received: u64,
    pub source: DataSource,
}

/// Wind and temperature derived from the velocity triangle
#[derive(Debug, Serialize, Deserialize, Copy, Clone, Default)]
pub struct DerivedAir {
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    /// altitude the wind estimate refers to
    pub wind_altitude: Option<i32>,
    pub wind_updated: u64,
    pub oat: Option<f64>,
    pub tat: Option<f64>,
    pub oat_updated: u64,
}

/**
 * The long-lived per-aircraft record.
 *
 * Everything the tracker fuses lives here; scalar fields each carry a
 * [`Validity`]. The registry hands these out as `Arc<Mutex<Aircraft>>`,
 * and the mutex is held only to update or to snap a copy.
 */
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Aircraft {
    // identity
    pub addr: u32,
    pub non_icao: bool,
    pub addr_type: AddressType,
    pub addrtype_updated: u64,
    pub registration: Option<String>,
    pub type_code: Option<String>,
    pub db_flags: u32,

    /// last time an address-reliable message refreshed this record
    pub seen: u64,
    /// last message of any kind
    pub seen_any: u64,
    /// last accepted reliable position
    pub seen_pos: u64,
    /// when the record was created
    pub created: u64,

    // fused scalars
    pub callsign: Option<String>,
    pub callsign_valid: Validity,
    pub category: Option<u8>,
    pub category_updated: u64,
    pub squawk: Option<u16>,
    pub squawk_valid: Validity,
    pub emergency: Option<u8>,
    pub emergency_valid: Validity,

    pub baro_alt: Option<i32>,
    pub baro_alt_valid: Validity,
    pub geom_alt: Option<i32>,
    pub geom_alt_valid: Validity,
    /// geometric minus barometric altitude, ft
    pub geom_delta: Option<i32>,
    pub geom_delta_valid: Validity,
    /// counts plausible altitude updates up, implausible ones down
    pub alt_reliable: i32,

    pub gs: Option<f64>,
    pub gs_valid: Validity,
    pub ias: Option<u32>,
    pub ias_valid: Validity,
    pub tas: Option<u32>,
    pub tas_valid: Validity,
    pub mach: Option<f64>,
    pub mach_valid: Validity,

    pub track: Option<f64>,
    pub track_valid: Validity,
    pub mag_heading: Option<f64>,
    pub mag_heading_valid: Validity,
    pub true_heading: Option<f64>,
    pub true_heading_valid: Validity,

    pub baro_rate: Option<i32>,
    pub baro_rate_valid: Validity,
    pub geom_rate: Option<i32>,
    pub geom_rate_valid: Validity,

    // navigation intent
    pub nav_altitude_mcp: Option<i32>,
    pub nav_altitude_fms: Option<i32>,
    pub nav_altitude_valid: Validity,
    pub nav_qnh: Option<f64>,
    pub nav_qnh_valid: Validity,
    pub nav_heading: Option<f64>,
    pub nav_heading_valid: Validity,
    pub nav_modes: NavModes,
    pub nav_modes_valid: Validity,

    // accuracy and integrity
    pub nac_p: Option<u8>,
    pub nac_p_valid: Validity,
    pub nac_v: Option<u8>,
    pub nac_v_valid: Validity,
    pub sil: Option<u8>,
    pub sil_valid: Validity,
    pub gva: Option<u8>,
    pub gva_valid: Validity,
    pub sda: Option<u8>,
    pub sda_valid: Validity,
    pub nic_baro: Option<u8>,
    pub nic_baro_valid: Validity,

    // opstatus caches used for heading disambiguation
    pub adsb_version: Option<u8>,
    /// Horizontal Reference Direction: true = magnetic north
    pub hrd_magnetic: bool,
    /// surface reports carry track (false) or heading (true)
    pub tah_heading: bool,

    // position state
    pub lat: f64,
    pub lon: f64,
    pub pos_valid: Validity,
    pub pos_nic: u8,
    pub pos_rc: u32,
    pub pos_surface: bool,
    pub airground: AirGround,
    pub airground_valid: Validity,

    /// anchor for the plausibility speed check, only moved when the
    /// reliability threshold is met
    pub lat_reliable: f64,
    pub lon_reliable: f64,
    pub seen_pos_reliable: u64,
    pub pos_reliable_odd: f64,
    pub pos_reliable_even: f64,

    // CPR scratch
    pub cpr_odd: Option<CprScratch>,
    pub cpr_even: Option<CprScratch>,

    pub signal: SignalRing,
    pub derived: DerivedAir,

    /// current tile of the globe index, if positioned
    pub tile: Option<u16>,

    // trace bookkeeping
    pub trace: Trace,
    /// set when the trace writer should emit for this aircraft
    pub trace_write: bool,
    /// counts "recent" writes since the last full rewrite
    pub trace_writes: u32,
    /// jittered deadline for the next full rewrite, ms
    pub trace_full_deadline: u64,
    /// last UTC day the history tree received this trace
    pub trace_history_day: u32,
}

impl Aircraft {
    pub fn new(addr: u32, non_icao: bool, now: u64) -> Self {
        Aircraft {
            addr,
            non_icao,
            addr_type: AddressType::Unknown,
            addrtype_updated: now,
            registration: None,
            type_code: None,
            db_flags: 0,
            seen: now,
            seen_any: now,
            seen_pos: 0,
            created: now,
            callsign: None,
            callsign_valid: Validity::default(),
            category: None,
            category_updated: 0,
            squawk: None,
            squawk_valid: Validity::default(),
            emergency: None,
            emergency_valid: Validity::default(),
            baro_alt: None,
            baro_alt_valid: Validity::default(),
            geom_alt: None,
            geom_alt_valid: Validity::default(),
            geom_delta: None,
            geom_delta_valid: Validity::default(),
            alt_reliable: 0,
            gs: None,
            gs_valid: Validity::default(),
            ias: None,
            ias_valid: Validity::default(),
            tas: None,
            tas_valid: Validity::default(),
            mach: None,
            mach_valid: Validity::default(),
            track: None,
            track_valid: Validity::default(),
            mag_heading: None,
            mag_heading_valid: Validity::default(),
            true_heading: None,
            true_heading_valid: Validity::default(),
            baro_rate: None,
            baro_rate_valid: Validity::default(),
            geom_rate: None,
            geom_rate_valid: Validity::default(),
            nav_altitude_mcp: None,
            nav_altitude_fms: None,
            nav_altitude_valid: Validity::default(),
            nav_qnh: None,
            nav_qnh_valid: Validity::default(),
            nav_heading: None,
            nav_heading_valid: Validity::default(),
            nav_modes: NavModes::default(),
            nav_modes_valid: Validity::default(),
            nac_p: None,
            nac_p_valid: Validity::default(),
            nac_v: None,
            nac_v_valid: Validity::default(),
            sil: None,
            sil_valid: Validity::default(),
            gva: None,
            gva_valid: Validity::default(),
            sda: None,
            sda_valid: Validity::default(),
            nic_baro: None,
            nic_baro_valid: Validity::default(),
            adsb_version: None,
            hrd_magnetic: true,
            tah_heading: false,
            lat: 0.,
            lon: 0.,
            pos_valid: Validity::default(),
            pos_nic: 0,
            pos_rc: 0,
            pos_surface: false,
            airground: AirGround::Invalid,
            airground_valid: Validity::default(),
            lat_reliable: 0.,
            lon_reliable: 0.,
            seen_pos_reliable: 0,
            pos_reliable_odd: 0.,
            pos_reliable_even: 0.,
            cpr_odd: None,
            cpr_even: None,
            signal: SignalRing::default(),
            derived: DerivedAir::default(),
            tile: None,
            trace: Trace::default(),
            trace_write: false,
            trace_writes: 0,
            trace_full_deadline: 0,
            trace_history_day: 0,
        }
    }

    /// The 25-bit registry key: address plus the non-ICAO flag
    pub fn key(&self) -> u32 {
        key_of(self.addr, self.non_icao)
    }

    /// Trusted messages must have refreshed the record recently for
    /// untrusted ones to keep updating it
    pub fn trusted_recently(&self, now: u64) -> bool {
        now.saturating_sub(self.seen) <= TRUST_WINDOW_MS
    }

    /// Both parities above zero is the gate for global-CPR-anchored output
    pub fn position_reliable(&self) -> bool {
        self.pos_reliable_odd > 0. && self.pos_reliable_even > 0.
    }

    /// The CPR scratch slot for a parity
    pub fn cpr_slot(&mut self, parity: CprFormat) -> &mut Option<CprScratch> {
        match parity {
            CprFormat::Odd => &mut self.cpr_odd,
            CprFormat::Even => &mut self.cpr_even,
        }
    }

    /// Transition the ground/air state machine.
    /// A certain state is only displaced by a fresher certain message of
    /// the opposite value, or once it has aged out.
    pub fn set_airground(&mut self, next: AirGround, source: DataSource, now: u64) -> bool {
        let expired =
            self.airground_valid.age_ms(now) > TRACK_EXPIRE_LONG_MS;
        let changed = match (self.airground, next) {
            (cur, next) if cur == next => false,
            (AirGround::Ground, AirGround::Airborne)
            | (AirGround::Airborne, AirGround::Ground) => true,
            (cur, _) if !cur.is_certain() || expired => true,
            // an uncertain report does not displace a fresh certain state
            _ => false,
        };
        if changed || self.airground == next {
            self.airground_valid.accept(source, now, 0);
        }
        if changed {
            self.airground = next;
        }
        changed
    }

    pub fn hexid(&self) -> String {
        if self.non_icao {
            format!("~{:06x}", self.addr)
        } else {
            format!("{:06x}", self.addr)
        }
    }
}

pub fn key_of(addr: u32, non_icao: bool) -> u32 {
    (addr & 0xFF_FFFF) | ((non_icao as u32) << 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_distinguishes_non_icao() {
        let a = Aircraft::new(0x4b1803, false, 0);
        let b = Aircraft::new(0x4b1803, true, 0);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key() & 0xFF_FFFF, b.key() & 0xFF_FFFF);
    }

    #[test]
    fn test_airground_certain_sticky() {
        let mut a = Aircraft::new(0xabc123, false, 0);
        assert!(a.set_airground(AirGround::Airborne, DataSource::Adsb, 1_000));
        // an uncertain report shortly after does not displace it
        assert!(!a.set_airground(AirGround::Uncertain, DataSource::Adsb, 2_000));
        assert_eq!(a.airground, AirGround::Airborne);
        // a certain opposite report does
        assert!(a.set_airground(AirGround::Ground, DataSource::Adsb, 3_000));
        assert_eq!(a.airground, AirGround::Ground);
        // and so does aging out
        let late = 3_000 + TRACK_EXPIRE_LONG_MS + 1;
        assert!(a.set_airground(AirGround::Uncertain, DataSource::Adsb, late));
        assert_eq!(a.airground, AirGround::Uncertain);
    }

    #[test]
    fn test_signal_ring_average() {
        let mut ring = SignalRing::default();
        assert!(ring.average().is_none());
        ring.push(-10.);
        ring.push(-10.);
        let avg = ring.average().unwrap();
        assert!((avg - -10.).abs() < 1e-9);
        for _ in 0..8 {
            ring.push(-20.);
        }
        let avg = ring.average().unwrap();
        assert!((avg - -20.).abs() < 1e-9);
    }
}
