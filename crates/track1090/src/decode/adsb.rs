use super::{Capability, Icao, Squawk};
use deku::bitvec::{BitSlice, Msb0};
use deku::prelude::*;
use serde::Serialize;
use std::fmt;

/**
 * The body of an extended squitter: after the five DF bits come three
 * capability bits, the 24-bit address, a 56-bit ME payload dispatched on
 * its leading five typecode bits, and 24 bits of parity.
 */
#[derive(Debug, PartialEq, DekuRead, Clone, Serialize)]
pub struct Adsb {
    /// transponder capability field
    #[serde(skip)]
    pub capability: Capability,

    /// announced 24-bit address
    pub icao24: Icao,

    /// typecode-dispatched payload
    #[serde(flatten)]
    pub message: Me,

    /// parity overlay
    #[serde(skip)]
    pub parity: Icao,
}

impl fmt::Display for Adsb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " DF17 extended squitter")?;
        writeln!(f, "  address:  {}", &self.icao24)?;
        write!(f, "{}", &self.message)
    }
}

/*
* |  `Me`               |  Name                     |
* | ------------------- | ------------------------- |
* | 0                   | no position               |
* | 1..=4               | [`Identification`]        |
* | 5..=8               | [`SurfacePosition`]       |
* | 9..=18, 20..=22     | [`AirbornePosition`]      |
* | 19                  | [`AirborneVelocity`]      |
* | 28                  | [`AircraftStatus`]        |
* | 29                  | [`TargetState`]           |
* | 31                  | [`OperationStatus`]       |
*/
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(type = "u8", bits = "5")]
#[serde(tag = "BDS")]
pub enum Me {
    #[deku(id = "0")]
    #[serde(skip)]
    NoPosition {
        #[deku(bits = "3")]
        pad: u8,
        data: [u8; 6],
    },

    #[deku(id_pat = "1..=4")]
    #[serde(rename = "0,8")]
    Identification(Identification),

    #[deku(id_pat = "5..=8")]
    #[serde(rename = "0,6")]
    SurfacePosition(SurfacePosition),

    #[deku(id_pat = "9..=18 | 20..=22")]
    #[serde(rename = "0,5")]
    AirbornePosition(AirbornePosition),

    #[deku(id = "19")]
    #[serde(rename = "0,9")]
    AirborneVelocity(AirborneVelocity),

    #[deku(id = "23")]
    #[serde(skip)]
    Reserved0 {
        #[deku(bits = "3")]
        pad: u8,
        data: [u8; 6],
    },

    #[deku(id_pat = "24..=27")]
    #[serde(skip)]
    Reserved1 {
        #[deku(bits = "5")]
        tc: u8,
        #[deku(bits = "3")]
        pad: u8,
        data: [u8; 6],
    },

    #[deku(id = "28")]
    #[serde(rename = "6,1")]
    AircraftStatus(AircraftStatus),

    #[deku(id = "29")]
    #[serde(rename = "6,2")]
    TargetState(TargetState),

    #[deku(id = "30")]
    #[serde(skip)]
    OperationalCoordination {
        #[deku(bits = "3")]
        pad: u8,
        data: [u8; 6],
    },

    #[deku(id = "31")]
    #[serde(rename = "6,5")]
    OperationStatus(OperationStatus),
}

impl fmt::Display for Me {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Me::Identification(me) => write!(f, "{me}"),
            Me::SurfacePosition(me) => write!(f, "{me}"),
            Me::AirbornePosition(me) => write!(f, "{me}"),
            Me::AirborneVelocity(me) => write!(f, "{me}"),
            _ => Ok(()),
        }
    }
}

/// The control field of DF=18: who relayed this and under which
/// addressing scheme
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
pub struct ControlField {
    pub ct: ControlFieldType,
    /// Address, Announced
    pub aa: Icao,
    /// the relayed extended squitter payload
    pub me: Me,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "3")]
pub enum ControlFieldType {
    /// ADS-B message from a non-transponder device
    AdsbEsNt = 0,
    /// Non-transponder device, alternate address space
    AdsbEsNtAlt = 1,
    /// Fine format TIS-B
    TisbFine = 2,
    /// Coarse format TIS-B
    TisbCoarse = 3,
    /// TIS-B management message
    TisbManage = 4,
    /// TIS-B relay of an ADS-B message, anonymous address
    TisbAdsbRelay = 5,
    /// ADS-R: rebroadcast with the DF17 layout
    TisbAdsb = 6,
    Reserved = 7,
}

impl fmt::Display for ControlFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self {
            Self::AdsbEsNt | Self::AdsbEsNtAlt => "(ADS-B)",
            Self::TisbFine | Self::TisbCoarse | Self::TisbAdsbRelay => {
                "(TIS-B)"
            }
            Self::TisbManage | Self::TisbAdsb => "(ADS-R)",
            Self::Reserved => "(unknown addressing)",
        };
        write!(f, "{family}")
    }
}

/// A flag to qualify a CPR position as odd or even
#[derive(
    Debug, PartialEq, Eq, Serialize, serde::Deserialize, DekuRead, Copy, Clone,
)]
#[deku(type = "u8", bits = "1")]
#[serde(rename_all = "snake_case")]
pub enum CprFormat {
    Even = 0,
    Odd = 1,
}

impl fmt::Display for CprFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Even => "even",
                Self::Odd => "odd",
            }
        )
    }
}

/**
 * ## Aircraft identification (BDS 0,8)
 *
 * Typecode (5) and category (3), then the callsign as eight 6-bit
 * characters.
 */
#[derive(Debug, PartialEq, DekuRead, Serialize, Clone)]
pub struct Identification {
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    #[deku(bits = "3")]
    #[serde(skip)]
    pub ca: u8,

    /// Callsign, up to eight characters
    #[deku(reader = "callsign_read(deku::rest)")]
    pub callsign: String,
}

impl Identification {
    /// Emitter category as the conventional hex byte: 0xA0..0xD7,
    /// high nibble from the typecode (4 = A .. 1 = D), low nibble CA
    pub fn category(&self) -> u8 {
        (((0xE - self.tc) & 0x0f) << 4) | (self.ca & 0x07)
    }
}

impl fmt::Display for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  identification (BDS 0,8)")?;
        writeln!(f, "  callsign: {}", self.callsign)
    }
}

const CALLSIGN_CHARSET: &[u8; 64] =
    b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

fn callsign_read(
    rest: &BitSlice<u8, Msb0>,
) -> Result<(&BitSlice<u8, Msb0>, String), DekuError> {
    let mut rest = rest;
    let mut callsign = String::with_capacity(8);
    for _ in 0..8 {
        let (r, c) =
            u8::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(6)))?;
        rest = r;
        callsign.push(CALLSIGN_CHARSET[c as usize] as char);
    }
    let trimmed = callsign.trim_end_matches([' ', '#']).to_string();
    Ok((rest, trimmed))
}

/**
 * ## Surface position (BDS 0,6)
 *
 * Movement and ground track replace the altitude of the airborne layout;
 * the 17-bit CPR pair fills the tail: typecode (5), movement (7), track
 * status (1), track (7), time (1), parity (1), lat (17), lon (17).
 */
#[derive(Debug, PartialEq, DekuRead, Serialize, Copy, Clone)]
pub struct SurfacePosition {
    #[deku(bits = "5")]
    #[serde(skip)]
    pub tc: u8,

    /// Movement, 7-bit non-linear ground speed encoding
    #[deku(bits = "7")]
    #[serde(skip)]
    pub mov: u8,

    /// Ground track validity
    #[deku(bits = "1")]
    #[serde(skip)]
    pub track_status: bool,

    #[deku(bits = "7")]
    #[serde(skip)]
    pub trk: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub t: bool,

    pub parity: CprFormat,

    #[deku(bits = "17", endian = "big")]
    pub lat_cpr: u32,

    #[deku(bits = "17", endian = "big")]
    pub lon_cpr: u32,
}

impl SurfacePosition {
    /// Decode the movement field into knots.
    /// None when no information is available or the value is reserved.
    pub fn groundspeed(&self) -> Option<f64> {
        // piecewise-linear buckets, finest at taxi speeds: each arm is
        // (first code of the bucket, speed there, step per code)
        let (first, base, step) = match self.mov {
            0 | 125.. => return None,
            1 => return Some(0.),
            2..=8 => (2, 0.125, 0.125),
            9..=12 => (9, 1.0, 0.25),
            13..=38 => (13, 2.0, 0.5),
            39..=93 => (39, 15.0, 1.0),
            94..=108 => (94, 70.0, 2.0),
            109..=123 => (109, 100.0, 5.0),
            124 => return Some(175.),
        };
        Some(base + (self.mov - first) as f64 * step)
    }

    /// Ground track in degrees from true north, None when invalid
    pub fn track(&self) -> Option<f64> {
        if self.track_status {
            Some(self.trk as f64 * 360. / 128.)
        } else {
            None
        }
    }

    /// Containment radius implied by the typecode, in meters (surface)
    pub fn nic_rc(&self) -> (u8, u32) {
        match self.tc {
            5 => (11, 8),
            6 => (10, 25),
            7 => (8, 186),
            _ => (0, u32::MAX),
        }
    }
}

impl fmt::Display for SurfacePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  surface position (BDS 0,6)")?;
        writeln!(f, "  cpr:      {} {}/{}", self.parity, self.lat_cpr, self.lon_cpr)?;
        Ok(())
    }
}

/**
 * ## Airborne position (BDS 0,5)
 *
 * Typecodes 9..=18 carry a barometric altitude, 20..=22 a geometric
 * height; the layout is typecode (5), surveillance status (2), antenna
 * or NIC supplement (1), altitude (12), time (1), parity (1), then the
 * 17-bit CPR pair.
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct AirbornePosition {
    #[deku(bits = "5")]
    #[serde(skip)]
    /// typecode, see the altitude kinds above
    pub tc: u8,

    /// Surveillance status (permanent/temporary alert, SPI)
    #[deku(bits = "2")]
    #[serde(skip)]
    pub ss: u8,

    /// Single Antenna Flag in ADSB v0/v1, NIC supplement B in v2
    #[deku(bits = "1")]
    #[serde(skip)]
    pub saf_or_nicb: u8,

    #[deku(reader = "decode_ac12(deku::rest)")]
    #[serde(rename = "altitude")]
    /// Altitude in ft (barometric for TC<19, geometric for TC 20..=22),
    /// None if not available
    pub alt: Option<i32>,

    #[deku(bits = "1")]
    #[serde(skip)]
    /// UTC sync or not
    pub t: bool,

    pub parity: CprFormat,

    #[deku(bits = "17", endian = "big")]
    pub lat_cpr: u32,

    #[deku(bits = "17", endian = "big")]
    pub lon_cpr: u32,
}

impl AirbornePosition {
    /// True when the altitude field carries a geometric height
    pub fn is_gnss_alt(&self) -> bool {
        self.tc >= 20
    }

    /// Navigation integrity category and containment radius in meters,
    /// from the typecode and the NIC supplement B bit (DO-260B table)
    pub fn nic_rc(&self) -> (u8, u32) {
        match (self.tc, self.saf_or_nicb) {
            (9, _) | (20, _) => (11, 8),
            (10, _) | (21, _) => (10, 25),
            (11, 1) => (9, 75),
            (11, 0) => (8, 186),
            (12, _) => (7, 371),
            (13, _) => (6, 926),
            (14, _) => (5, 1852),
            (15, _) => (4, 3704),
            (16, 1) => (3, 7408),
            (16, 0) => (2, 14816),
            (17, _) => (1, 37040),
            _ => (0, u32::MAX),
        }
    }
}

impl fmt::Display for AirbornePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  airborne position (BDS 0,5)")?;
        if let Some(alt) = self.alt {
            let kind = if self.is_gnss_alt() { "geom" } else { "baro" };
            writeln!(f, "  altitude: {alt} ft {kind}")?;
        }
        writeln!(f, "  cpr:      {} {}/{}", self.parity, self.lat_cpr, self.lon_cpr)?;
        Ok(())
    }
}

/// Decode the 12-bit altitude of an airborne position.
///
/// The field is the 13-bit Mode C code with its metric (M) bit removed.
/// Bit 4 is the Q bit: set means the remaining eleven bits count 25 ft
/// steps from -1000 ft, clear means a Gillham-coded reply.
fn decode_ac12(
    rest: &BitSlice<u8, Msb0>,
) -> Result<(&BitSlice<u8, Msb0>, Option<i32>), DekuError> {
    let (rest, field) =
        u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(12)))?;

    if field == 0 {
        return Ok((rest, None));
    }

    let altitude = if field & 0b1_0000 != 0 {
        // splice out the Q bit: seven bits above it, four below
        let steps = ((field >> 5) << 4) | (field & 0b1111);
        Some(steps as i32 * 25 - 1000)
    } else {
        // re-insert a zero M bit to recover the 13-bit Mode C layout,
        // then run it through the identity de-interleaver
        let mode_c = ((field >> 6) << 7) | (field & 0b11_1111);
        super::gray2alt(super::decode_id13(mode_c))
            .ok()
            .map(|hundreds| hundreds * 100)
    };
    Ok((rest, altitude))
}

/**
 * ## Airborne velocity (BDS 0,9)
 *
 * All transmitted with TC=19. Subtypes 1/2 carry ground speed vectors,
 * subtypes 3/4 carry airspeed and heading (2/4 are the supersonic
 * variants with 4 kt resolution).
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
pub struct AirborneVelocity {
    #[deku(bits = "3")]
    #[serde(skip)]
    pub subtype: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub intent_change: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub ifr_capability: bool,

    #[deku(bits = "3")]
    #[serde(rename = "NACv")]
    pub nac_v: u8,

    #[deku(ctx = "*subtype")]
    #[serde(flatten)]
    pub velocity: VelocitySubType,

    /// Source of the vertical rate: GNSS (0) or barometric (1)
    #[deku(bits = "1")]
    #[serde(skip)]
    pub vrate_src_baro: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub vrate_sign: u8,

    #[deku(
        endian = "big",
        bits = "9",
        map = "|v: u16| -> Result<_, DekuError> {
            if v == 0 { Ok(None) }
            else if *vrate_sign == 1 { Ok(Some(-((v as i32 - 1) * 64))) }
            else { Ok(Some((v as i32 - 1) * 64)) }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// The vertical rate value in ft/min, None if unavailable
    pub vertical_rate: Option<i32>,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub gnss_sign: u8,

    #[deku(
        endian = "big",
        bits = "7",
        map = "|v: u16| -> Result<_, DekuError> {
            if v < 2 { Ok(None) }
            else if *gnss_sign == 1 { Ok(Some(-((v as i32 - 1) * 25))) }
            else { Ok(Some((v as i32 - 1) * 25)) }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// The signed difference between GNSS height and barometric altitude, ft
    pub geo_minus_baro: Option<i32>,
}

impl AirborneVelocity {
    /// Speed multiplier: subtypes 2 and 4 are supersonic (4 kt units)
    fn unit(&self) -> f64 {
        if self.subtype == 2 || self.subtype == 4 {
            4.
        } else {
            1.
        }
    }

    /// Ground speed in kt and track in degrees (subtypes 1 and 2)
    pub fn groundspeed_track(&self) -> Option<(f64, f64)> {
        if let VelocitySubType::GroundSpeed(gs) = &self.velocity {
            let (vew, vns) = (gs.ew?, gs.ns?);
            let vew = self.unit() * vew as f64 * if gs.ew_sign == 1 { -1. } else { 1. };
            let vns = self.unit() * vns as f64 * if gs.ns_sign == 1 { -1. } else { 1. };
            let speed = libm::hypot(vew, vns);
            let mut track = libm::atan2(vew, vns).to_degrees();
            if track < 0. {
                track += 360.;
            }
            Some((speed, track))
        } else {
            None
        }
    }

    /// Airspeed in kt and its kind (subtypes 3 and 4)
    pub fn airspeed(&self) -> Option<(f64, AirspeedType)> {
        if let VelocitySubType::Airspeed(air) = &self.velocity {
            Some((self.unit() * air.speed? as f64, air.airspeed_type))
        } else {
            None
        }
    }

    /// Magnetic heading in degrees (subtypes 3 and 4)
    pub fn heading(&self) -> Option<f64> {
        if let VelocitySubType::Airspeed(air) = &self.velocity {
            if air.heading_status {
                return Some(air.heading as f64 * 360. / 1024.);
            }
        }
        None
    }
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Clone)]
#[deku(ctx = "subtype: u8", id = "subtype")]
#[serde(untagged)]
pub enum VelocitySubType {
    #[deku(id_pat = "1..=2")]
    GroundSpeed(GroundSpeed),

    #[deku(id_pat = "3..=4")]
    Airspeed(Airspeed),

    #[deku(id_pat = "_")]
    Unknown {
        #[deku(bits = "22", endian = "big")]
        raw: u32,
    },
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct GroundSpeed {
    /// East-West velocity sign, 1 towards west
    #[deku(bits = "1")]
    #[serde(skip)]
    pub ew_sign: u8,

    #[deku(
        endian = "big",
        bits = "10",
        map = "|v: u16| -> Result<_, DekuError> {
            if v == 0 { Ok(None) } else { Ok(Some(v - 1)) }
        }"
    )]
    #[serde(skip)]
    pub ew: Option<u16>,

    /// North-South velocity sign, 1 towards south
    #[deku(bits = "1")]
    #[serde(skip)]
    pub ns_sign: u8,

    #[deku(
        endian = "big",
        bits = "10",
        map = "|v: u16| -> Result<_, DekuError> {
            if v == 0 { Ok(None) } else { Ok(Some(v - 1)) }
        }"
    )]
    #[serde(skip)]
    pub ns: Option<u16>,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct Airspeed {
    #[deku(bits = "1")]
    #[serde(skip)]
    pub heading_status: bool,

    #[deku(bits = "10", endian = "big")]
    #[serde(skip)]
    pub heading: u16,

    pub airspeed_type: AirspeedType,

    #[deku(
        endian = "big",
        bits = "10",
        map = "|v: u16| -> Result<_, DekuError> {
            if v == 0 { Ok(None) } else { Ok(Some(v - 1)) }
        }"
    )]
    #[serde(skip)]
    pub speed: Option<u16>,
}

#[derive(Debug, PartialEq, Eq, Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "1")]
pub enum AirspeedType {
    #[serde(rename = "IAS")]
    Ias = 0,
    #[serde(rename = "TAS")]
    Tas = 1,
}

impl fmt::Display for AirborneVelocity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  airborne velocity (BDS 0,9)")?;
        if let Some((speed, track)) = self.groundspeed_track() {
            writeln!(f, "  gs/track: {speed:.1} kt / {track:.1}")?;
        }
        if let Some(rate) = self.vertical_rate {
            writeln!(f, "  rate:     {rate} ft/min")?;
        }
        Ok(())
    }
}

/**
 * ## Aircraft status (BDS 6,1, TC=28)
 *
 * Emergency/priority status and the current squawk: typecode (5),
 * subtype (3), emergency state (3), identity (13), reserved (32).
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct AircraftStatus {
    #[deku(bits = "3")]
    #[serde(skip)]
    pub subtype: u8,

    /// Emergency state, 0 = none, 1 = general (7700), 4 = no comms (7600),
    /// 5 = unlawful interference (7500)
    #[deku(bits = "3")]
    pub emergency: u8,

    pub squawk: Squawk,

    #[deku(bits = "32", endian = "big")]
    #[serde(skip)]
    pub reserved: u32,
}

/**
 * ## Target state and status (BDS 6,2, TC=29)
 *
 * Selected altitude (MCP/FCU or FMS), barometric setting, selected
 * heading, and the autopilot mode flags.
 */
#[derive(Copy, Clone, Debug, Serialize, PartialEq, DekuRead)]
pub struct TargetState {
    #[deku(bits = "2")]
    #[serde(skip)]
    pub subtype: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub sil_supplement: bool,

    /// 0 = MCP/FCU selected altitude, 1 = FMS
    #[deku(bits = "1")]
    pub alt_fms: bool,

    #[deku(
        endian = "big",
        bits = "11",
        map = "|v: u16| -> Result<_, DekuError> {
            if v == 0 { Ok(None) } else { Ok(Some((v as i32 - 1) * 32)) }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Selected altitude in ft (32 ft LSB)
    pub selected_altitude: Option<i32>,

    #[deku(
        endian = "big",
        bits = "9",
        map = "|v: u16| -> Result<_, DekuError> {
            if v == 0 { Ok(None) } else { Ok(Some(800. + (v as f64 - 1.) * 0.8)) }
        }"
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    /// QNH in hPa
    pub qnh: Option<f64>,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub heading_status: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub heading_sign: u8,

    #[deku(bits = "8", endian = "big")]
    #[serde(skip)]
    pub heading_raw: u8,

    #[deku(bits = "4")]
    #[serde(rename = "NACp")]
    pub nac_p: u8,

    #[deku(bits = "1")]
    pub nic_baro: u8,

    #[deku(bits = "2")]
    #[serde(rename = "SIL")]
    pub sil: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub mode_status: bool,

    #[deku(bits = "1")]
    pub autopilot: bool,

    #[deku(bits = "1")]
    pub vnav_mode: bool,

    #[deku(bits = "1")]
    pub alt_hold: bool,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub imf: bool,

    #[deku(bits = "1")]
    pub approach_mode: bool,

    #[deku(bits = "1")]
    pub tcas_operational: bool,

    #[deku(bits = "1")]
    pub lnav_mode: bool,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved: u8,
}

impl TargetState {
    /// Selected heading in degrees [0, 360)
    pub fn selected_heading(&self) -> Option<f64> {
        if !self.heading_status {
            return None;
        }
        let mut heading =
            (self.heading_sign as f64 * 180.) + self.heading_raw as f64 * 180. / 256.;
        if heading < 0. {
            heading += 360.;
        }
        Some(heading)
    }

    /// Mode flags are only meaningful when the status bit is set
    pub fn modes_valid(&self) -> bool {
        self.mode_status
    }
}

/**
 * ## Operation status (BDS 6,5, TC=31)
 *
 * Version, integrity/accuracy supplements and the heading reference
 * direction; the airborne and surface layouts differ after the capacity
 * class fields.
 */
#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "3")]
#[serde(untagged)]
pub enum OperationStatus {
    #[deku(id = "0")]
    Airborne(OperationStatusAirborne),

    #[deku(id = "1")]
    Surface(OperationStatusSurface),

    #[deku(id_pat = "_")]
    Reserved {
        #[deku(bits = "3")]
        subtype: u8,
        #[deku(bits = "48", endian = "big")]
        raw: u64,
    },
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct OperationStatusAirborne {
    #[deku(bits = "16", endian = "big")]
    #[serde(skip)]
    pub capability_class: u16,

    #[deku(bits = "16", endian = "big")]
    #[serde(skip)]
    pub operational_mode: u16,

    /// ADS-B version: 0, 1 (DO-260A) or 2 (DO-260B)
    #[deku(bits = "3")]
    pub version: u8,

    #[deku(bits = "1")]
    pub nic_a: u8,

    #[deku(bits = "4")]
    #[serde(rename = "NACp")]
    pub nac_p: u8,

    #[deku(bits = "2")]
    #[serde(rename = "GVA")]
    pub gva: u8,

    #[deku(bits = "2")]
    #[serde(rename = "SIL")]
    pub sil: u8,

    #[deku(bits = "1")]
    pub nic_baro: u8,

    /// Horizontal Reference Direction: 0 = true north, 1 = magnetic north
    #[deku(bits = "1")]
    pub hrd: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub sil_supplement: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub reserved: u8,
}

#[derive(Debug, PartialEq, Serialize, DekuRead, Copy, Clone)]
pub struct OperationStatusSurface {
    #[deku(bits = "12", endian = "big")]
    #[serde(skip)]
    pub capability_class: u16,

    /// Length/width code of the airframe
    #[deku(bits = "4")]
    pub lw_code: u8,

    #[deku(bits = "16", endian = "big")]
    #[serde(skip)]
    pub operational_mode: u16,

    #[deku(bits = "3")]
    pub version: u8,

    #[deku(bits = "1")]
    pub nic_a: u8,

    #[deku(bits = "4")]
    #[serde(rename = "NACp")]
    pub nac_p: u8,

    #[deku(bits = "2")]
    #[serde(skip)]
    pub reserved0: u8,

    #[deku(bits = "2")]
    #[serde(rename = "SIL")]
    pub sil: u8,

    /// Track Angle / Heading: 0 = the surface field reports track angle,
    /// 1 = it reports heading
    #[deku(bits = "1")]
    pub track_angle_or_heading: u8,

    #[deku(bits = "1")]
    pub hrd: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub sil_supplement: u8,

    #[deku(bits = "1")]
    #[serde(skip)]
    pub reserved1: u8,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Df, Frame};
    use approx::assert_relative_eq;
    use hexlit::hex;

    fn adsb(frame: Frame) -> Adsb {
        match frame.df {
            Df::ExtendedSquitter(adsb) => adsb,
            _ => unreachable!(),
        }
    }

    /// Recompute the trailing parity so a hand-built frame passes the CRC
    fn seal(mut bytes: [u8; 14]) -> [u8; 14] {
        bytes[11] = 0;
        bytes[12] = 0;
        bytes[13] = 0;
        let parity = crate::decode::crc::modes_checksum(&bytes, 112);
        bytes[11] = (parity >> 16) as u8;
        bytes[12] = (parity >> 8) as u8;
        bytes[13] = parity as u8;
        bytes
    }

    #[test]
    fn test_identification() {
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");
        let adsb = adsb(Frame::from_bytes((&bytes, 0)).unwrap().1);
        if let Me::Identification(id) = adsb.message {
            assert_eq!(id.callsign, "EZY85MH");
            assert_eq!(id.category(), 0xA0);
        } else {
            unreachable!()
        }
    }

    #[test]
    fn test_airborne_position_fields() {
        let bytes = hex!("8D40058B58C901375147EFD09357");
        let adsb = adsb(Frame::from_bytes((&bytes, 0)).unwrap().1);
        if let Me::AirbornePosition(pos) = adsb.message {
            assert_eq!(pos.parity, CprFormat::Even);
            assert_eq!(pos.alt, Some(39000));
            assert!(!pos.is_gnss_alt());
        } else {
            unreachable!()
        }
    }

    #[test]
    fn test_airborne_velocity_groundspeed() {
        let bytes = hex!("8D485020994409940838175B284F");
        let adsb = adsb(Frame::from_bytes((&bytes, 0)).unwrap().1);
        if let Me::AirborneVelocity(velocity) = adsb.message {
            let (speed, track) = velocity.groundspeed_track().unwrap();
            assert_relative_eq!(speed, 159.2, max_relative = 1e-2);
            assert_relative_eq!(track, 182.88, max_relative = 1e-2);
            assert_eq!(velocity.vertical_rate, Some(-832));
            assert_eq!(velocity.geo_minus_baro, Some(550));
        } else {
            unreachable!()
        }
    }

    #[test]
    fn test_airborne_velocity_airspeed() {
        let bytes = hex!("8DA05F219B06B6AF189400CBC33F");
        let adsb = adsb(Frame::from_bytes((&bytes, 0)).unwrap().1);
        if let Me::AirborneVelocity(velocity) = adsb.message {
            let (speed, kind) = velocity.airspeed().unwrap();
            assert_eq!(kind, AirspeedType::Tas);
            assert_relative_eq!(speed, 375.0, max_relative = 1e-2);
            let heading = velocity.heading().unwrap();
            assert_relative_eq!(heading, 243.98, max_relative = 1e-2);
        } else {
            unreachable!()
        }
    }

    #[test]
    fn test_aircraft_status_emergency() {
        // TC=28 subtype 1, general emergency, squawk bits all zero
        let mut bytes = [0u8; 14];
        bytes[0] = 0x8D;
        bytes[1] = 0x40;
        bytes[2] = 0x62;
        bytes[3] = 0x10;
        bytes[4] = (28 << 3) | 1; // TC=28, subtype=1
        bytes[5] = 1 << 5; // emergency=1, top 5 squawk bits zero
        let bytes = seal(bytes);
        let adsb = adsb(Frame::from_bytes((&bytes, 0)).unwrap().1);
        if let Me::AircraftStatus(status) = adsb.message {
            assert_eq!(status.subtype, 1);
            assert_eq!(status.emergency, 1);
            assert_eq!(status.squawk.0, 0);
        } else {
            unreachable!()
        }
    }

    #[test]
    fn test_target_state() {
        // TC=29 subtype 1, MCP altitude 32000 ft, QNH 1013.6, heading 66.8
        let mut bytes = [0u8; 14];
        bytes[0] = 0x8D;
        bytes[1] = 0xA0;
        bytes[2] = 0x5F;
        bytes[3] = 0x21;
        let alt: u64 = 32000 / 32 + 1;
        let qnh: u64 = ((1013.6f64 - 800.) / 0.8).round() as u64 + 1;
        let hdg: u64 = (66.8f64 * 256. / 180.).round() as u64;
        // TC(5)=29, subtype(2)=1, sil_supp(1)=0
        bytes[4] = (29 << 3) | (1 << 1);
        // 48 remaining bits, bit 63 down: alt_fms(1)=0, alt(11), qnh(9),
        // hdg_status(1)=1, hdg_sign(1)=0, hdg(8), nacp(4), nicbaro(1),
        // sil(2), mode_status(1), autopilot(1), ... reserved(2)
        let mut bits: u64 = 0;
        bits |= alt << 52;
        bits |= qnh << 43;
        bits |= 1u64 << 42; // heading valid
        bits |= hdg << 33;
        bits |= 10u64 << 29; // NACp
        bits |= 1u64 << 28; // nic_baro
        bits |= 3u64 << 26; // SIL
        bits |= 1u64 << 25; // mode_status
        bits |= 1u64 << 24; // autopilot
        let field = bits >> 16; // the 48 payload bits
        bytes[5] = (field >> 40) as u8;
        bytes[6] = (field >> 32) as u8;
        bytes[7] = (field >> 24) as u8;
        bytes[8] = (field >> 16) as u8;
        bytes[9] = (field >> 8) as u8;
        bytes[10] = field as u8;
        let bytes = seal(bytes);
        let adsb = adsb(Frame::from_bytes((&bytes, 0)).unwrap().1);
        if let Me::TargetState(ts) = adsb.message {
            assert_eq!(ts.selected_altitude, Some(32000));
            assert_relative_eq!(ts.qnh.unwrap(), 1013.6, max_relative = 1e-3);
            assert_relative_eq!(
                ts.selected_heading().unwrap(),
                66.8,
                max_relative = 1e-2
            );
            assert_eq!(ts.nac_p, 10);
            assert!(ts.modes_valid());
            assert!(ts.autopilot);
            assert!(!ts.vnav_mode);
        } else {
            unreachable!()
        }
    }

    #[test]
    fn test_operation_status_airborne() {
        // TC=31 subtype 0, version 2, NACp 10, SIL 3, HRD magnetic
        let mut bytes = [0u8; 14];
        bytes[0] = 0x8D;
        bytes[1] = 0x48;
        bytes[2] = 0x50;
        bytes[3] = 0x20;
        bytes[4] = 31 << 3; // TC=31, subtype=0
        // CC (16 bits) and OM (16 bits) zero: bytes 5..9
        // then ver(3) nica(1) nacp(4) | gva(2) sil(2) nicbaro(1) hrd(1) silsupp(1) res(1)
        bytes[9] = (2 << 5) | 10; // version 2, nic_a 0, nacp 10
        bytes[10] = (1 << 6) | (3 << 4) | (1 << 3) | (1 << 2); // gva 1, sil 3, nicbaro 1, hrd magnetic
        let bytes = seal(bytes);
        let adsb = adsb(Frame::from_bytes((&bytes, 0)).unwrap().1);
        if let Me::OperationStatus(OperationStatus::Airborne(st)) = adsb.message {
            assert_eq!(st.version, 2);
            assert_eq!(st.nac_p, 10);
            assert_eq!(st.sil, 3);
            assert_eq!(st.hrd, 1);
        } else {
            unreachable!()
        }
    }
}
