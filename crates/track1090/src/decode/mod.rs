pub mod adsb;
pub mod cpr;
pub mod crc;

use adsb::{Adsb, ControlField};
use crc::modes_checksum;
use deku::bitvec::{BitSlice, Msb0};
use deku::prelude::*;
use serde::ser::{Serialize, Serializer};
use std::fmt;

/**
 * The Downlink Format: the five leading bits of every Mode S
 * transmission, fixing both the meaning of the frame and its length
 * (short 56 bits, long 112). Only the formats the tracker consumes are
 * decoded in full; the exotic ones are carried as opaque bytes so that
 * forwarding still works.
 *
 * |  [`Df`]  |  Name                           |
 * | -------- | ------------------------------- |
 * | 0        | [`Df::ShortAirAir`]             |
 * | 4        | [`Df::AltitudeReply`]           |
 * | 5        | [`Df::IdentityReply`]           |
 * | 11       | [`Df::AllCall`]                 |
 * | 16       | [`Df::LongAirAir`]              |
 * | 17       | [`Df::ExtendedSquitter`]        |
 * | 18       | [`Df::ExtendedSquitterTisB`]    |
 * | 20       | [`Df::CommBAltitude`]           |
 * | 21       | [`Df::CommBIdentity`]           |
 */
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Clone)]
#[deku(type = "u8", bits = "5", ctx = "crc: u32")]
#[serde(tag = "DF")]
pub enum Df {
    /// DF=0: Short Air-Air Surveillance (ACAS)
    #[deku(id = "0")]
    #[serde(rename = "DF0")]
    ShortAirAir {
        /// Vertical status: 1 when on the ground
        #[deku(bits = "1")]
        vs: u8,
        #[deku(bits = "1")]
        #[serde(skip)]
        cc: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        unused: u8,
        #[deku(bits = "4")]
        #[serde(skip)]
        ri: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        unused1: u8,
        #[serde(rename = "altitude")]
        ac: AltitudeCode,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=4: Surveillance Altitude Reply
    #[deku(id = "4")]
    #[serde(rename = "DF4")]
    AltitudeReply {
        fs: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        #[serde(rename = "altitude")]
        ac: AltitudeCode,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=5: Surveillance Identity Reply
    #[deku(id = "5")]
    #[serde(rename = "DF5")]
    IdentityReply {
        fs: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        #[serde(rename = "squawk")]
        id: Squawk,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=11: All-call reply. The PI field overlays the interrogator id, so
    /// `crc == 0` here means a CRC-verified address.
    #[deku(id = "11")]
    #[serde(rename = "DF11")]
    AllCall {
        capability: Capability,
        #[serde(rename = "icao24")]
        icao: Icao,
        #[serde(skip)]
        p_icao: Icao,
    },

    /// DF=16: Long Air-Air Surveillance (ACAS)
    #[deku(id = "16")]
    #[serde(rename = "DF16")]
    LongAirAir {
        /// Vertical status: 1 when on the ground
        #[deku(bits = "1")]
        vs: u8,
        #[deku(bits = "7")]
        #[serde(skip)]
        reserved: u8,
        #[deku(bits = "4")]
        #[serde(skip)]
        ri: u8,
        #[deku(bits = "2")]
        #[serde(skip)]
        reserved2: u8,
        #[serde(rename = "altitude")]
        ac: AltitudeCode,
        #[deku(count = "7")]
        #[serde(skip)]
        mv: Vec<u8>,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=17: Extended Squitter ADS-B
    #[deku(id = "17")]
    #[serde(rename = "ADSB")]
    ExtendedSquitter(Adsb),

    /// DF=18: Extended Squitter Supplementary: TIS-B and ADS-R relays from
    /// ground stations, non-transponder ADS-B emitters
    #[deku(id = "18")]
    #[serde(rename = "TISB")]
    ExtendedSquitterTisB {
        cf: ControlField,
        #[serde(skip)]
        pi: Icao,
    },

    /// DF=19: Extended Squitter Military Application (opaque)
    #[deku(id = "19")]
    #[serde(skip)]
    ExtendedSquitterMilitary {
        #[deku(bits = "3")]
        af: u8,
        #[deku(count = "13")]
        rest: Vec<u8>,
    },

    /// DF=20: Comm-B Altitude Reply (registers are not inferred here)
    #[deku(id = "20")]
    #[serde(rename = "DF20")]
    CommBAltitude {
        fs: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        #[serde(rename = "altitude")]
        ac: AltitudeCode,
        #[deku(count = "7")]
        #[serde(skip)]
        mb: Vec<u8>,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=21: Comm-B Identity Reply
    #[deku(id = "21")]
    #[serde(rename = "DF21")]
    CommBIdentity {
        fs: FlightStatus,
        #[deku(bits = "5")]
        #[serde(skip)]
        dr: u8,
        #[deku(bits = "6")]
        #[serde(skip)]
        um: u8,
        #[serde(rename = "squawk")]
        id: Squawk,
        #[deku(count = "7")]
        #[serde(skip)]
        mb: Vec<u8>,
        #[serde(rename = "icao24")]
        #[deku(ctx = "crc")]
        ap: IcaoParity,
    },

    /// DF=24..=31: Comm-D Extended Length Message (opaque). Only the first
    /// two bits identify the format; the tail of the first byte is control.
    #[deku(id_pat = "24..=31")]
    #[serde(skip)]
    CommDExtended {
        #[deku(bits = "5")]
        df: u8,
        #[deku(bits = "3")]
        control: u8,
        #[deku(count = "10")]
        md: Vec<u8>,
        parity: Icao,
    },
}

/// The entry point to Mode S frame decoding
///
/// Use as `Frame::from_bytes()` on a 7- or 14-byte slice.
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Clone)]
pub struct Frame {
    /// Calculated from all bits: 0 for an intact extended squitter (raises
    /// a DekuError otherwise), the overlaid icao24 for AP/PI formats
    #[deku(reader = "Self::read_crc(deku::input_bits)")]
    #[serde(skip)]
    pub crc: u32,

    /// the typed payload, dispatched on the five DF bits
    #[serde(flatten)]
    #[deku(ctx = "*crc")]
    pub df: Df,
}

pub const MODES_SHORT_MSG_BYTES: usize = 7;
pub const MODES_LONG_MSG_BYTES: usize = 14;

/// Frame length in bytes implied by the first byte of a Mode S frame
pub fn frame_len(first_byte: u8) -> usize {
    if first_byte & 0x80 != 0 {
        MODES_LONG_MSG_BYTES
    } else {
        MODES_SHORT_MSG_BYTES
    }
}

impl Frame {
    /// Read the whole input once to run the CRC before field decoding
    fn read_crc(
        rest: &BitSlice<u8, Msb0>,
    ) -> Result<(&BitSlice<u8, Msb0>, u32), DekuError> {
        let (_, remaining_bytes, _) = rest
            .domain()
            .region()
            .ok_or_else(|| DekuError::Assertion("empty frame".to_string()))?;

        let format = remaining_bytes[0] >> 3;
        let frame_bits = frame_len(remaining_bytes[0]) * 8;
        if remaining_bytes.len() * 8 < frame_bits {
            return Err(DekuError::Assertion("truncated frame".to_string()));
        }

        let crc = modes_checksum(remaining_bytes, frame_bits);
        // Extended squitters carry a plain parity: anything non-zero is
        // a transmission error and the frame is worthless
        match (format, crc) {
            (17 | 18, c) if c > 0 => Err(DekuError::Assertion(format!(
                "invalid CRC in extended squitter: {c:x}"
            ))),
            _ => Ok((rest, crc)),
        }
    }

    /// The 24-bit address this frame talks about, if any
    pub fn icao24(&self) -> Option<Icao> {
        match &self.df {
            Df::ShortAirAir { ap, .. }
            | Df::AltitudeReply { ap, .. }
            | Df::IdentityReply { ap, .. }
            | Df::LongAirAir { ap, .. }
            | Df::CommBAltitude { ap, .. }
            | Df::CommBIdentity { ap, .. } => Some(Icao(ap.0)),
            Df::AllCall { icao, .. } => Some(*icao),
            Df::ExtendedSquitter(adsb) => Some(adsb.icao24),
            Df::ExtendedSquitterTisB { cf, .. } => Some(cf.aa),
            _ => None,
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.df {
            Df::ShortAirAir { ac, .. } => {
                writeln!(f, " DF0 short air-air surveillance")?;
                writeln!(f, "  address:  {:06x}", self.crc)?;
                if let Some(altitude) = ac.0 {
                    writeln!(f, "  altitude: {altitude} ft baro")?;
                }
            }
            Df::AltitudeReply { fs, ac, .. } => {
                writeln!(f, " DF4 altitude reply")?;
                writeln!(f, "  address:  {:06x}", self.crc)?;
                writeln!(f, "  status:   {fs}")?;
                if let Some(altitude) = ac.0 {
                    writeln!(f, "  altitude: {altitude} ft baro")?;
                }
            }
            Df::IdentityReply { fs, id, .. } => {
                writeln!(f, " DF5 identity reply")?;
                writeln!(f, "  address:  {:06x}", self.crc)?;
                writeln!(f, "  status:   {fs}")?;
                writeln!(f, "  squawk:   {id}")?;
            }
            Df::AllCall { icao, .. } => {
                writeln!(f, " DF11 all-call reply")?;
                writeln!(f, "  address:  {icao}")?;
            }
            Df::ExtendedSquitter(adsb) => write!(f, "{adsb}")?,
            Df::ExtendedSquitterTisB { cf, .. } => {
                writeln!(f, " DF18 extended squitter {}", cf.ct)?;
                writeln!(f, "  address:  {}", cf.aa)?;
            }
            _ => {
                writeln!(f, " DF{:?}", &self.df)?;
            }
        }
        Ok(())
    }
}

/// ICAO 24-bit transponder address
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
pub struct Icao(#[deku(bits = 24, endian = "big")] pub u32);

impl fmt::Debug for Icao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for Icao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for Icao {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:06x}", &self.0))
    }
}

impl core::str::FromStr for Icao {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let num = u32::from_str_radix(s, 16)?;
        Ok(Self(num))
    }
}

/// The 24-bit address recovered from an overlaid address/parity field.
/// The final bits were already consumed by the CRC pass, so the reader
/// substitutes the checksum result.
#[derive(PartialEq, Eq, PartialOrd, DekuRead, Hash, Copy, Clone, Ord)]
#[deku(ctx = "crc: u32")]
pub struct IcaoParity(
    #[deku(bits = 24, map = "|_v: u32| -> Result<_, DekuError> { Ok(crc) }")]
    pub  u32,
);

impl fmt::Debug for IcaoParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl fmt::Display for IcaoParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for IcaoParity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:06x}", &self.0))
    }
}

/// 13 bit identity code (squawk), reported as 4 octal digits
#[derive(PartialEq, Eq, DekuRead, Copy, Clone, Hash)]
pub struct Squawk(#[deku(reader = "Self::read(deku::rest)")] pub u16);

impl Squawk {
    fn read(
        rest: &BitSlice<u8, Msb0>,
    ) -> Result<(&BitSlice<u8, Msb0>, u16), DekuError> {
        let (rest, num) =
            u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(13)))?;
        Ok((rest, decode_id13(num)))
    }
}

impl fmt::Debug for Squawk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl fmt::Display for Squawk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

impl Serialize for Squawk {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:04x}", &self.0))
    }
}

/// 13 bit encoded altitude in ft, None when the field is unreadable
#[derive(Debug, PartialEq, Eq, serde::Serialize, DekuRead, Copy, Clone)]
pub struct AltitudeCode(#[deku(reader = "Self::read(deku::rest)")] pub Option<i32>);

impl AltitudeCode {
    /// Bit 6 of the 13-bit field is the M bit (metric reply), bit 4 the
    /// Q bit (25 ft resolution); with neither set the reply is Gillham
    /// coded like an identity.
    fn read(
        rest: &BitSlice<u8, Msb0>,
    ) -> Result<(&BitSlice<u8, Msb0>, Option<i32>), DekuError> {
        let (rest, field) =
            u16::read(rest, (deku::ctx::Endian::Big, deku::ctx::BitSize(13)))?;

        if field == 0 {
            return Ok((rest, None));
        }

        let alt = if field & 0b100_0000 != 0 {
            // metric: splice out the M bit, the rest counts meters
            let meters = ((field >> 7) << 6) | (field & 0b11_1111);
            Some((meters as f64 * 3.28084) as i32)
        } else if field & 0b1_0000 != 0 {
            // splice out M and Q, leaving eleven bits of 25 ft steps
            let steps = ((field >> 7) << 5)
                | (((field >> 5) & 1) << 4)
                | (field & 0b1111);
            Some(steps as i32 * 25 - 1000)
        } else {
            // Gillham coded altitude, 100 ft resolution
            gray2alt(decode_id13(field)).ok().map(|n| n * 100)
        };
        Ok((rest, alt))
    }
}

/// Transponder level and airborne/ground hint carried by DF11 and DF17
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "3")]
pub enum Capability {
    #[serde(rename = "level1")]
    Level1 = 0x00,
    #[deku(id_pat = "0x01..=0x03")]
    Reserved,
    #[serde(rename = "ground")]
    Ground = 0x04,
    #[serde(rename = "airborne")]
    Airborne = 0x05,
    #[serde(rename = "ground/airborne")]
    GroundAirborne = 0x06,
    Dr0 = 0x07,
}

/// Flight status of the surveillance replies (DF 4, 5, 20, 21): the
/// air/ground state plus the alert and SPI conditions
#[derive(Debug, PartialEq, serde::Serialize, DekuRead, Copy, Clone)]
#[deku(type = "u8", bits = "3")]
#[serde(rename_all = "snake_case")]
pub enum FlightStatus {
    Airborne = 0b000,
    OnGround = 0b001,
    AlertAirborne = 0b010,
    AlertOnGround = 0b011,
    AlertSpi = 0b100,
    Spi = 0b101,
    Reserved = 0b110,
    NotAssigned = 0b111,
}

impl FlightStatus {
    /// Certain on-ground indication, None when ambiguous
    pub fn on_ground(&self) -> Option<bool> {
        match self {
            Self::Airborne | Self::AlertAirborne => Some(false),
            Self::OnGround | Self::AlertOnGround => Some(true),
            _ => None,
        }
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self.on_ground() {
                Some(true) => "ground",
                Some(false) => "airborne",
                None => "airborne/ground",
            }
        )
    }
}

/// Wire positions of the interleaved identity pulses. A transponder
/// transmits C1-A1-C2-A2-C4-A4-X-B1-D1-B2-D2-B4-D4 (message bits 20..32);
/// the conventional representation packs each three-pulse group A, B, C,
/// D into one hex nibble of the result.
#[rustfmt::skip]
const ID13_PULSES: [(u16, u16); 12] = [
    (0x1000, 0x0010), // C1
    (0x0800, 0x1000), // A1
    (0x0400, 0x0020), // C2
    (0x0200, 0x2000), // A2
    (0x0100, 0x0040), // C4
    (0x0080, 0x4000), // A4
    // 0x0040 is the X (or M) bit, never part of the identity
    (0x0020, 0x0100), // B1
    (0x0010, 0x0001), // D1 (the Q bit in altitude replies)
    (0x0008, 0x0200), // B2
    (0x0004, 0x0002), // D2
    (0x0002, 0x0400), // B4
    (0x0001, 0x0004), // D4
];

/// De-interleave a 13-bit identity field into its packed-nibble form
pub fn decode_id13(field: u16) -> u16 {
    ID13_PULSES.iter().fold(0, |digits, &(wire, packed)| {
        if field & wire != 0 {
            digits | packed
        } else {
            digits
        }
    })
}

/// Gray-code progression of the 500 ft counter, most significant pulse
/// first: each active pulse flips all counter bits below its rank
#[rustfmt::skip]
const GRAY_500S: [(u16, u32); 8] = [
    (0x0002, 0x0FF), // D2
    (0x0004, 0x07F), // D4
    (0x1000, 0x03F), // A1
    (0x2000, 0x01F), // A2
    (0x4000, 0x00F), // A4
    (0x0100, 0x007), // B1
    (0x0200, 0x003), // B2
    (0x0400, 0x001), // B4
];

/// Gray-code progression of the 100 ft counter on the C pulses
#[rustfmt::skip]
const GRAY_100S: [(u16, u32); 3] = [
    (0x0010, 0x7), // C1
    (0x0020, 0x3), // C2
    (0x0040, 0x1), // C4
];

/// Convert a [Gillham code](https://en.wikipedia.org/wiki/Gillham_code)
/// (in packed-nibble form) to an altitude in 100 ft units
pub fn gray2alt(gray: u16) -> Result<i32, &'static str> {
    // the spare bits and D1 must be clear, and a valid reply always has
    // at least one C pulse
    if gray & 0x8889 != 0 || gray & 0x00F0 == 0 {
        return Err("invalid altitude");
    }

    let unfold = |code: &mut u32, bit: u16, flips: u32| {
        if gray & bit != 0 {
            *code ^= flips;
        }
    };

    let mut hundreds: u32 = 0;
    for &(bit, flips) in &GRAY_100S {
        unfold(&mut hundreds, bit, flips);
    }
    // the C group never counts 0 or 7; a decoded 7 stands for 5
    if hundreds & 5 == 5 {
        hundreds ^= 2;
    }
    if hundreds > 5 {
        return Err("invalid altitude");
    }

    let mut five_hundreds = 0u32;
    for &(bit, flips) in &GRAY_500S {
        unfold(&mut five_hundreds, bit, flips);
    }
    // the 100 ft counter runs backwards through every odd 500 ft band
    if five_hundreds & 1 != 0 {
        hundreds = 6 - hundreds;
    }

    // the sequence starts 13 counts (1300 ft) below zero
    let counts = five_hundreds * 5 + hundreds;
    if counts < 13 {
        return Err("invalid altitude");
    }
    Ok(counts as i32 - 13)
}

/// Decode a 2-byte Mode A/C reply into its squawk representation.
/// The caller decides whether it reads as an identity or an altitude.
pub fn mode_ac_squawk(frame: u16) -> u16 {
    decode_id13(frame)
}

/// Interpret a Mode A/C reply as a Mode C altitude in ft
pub fn mode_ac_altitude(frame: u16) -> Option<i32> {
    gray2alt(decode_id13(frame)).ok().map(|n| n * 100)
}

#[cfg(test)]
mod tests {

    use super::*;
    use hexlit::hex;

    #[test]
    fn test_icao24() {
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");
        let frame = Frame::from_bytes((&bytes, 0)).unwrap().1;
        assert_eq!(frame.icao24(), Some(Icao(0x406B90)));
    }

    #[test]
    fn test_invalid_crc() {
        let bytes = hex!("8d4ca251204994b1c36e60a5343d");
        let frame = Frame::from_bytes((&bytes, 0));
        match frame {
            Err(DekuError::Assertion(_)) => (),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_ac13_quarter_steps() {
        // altitude reply carrying 39000 ft in the 25 ft encoding
        let mut bytes = [0u8; 7];
        bytes[0] = 4 << 3;
        bytes[2] = 0x19;
        bytes[3] = 0x10;
        let parity = crc::modes_checksum(&bytes, 56) ^ 0x40058B;
        bytes[4] = (parity >> 16) as u8;
        bytes[5] = (parity >> 8) as u8;
        bytes[6] = parity as u8;
        let frame = Frame::from_bytes((&bytes, 0)).unwrap().1;
        match frame.df {
            Df::AltitudeReply { ac, .. } => assert_eq!(ac.0, Some(39_000)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_gillham_identity_digits() {
        // one pulse per group: A1 B1 C1 D1 reads back as 1111
        let field = 0x1000 | 0x0020 | 0x0800 | 0x0010;
        assert_eq!(decode_id13(field), 0x1111);
        assert_eq!(decode_id13(0), 0);
        // the X bit contributes nothing
        assert_eq!(decode_id13(0x0040), 0);
    }

    #[test]
    fn test_crc_overlay_address() {
        // an altitude reply: the CRC pass recovers the address from AP
        let mut bytes = hex!("20001718000000");
        let parity = crc::modes_checksum(&bytes, 56);
        let ap = parity ^ 0x40058B;
        bytes[4] = (ap >> 16) as u8;
        bytes[5] = (ap >> 8) as u8;
        bytes[6] = ap as u8;
        let frame = Frame::from_bytes((&bytes, 0)).unwrap().1;
        assert_eq!(frame.icao24(), Some(Icao(0x40058B)));
        match frame.df {
            Df::AltitudeReply { .. } => (),
            _ => unreachable!(),
        }
    }
}
