/**
 * The packed binary flavor of the per-tile snapshot: a 40-byte header
 * followed by fixed-size little-endian records. Consumers index by the
 * element size from the header, so the layout below is a wire contract.
 *
 * Header (40 bytes):
 *   u64 now_ms | u32 elem_size | u32 positional count | u32 tile id |
 *   f32 south | f32 west | f32 north | f32 east | u32 reserved
 *
 * Record (56 bytes):
 *   u32 addr (bit 24 = non-ICAO) | i32 lat 1e-6° | i32 lon 1e-6° |
 *   i16 baro_alt 25 ft | i16 geom_alt 25 ft | u16 gs 0.1 kt |
 *   u16 track 0.01° | i16 baro_rate 8 fpm | i16 geom_rate 8 fpm |
 *   u16 squawk hex | u16 seen 0.1 s | u16 seen_pos 0.1 s |
 *   u8 category | u8 nic | u8 addr_type | u8 airground |
 *   u8 nac_p | u8 nac_v | u8 sil | u8 flags | 8 byte callsign |
 *   u32 rc m | 6 bytes reserved
 */
use track1090::aircraft::{AirGround, Aircraft};
use track1090::tiles;

pub const HEADER_SIZE: usize = 40;
pub const RECORD_SIZE: usize = 56;

const I16_ABSENT: i16 = i16::MIN;
const U16_ABSENT: u16 = u16::MAX;

// flags bits
const FLAG_POSITION: u8 = 1;
const FLAG_CALLSIGN: u8 = 2;
const FLAG_NON_ICAO: u8 = 4;

fn q_alt(alt: Option<i32>) -> i16 {
    match alt {
        Some(alt) => (alt / 25).clamp(i16::MIN as i32 + 1, i16::MAX as i32) as i16,
        None => I16_ABSENT,
    }
}

fn q_rate(rate: Option<i32>) -> i16 {
    match rate {
        Some(rate) => (rate / 8).clamp(i16::MIN as i32 + 1, i16::MAX as i32) as i16,
        None => I16_ABSENT,
    }
}

fn q_age(now: u64, then: u64) -> u16 {
    if then == 0 {
        return U16_ABSENT;
    }
    (now.saturating_sub(then) / 100).min(U16_ABSENT as u64 - 1) as u16
}

pub fn encode_tile(tile: u16, aircraft: &[Aircraft], now: u64) -> Vec<u8> {
    let (south, west, north, east) =
        tiles::globe_index_bbox(tile).unwrap_or((0., 0., 0., 0.));
    let positional = aircraft.iter().filter(|a| a.position_reliable()).count();

    let mut out =
        Vec::with_capacity(HEADER_SIZE + RECORD_SIZE * aircraft.len());
    out.extend_from_slice(&now.to_le_bytes());
    out.extend_from_slice(&(RECORD_SIZE as u32).to_le_bytes());
    out.extend_from_slice(&(positional as u32).to_le_bytes());
    out.extend_from_slice(&(tile as u32).to_le_bytes());
    out.extend_from_slice(&(south as f32).to_le_bytes());
    out.extend_from_slice(&(west as f32).to_le_bytes());
    out.extend_from_slice(&(north as f32).to_le_bytes());
    out.extend_from_slice(&(east as f32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    for a in aircraft {
        encode_record(&mut out, a, now);
    }
    out
}

fn encode_record(out: &mut Vec<u8>, a: &Aircraft, now: u64) {
    let start = out.len();
    let mut flags = 0u8;
    if a.position_reliable() {
        flags |= FLAG_POSITION;
    }
    if a.callsign.is_some() {
        flags |= FLAG_CALLSIGN;
    }
    if a.non_icao {
        flags |= FLAG_NON_ICAO;
    }

    out.extend_from_slice(&a.key().to_le_bytes());
    out.extend_from_slice(&((a.lat * 1e6) as i32).to_le_bytes());
    out.extend_from_slice(&((a.lon * 1e6) as i32).to_le_bytes());
    out.extend_from_slice(&q_alt(a.baro_alt).to_le_bytes());
    out.extend_from_slice(&q_alt(a.geom_alt).to_le_bytes());
    out.extend_from_slice(
        &a.gs
            .map_or(U16_ABSENT, |gs| (gs * 10.) as u16)
            .to_le_bytes(),
    );
    out.extend_from_slice(
        &a.track
            .map_or(U16_ABSENT, |t| (t.rem_euclid(360.) * 100.) as u16)
            .to_le_bytes(),
    );
    out.extend_from_slice(&q_rate(a.baro_rate).to_le_bytes());
    out.extend_from_slice(&q_rate(a.geom_rate).to_le_bytes());
    out.extend_from_slice(&a.squawk.unwrap_or(U16_ABSENT).to_le_bytes());
    out.extend_from_slice(&q_age(now, a.seen_any).to_le_bytes());
    out.extend_from_slice(&q_age(now, a.seen_pos).to_le_bytes());
    out.push(a.category.unwrap_or(0));
    out.push(a.pos_nic);
    out.push(a.addr_type as u8);
    out.push(match a.airground {
        AirGround::Invalid => 0,
        AirGround::Ground => 1,
        AirGround::Airborne => 2,
        AirGround::Uncertain => 3,
    });
    out.push(a.nac_p.unwrap_or(0xFF));
    out.push(a.nac_v.unwrap_or(0xFF));
    out.push(a.sil.unwrap_or(0xFF));
    out.push(flags);
    let mut callsign = [0u8; 8];
    if let Some(cs) = &a.callsign {
        let bytes = cs.as_bytes();
        let n = bytes.len().min(8);
        callsign[..n].copy_from_slice(&bytes[..n]);
    }
    out.extend_from_slice(&callsign);
    out.extend_from_slice(&a.pos_rc.to_le_bytes());
    out.extend_from_slice(&[0u8; 6]);

    debug_assert_eq!(out.len() - start, RECORD_SIZE);
}

/// Decoded form of one record, used by tests and diagnostic tooling
#[allow(dead_code)]
#[derive(Debug, PartialEq)]
pub struct DecodedRecord {
    pub addr: u32,
    pub non_icao: bool,
    pub lat: f64,
    pub lon: f64,
    pub baro_alt: Option<i32>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub squawk: Option<u16>,
    pub callsign: Option<String>,
    pub positional: bool,
}

#[allow(dead_code)]
pub fn decode_records(blob: &[u8]) -> Option<Vec<DecodedRecord>> {
    if blob.len() < HEADER_SIZE {
        return None;
    }
    let elem =
        u32::from_le_bytes(blob[8..12].try_into().ok()?) as usize;
    if elem != RECORD_SIZE || (blob.len() - HEADER_SIZE) % elem != 0 {
        return None;
    }
    let le16 = |b: &[u8], o: usize| {
        u16::from_le_bytes([b[o], b[o + 1]])
    };
    let mut records = Vec::new();
    for chunk in blob[HEADER_SIZE..].chunks_exact(elem) {
        let key = u32::from_le_bytes(chunk[0..4].try_into().ok()?);
        let lat = i32::from_le_bytes(chunk[4..8].try_into().ok()?);
        let lon = i32::from_le_bytes(chunk[8..12].try_into().ok()?);
        let baro = i16::from_le_bytes([chunk[12], chunk[13]]);
        let gs = le16(chunk, 16);
        let track = le16(chunk, 18);
        let squawk = le16(chunk, 24);
        let flags = chunk[37];
        let callsign = if flags & FLAG_CALLSIGN != 0 {
            let end = chunk[38..46]
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(8);
            Some(String::from_utf8_lossy(&chunk[38..38 + end]).to_string())
        } else {
            None
        };
        records.push(DecodedRecord {
            addr: key & 0xFF_FFFF,
            non_icao: flags & FLAG_NON_ICAO != 0,
            lat: lat as f64 / 1e6,
            lon: lon as f64 / 1e6,
            baro_alt: (baro != I16_ABSENT).then_some(baro as i32 * 25),
            gs: (gs != U16_ABSENT).then_some(gs as f64 / 10.),
            track: (track != U16_ABSENT).then_some(track as f64 / 100.),
            squawk: (squawk != U16_ABSENT).then_some(squawk),
            callsign,
            positional: flags & FLAG_POSITION != 0,
        });
    }
    Some(records)
}
