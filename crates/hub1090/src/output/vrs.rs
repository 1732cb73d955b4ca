/**
 * The compact VRS-compatible feed: one `vrs.json` built from 16 parts so
 * only a sixteenth of the fleet is re-serialized per tick.
 */
use crate::app::App;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use track1090::aircraft::{AirGround, Aircraft};

pub const VRS_PARTS: u32 = 16;

#[derive(Debug, Serialize, Clone)]
pub struct VrsEntry {
    #[serde(rename = "Icao")]
    pub icao: String,
    #[serde(rename = "Alt", skip_serializing_if = "Option::is_none")]
    pub alt: Option<i32>,
    #[serde(rename = "GAlt", skip_serializing_if = "Option::is_none")]
    pub galt: Option<i32>,
    #[serde(rename = "Lat", skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(rename = "Long", skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    #[serde(rename = "Spd", skip_serializing_if = "Option::is_none")]
    pub spd: Option<f64>,
    #[serde(rename = "Trak", skip_serializing_if = "Option::is_none")]
    pub trak: Option<f64>,
    #[serde(rename = "Vsi", skip_serializing_if = "Option::is_none")]
    pub vsi: Option<i32>,
    #[serde(rename = "Call", skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,
    #[serde(rename = "Sqk", skip_serializing_if = "Option::is_none")]
    pub sqk: Option<String>,
    #[serde(rename = "Gnd")]
    pub gnd: bool,
}

fn entry(aircraft: &Aircraft, now: u64) -> VrsEntry {
    VrsEntry {
        icao: format!("{:06X}", aircraft.addr),
        alt: aircraft
            .baro_alt_valid
            .is_valid(now)
            .then_some(aircraft.baro_alt)
            .flatten(),
        galt: aircraft
            .geom_alt_valid
            .is_valid(now)
            .then_some(aircraft.geom_alt)
            .flatten(),
        lat: aircraft.position_reliable().then_some(aircraft.lat),
        long: aircraft.position_reliable().then_some(aircraft.lon),
        spd: aircraft
            .gs_valid
            .is_valid(now)
            .then_some(aircraft.gs)
            .flatten(),
        trak: aircraft
            .track_valid
            .is_valid(now)
            .then_some(aircraft.track)
            .flatten(),
        vsi: aircraft
            .baro_rate_valid
            .is_valid(now)
            .then_some(aircraft.baro_rate)
            .flatten(),
        call: aircraft.callsign.clone(),
        sqk: aircraft.squawk.map(|s| format!("{s:04x}")),
        gnd: aircraft.airground == AirGround::Ground,
    }
}

/// Rolling 16-part serialization state, owned by the scheduler
#[derive(Debug)]
pub struct VrsState {
    parts: Vec<Vec<VrsEntry>>,
    next_part: u32,
}

impl Default for VrsState {
    fn default() -> Self {
        VrsState {
            parts: vec![Vec::new(); VRS_PARTS as usize],
            next_part: 0,
        }
    }
}

/// Refresh one sixteenth of the fleet, then assemble the document from
/// all parts. Returns the part refreshed this tick.
pub fn write_vrs(
    app: &Arc<App>,
    state: &mut VrsState,
    now: u64,
) -> io::Result<u32> {
    let dir = match &app.options.json_dir {
        Some(dir) => dir.clone(),
        None => return Ok(0),
    };

    let part = state.next_part;
    state.next_part = (state.next_part + 1) % VRS_PARTS;

    let mut fresh = Vec::new();
    app.registry.for_each(|key, handle| {
        if key % VRS_PARTS == part {
            let aircraft = handle.lock().unwrap();
            if super::include_in_snapshot(&aircraft, now) {
                fresh.push(entry(&aircraft, now));
            }
        }
    });
    state.parts[part as usize] = fresh;

    let ac_list: Vec<&VrsEntry> =
        state.parts.iter().flatten().collect();
    let doc = serde_json::json!({
        "acList": ac_list,
        "totalAc": ac_list.len(),
        "lastDv": now.to_string(),
    });
    let json = serde_json::to_vec(&doc)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    super::write_atomic(&dir.join("vrs.json"), &json)?;
    Ok(part)
}
