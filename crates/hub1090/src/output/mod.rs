pub mod bincraft;
pub mod trace_json;
pub mod vrs;

use crate::app::App;
use serde::Serialize;
use std::io;
use std::path::Path;
use std::sync::Arc;
use track1090::aircraft::{AirGround, Aircraft};
use track1090::source::TRACK_EXPIRE_MS;
use track1090::store::Registry;
use track1090::tiles;

/// Stale aircraft are skipped from snapshots once `seen` exceeds this,
/// unless they still hold a recent JAERO position
const SNAPSHOT_SEEN_CUTOFF_MS: u64 = TRACK_EXPIRE_MS / 2;
const JAERO_SNAPSHOT_CUTOFF_MS: u64 = 30 * 60 * 1000;

fn json_err(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Write a file through a temporary path and an atomic rename
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// One aircraft entry of aircraft.json / globe_<tile>.json, keys fixed by
/// the map client
#[derive(Debug, Serialize, Default)]
pub struct JsonEntry {
    pub hex: String,
    #[serde(rename = "type")]
    pub addr_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_baro: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_geom: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ias: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tas: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mach: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mag_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baro_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geom_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_qnh: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_altitude_mcp: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_altitude_fms: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_heading: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nav_modes: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nic: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_pos: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_p: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nac_v: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sil: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gva: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sda: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tat: Option<f64>,
    pub seen: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
}

/// Whether an aircraft belongs in the periodic snapshots at all
pub fn include_in_snapshot(aircraft: &Aircraft, now: u64) -> bool {
    let age = now.saturating_sub(aircraft.seen_any);
    if age < SNAPSHOT_SEEN_CUTOFF_MS {
        return true;
    }
    // JAERO reports arrive minutes apart; keep them visible longer
    aircraft.pos_valid.last_source == track1090::source::DataSource::Jaero
        && now.saturating_sub(aircraft.seen_pos) < JAERO_SNAPSHOT_CUTOFF_MS
}

pub fn json_entry(aircraft: &Aircraft, now: u64) -> JsonEntry {
    let mut entry = JsonEntry {
        hex: aircraft.hexid(),
        addr_type: aircraft.addr_type.tag(),
        flight: aircraft.callsign.clone(),
        r: aircraft.registration.clone(),
        t: aircraft.type_code.clone(),
        seen: now.saturating_sub(aircraft.seen_any) as f64 / 1000.,
        rssi: aircraft.signal.average().map(|v| (v * 10.).round() / 10.),
        ..JsonEntry::default()
    };

    if aircraft.baro_alt_valid.is_valid(now) {
        entry.alt_baro = if aircraft.airground == AirGround::Ground {
            Some(serde_json::Value::from("ground"))
        } else {
            aircraft.baro_alt.map(serde_json::Value::from)
        };
    }
    if aircraft.geom_alt_valid.is_valid(now) {
        entry.alt_geom = aircraft.geom_alt;
    }
    if aircraft.gs_valid.is_valid(now) {
        entry.gs = aircraft.gs.map(|v| (v * 10.).round() / 10.);
    }
    if aircraft.ias_valid.is_valid(now) {
        entry.ias = aircraft.ias;
    }
    if aircraft.tas_valid.is_valid(now) {
        entry.tas = aircraft.tas;
    }
    if aircraft.mach_valid.is_valid(now) {
        entry.mach = aircraft.mach.map(|v| (v * 1000.).round() / 1000.);
    }
    if aircraft.track_valid.is_valid(now) {
        entry.track = aircraft.track.map(|v| (v * 100.).round() / 100.);
    }
    if aircraft.mag_heading_valid.is_valid(now) {
        entry.mag_heading =
            aircraft.mag_heading.map(|v| (v * 100.).round() / 100.);
    }
    if aircraft.true_heading_valid.is_valid(now) {
        entry.true_heading =
            aircraft.true_heading.map(|v| (v * 100.).round() / 100.);
    }
    if aircraft.baro_rate_valid.is_valid(now) {
        entry.baro_rate = aircraft.baro_rate;
    }
    if aircraft.geom_rate_valid.is_valid(now) {
        entry.geom_rate = aircraft.geom_rate;
    }
    if aircraft.squawk_valid.is_valid(now) {
        entry.squawk = aircraft.squawk.map(|squawk| format!("{squawk:04x}"));
    }
    if aircraft.emergency_valid.is_valid(now) {
        entry.emergency = aircraft.emergency;
    }
    entry.category = aircraft.category.map(|c| format!("{c:02X}"));
    if aircraft.nav_qnh_valid.is_valid(now) {
        entry.nav_qnh = aircraft.nav_qnh;
    }
    if aircraft.nav_altitude_valid.is_valid(now) {
        entry.nav_altitude_mcp = aircraft.nav_altitude_mcp;
        entry.nav_altitude_fms = aircraft.nav_altitude_fms;
    }
    if aircraft.nav_heading_valid.is_valid(now) {
        entry.nav_heading = aircraft.nav_heading;
    }
    if aircraft.nav_modes_valid.is_valid(now) {
        let modes = aircraft.nav_modes;
        let mut flags = Vec::new();
        if modes.autopilot {
            flags.push("autopilot");
        }
        if modes.vnav {
            flags.push("vnav");
        }
        if modes.althold {
            flags.push("althold");
        }
        if modes.approach {
            flags.push("approach");
        }
        if modes.lnav {
            flags.push("lnav");
        }
        if modes.tcas {
            flags.push("tcas");
        }
        entry.nav_modes = flags;
    }
    if aircraft.pos_valid.is_valid(now) && aircraft.position_reliable() {
        entry.lat = Some((aircraft.lat * 1e6).round() / 1e6);
        entry.lon = Some((aircraft.lon * 1e6).round() / 1e6);
        entry.nic = Some(aircraft.pos_nic);
        entry.rc = (aircraft.pos_rc != u32::MAX).then_some(aircraft.pos_rc);
        entry.seen_pos =
            Some(now.saturating_sub(aircraft.seen_pos) as f64 / 1000.);
    }
    entry.version = aircraft.adsb_version;
    if aircraft.nac_p_valid.is_valid(now) {
        entry.nac_p = aircraft.nac_p;
    }
    if aircraft.nac_v_valid.is_valid(now) {
        entry.nac_v = aircraft.nac_v;
    }
    if aircraft.sil_valid.is_valid(now) {
        entry.sil = aircraft.sil;
    }
    if aircraft.gva_valid.is_valid(now) {
        entry.gva = aircraft.gva;
    }
    if aircraft.sda_valid.is_valid(now) {
        entry.sda = aircraft.sda;
    }
    if aircraft.derived.wind_updated > 0
        && now.saturating_sub(aircraft.derived.wind_updated) < TRACK_EXPIRE_MS
    {
        entry.ws = aircraft.derived.wind_speed.map(|v| v.round());
        entry.wd = aircraft.derived.wind_direction.map(|v| v.round());
    }
    if aircraft.derived.oat_updated > 0
        && now.saturating_sub(aircraft.derived.oat_updated) < TRACK_EXPIRE_MS
    {
        entry.oat = aircraft.derived.oat.map(|v| v.round());
        entry.tat = aircraft.derived.tat.map(|v| v.round());
    }
    entry
}

#[derive(Serialize)]
struct AircraftDocument {
    now: f64,
    messages: u64,
    aircraft: Vec<JsonEntry>,
}

/// The global aircraft.json snapshot
pub fn write_aircraft_json(app: &Arc<App>, now: u64) -> io::Result<()> {
    let dir = match &app.options.json_dir {
        Some(dir) => dir.clone(),
        None => return Ok(()),
    };
    let mut entries = Vec::new();
    app.registry.for_each(|_, handle| {
        let aircraft = handle.lock().unwrap();
        if include_in_snapshot(&aircraft, now) {
            entries.push(json_entry(&aircraft, now));
        }
    });
    let messages = app.stats.lock().unwrap().alltime().messages;
    let doc = AircraftDocument {
        now: now as f64 / 1000.,
        messages,
        aircraft: entries,
    };
    let json = serde_json::to_vec(&doc).map_err(json_err)?;
    write_atomic(&dir.join("aircraft.json"), &json)
}

#[derive(Serialize)]
struct GlobeDocument {
    now: f64,
    tile: u16,
    south: f64,
    west: f64,
    north: f64,
    east: f64,
    aircraft: Vec<JsonEntry>,
}

/// Per-tile documents: only tiles that currently hold aircraft are
/// written. Returns the number of tiles emitted.
pub fn write_globe_json(app: &Arc<App>, now: u64) -> io::Result<usize> {
    let dir = match &app.options.json_dir {
        Some(dir) => dir.clone(),
        None => return Ok(0),
    };
    let mut by_tile: std::collections::HashMap<u16, Vec<JsonEntry>> =
        std::collections::HashMap::new();
    let mut bin_by_tile: std::collections::HashMap<u16, Vec<Aircraft>> =
        std::collections::HashMap::new();

    app.registry.for_each(|_, handle| {
        let aircraft = handle.lock().unwrap();
        if let Some(tile) = aircraft.tile {
            if include_in_snapshot(&aircraft, now) {
                by_tile
                    .entry(tile)
                    .or_default()
                    .push(json_entry(&aircraft, now));
                if app.options.write_bincraft {
                    bin_by_tile
                        .entry(tile)
                        .or_default()
                        .push(aircraft.clone());
                }
            }
        }
    });

    let mut written = 0;
    for (tile, aircraft) in by_tile {
        let (south, west, north, east) =
            tiles::globe_index_bbox(tile).unwrap_or((0., 0., 0., 0.));
        let doc = GlobeDocument {
            now: now as f64 / 1000.,
            tile,
            south,
            west,
            north,
            east,
            aircraft,
        };
        let json = serde_json::to_vec(&doc).map_err(json_err)?;
        write_atomic(&dir.join(format!("globe_{tile:04}.json")), &json)?;
        written += 1;
    }
    for (tile, aircraft) in bin_by_tile {
        let blob = bincraft::encode_tile(tile, &aircraft, now);
        write_atomic(&dir.join(format!("globe_{tile:04}.binCraft")), &blob)?;
    }
    Ok(written)
}

/// clients.json: the current peer list
pub fn write_clients_json(app: &Arc<App>) -> io::Result<()> {
    let dir = match &app.options.json_dir {
        Some(dir) => dir.clone(),
        None => return Ok(()),
    };
    let clients = app.clients.lock().unwrap().clone();
    let json = serde_json::to_vec(&serde_json::json!({ "clients": clients }))
        .map_err(json_err)?;
    write_atomic(&dir.join("clients.json"), &json)
}

/// receiver.json: static description the map client bootstraps from
pub fn write_receiver_json(app: &Arc<App>) -> io::Result<()> {
    let dir = match &app.options.json_dir {
        Some(dir) => dir.clone(),
        None => return Ok(()),
    };
    let mut doc = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "refresh": app.options.json_interval_ms,
    });
    if let Some(receiver) = app.tracker.config.receiver {
        doc["lat"] = serde_json::json!(receiver.latitude);
        doc["lon"] = serde_json::json!(receiver.longitude);
    }
    let json = serde_json::to_vec(&doc).map_err(json_err)?;
    write_atomic(&dir.join("receiver.json"), &json)
}

/// stats.json and the Prometheus text flavor
pub fn write_stats(app: &Arc<App>, now: u64) -> io::Result<()> {
    let dir = match &app.options.json_dir {
        Some(dir) => dir.clone(),
        None => return Ok(()),
    };
    let aircraft_count = app.registry.len();
    let (summary, prometheus) = {
        let stats = app.stats.lock().unwrap();
        (stats.summary(), stats.to_prometheus(aircraft_count))
    };
    let mut doc = serde_json::to_value(&summary).map_err(json_err)?;
    doc["now"] = serde_json::json!(now as f64 / 1000.);
    doc["aircraft"] = serde_json::json!(aircraft_count);
    let json = serde_json::to_vec(&doc).map_err(json_err)?;
    write_atomic(&dir.join("stats.json"), &json)?;
    write_atomic(&dir.join("stats.prom"), prometheus.as_bytes())
}

/// Count aircraft per registry for the log line
#[allow(dead_code)]
pub fn positional_count(registry: &Registry, now: u64) -> usize {
    let mut count = 0;
    registry.for_each(|_, handle| {
        let aircraft = handle.lock().unwrap();
        if aircraft.pos_valid.is_valid(now) && aircraft.position_reliable() {
            count += 1;
        }
    });
    count
}
