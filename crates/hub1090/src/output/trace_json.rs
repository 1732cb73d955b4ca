/**
 * Trace documents: `trace_recent_<hex>.json.gz` (last points, rewritten
 * often) and `trace_full_<hex>.json.gz` (the whole trace, rewritten
 * rarely). Points use the compact array form the map client expects:
 *
 *   [dt_s, lat, lon, alt | "ground" | null, gs | null, track | null,
 *    bitfield, rate | null, state_all | null]
 *
 * with `bitfield = (geom_alt << 3) | (geom_rate << 2) | (leg << 1) | stale`.
 */
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use track1090::trace::{StateAll, Trace, TracePoint};

fn point_array(
    point: &TracePoint,
    base_ms: u64,
    state_all: Option<&StateAll>,
) -> Value {
    let dt = (point.ts.saturating_sub(base_ms)) as f64 / 1000.;
    let altitude: Value = if point.on_ground() {
        json!("ground")
    } else {
        point.altitude().map_or(Value::Null, Value::from)
    };
    json!([
        (dt * 100.).round() / 100.,
        (point.latitude() * 1e6).round() / 1e6,
        (point.longitude() * 1e6).round() / 1e6,
        altitude,
        point.groundspeed().map_or(Value::Null, Value::from),
        point.track().map_or(Value::Null, Value::from),
        point.bitfield(),
        point.rate().map_or(Value::Null, Value::from),
        state_all
            .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
            .unwrap_or(Value::Null),
    ])
}

/// Serialize a span of the trace. `offset` is the index of `points[0]`
/// within the full trace, used to line up the quarter-rate snapshots.
pub fn trace_document(
    hexid: &str,
    trace: &Trace,
    points: &[TracePoint],
    offset: usize,
) -> Value {
    let base_ms = points.first().map_or(0, |p| p.ts);
    let arrays: Vec<Value> = points
        .iter()
        .enumerate()
        .map(|(i, point)| {
            point_array(point, base_ms, trace.state_all(offset + i))
        })
        .collect();
    json!({
        "icao": hexid,
        "timestamp": base_ms as f64 / 1000.,
        "trace": arrays,
    })
}

pub fn gzip(value: &Value) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(value.to_string().as_bytes())?;
    encoder.finish()
}

/// `<dir>/traces/<bb>/trace_<kind>_<hex>.json.gz`, bb from the tail of
/// the hex id, matching the map client's sharded fetches
pub fn trace_path(dir: &Path, hexid: &str, kind: &str) -> PathBuf {
    let bb = &hexid[hexid.len().saturating_sub(2)..];
    dir.join("traces")
        .join(bb)
        .join(format!("trace_{kind}_{hexid}.json.gz"))
}

/// Write one trace document through the usual temp + rename
pub fn write_trace(
    dir: &Path,
    hexid: &str,
    kind: &str,
    doc: &Value,
) -> io::Result<()> {
    let blob = gzip(doc)?;
    super::write_atomic(&trace_path(dir, hexid, kind), &blob)
}

#[allow(dead_code)]
pub fn gunzip(blob: &[u8]) -> io::Result<Value> {
    let mut decoder = flate2::read::GzDecoder::new(blob);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    serde_json::from_slice(&out)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_trace(n: usize) -> Trace {
        let mut trace = Trace::default();
        for i in 0..n {
            let point = TracePoint::new(
                1_000_000 + i as u64 * 5_000,
                48.0 + i as f64 * 0.001,
                7.8,
                Some(10_000 + i as i32 * 100),
                false,
                false,
                false,
                Some(250.),
                Some(90.),
                Some(1_200),
                false,
            );
            trace.push_with(point, StateAll::default);
        }
        trace
    }

    #[test]
    fn test_compact_array_shape() {
        let trace = build_trace(6);
        let doc =
            trace_document("4b1803", &trace, trace.points(), 0);
        assert_eq!(doc["icao"], "4b1803");
        assert_eq!(doc["timestamp"], 1_000.0);
        let arrays = doc["trace"].as_array().unwrap();
        assert_eq!(arrays.len(), 6);
        let first = arrays[0].as_array().unwrap();
        assert_eq!(first.len(), 9);
        assert_eq!(first[0], 0.0);
        assert_eq!(first[3], 10_000);
        assert_eq!(first[6], 0);
        // the quarter-rate snapshot rides along on every fourth point
        assert!(first[8].is_object());
        assert!(arrays[1].as_array().unwrap()[8].is_null());
        assert!(arrays[4].as_array().unwrap()[8].is_object());
    }

    #[test]
    fn test_recent_offset_alignment() {
        let trace = build_trace(10);
        let recent = trace.recent();
        let offset = trace.len() - recent.len();
        let doc = trace_document("4b1803", &trace, recent, offset);
        let arrays = doc["trace"].as_array().unwrap();
        // index 0 of the span is trace index `offset`
        for (i, array) in arrays.iter().enumerate() {
            let has_snapshot = (offset + i) % 4 == 0;
            assert_eq!(array.as_array().unwrap()[8].is_object(), has_snapshot);
        }
    }

    #[test]
    fn test_ground_literal_and_gzip_roundtrip() {
        let mut trace = Trace::default();
        let point = TracePoint::new(
            5_000, 48.0, 7.8, Some(0), false, true, false, Some(8.), None,
            None, false,
        );
        trace.push_with(point, StateAll::default);
        let doc = trace_document("abc123", &trace, trace.points(), 0);
        assert_eq!(doc["trace"][0][3], "ground");
        assert!(doc["trace"][0][5].is_null());

        let blob = gzip(&doc).unwrap();
        let back = gunzip(&blob).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_trace_path_shard() {
        let path = trace_path(Path::new("/run/hub1090"), "4b1803", "recent");
        assert_eq!(
            path,
            PathBuf::from(
                "/run/hub1090/traces/03/trace_recent_4b1803.json.gz"
            )
        );
    }
}
