use crate::aircraft::Aircraft;
use crate::store::Registry;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Schema version of the persisted per-aircraft blobs. A mismatch on load
/// discards the file; there is no migration, the data is only a warm cache.
pub const STATE_VERSION: u32 = 1;

/// Loaded aircraft get a full-trace rewrite within this window, jittered
/// so the writer pool does not stampede after a restart
pub const RESTART_REWRITE_WINDOW_MS: u64 = 120_000;

#[derive(Debug)]
pub enum StateError {
    Io(io::Error),
    /// the file carries a different schema version
    Version(u32),
    Corrupt(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StateError::Io(e) => write!(f, "state file i/o: {e}"),
            StateError::Version(found) => {
                write!(f, "state file version {found}, expected {STATE_VERSION}")
            }
            StateError::Corrupt(msg) => write!(f, "state file corrupt: {msg}"),
        }
    }
}

impl Error for StateError {}

impl From<io::Error> for StateError {
    fn from(e: io::Error) -> Self {
        StateError::Io(e)
    }
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    aircraft: Aircraft,
}

/// `<dir>/<bb>/<hexid>` with bb the low byte of the address
pub fn state_path(dir: &Path, aircraft: &Aircraft) -> PathBuf {
    dir.join(format!("{:02x}", aircraft.addr & 0xff))
        .join(aircraft.hexid())
}

/// Persist one aircraft record including its trace. Writes to a temporary
/// file and renames into place.
pub fn save_aircraft(dir: &Path, aircraft: &Aircraft) -> Result<PathBuf, StateError> {
    let path = state_path(dir, aircraft);
    let parent = path
        .parent()
        .ok_or_else(|| StateError::Corrupt("state path has no parent".into()))?;
    fs::create_dir_all(parent)?;

    let tmp = path.with_extension("tmp");
    let file = fs::File::create(&tmp)?;
    let mut encoder = GzEncoder::new(file, Compression::fast());
    let blob = StateFile {
        version: STATE_VERSION,
        aircraft: aircraft.clone(),
    };
    let json = serde_json::to_vec(&blob)
        .map_err(|e| StateError::Corrupt(e.to_string()))?;
    encoder.write_all(&json)?;
    encoder.finish()?;
    fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Read one persisted record back. Version or schema mismatches are
/// reported; the caller unlinks and continues.
pub fn load_aircraft(path: &Path) -> Result<Aircraft, StateError> {
    let file = fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    let blob: StateFile = serde_json::from_slice(&json)
        .map_err(|e| StateError::Corrupt(e.to_string()))?;
    if blob.version != STATE_VERSION {
        return Err(StateError::Version(blob.version));
    }
    Ok(blob.aircraft)
}

/// Persist every aircraft of the registry. Returns how many were written.
pub fn save_all(dir: &Path, registry: &Registry) -> usize {
    let mut written = 0;
    registry.for_each(|_, handle| {
        let aircraft = handle.lock().unwrap().clone();
        match save_aircraft(dir, &aircraft) {
            Ok(_) => written += 1,
            Err(e) => warn!("failed to persist {}: {e}", aircraft.hexid()),
        }
    });
    info!("persisted {written} aircraft to {}", dir.display());
    written
}

/**
 * Warm restart: read every state blob under `dir` back into the registry.
 *
 * Bad files (wrong version, truncated, unparseable) are unlinked and
 * skipped. Every loaded aircraft is scheduled for a full-trace rewrite
 * within [`RESTART_REWRITE_WINDOW_MS`], jittered to spread the I/O.
 */
pub fn load_all(dir: &Path, registry: &Registry, now: u64) -> io::Result<usize> {
    let mut loaded = 0;
    let mut rng = rand::thread_rng();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    for bucket in entries {
        let bucket = bucket?;
        if !bucket.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(bucket.path())? {
            let path = entry?.path();
            match load_aircraft(&path) {
                Ok(mut aircraft) => {
                    aircraft.trace_write = true;
                    aircraft.trace_full_deadline =
                        now + rng.gen_range(0..RESTART_REWRITE_WINDOW_MS);
                    if registry.insert_loaded(aircraft) {
                        loaded += 1;
                    }
                }
                Err(e) => {
                    debug!("dropping state file {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
    }
    info!("restored {loaded} aircraft from {}", dir.display());
    Ok(loaded)
}
