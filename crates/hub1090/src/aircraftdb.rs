use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// One row of the static aircraft metadata
#[derive(Debug, Clone, Default)]
pub struct DbEntry {
    pub registration: Option<String>,
    pub type_code: Option<String>,
    pub flags: u32,
}

/**
 * The aircraft metadata database: a CSV file of
 * `icao24,registration,typecode,flags`, loaded at startup and reloaded
 * by the misc worker whenever the file mtime changes.
 */
#[derive(Debug, Default)]
pub struct AircraftDb {
    path: Option<PathBuf>,
    mtime: Option<SystemTime>,
    entries: HashMap<u32, DbEntry>,
}

impl AircraftDb {
    pub fn open(path: Option<PathBuf>) -> Self {
        let mut db = AircraftDb {
            path,
            mtime: None,
            entries: HashMap::new(),
        };
        db.reload_if_changed();
        db
    }

    pub fn get(&self, addr: u32) -> Option<&DbEntry> {
        self.entries.get(&addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hot reload: re-read the file when its mtime moved. Returns true
    /// when a reload happened.
    pub fn reload_if_changed(&mut self) -> bool {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => return false,
        };
        let mtime = match std::fs::metadata(&path).and_then(|m| m.modified())
        {
            Ok(mtime) => mtime,
            Err(_) => return false,
        };
        if self.mtime == Some(mtime) {
            return false;
        }
        match load_csv(&path) {
            Ok(entries) => {
                info!(
                    "aircraft db {}: {} entries",
                    path.display(),
                    entries.len()
                );
                self.entries = entries;
                self.mtime = Some(mtime);
                true
            }
            Err(e) => {
                warn!("aircraft db {}: {e}", path.display());
                false
            }
        }
    }
}

fn load_csv(path: &Path) -> Result<HashMap<u32, DbEntry>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut entries = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let addr = match record
            .get(0)
            .and_then(|f| u32::from_str_radix(f.trim(), 16).ok())
        {
            Some(addr) if addr > 0 && addr <= 0xFF_FFFF => addr,
            _ => continue,
        };
        let field = |i: usize| {
            record
                .get(i)
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
        };
        entries.insert(
            addr,
            DbEntry {
                registration: field(1),
                type_code: field(2),
                flags: record
                    .get(3)
                    .and_then(|f| f.trim().parse().ok())
                    .unwrap_or(0),
            },
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aircraft.csv");
        {
            let mut f = std::fs::File::create(&path).unwrap();
            writeln!(f, "4b1803,HB-JLT,A320,0").unwrap();
            writeln!(f, "406b90,G-EZFI,A319,1").unwrap();
            writeln!(f, "zzzzzz,BAD,ROW,0").unwrap();
        }
        let mut db = AircraftDb::open(Some(path.clone()));
        assert_eq!(db.len(), 2);
        let entry = db.get(0x4B1803).unwrap();
        assert_eq!(entry.registration.as_deref(), Some("HB-JLT"));
        assert_eq!(entry.type_code.as_deref(), Some("A320"));

        // unchanged mtime: no reload
        assert!(!db.reload_if_changed());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let db = AircraftDb::open(Some(PathBuf::from("/nonexistent/db.csv")));
        assert!(db.is_empty());
        let db = AircraftDb::open(None);
        assert!(db.is_empty());
    }
}
