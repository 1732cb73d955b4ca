use serde::{Deserialize, Serialize};
use std::fmt;

/// How long a field stays fresh before a lower-priority source may take over
pub const TRACK_STALE_MS: u64 = 60_000;

/// How long before a field is dropped from snapshot outputs entirely
pub const TRACK_EXPIRE_MS: u64 = 90_000;

/// Long expiry used by the air/ground state machine
pub const TRACK_EXPIRE_LONG_MS: u64 = 300_000;

/**
 * Where a piece of data about an aircraft came from.
 *
 * The declaration order IS the arbitration order: a report from a source
 * that compares higher always overwrites one that compares lower, and a
 * lower source may only take over once the higher value has gone stale
 * ([`TRACK_STALE_MS`]).
 */
#[derive(
    Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Copy, Clone, Default, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    #[default]
    Invalid,
    /// Derived from other fields rather than received
    Indirect,
    ModeAc,
    Sbs,
    Mlat,
    ModeS,
    Jaero,
    /// Mode S with a verified CRC (local demodulator or checked Beast input)
    ModeSChecked,
    Tisb,
    Adsr,
    Adsb,
    /// Priority input, recorded as ADS-B after acceptance
    Prio,
}

impl DataSource {
    /// The source recorded into the validity on acceptance. `Prio` wins
    /// arbitration but must not be re-beaten by plain ADS-B later, so it
    /// records itself as `Adsb`.
    pub fn recorded(self) -> DataSource {
        match self {
            DataSource::Prio => DataSource::Adsb,
            other => other,
        }
    }

    /// Short tag used in JSON snapshots
    pub fn tag(self) -> &'static str {
        match self {
            DataSource::Invalid => "invalid",
            DataSource::Indirect => "indirect",
            DataSource::ModeAc => "mode_ac",
            DataSource::Sbs => "sbs",
            DataSource::Mlat => "mlat",
            DataSource::ModeS => "mode_s",
            DataSource::Jaero => "jaero",
            DataSource::ModeSChecked => "mode_s",
            DataSource::Tisb => "tisb",
            DataSource::Adsr => "adsr",
            DataSource::Adsb => "adsb",
            DataSource::Prio => "adsb",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/**
 * Book-keeping attached to every tracked scalar of an [`crate::aircraft::Aircraft`].
 *
 * `last_source` is monotone non-decreasing; `updated == 0` means the field
 * was never set, and the invariant `source > Invalid => updated > 0` holds
 * everywhere.
 */
#[derive(Debug, Default, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct Validity {
    pub source: DataSource,
    pub last_source: DataSource,
    /// ms since epoch of the last accepted update, 0 if never
    pub updated: u64,
    pub stale: bool,
    /// earliest time this field is eligible for reduced-rate forwarding
    pub next_reduce: u64,
}

impl Validity {
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.updated)
    }

    pub fn is_valid(&self, now: u64) -> bool {
        self.source > DataSource::Invalid && self.age_ms(now) < TRACK_EXPIRE_MS
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        self.source > DataSource::Invalid && self.age_ms(now) < TRACK_STALE_MS
    }

    /// Called by the stale sweep: marks the record stale past
    /// [`TRACK_STALE_MS`] and invalidates it past [`TRACK_EXPIRE_MS`].
    pub fn sweep(&mut self, now: u64) {
        if self.source == DataSource::Invalid {
            return;
        }
        let age = self.age_ms(now);
        if age > TRACK_EXPIRE_MS {
            self.source = DataSource::Invalid;
            self.stale = true;
        } else if age > TRACK_STALE_MS {
            self.stale = true;
        }
    }

    /// Record an accepted update. Keeps `last_source` monotone.
    pub fn accept(&mut self, source: DataSource, now: u64, reduce_interval: u64) -> bool {
        let recorded = source.recorded();
        self.source = recorded;
        if recorded > self.last_source {
            self.last_source = recorded;
        }
        self.updated = now;
        self.stale = false;
        if now >= self.next_reduce {
            self.next_reduce = now + reduce_interval;
            return true;
        }
        false
    }

    pub fn invalidate(&mut self) {
        self.source = DataSource::Invalid;
        self.stale = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        use DataSource::*;
        let order = [
            Invalid,
            Indirect,
            ModeAc,
            Sbs,
            Mlat,
            ModeS,
            Jaero,
            ModeSChecked,
            Tisb,
            Adsr,
            Adsb,
            Prio,
        ];
        for pair in order.windows(2) {
            assert!(pair[0] < pair[1], "{:?} < {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_last_source_monotone() {
        let mut v = Validity::default();
        v.accept(DataSource::Adsb, 1_000, 500);
        assert_eq!(v.last_source, DataSource::Adsb);
        // a stale takeover by MLAT must not downgrade last_source
        v.accept(DataSource::Mlat, 100_000, 500);
        assert_eq!(v.source, DataSource::Mlat);
        assert_eq!(v.last_source, DataSource::Adsb);
    }

    #[test]
    fn test_prio_recorded_as_adsb() {
        let mut v = Validity::default();
        v.accept(DataSource::Prio, 1_000, 500);
        assert_eq!(v.source, DataSource::Adsb);
        assert_eq!(v.last_source, DataSource::Adsb);
    }

    #[test]
    fn test_sweep() {
        let mut v = Validity::default();
        v.accept(DataSource::Adsb, 0, 500);
        v.sweep(TRACK_STALE_MS + 1);
        assert!(v.stale);
        assert_eq!(v.source, DataSource::Adsb);
        v.sweep(TRACK_EXPIRE_MS + 1);
        assert_eq!(v.source, DataSource::Invalid);
    }

    #[test]
    fn test_reduce_forward_gate() {
        let mut v = Validity::default();
        assert!(v.accept(DataSource::Adsb, 1_000, 500));
        assert!(!v.accept(DataSource::Adsb, 1_200, 500));
        assert!(v.accept(DataSource::Adsb, 1_600, 500));
    }
}
