use serde::Serialize;

/// Width of one accumulation bucket
pub const BUCKET_MS: u64 = 10_000;

/// 15 minutes of ten-second buckets
pub const NUM_BUCKETS: usize = 90;

/// Distance histogram: 20 bins of 25 km of receiver range
pub const RANGE_BINS: usize = 20;
pub const RANGE_BIN_KM: f64 = 25.0;

/// Number of [`crate::source::DataSource`] variants, for per-source counters
pub const NUM_SOURCES: usize = 12;

/**
 * One accumulation window of counters and gauges. Counters are pure
 * increments and merge by addition; gauges reduce by max/min.
 */
#[derive(Debug, Clone, Serialize)]
pub struct Counters {
    // ingestion
    pub messages: u64,
    pub mode_ac: u64,
    pub crc_ok: u64,
    pub crc_bad: u64,
    pub frames_bad: u64,
    pub garbage_bytes: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub clients_accepted: u64,
    pub clients_dropped: u64,
    pub connector_failures: u64,

    // tracker
    pub tracks_new: u64,
    pub tracks_dropped: u64,
    pub cpr_global_ok: u64,
    pub cpr_global_bad: u64,
    pub cpr_global_skipped: u64,
    pub cpr_local_ok: u64,
    pub cpr_local_skipped: u64,
    pub pos_duplicate: u64,
    pub pos_bad: u64,
    pub alt_reject: u64,
    /// accepted positions indexed by DataSource discriminant
    pub pos_by_source: [u64; NUM_SOURCES],

    // maintenance
    pub sweeps: u64,
    pub slow_sweeps: u64,
    pub traces_written: u64,
    pub snapshots_written: u64,

    // gauges
    pub signal_peak: f64,
    pub distance_max_km: f64,
    pub distance_min_km: f64,
    pub range_histogram: [u64; RANGE_BINS],
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            messages: 0,
            mode_ac: 0,
            crc_ok: 0,
            crc_bad: 0,
            frames_bad: 0,
            garbage_bytes: 0,
            bytes_in: 0,
            bytes_out: 0,
            clients_accepted: 0,
            clients_dropped: 0,
            connector_failures: 0,
            tracks_new: 0,
            tracks_dropped: 0,
            cpr_global_ok: 0,
            cpr_global_bad: 0,
            cpr_global_skipped: 0,
            cpr_local_ok: 0,
            cpr_local_skipped: 0,
            pos_duplicate: 0,
            pos_bad: 0,
            alt_reject: 0,
            pos_by_source: [0; NUM_SOURCES],
            sweeps: 0,
            slow_sweeps: 0,
            traces_written: 0,
            snapshots_written: 0,
            signal_peak: f64::NEG_INFINITY,
            distance_max_km: 0.,
            distance_min_km: f64::INFINITY,
            range_histogram: [0; RANGE_BINS],
        }
    }
}

impl Counters {
    pub fn merge(&mut self, other: &Counters) {
        self.messages += other.messages;
        self.mode_ac += other.mode_ac;
        self.crc_ok += other.crc_ok;
        self.crc_bad += other.crc_bad;
        self.frames_bad += other.frames_bad;
        self.garbage_bytes += other.garbage_bytes;
        self.bytes_in += other.bytes_in;
        self.bytes_out += other.bytes_out;
        self.clients_accepted += other.clients_accepted;
        self.clients_dropped += other.clients_dropped;
        self.connector_failures += other.connector_failures;
        self.tracks_new += other.tracks_new;
        self.tracks_dropped += other.tracks_dropped;
        self.cpr_global_ok += other.cpr_global_ok;
        self.cpr_global_bad += other.cpr_global_bad;
        self.cpr_global_skipped += other.cpr_global_skipped;
        self.cpr_local_ok += other.cpr_local_ok;
        self.cpr_local_skipped += other.cpr_local_skipped;
        self.pos_duplicate += other.pos_duplicate;
        self.pos_bad += other.pos_bad;
        self.alt_reject += other.alt_reject;
        for (a, b) in self
            .pos_by_source
            .iter_mut()
            .zip(other.pos_by_source.iter())
        {
            *a += b;
        }
        self.sweeps += other.sweeps;
        self.slow_sweeps += other.slow_sweeps;
        self.traces_written += other.traces_written;
        self.snapshots_written += other.snapshots_written;
        self.signal_peak = self.signal_peak.max(other.signal_peak);
        self.distance_max_km = self.distance_max_km.max(other.distance_max_km);
        self.distance_min_km = self.distance_min_km.min(other.distance_min_km);
        for (a, b) in self
            .range_histogram
            .iter_mut()
            .zip(other.range_histogram.iter())
        {
            *a += b;
        }
    }

    pub fn record_range_km(&mut self, km: f64) {
        self.distance_max_km = self.distance_max_km.max(km);
        self.distance_min_km = self.distance_min_km.min(km);
        let bin = ((km / RANGE_BIN_KM) as usize).min(RANGE_BINS - 1);
        self.range_histogram[bin] += 1;
    }

    pub fn record_signal(&mut self, dbfs: f64) {
        self.signal_peak = self.signal_peak.max(dbfs);
    }
}

/// The rollups exported to stats.json
#[derive(Debug, Clone, Serialize, Default)]
pub struct StatsSummary {
    pub last_1min: Option<Counters>,
    pub last_5min: Option<Counters>,
    pub last_15min: Option<Counters>,
    pub total: Option<Counters>,
}

/**
 * Rolling statistics: a ring of 90 ten-second buckets. The live bucket
 * takes all increments; completed buckets are folded into the all-time
 * aggregate on roll-over and summed on demand for the minute windows.
 */
#[derive(Debug)]
pub struct Stats {
    ring: Vec<Counters>,
    head: usize,
    /// number of completed buckets available, up to NUM_BUCKETS
    filled: usize,
    bucket_started: u64,
    alltime: Counters,
}

impl Stats {
    pub fn new(now: u64) -> Self {
        Stats {
            ring: vec![Counters::default(); NUM_BUCKETS],
            head: 0,
            filled: 0,
            bucket_started: now,
            alltime: Counters::default(),
        }
    }

    /// The live bucket, for increments
    pub fn current(&mut self) -> &mut Counters {
        &mut self.ring[self.head]
    }

    /// Close out buckets whose window has passed. Returns how many rolled.
    pub fn maybe_roll(&mut self, now: u64) -> usize {
        let mut rolled = 0;
        while now.saturating_sub(self.bucket_started) >= BUCKET_MS {
            let finished = self.ring[self.head].clone();
            self.alltime.merge(&finished);
            self.head = (self.head + 1) % NUM_BUCKETS;
            self.ring[self.head] = Counters::default();
            self.filled = (self.filled + 1).min(NUM_BUCKETS);
            self.bucket_started += BUCKET_MS;
            rolled += 1;
            // bound the catch-up after a long stall
            if rolled >= NUM_BUCKETS {
                self.bucket_started = now;
                break;
            }
        }
        rolled
    }

    /// Sum of the most recent `n` completed buckets
    fn window(&self, n: usize) -> Counters {
        let n = n.min(self.filled);
        let mut sum = Counters::default();
        for k in 1..=n {
            let idx = (self.head + NUM_BUCKETS - k) % NUM_BUCKETS;
            sum.merge(&self.ring[idx]);
        }
        sum
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            last_1min: Some(self.window(6)),
            last_5min: Some(self.window(30)),
            last_15min: Some(self.window(90)),
            total: Some(self.alltime.clone()),
        }
    }

    pub fn alltime(&self) -> &Counters {
        &self.alltime
    }

    /// Render the all-time counters in the Prometheus text format
    pub fn to_prometheus(&self, aircraft_count: usize) -> String {
        let t = &self.alltime;
        let mut out = String::with_capacity(2048);
        let mut counter = |name: &str, value: u64| {
            out.push_str(&format!(
                "# TYPE hub1090_{name} counter\nhub1090_{name} {value}\n"
            ));
        };
        counter("messages_total", t.messages);
        counter("mode_ac_total", t.mode_ac);
        counter("crc_ok_total", t.crc_ok);
        counter("crc_bad_total", t.crc_bad);
        counter("frames_bad_total", t.frames_bad);
        counter("garbage_bytes_total", t.garbage_bytes);
        counter("bytes_in_total", t.bytes_in);
        counter("bytes_out_total", t.bytes_out);
        counter("clients_accepted_total", t.clients_accepted);
        counter("clients_dropped_total", t.clients_dropped);
        counter("tracks_new_total", t.tracks_new);
        counter("tracks_dropped_total", t.tracks_dropped);
        counter("cpr_global_ok_total", t.cpr_global_ok);
        counter("cpr_global_bad_total", t.cpr_global_bad);
        counter("cpr_local_ok_total", t.cpr_local_ok);
        counter("position_duplicate_total", t.pos_duplicate);
        counter("position_bad_total", t.pos_bad);
        counter("altitude_reject_total", t.alt_reject);
        counter("traces_written_total", t.traces_written);
        counter("snapshots_written_total", t.snapshots_written);
        out.push_str(&format!(
            "# TYPE hub1090_aircraft_tracked gauge\nhub1090_aircraft_tracked {aircraft_count}\n"
        ));
        if t.distance_max_km > 0. {
            out.push_str(&format!(
                "# TYPE hub1090_distance_max_km gauge\nhub1090_distance_max_km {:.1}\n",
                t.distance_max_km
            ));
        }
        if t.signal_peak.is_finite() {
            out.push_str(&format!(
                "# TYPE hub1090_signal_peak_dbfs gauge\nhub1090_signal_peak_dbfs {:.1}\n",
                t.signal_peak
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollover_fills_windows() {
        let mut stats = Stats::new(0);
        // 12 buckets of one message each
        for i in 0..12u64 {
            stats.current().messages += 1;
            stats.maybe_roll((i + 1) * BUCKET_MS);
        }
        let summary = stats.summary();
        assert_eq!(summary.last_1min.unwrap().messages, 6);
        assert_eq!(summary.last_5min.unwrap().messages, 12);
        assert_eq!(stats.alltime().messages, 12);
    }

    #[test]
    fn test_gauges_reduce() {
        let mut a = Counters::default();
        a.record_range_km(10.);
        a.record_range_km(480.);
        let mut b = Counters::default();
        b.record_range_km(200.);
        a.merge(&b);
        assert_eq!(a.distance_max_km, 480.);
        assert_eq!(a.distance_min_km, 10.);
        assert_eq!(a.range_histogram[0], 1);
        assert_eq!(a.range_histogram[8], 1);
        assert_eq!(a.range_histogram[RANGE_BINS - 1], 1);
    }

    #[test]
    fn test_stall_catchup_bounded() {
        let mut stats = Stats::new(0);
        stats.current().messages += 1;
        let rolled = stats.maybe_roll(3_600_000);
        assert!(rolled <= NUM_BUCKETS);
        // the live bucket is usable again afterwards
        stats.current().messages += 1;
        assert_eq!(stats.maybe_roll(3_600_000 + BUCKET_MS), 1);
    }

    #[test]
    fn test_prometheus_render() {
        let mut stats = Stats::new(0);
        stats.current().messages += 5;
        stats.maybe_roll(BUCKET_MS);
        let text = stats.to_prometheus(3);
        assert!(text.contains("hub1090_messages_total 5"));
        assert!(text.contains("hub1090_aircraft_tracked 3"));
    }
}
