use crate::app::App;
use crate::output::{self, trace_json, vrs::VrsState};
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use track1090::clock::{now_in_ms, Periodic};
use track1090::state;
use track1090::store::Registry;

/// Cadence of the periodic driver
pub const PERIODIC_UPDATE_MS: u64 = 200;

/// Stale sweep pool
const SWEEP_WORKERS: usize = 4;
const SWEEP_INTERVAL: Duration = Duration::from_millis(2_500);
/// Sweeps slower than this are logged, rate-limited
const SWEEP_SLOW_MS: u128 = 50;
const SWEEP_SLOW_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Trace writer pool: each worker walks 1/64 of its shard per rotor tick
const TRACE_WORKERS: usize = 8;
const TRACE_SLICES: usize = 64;
const TRACE_ROTOR_MS: u64 = 25_000;
/// A full rewrite rides along every this many recent writes
const TRACE_FULL_EVERY: u32 = 122;

/// Lifetimes before the sweep drops an aircraft
const TTL_NO_POS_MS: u64 = 5 * 60 * 1000;
const TTL_WITH_POS_MS: u64 = 60 * 60 * 1000;
const TTL_WITH_POS_HISTORY_MS: u64 = 26 * 60 * 60 * 1000;
const TTL_WITH_POS_STATE_MS: u64 = 14 * 24 * 60 * 60 * 1000;

/// State blobs are persisted one shard of 256 per misc cycle
const STATE_SHARDS: u32 = 256;

/// Spawn every worker group. Returns once they are all running.
pub fn spawn_all(app: &Arc<App>) {
    tokio::spawn(driver(app.clone()));
    for worker in 0..SWEEP_WORKERS {
        tokio::spawn(sweeper(app.clone(), worker));
    }
    let day_dirs = Arc::new(DayDirs::default());
    for worker in 0..TRACE_WORKERS {
        tokio::spawn(trace_writer(app.clone(), worker, day_dirs.clone()));
    }
    tokio::spawn(misc_worker(app.clone()));
}

/**
 * The periodic driver: wakes at most every [`PERIODIC_UPDATE_MS`], rolls
 * the stats buckets, flushes the outbound writers and emits due
 * snapshots.
 */
async fn driver(app: Arc<App>) {
    let mut shutdown = app.shutdown.subscribe();
    let mut aircraft_due = Periodic::every_ms(app.options.json_interval_ms);
    let mut globe_due = Periodic::every_ms(app.options.json_interval_ms);
    let mut vrs_due = Periodic::every_ms(1_000);
    let mut stats_due = Periodic::every_ms(10_000);
    let mut clients_due = Periodic::every_ms(5_000);
    let mut modeac_due = Periodic::every_ms(5_000);
    let mut vrs_state = VrsState::default();

    if let Err(e) = output::write_receiver_json(&app) {
        warn!("receiver.json: {e}");
    }

    loop {
        tokio::select! {
            _ = sleep(Duration::from_millis(PERIODIC_UPDATE_MS)) => {}
            _ = shutdown.changed() => return,
        }
        let now = now_in_ms();
        let tick = Instant::now();

        app.stats.lock().unwrap().maybe_roll(now);

        // pending output that never reached the flush threshold
        app.beast_out.lock().unwrap().flush();
        app.beast_reduce_out.lock().unwrap().flush();
        app.raw_out.lock().unwrap().flush();
        app.sbs_out.lock().unwrap().flush();

        if aircraft_due.due(tick) {
            let app = app.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = output::write_aircraft_json(&app, now) {
                    warn!("aircraft.json: {e}");
                } else {
                    app.stats.lock().unwrap().current().snapshots_written +=
                        1;
                }
            });
        }
        if globe_due.due(tick) {
            let app = app.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = output::write_globe_json(&app, now) {
                    warn!("globe json: {e}");
                }
            });
        }
        if vrs_due.due(tick) {
            if let Err(e) = output::vrs::write_vrs(&app, &mut vrs_state, now)
            {
                warn!("vrs.json: {e}");
            }
        }
        if stats_due.due(tick) {
            let app = app.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = output::write_stats(&app, now) {
                    warn!("stats.json: {e}");
                }
            });
        }
        if clients_due.due(tick) {
            if let Err(e) = output::write_clients_json(&app) {
                warn!("clients.json: {e}");
            }
        }
        if modeac_due.due(tick) {
            match_mode_ac(&app, now);
        }
    }
}

/// Walk the recently heard Mode A/C codes against the Mode S tracks
fn match_mode_ac(app: &Arc<App>, now: u64) {
    let mut squawks = app.mode_ac_squawks.lock().unwrap();
    squawks.retain(|&(_, heard)| now.saturating_sub(heard) < 60_000);
    let codes: Vec<u16> = squawks.iter().map(|&(code, _)| code).collect();
    drop(squawks);
    for code in codes {
        app.tracker.match_mode_ac(code, now);
    }
}

/**
 * One stale-sweep worker: owns the shard `worker` of
 * [`SWEEP_WORKERS`], expires per-field validities and removes aircraft
 * past their lifetime.
 */
async fn sweeper(app: Arc<App>, worker: usize) {
    let mut shutdown = app.shutdown.subscribe();
    let mut last_slow_log: Option<Instant> = None;
    let pos_ttl = if app.state_path().is_some() {
        TTL_WITH_POS_STATE_MS
    } else if app.options.globe_history_dir.is_some() {
        TTL_WITH_POS_HISTORY_MS
    } else {
        TTL_WITH_POS_MS
    };

    loop {
        tokio::select! {
            _ = sleep(SWEEP_INTERVAL) => {}
            _ = shutdown.changed() => return,
        }
        let started = Instant::now();
        let now = now_in_ms();
        let removed = sweep_shard(&app.registry, worker, SWEEP_WORKERS, now, pos_ttl);

        let mut stats = app.stats.lock().unwrap();
        stats.current().sweeps += 1;
        stats.current().tracks_dropped += removed as u64;
        let elapsed = started.elapsed().as_millis();
        if elapsed > SWEEP_SLOW_MS {
            stats.current().slow_sweeps += 1;
            drop(stats);
            let due = last_slow_log
                .map_or(true, |at| at.elapsed() >= SWEEP_SLOW_LOG_INTERVAL);
            if due {
                last_slow_log = Some(Instant::now());
                warn!("sweep worker {worker} took {elapsed} ms");
            }
        }
    }
}

/// Expire fields and collect removals for one shard. Separated out so
/// the lifetime rules are testable without the task machinery.
pub fn sweep_shard(
    registry: &Registry,
    shard: usize,
    num_shards: usize,
    now: u64,
    pos_ttl: u64,
) -> usize {
    let mut remove = Vec::new();
    registry.for_shard(shard, num_shards, |key, handle| {
        let mut aircraft = handle.lock().unwrap();

        aircraft.callsign_valid.sweep(now);
        aircraft.squawk_valid.sweep(now);
        aircraft.emergency_valid.sweep(now);
        aircraft.baro_alt_valid.sweep(now);
        aircraft.geom_alt_valid.sweep(now);
        aircraft.geom_delta_valid.sweep(now);
        aircraft.gs_valid.sweep(now);
        aircraft.ias_valid.sweep(now);
        aircraft.tas_valid.sweep(now);
        aircraft.mach_valid.sweep(now);
        aircraft.track_valid.sweep(now);
        aircraft.mag_heading_valid.sweep(now);
        aircraft.true_heading_valid.sweep(now);
        aircraft.baro_rate_valid.sweep(now);
        aircraft.geom_rate_valid.sweep(now);
        aircraft.nav_altitude_valid.sweep(now);
        aircraft.nav_qnh_valid.sweep(now);
        aircraft.nav_heading_valid.sweep(now);
        aircraft.nav_modes_valid.sweep(now);
        aircraft.nac_p_valid.sweep(now);
        aircraft.nac_v_valid.sweep(now);
        aircraft.sil_valid.sweep(now);
        aircraft.gva_valid.sweep(now);
        aircraft.sda_valid.sweep(now);
        aircraft.nic_baro_valid.sweep(now);
        aircraft.pos_valid.sweep(now);
        aircraft.airground_valid.sweep(now);
        aircraft.signal.no_signal = aircraft.signal.no_signal.saturating_add(1);

        let mut ttl = if aircraft.seen_pos > 0 {
            pos_ttl
        } else {
            TTL_NO_POS_MS
        };
        if aircraft.non_icao {
            ttl /= 2;
        }
        let last = aircraft.seen_any.max(aircraft.seen_pos);
        if now.saturating_sub(last) > ttl {
            remove.push(key);
        }
    });
    let count = remove.len();
    for key in remove {
        registry.remove(key);
    }
    count
}

/// Lazy once-per-day creation of the history directory tree
#[derive(Debug, Default)]
pub struct DayDirs {
    created: Mutex<HashSet<String>>,
}

impl DayDirs {
    /// `<history>/<YYYY-MM-DD>`, creating `traces/` beneath it exactly
    /// once per day across all workers
    pub fn ensure(&self, base: &PathBuf, day: &str) -> std::io::Result<PathBuf> {
        let dir = base.join(day);
        let mut created = self.created.lock().unwrap();
        if !created.contains(day) {
            std::fs::create_dir_all(dir.join("traces"))?;
            created.insert(day.to_string());
        }
        Ok(dir)
    }
}

fn utc_day(now_ms: u64) -> (u32, String) {
    let day_num = (now_ms / 86_400_000) as u32;
    let date = Utc
        .timestamp_millis_opt(now_ms as i64)
        .single()
        .map(|ts| ts.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "1970-01-01".to_string());
    (day_num, date)
}

/**
 * One trace-writer worker: every rotor tick it visits a 1/64 slice of
 * its shard and emits the due documents for aircraft flagged
 * `trace_write`. The per-aircraft lock is held only to snap a copy.
 */
async fn trace_writer(app: Arc<App>, worker: usize, day_dirs: Arc<DayDirs>) {
    let mut shutdown = app.shutdown.subscribe();
    let mut slice = 0usize;
    let tick = Duration::from_millis(TRACE_ROTOR_MS / TRACE_SLICES as u64);

    loop {
        tokio::select! {
            _ = sleep(tick) => {}
            _ = shutdown.changed() => return,
        }
        slice = (slice + 1) % TRACE_SLICES;
        let now = now_in_ms();
        let json_dir = app.options.json_dir.clone();
        let history_dir = app.options.globe_history_dir.clone();
        if json_dir.is_none() && history_dir.is_none() {
            continue;
        }

        let mut jobs = Vec::new();
        for (_, handle) in
            app.registry.shard_slice(worker, TRACE_WORKERS, slice, TRACE_SLICES)
        {
            let mut aircraft = handle.lock().unwrap();
            if !aircraft.trace_write || aircraft.trace.is_empty() {
                continue;
            }
            aircraft.trace_write = false;
            aircraft.trace.mark_legs();

            let full_due = aircraft.trace_writes >= TRACE_FULL_EVERY
                || (aircraft.trace_full_deadline > 0
                    && now >= aircraft.trace_full_deadline);
            if full_due {
                aircraft.trace_writes = 0;
                aircraft.trace_full_deadline = 0;
            } else {
                aircraft.trace_writes += 1;
            }

            let (day_num, day) = utc_day(now);
            let history_due = history_dir.is_some()
                && aircraft.trace_history_day != day_num;
            if history_due {
                aircraft.trace_history_day = day_num;
            }

            // shadow copy; serialization happens with the lock released
            jobs.push(TraceJob {
                hexid: aircraft.hexid(),
                trace: aircraft.trace.clone(),
                full: full_due,
                history: history_due,
                day,
            });
        }

        if jobs.is_empty() {
            continue;
        }
        let written = jobs.len() as u64;
        let app_for_job = app.clone();
        let day_dirs = day_dirs.clone();
        let result = tokio::task::spawn_blocking(move || {
            write_trace_jobs(
                jobs,
                json_dir.as_deref(),
                history_dir.as_ref(),
                &day_dirs,
                now,
            )
        })
        .await;
        match result {
            Ok(Ok(())) => {
                app_for_job
                    .stats
                    .lock()
                    .unwrap()
                    .current()
                    .traces_written += written;
            }
            Ok(Err(e)) => warn!("trace writer {worker}: {e}"),
            Err(e) => warn!("trace writer {worker} panicked: {e}"),
        }
    }
}

struct TraceJob {
    hexid: String,
    trace: track1090::trace::Trace,
    full: bool,
    history: bool,
    day: String,
}

fn write_trace_jobs(
    jobs: Vec<TraceJob>,
    json_dir: Option<&std::path::Path>,
    history_dir: Option<&PathBuf>,
    day_dirs: &DayDirs,
    now: u64,
) -> std::io::Result<()> {
    for job in jobs {
        if let Some(dir) = json_dir {
            let recent = job.trace.recent();
            let offset = job.trace.len() - recent.len();
            let doc = trace_json::trace_document(
                &job.hexid,
                &job.trace,
                recent,
                offset,
            );
            trace_json::write_trace(dir, &job.hexid, "recent", &doc)?;

            if job.full {
                let doc = trace_json::trace_document(
                    &job.hexid,
                    &job.trace,
                    job.trace.points(),
                    0,
                );
                trace_json::write_trace(dir, &job.hexid, "full", &doc)?;
            }
        }
        if job.history {
            if let Some(history) = history_dir {
                let day_dir = day_dirs.ensure(history, &job.day)?;
                let start_of_day = (now / 86_400_000) * 86_400_000;
                let points = job.trace.since(start_of_day);
                if !points.is_empty() {
                    let offset = job.trace.len() - points.len();
                    let doc = trace_json::trace_document(
                        &job.hexid,
                        &job.trace,
                        points,
                        offset,
                    );
                    trace_json::write_trace(
                        &day_dir,
                        &job.hexid,
                        "full",
                        &doc,
                    )?;
                }
            }
        }
    }
    Ok(())
}

/**
 * The misc worker: persists one of 256 state shards per cycle and hot
 * reloads the metadata DB.
 */
async fn misc_worker(app: Arc<App>) {
    let mut shutdown = app.shutdown.subscribe();
    let mut cycle: u32 = 0;
    let mut db_due = Periodic::every_ms(30_000);

    loop {
        tokio::select! {
            _ = sleep(Duration::from_millis(1_000)) => {}
            _ = shutdown.changed() => return,
        }
        let tick = Instant::now();
        cycle = cycle.wrapping_add(1);

        if let Some(state_dir) = app.state_path() {
            let shard = cycle % STATE_SHARDS;
            let app = app.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut written = 0;
                app.registry.for_each(|key, handle| {
                    if key & 0xFF == shard {
                        let aircraft = handle.lock().unwrap().clone();
                        if let Err(e) =
                            state::save_aircraft(&state_dir, &aircraft)
                        {
                            debug!(
                                "state blob {}: {e}",
                                aircraft.hexid()
                            );
                        } else {
                            written += 1;
                        }
                    }
                });
                written
            })
            .await;
            if let Err(e) = result {
                warn!("state shard writer panicked: {e}");
            }
        }

        if db_due.due(tick) && app.db.write().unwrap().reload_if_changed() {
            info!("aircraft metadata reloaded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use track1090::source::DataSource;

    #[test]
    fn test_sweep_lifetimes() {
        let registry = Registry::new();
        let now = 10 * 60 * 60 * 1000;

        // never had a position, last seen 6 minutes ago
        let stale = registry.get_or_create(0x111111, false, 0);
        stale.lock().unwrap().seen_any = now - 6 * 60 * 1000;

        // had a position 50 minutes ago
        let positioned = registry.get_or_create(0x222222, false, 0);
        {
            let mut a = positioned.lock().unwrap();
            a.seen_any = now - 50 * 60 * 1000;
            a.seen_pos = now - 50 * 60 * 1000;
        }

        // fresh
        let fresh = registry.get_or_create(0x333333, false, 0);
        fresh.lock().unwrap().seen_any = now - 1000;

        let mut removed = 0;
        for shard in 0..SWEEP_WORKERS {
            removed +=
                sweep_shard(&registry, shard, SWEEP_WORKERS, now, TTL_WITH_POS_MS);
        }
        assert_eq!(removed, 1);
        assert!(registry.get(0x111111, false).is_none());
        assert!(registry.get(0x222222, false).is_some());
        assert!(registry.get(0x333333, false).is_some());
    }

    #[test]
    fn test_sweep_expires_fields() {
        let registry = Registry::new();
        let handle = registry.get_or_create(0x444444, false, 0);
        {
            let mut a = handle.lock().unwrap();
            a.gs = Some(400.);
            a.gs_valid.accept(DataSource::Adsb, 0, 0);
            a.seen_any = 95_000;
        }
        for shard in 0..SWEEP_WORKERS {
            sweep_shard(&registry, shard, SWEEP_WORKERS, 95_000, TTL_WITH_POS_MS);
        }
        let a = handle.lock().unwrap();
        assert_eq!(a.gs_valid.source, DataSource::Invalid);
        assert!(a.gs_valid.stale);
    }

    #[test]
    fn test_non_icao_shorter_ttl() {
        let registry = Registry::new();
        let now = 10 * 60 * 60 * 1000;
        let handle = registry.get_or_create(0x555555, true, 0);
        handle.lock().unwrap().seen_any = now - 3 * 60 * 1000;
        let mut removed = 0;
        for shard in 0..SWEEP_WORKERS {
            removed +=
                sweep_shard(&registry, shard, SWEEP_WORKERS, now, TTL_WITH_POS_MS);
        }
        // 3 minutes exceeds the halved 5-minute no-position lifetime
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_day_dirs_created_once() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_path_buf();
        let dirs = DayDirs::default();
        let a = dirs.ensure(&base, "2026-08-01").unwrap();
        assert!(a.join("traces").is_dir());
        std::fs::remove_dir_all(a.join("traces")).unwrap();
        // second call is a no-op, it does not recreate the tree
        let b = dirs.ensure(&base, "2026-08-01").unwrap();
        assert_eq!(a, b);
        assert!(!b.join("traces").exists());
    }
}
