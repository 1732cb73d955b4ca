use crate::aircraft::{
    AddressType, AirGround, Aircraft, CprScratch, ALT_RELIABLE_INIT,
};
use crate::decode::adsb::{
    AirspeedType, CprFormat, Me, OperationStatus,
};
use crate::decode::cpr::{self, CprCell, Position};
use crate::decode::{Capability, Df, Frame};
use crate::geomag;
use crate::source::{DataSource, Validity};
use crate::stats::Counters;
use crate::store::{Handle, Registry};
use crate::tiles;
use crate::trace::{StateAll, TracePoint};
use std::sync::Arc;
use tracing::trace;

/// Maximum age gap between the odd and even frame of a global decode
const CPR_MAX_GAP_AIRBORNE_MS: u64 = 10_000;
const CPR_MAX_GAP_SURFACE_MS: u64 = 25_000;
const CPR_MAX_GAP_SURFACE_SLOW_MS: u64 = 50_000;
/// Below this groundspeed a surface pair may age twice as much
const CPR_SLOW_SURFACE_KT: f64 = 25.0;

/// A local decode may use the aircraft's own position this long
const LOCAL_REF_MAX_AGE_MS: u64 = 600_000;

/// Sources at or below MLAT skip the speed gate for this long after the
/// last accepted position
const MLAT_SPEED_SKIP_MS: u64 = 25_000;

/// Lower-priority guard windows of the acceptance rule
const MLAT_GUARD_MS: u64 = 30_000;
const JAERO_GUARD_MS: u64 = 600_000;

/// Identical position within this window counts as a duplicate
const POS_DUPLICATE_MS: u64 = 3_000;

/// A decode this close to the last reliable position after a dry spell
/// fast-tracks the reliability counters
const FAST_TRACK_KM: f64 = 12.0;
const FAST_TRACK_DRY_MS: u64 = 120_000;

const KNOTS_TO_KM_PER_S: f64 = 1.852 / 3600.0;

/// Cap on the altitude-change allowance, ft/min
const ALT_RATE_CAP_FPM: f64 = 11_000.0;
/// Slack added to the known vertical rate, ft/min
const ALT_RATE_SLACK_FPM: f64 = 1_500.0;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// configured receiver location
    pub receiver: Option<Position>,
    /// accept no position farther than this from the receiver, km
    pub max_range_km: Option<f64>,
    /// cap of the position reliability counters
    pub filter_persistence: f64,
    /// counter level required for reliable-position output
    pub json_reliable: f64,
    /// minimum spacing of trace points
    pub json_trace_interval_ms: u64,
    /// spacing of reduced-rate forwarding per field
    pub reduce_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            receiver: None,
            max_range_km: None,
            filter_persistence: 4.0,
            json_reliable: 1.0,
            json_trace_interval_ms: 15_000,
            reduce_interval_ms: 1_250,
        }
    }
}

/// Fields parsed out of one SBS "BaseStation" line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SbsUpdate {
    pub addr: u32,
    pub callsign: Option<String>,
    pub altitude: Option<i32>,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub squawk: Option<u16>,
    pub on_ground: Option<bool>,
}

/// What a message carries into the tracker
#[derive(Debug, Clone)]
pub enum Payload {
    ModeS(Frame),
    Sbs(SbsUpdate),
    ModeAc { squawk: u16, altitude: Option<i32> },
}

/**
 * The transient per-message record: the decoded payload plus reception
 * metadata, consumed by [`Tracker::update_from_message`] and discarded.
 * The outcome flags are filled in by the tracker for the caller
 * (forwarding and accounting).
 */
#[derive(Debug, Clone)]
pub struct Message {
    pub payload: Payload,
    /// system time of reception, ms
    pub now: u64,
    /// 12 MHz hardware stamp as carried by Beast framing
    pub stamp_12mhz: u64,
    pub source: DataSource,
    pub remote: bool,
    pub rssi: Option<f64>,
    /// accounting back-pointer to the ingesting client
    pub client_id: u64,

    // outcome flags
    pub pos_bad: bool,
    pub duplicate: bool,
    pub garbage: bool,
    pub reduce_forward: bool,
    pub track_created: bool,
}

impl Message {
    pub fn new(payload: Payload, source: DataSource, now: u64) -> Self {
        Message {
            payload,
            now,
            stamp_12mhz: 0,
            source,
            remote: false,
            rssi: None,
            client_id: 0,
            pos_bad: false,
            duplicate: false,
            garbage: false,
            reduce_forward: false,
            track_created: false,
        }
    }
}

enum SpeedCheck {
    Ok,
    /// implausible motion: punish the reliability counters
    Reject,
}

/**
 * The per-aircraft state-update engine. One instance per application
 * context; all methods run on the caller thread.
 */
pub struct Tracker {
    pub config: TrackerConfig,
    pub registry: Arc<Registry>,
}

impl Tracker {
    pub fn new(config: TrackerConfig, registry: Arc<Registry>) -> Self {
        Tracker { config, registry }
    }

    /**
     * Entry point: fold one message into the registry.
     *
     * Only address-reliable messages (CRC-checked extended squitters,
     * verified all-calls, ground-station SBS input) may create a record;
     * any message may update an existing record as long as a trusted one
     * refreshed it within the last 45 seconds.
     */
    pub fn update_from_message(
        &self,
        msg: &mut Message,
        counters: &mut Counters,
    ) -> Option<Handle> {
        counters.messages += 1;

        let (addr, reliable_addr) = match &msg.payload {
            Payload::ModeS(frame) => {
                let addr = frame.icao24()?.0;
                let reliable = matches!(
                    &frame.df,
                    Df::ExtendedSquitter(_) | Df::ExtendedSquitterTisB { .. }
                ) || matches!(&frame.df, Df::AllCall { .. } if frame.crc == 0);
                (addr, reliable)
            }
            Payload::Sbs(update) => (update.addr, true),
            Payload::ModeAc { .. } => {
                counters.mode_ac += 1;
                return None;
            }
        };

        let non_icao = matches!(&msg.payload, Payload::ModeS(Frame {
            df: Df::ExtendedSquitterTisB { cf, .. }, ..
        }) if tisb_non_icao(cf.ct as u8));

        let handle = match self.registry.get(addr, non_icao) {
            Some(handle) => handle,
            None if reliable_addr => {
                counters.tracks_new += 1;
                msg.track_created = true;
                self.registry.get_or_create(addr, non_icao, msg.now)
            }
            None => return None,
        };

        {
            let mut aircraft = handle.lock().unwrap();
            if !reliable_addr && !aircraft.trusted_recently(msg.now) {
                // record exists but went untrusted: ignore until a trusted
                // message shows up again
                return None;
            }
            if reliable_addr {
                aircraft.seen = msg.now;
            }
            aircraft.seen_any = msg.now;
            if let Some(rssi) = msg.rssi {
                aircraft.signal.push(rssi);
                counters.record_signal(rssi);
            }

            match msg.payload.clone() {
                Payload::ModeS(frame) => {
                    self.apply_frame(&mut aircraft, &frame, msg, counters)
                }
                Payload::Sbs(update) => {
                    self.apply_sbs(&mut aircraft, &update, msg, counters)
                }
                Payload::ModeAc { .. } => unreachable!(),
            }
        }
        Some(handle)
    }

    /**
     * Field acceptance: source priority, freshness, and the guard windows
     * for the low-priority sources.
     */
    fn accept_data(&self, valid: &mut Validity, msg: &mut Message) -> bool {
        let source = msg.source;
        if source == DataSource::Invalid {
            return false;
        }
        if msg.now < valid.updated {
            return false;
        }
        if source.recorded() < valid.source && valid.is_fresh(msg.now) {
            return false;
        }
        if source.recorded() < valid.last_source {
            let guard = if source == DataSource::Jaero {
                JAERO_GUARD_MS
            } else if source <= DataSource::Mlat {
                MLAT_GUARD_MS
            } else {
                0
            };
            if msg.now.saturating_sub(valid.updated) < guard {
                return false;
            }
        }
        if valid.accept(source, msg.now, self.config.reduce_interval_ms) {
            msg.reduce_forward = true;
        }
        true
    }

    fn apply_frame(
        &self,
        aircraft: &mut Aircraft,
        frame: &Frame,
        msg: &mut Message,
        counters: &mut Counters,
    ) {
        match &frame.df {
            Df::ShortAirAir { vs, ac, .. } | Df::LongAirAir { vs, ac, .. } => {
                self.set_addr_type(aircraft, AddressType::ModeS, msg.now);
                let next = if *vs == 1 {
                    AirGround::Ground
                } else {
                    AirGround::Airborne
                };
                aircraft.set_airground(next, msg.source, msg.now);
                if let Some(alt) = ac.0 {
                    self.apply_baro_altitude(aircraft, alt, msg, counters);
                }
            }
            Df::AltitudeReply { fs, ac, .. } => {
                self.set_addr_type(aircraft, AddressType::ModeS, msg.now);
                self.apply_flight_status(aircraft, fs.on_ground(), msg);
                if let Some(alt) = ac.0 {
                    self.apply_baro_altitude(aircraft, alt, msg, counters);
                }
            }
            Df::IdentityReply { fs, id, .. } => {
                self.set_addr_type(aircraft, AddressType::ModeS, msg.now);
                self.apply_flight_status(aircraft, fs.on_ground(), msg);
                if self.accept_data(&mut aircraft.squawk_valid, msg) {
                    aircraft.squawk = Some(id.0);
                }
            }
            Df::AllCall { capability, .. } => {
                self.set_addr_type(aircraft, AddressType::ModeS, msg.now);
                self.apply_capability(aircraft, *capability, msg);
            }
            Df::CommBAltitude { fs, ac, .. } => {
                self.set_addr_type(aircraft, AddressType::ModeS, msg.now);
                self.apply_flight_status(aircraft, fs.on_ground(), msg);
                if let Some(alt) = ac.0 {
                    self.apply_baro_altitude(aircraft, alt, msg, counters);
                }
            }
            Df::CommBIdentity { fs, id, .. } => {
                self.set_addr_type(aircraft, AddressType::ModeS, msg.now);
                self.apply_flight_status(aircraft, fs.on_ground(), msg);
                if self.accept_data(&mut aircraft.squawk_valid, msg) {
                    aircraft.squawk = Some(id.0);
                }
            }
            Df::ExtendedSquitter(adsb) => {
                self.set_addr_type(aircraft, AddressType::Adsb, msg.now);
                self.apply_capability(aircraft, adsb.capability, msg);
                let me = adsb.message.clone();
                self.apply_me(aircraft, &me, msg, counters);
            }
            Df::ExtendedSquitterTisB { cf, .. } => {
                let addr_type = tisb_addr_type(cf.ct as u8);
                self.set_addr_type(aircraft, addr_type, msg.now);
                let me = cf.me.clone();
                // relayed traffic is never better than TIS-B/ADS-R
                let saved = msg.source;
                if msg.source > DataSource::Mlat {
                    msg.source = match addr_type {
                        AddressType::Adsr | AddressType::AdsrNonIcao => {
                            DataSource::Adsr
                        }
                        _ => DataSource::Tisb,
                    };
                }
                self.apply_me(aircraft, &me, msg, counters);
                msg.source = saved;
            }
            _ => {}
        }
    }

    fn apply_me(
        &self,
        aircraft: &mut Aircraft,
        me: &Me,
        msg: &mut Message,
        counters: &mut Counters,
    ) {
        match me {
            Me::Identification(id) => {
                if valid_callsign(&id.callsign)
                    && self.accept_data(&mut aircraft.callsign_valid, msg)
                {
                    aircraft.callsign = Some(id.callsign.clone());
                }
                aircraft.category = Some(id.category());
                aircraft.category_updated = msg.now;
            }
            Me::SurfacePosition(surface) => {
                aircraft.set_airground(AirGround::Ground, msg.source, msg.now);
                if let Some(gs) = surface.groundspeed() {
                    if self.accept_data(&mut aircraft.gs_valid, msg) {
                        aircraft.gs = Some(gs);
                    }
                }
                if let Some(angle) = surface.track() {
                    // the TAH bit decides what the surface field means
                    if aircraft.tah_heading {
                        self.apply_heading(aircraft, angle, msg);
                    } else if self.accept_data(&mut aircraft.track_valid, msg)
                    {
                        aircraft.track = Some(angle);
                    }
                }
                let (nic, rc) = surface.nic_rc();
                let cell = CprCell {
                    parity: surface.parity,
                    lat_cpr: surface.lat_cpr,
                    lon_cpr: surface.lon_cpr,
                };
                self.update_position(
                    aircraft, cell, true, nic, rc, msg, counters,
                );
            }
            Me::AirbornePosition(airborne) => {
                aircraft.set_airground(
                    AirGround::Airborne,
                    msg.source,
                    msg.now,
                );
                if let Some(alt) = airborne.alt {
                    if airborne.is_gnss_alt() {
                        self.apply_geom_altitude(aircraft, alt, msg);
                    } else {
                        self.apply_baro_altitude(aircraft, alt, msg, counters);
                    }
                }
                let (nic, rc) = airborne.nic_rc();
                let cell = CprCell {
                    parity: airborne.parity,
                    lat_cpr: airborne.lat_cpr,
                    lon_cpr: airborne.lon_cpr,
                };
                self.update_position(
                    aircraft, cell, false, nic, rc, msg, counters,
                );
            }
            Me::AirborneVelocity(velocity) => {
                if let Some((gs, track)) = velocity.groundspeed_track() {
                    if self.accept_data(&mut aircraft.gs_valid, msg) {
                        aircraft.gs = Some(gs);
                    }
                    if self.accept_data(&mut aircraft.track_valid, msg) {
                        aircraft.track = Some(track);
                    }
                }
                if let Some((speed, kind)) = velocity.airspeed() {
                    match kind {
                        AirspeedType::Ias => {
                            if self.accept_data(&mut aircraft.ias_valid, msg) {
                                aircraft.ias = Some(speed as u32);
                            }
                        }
                        AirspeedType::Tas => {
                            if self.accept_data(&mut aircraft.tas_valid, msg) {
                                aircraft.tas = Some(speed as u32);
                            }
                        }
                    }
                }
                if let Some(heading) = velocity.heading() {
                    self.apply_heading(aircraft, heading, msg);
                }
                if let Some(rate) = velocity.vertical_rate {
                    if velocity.vrate_src_baro {
                        if self.accept_data(&mut aircraft.baro_rate_valid, msg)
                        {
                            aircraft.baro_rate = Some(rate);
                        }
                    } else if self
                        .accept_data(&mut aircraft.geom_rate_valid, msg)
                    {
                        aircraft.geom_rate = Some(rate);
                    }
                }
                if let Some(delta) = velocity.geo_minus_baro {
                    if self.accept_data(&mut aircraft.geom_delta_valid, msg) {
                        aircraft.geom_delta = Some(delta);
                        self.derive_geom_alt(aircraft, msg.now);
                    }
                }
                if self.accept_data(&mut aircraft.nac_v_valid, msg) {
                    aircraft.nac_v = Some(velocity.nac_v);
                }
                self.derive_wind_oat(aircraft, msg.now);
            }
            Me::AircraftStatus(status) => {
                if status.subtype == 1 {
                    if self.accept_data(&mut aircraft.emergency_valid, msg) {
                        aircraft.emergency = Some(status.emergency);
                    }
                    if status.squawk.0 != 0
                        && self.accept_data(&mut aircraft.squawk_valid, msg)
                    {
                        aircraft.squawk = Some(status.squawk.0);
                    }
                }
            }
            Me::TargetState(target) => {
                if self.accept_data(&mut aircraft.nav_altitude_valid, msg) {
                    if target.alt_fms {
                        aircraft.nav_altitude_fms = target.selected_altitude;
                    } else {
                        aircraft.nav_altitude_mcp = target.selected_altitude;
                    }
                }
                if target.qnh.is_some()
                    && self.accept_data(&mut aircraft.nav_qnh_valid, msg)
                {
                    aircraft.nav_qnh = target.qnh;
                }
                if let Some(heading) = target.selected_heading() {
                    if self.accept_data(&mut aircraft.nav_heading_valid, msg) {
                        aircraft.nav_heading = Some(heading);
                    }
                }
                if target.modes_valid()
                    && self.accept_data(&mut aircraft.nav_modes_valid, msg)
                {
                    aircraft.nav_modes.autopilot = target.autopilot;
                    aircraft.nav_modes.vnav = target.vnav_mode;
                    aircraft.nav_modes.althold = target.alt_hold;
                    aircraft.nav_modes.approach = target.approach_mode;
                    aircraft.nav_modes.lnav = target.lnav_mode;
                    aircraft.nav_modes.tcas = target.tcas_operational;
                }
                if self.accept_data(&mut aircraft.nac_p_valid, msg) {
                    aircraft.nac_p = Some(target.nac_p);
                }
                if self.accept_data(&mut aircraft.sil_valid, msg) {
                    aircraft.sil = Some(target.sil);
                }
                if self.accept_data(&mut aircraft.nic_baro_valid, msg) {
                    aircraft.nic_baro = Some(target.nic_baro);
                }
            }
            Me::OperationStatus(opstatus) => match opstatus {
                OperationStatus::Airborne(st) => {
                    aircraft.adsb_version = Some(st.version);
                    aircraft.hrd_magnetic = st.hrd == 1;
                    if self.accept_data(&mut aircraft.nac_p_valid, msg) {
                        aircraft.nac_p = Some(st.nac_p);
                    }
                    if self.accept_data(&mut aircraft.sil_valid, msg) {
                        aircraft.sil = Some(st.sil);
                    }
                    if self.accept_data(&mut aircraft.gva_valid, msg) {
                        aircraft.gva = Some(st.gva);
                    }
                    if self.accept_data(&mut aircraft.nic_baro_valid, msg) {
                        aircraft.nic_baro = Some(st.nic_baro);
                    }
                }
                OperationStatus::Surface(st) => {
                    aircraft.adsb_version = Some(st.version);
                    aircraft.hrd_magnetic = st.hrd == 1;
                    aircraft.tah_heading = st.track_angle_or_heading == 1;
                    if self.accept_data(&mut aircraft.nac_p_valid, msg) {
                        aircraft.nac_p = Some(st.nac_p);
                    }
                    if self.accept_data(&mut aircraft.sil_valid, msg) {
                        aircraft.sil = Some(st.sil);
                    }
                }
                OperationStatus::Reserved { .. } => {}
            },
            _ => {}
        }
    }

    fn apply_sbs(
        &self,
        aircraft: &mut Aircraft,
        update: &SbsUpdate,
        msg: &mut Message,
        counters: &mut Counters,
    ) {
        self.set_addr_type(
            aircraft,
            match msg.source {
                DataSource::Mlat => AddressType::Mlat,
                _ => AddressType::Other,
            },
            msg.now,
        );
        if let Some(callsign) = &update.callsign {
            if valid_callsign(callsign)
                && self.accept_data(&mut aircraft.callsign_valid, msg)
            {
                aircraft.callsign = Some(callsign.clone());
            }
        }
        if let Some(alt) = update.altitude {
            self.apply_baro_altitude(aircraft, alt, msg, counters);
        }
        if let Some(gs) = update.gs {
            if self.accept_data(&mut aircraft.gs_valid, msg) {
                aircraft.gs = Some(gs);
            }
        }
        if let Some(track) = update.track {
            if self.accept_data(&mut aircraft.track_valid, msg) {
                aircraft.track = Some(track);
            }
        }
        if let Some(rate) = update.vertical_rate {
            if self.accept_data(&mut aircraft.baro_rate_valid, msg) {
                aircraft.baro_rate = Some(rate);
            }
        }
        if let Some(squawk) = update.squawk {
            if self.accept_data(&mut aircraft.squawk_valid, msg) {
                aircraft.squawk = Some(squawk);
            }
        }
        if let Some(on_ground) = update.on_ground {
            let next = if on_ground {
                AirGround::Ground
            } else {
                AirGround::Airborne
            };
            aircraft.set_airground(next, msg.source, msg.now);
        }
        if let (Some(latitude), Some(longitude)) =
            (update.latitude, update.longitude)
        {
            let position = Position {
                latitude,
                longitude,
            };
            let surface = update.on_ground.unwrap_or(false);
            self.apply_position(
                aircraft, position, 0, u32::MAX, surface, msg, counters,
            );
        }
    }

    fn apply_flight_status(
        &self,
        aircraft: &mut Aircraft,
        on_ground: Option<bool>,
        msg: &mut Message,
    ) {
        let next = match on_ground {
            Some(true) => AirGround::Ground,
            Some(false) => AirGround::Airborne,
            None => AirGround::Uncertain,
        };
        aircraft.set_airground(next, msg.source, msg.now);
    }

    fn apply_capability(
        &self,
        aircraft: &mut Aircraft,
        capability: Capability,
        msg: &mut Message,
    ) {
        let next = match capability {
            Capability::Ground => AirGround::Ground,
            Capability::Airborne => AirGround::Airborne,
            _ => AirGround::Uncertain,
        };
        aircraft.set_airground(next, msg.source, msg.now);
    }

    fn set_addr_type(
        &self,
        aircraft: &mut Aircraft,
        addr_type: AddressType,
        now: u64,
    ) {
        if aircraft.addr_type != addr_type {
            aircraft.addr_type = addr_type;
        }
        // monotonic in the tracker's clock
        aircraft.addrtype_updated = aircraft.addrtype_updated.max(now);
    }

    /**
     * Barometric altitude passes a rate-consistency gate: the change per
     * elapsed time must fit the known vertical rate plus slack, growing
     * with the staleness of that rate. Implausible reports decrement
     * `alt_reliable`; at zero the stored altitude is dropped.
     */
    fn apply_baro_altitude(
        &self,
        aircraft: &mut Aircraft,
        altitude: i32,
        msg: &mut Message,
        counters: &mut Counters,
    ) {
        let good_crc = msg.source >= DataSource::ModeSChecked;

        if let (Some(previous), true) = (
            aircraft.baro_alt,
            aircraft.baro_alt_valid.is_fresh(msg.now),
        ) {
            let elapsed_s = aircraft
                .baro_alt_valid
                .age_ms(msg.now)
                .max(100) as f64
                / 1000.;

            let (rate, rate_age_ms) = if aircraft
                .geom_rate_valid
                .is_fresh(msg.now)
            {
                (
                    aircraft.geom_rate.unwrap_or(0),
                    aircraft.geom_rate_valid.age_ms(msg.now),
                )
            } else if aircraft.baro_rate_valid.is_fresh(msg.now) {
                (
                    aircraft.baro_rate.unwrap_or(0),
                    aircraft.baro_rate_valid.age_ms(msg.now),
                )
            } else {
                (0, 60_000)
            };

            let allowance_fpm = (rate.abs() as f64
                + ALT_RATE_SLACK_FPM
                + 100. * (rate_age_ms as f64 / 1000.))
                .min(ALT_RATE_CAP_FPM);
            let max_delta_ft = allowance_fpm * elapsed_s / 60. + 130.;

            if (altitude - previous).abs() as f64 > max_delta_ft {
                counters.alt_reject += 1;
                aircraft.alt_reliable -= 2;
                if aircraft.alt_reliable <= 0 {
                    aircraft.alt_reliable = 0;
                    aircraft.baro_alt_valid.invalidate();
                }
                trace!(
                    "implausible altitude {altitude} after {previous} for {}",
                    aircraft.hexid()
                );
                return;
            }
        }

        if self.accept_data(&mut aircraft.baro_alt_valid, msg) {
            let first = aircraft.alt_reliable == 0;
            aircraft.baro_alt = Some(altitude);
            let bump = if good_crc { 2 } else { 1 };
            aircraft.alt_reliable = if first {
                2 + bump
            } else {
                (aircraft.alt_reliable + bump).min(2 * ALT_RELIABLE_INIT)
            };
            self.derive_geom_alt(aircraft, msg.now);
        }
    }

    fn apply_geom_altitude(
        &self,
        aircraft: &mut Aircraft,
        altitude: i32,
        msg: &mut Message,
    ) {
        if self.accept_data(&mut aircraft.geom_alt_valid, msg) {
            aircraft.geom_alt = Some(altitude);
        }
    }

    /// Geometric altitude derived as baro + delta when both are fresh
    fn derive_geom_alt(&self, aircraft: &mut Aircraft, now: u64) {
        if aircraft.geom_alt_valid.is_fresh(now) {
            return; // direct reports win
        }
        if let (Some(baro), Some(delta)) =
            (aircraft.baro_alt, aircraft.geom_delta)
        {
            if aircraft.baro_alt_valid.is_fresh(now)
                && aircraft.geom_delta_valid.is_fresh(now)
            {
                aircraft.geom_alt = Some(baro + delta);
                aircraft.geom_alt_valid.source = DataSource::Indirect;
                if aircraft.geom_alt_valid.last_source < DataSource::Indirect {
                    aircraft.geom_alt_valid.last_source = DataSource::Indirect;
                }
                aircraft.geom_alt_valid.updated = now;
                aircraft.geom_alt_valid.stale = false;
            }
        }
    }

    /**
     * Headings arrive magnetic or true depending on the HRD bit cached
     * from the operational status. Magnetic values yield a derived true
     * heading via the declination model, recorded as INDIRECT, but only
     * when the implied crab angle against a known ground track stays
     * under 45°.
     */
    fn apply_heading(
        &self,
        aircraft: &mut Aircraft,
        heading: f64,
        msg: &mut Message,
    ) {
        if !aircraft.hrd_magnetic {
            if self.accept_data(&mut aircraft.true_heading_valid, msg) {
                aircraft.true_heading = Some(heading);
            }
            return;
        }

        if self.accept_data(&mut aircraft.mag_heading_valid, msg) {
            aircraft.mag_heading = Some(heading);
        }

        if !aircraft.pos_valid.is_valid(msg.now) {
            return;
        }
        let derived =
            geomag::mag_to_true(heading, aircraft.lat, aircraft.lon);
        if let (Some(track), true) =
            (aircraft.track, aircraft.track_valid.is_fresh(msg.now))
        {
            if angle_delta(derived, track) >= 45. {
                return;
            }
        }
        let mut derived_msg = Message::new(
            Payload::ModeAc {
                squawk: 0,
                altitude: None,
            },
            DataSource::Indirect,
            msg.now,
        );
        if self.accept_data(
            &mut aircraft.true_heading_valid,
            &mut derived_msg,
        ) {
            aircraft.true_heading = Some(derived);
        }
    }

    /**
     * CPR position flow: cache the frame, try a global decode against the
     * matching-parity partner, fall back to a local decode against a
     * recent own position or the receiver, then run the plausibility
     * gates. The scratch copy of the position state is only committed
     * when every gate passes.
     */
    #[allow(clippy::too_many_arguments)]
    fn update_position(
        &self,
        aircraft: &mut Aircraft,
        cell: CprCell,
        surface: bool,
        nic: u8,
        rc: u32,
        msg: &mut Message,
        counters: &mut Counters,
    ) {
        let scratch = CprScratch {
            cell,
            surface,
            nic,
            rc,
            received: msg.now,
            source: msg.source,
        };
        *aircraft.cpr_slot(cell.parity) = Some(scratch);

        // surface/airborne crossings force the state machine over and are
        // always forwarded
        if aircraft.pos_valid.is_valid(msg.now)
            && aircraft.pos_surface != surface
        {
            msg.reduce_forward = true;
        }

        let decoded = self.decode_cpr(aircraft, &scratch, msg, counters);

        let (position, global) = match decoded {
            Some(result) => result,
            None => return,
        };

        self.apply_decoded_position(
            aircraft, position, global, cell.parity, surface, nic, rc, msg,
            counters,
        );
    }

    /// Global decode if a matching partner frame exists, local otherwise
    fn decode_cpr(
        &self,
        aircraft: &mut Aircraft,
        latest: &CprScratch,
        msg: &mut Message,
        counters: &mut Counters,
    ) -> Option<(Position, bool)> {
        let partner = match latest.cell.parity {
            CprFormat::Even => aircraft.cpr_odd,
            CprFormat::Odd => aircraft.cpr_even,
        };

        if let Some(partner) = partner {
            let gap = latest.received.abs_diff(partner.received);
            let max_gap = if latest.surface {
                let slow = aircraft
                    .gs
                    .map_or(true, |gs| gs <= CPR_SLOW_SURFACE_KT);
                if slow {
                    CPR_MAX_GAP_SURFACE_SLOW_MS
                } else {
                    CPR_MAX_GAP_SURFACE_MS
                }
            } else {
                CPR_MAX_GAP_AIRBORNE_MS
            };

            // a pair is only usable when both frames describe the same
            // kind of motion from the same source
            if partner.surface == latest.surface
                && partner.source == latest.source
                && gap <= max_gap
            {
                let (even, odd) = match latest.cell.parity {
                    CprFormat::Even => (latest.cell, partner.cell),
                    CprFormat::Odd => (partner.cell, latest.cell),
                };
                let decoded = if latest.surface {
                    self.surface_reference(aircraft, msg.now).and_then(
                        |reference| {
                            cpr::surface_from_pair(
                                &even,
                                &odd,
                                latest.cell.parity,
                                &reference,
                            )
                        },
                    )
                } else {
                    cpr::airborne_from_pair(
                        &even,
                        &odd,
                        latest.cell.parity,
                    )
                };
                match decoded {
                    Some(position) => {
                        counters.cpr_global_ok += 1;
                        return Some((position, true));
                    }
                    None => {
                        counters.cpr_global_bad += 1;
                        return None;
                    }
                }
            } else {
                counters.cpr_global_skipped += 1;
            }
        }

        // local decode against a recent own position, then the receiver
        let reference = if aircraft.pos_valid.source != DataSource::Invalid
            && msg.now.saturating_sub(aircraft.seen_pos) < LOCAL_REF_MAX_AGE_MS
        {
            Some((
                Position {
                    latitude: aircraft.lat,
                    longitude: aircraft.lon,
                },
                false,
            ))
        } else {
            self.config.receiver.map(|r| (r, true))
        };

        let (reference, is_receiver) = match reference {
            Some(r) => r,
            None => {
                counters.cpr_local_skipped += 1;
                return None;
            }
        };

        let decoded = if latest.surface {
            cpr::surface_near_reference(
                &latest.cell,
                reference.latitude,
                reference.longitude,
            )
        } else {
            cpr::airborne_near_reference(
                &latest.cell,
                reference.latitude,
                reference.longitude,
            )
        };

        let position = match decoded {
            Some(position) => position,
            None => {
                counters.cpr_local_skipped += 1;
                return None;
            }
        };

        if is_receiver {
            // a receiver-anchored decode is only trusted out to the
            // configured range, never past half a CPR cell
            let limit = self
                .config
                .max_range_km
                .unwrap_or(f64::INFINITY)
                .min(cpr::half_cell_km(position.latitude, latest.surface));
            if reference.distance_km(&position) > limit {
                counters.cpr_local_skipped += 1;
                return None;
            }
        }

        counters.cpr_local_ok += 1;
        Some((position, false))
    }

    /// The reference for surface decoding: own recent position first,
    /// then the configured receiver
    fn surface_reference(
        &self,
        aircraft: &Aircraft,
        now: u64,
    ) -> Option<Position> {
        if aircraft.pos_valid.source != DataSource::Invalid
            && now.saturating_sub(aircraft.seen_pos) < LOCAL_REF_MAX_AGE_MS
        {
            return Some(Position {
                latitude: aircraft.lat,
                longitude: aircraft.lon,
            });
        }
        self.config.receiver
    }

    /// Plausibility gates and the commit of an accepted position
    #[allow(clippy::too_many_arguments)]
    fn apply_decoded_position(
        &self,
        aircraft: &mut Aircraft,
        position: Position,
        global: bool,
        parity: CprFormat,
        surface: bool,
        nic: u8,
        rc: u32,
        msg: &mut Message,
        counters: &mut Counters,
    ) {
        // gate 1: configured receiver range
        if let (Some(max_range), Some(receiver)) =
            (self.config.max_range_km, self.config.receiver)
        {
            let range = receiver.distance_km(&position);
            if range > max_range {
                msg.pos_bad = true;
                counters.pos_bad += 1;
                self.punish_position(aircraft);
                return;
            }
        }

        // gate 2: implied speed
        if let SpeedCheck::Reject =
            self.speed_check(aircraft, &position, surface, msg.now, msg.source)
        {
            msg.pos_bad = true;
            counters.pos_bad += 1;
            self.punish_position(aircraft);
            return;
        }

        // the position within the last seconds: duplicate, not an error
        if aircraft.pos_valid.source != DataSource::Invalid
            && msg.now.saturating_sub(aircraft.seen_pos) < POS_DUPLICATE_MS
            && (aircraft.lat - position.latitude).abs() < 1e-6
            && (aircraft.lon - position.longitude).abs() < 1e-6
        {
            msg.duplicate = true;
            counters.pos_duplicate += 1;
            return;
        }

        if !self.accept_data(&mut aircraft.pos_valid, msg) {
            return;
        }

        // commit
        aircraft.lat = position.latitude;
        aircraft.lon = position.longitude;
        aircraft.pos_nic = nic;
        aircraft.pos_rc = rc;
        aircraft.pos_surface = surface;
        aircraft.seen_pos = msg.now;

        let cap = self.config.filter_persistence;
        if global {
            aircraft.pos_reliable_odd =
                (aircraft.pos_reliable_odd + 1.).min(cap);
            aircraft.pos_reliable_even =
                (aircraft.pos_reliable_even + 1.).min(cap);
        } else {
            match parity {
                CprFormat::Odd => {
                    aircraft.pos_reliable_odd =
                        (aircraft.pos_reliable_odd + 1.).min(cap)
                }
                CprFormat::Even => {
                    aircraft.pos_reliable_even =
                        (aircraft.pos_reliable_even + 1.).min(cap)
                }
            }
        }

        // a decode right next to the last reliable position after a dry
        // spell is very unlikely to be an address error
        if aircraft.seen_pos_reliable > 0
            && msg.now.saturating_sub(aircraft.seen_pos_reliable)
                > FAST_TRACK_DRY_MS
        {
            let anchor = Position {
                latitude: aircraft.lat_reliable,
                longitude: aircraft.lon_reliable,
            };
            if anchor.distance_km(&position) < FAST_TRACK_KM {
                aircraft.pos_reliable_odd =
                    aircraft.pos_reliable_odd.max(self.config.json_reliable);
                aircraft.pos_reliable_even =
                    aircraft.pos_reliable_even.max(self.config.json_reliable);
            }
        }

        counters.pos_by_source[msg.source.recorded() as usize] += 1;
        if let Some(receiver) = self.config.receiver {
            counters.record_range_km(receiver.distance_km(&position));
        }

        if aircraft.pos_reliable_odd >= self.config.json_reliable
            && aircraft.pos_reliable_even >= self.config.json_reliable
        {
            self.commit_reliable(aircraft, position, msg);
        }
    }

    /// The reliable-position side effects: speed-check anchor, trace
    /// append, tile re-bucketing
    fn commit_reliable(
        &self,
        aircraft: &mut Aircraft,
        position: Position,
        msg: &Message,
    ) {
        aircraft.lat_reliable = position.latitude;
        aircraft.lon_reliable = position.longitude;
        aircraft.seen_pos_reliable = msg.now;

        let tile = tiles::globe_index(position.latitude, position.longitude);
        if aircraft.tile != Some(tile) {
            aircraft.tile = Some(tile);
        }

        let on_ground = aircraft.airground == AirGround::Ground;
        if aircraft.trace.should_append(
            msg.now,
            self.config.json_trace_interval_ms,
            position.latitude,
            position.longitude,
            aircraft.baro_alt,
            aircraft.track,
            on_ground,
        ) {
            let point = TracePoint::new(
                msg.now,
                position.latitude,
                position.longitude,
                aircraft.baro_alt,
                false,
                on_ground,
                false,
                aircraft.gs,
                aircraft.track,
                aircraft.geom_rate.or(aircraft.baro_rate),
                aircraft.geom_rate.is_some(),
            );
            let snapshot = StateAll::capture(aircraft);
            aircraft.trace.push_with(point, || snapshot);
            aircraft.trace_write = true;
        }
    }

    fn punish_position(&self, aircraft: &mut Aircraft) {
        aircraft.pos_reliable_odd -= 1.;
        aircraft.pos_reliable_even -= 1.;
        if aircraft.pos_reliable_odd <= 0. || aircraft.pos_reliable_even <= 0.
        {
            aircraft.pos_reliable_odd = 0.;
            aircraft.pos_reliable_even = 0.;
            aircraft.pos_valid.invalidate();
        }
    }

    /**
     * Implied straight-line speed versus what the aircraft can plausibly
     * do: 1.3× the known groundspeed plus a staleness bonus, clamped to
     * 20–150 kt on the surface and floored at 200 kt airborne, doubled
     * for MLAT and below. The allowance stretches along the known track
     * and clips 90° off it.
     */
    fn speed_check(
        &self,
        aircraft: &Aircraft,
        position: &Position,
        surface: bool,
        now: u64,
        source: DataSource,
    ) -> SpeedCheck {
        if aircraft.seen_pos_reliable == 0 {
            return SpeedCheck::Ok; // nothing to compare against yet
        }
        let elapsed_ms = now.saturating_sub(aircraft.seen_pos_reliable);
        if source <= DataSource::Mlat && elapsed_ms < MLAT_SPEED_SKIP_MS {
            return SpeedCheck::Ok;
        }
        let elapsed_s = (elapsed_ms as f64 / 1000.).max(0.1);

        let mut allowance_kt = match (
            aircraft.gs,
            aircraft.gs_valid.is_valid(now),
        ) {
            (Some(gs), true) => gs * 1.3 + 2.0 * elapsed_s,
            _ => {
                if surface {
                    100.
                } else {
                    600.
                }
            }
        };
        if surface {
            allowance_kt = allowance_kt.clamp(20., 150.);
        } else {
            allowance_kt = allowance_kt.max(200.);
        }
        if source <= DataSource::Mlat {
            allowance_kt *= 2.;
        }

        let anchor = Position {
            latitude: aircraft.lat_reliable,
            longitude: aircraft.lon_reliable,
        };
        let distance_km = anchor.distance_km(position);
        let mut max_km = allowance_kt * elapsed_s * KNOTS_TO_KM_PER_S + 0.1;

        // along the known track the allowance stretches, 90° off it the
        // bonus disappears
        if let (Some(track), true) =
            (aircraft.track, aircraft.track_valid.is_valid(now))
        {
            if distance_km > 1.0 {
                let bearing = initial_bearing(&anchor, position);
                let off = angle_delta(bearing, track).min(90.);
                let bonus = libm::cos(off.to_radians()).max(0.);
                max_km *= 1.0 + 0.6 * bonus;
            }
        }

        if distance_km > max_km {
            SpeedCheck::Reject
        } else {
            SpeedCheck::Ok
        }
    }

    /// Direct position input (SBS and tests): same gates, no CPR
    #[allow(clippy::too_many_arguments)]
    pub fn apply_position(
        &self,
        aircraft: &mut Aircraft,
        position: Position,
        nic: u8,
        rc: u32,
        surface: bool,
        msg: &mut Message,
        counters: &mut Counters,
    ) {
        self.apply_decoded_position(
            aircraft,
            position,
            true,
            CprFormat::Even,
            surface,
            nic,
            rc,
            msg,
            counters,
        );
    }

    /// Wind from the velocity triangle, OAT from Mach and TAS; only with
    /// a complete and fresh set of inputs
    fn derive_wind_oat(&self, aircraft: &mut Aircraft, now: u64) {
        let fresh = |v: &Validity| v.is_fresh(now);
        if let (Some(gs), Some(track), Some(tas), Some(heading)) = (
            aircraft.gs,
            aircraft.track,
            aircraft.tas,
            aircraft.true_heading,
        ) {
            if fresh(&aircraft.gs_valid)
                && fresh(&aircraft.track_valid)
                && fresh(&aircraft.tas_valid)
                && fresh(&aircraft.true_heading_valid)
                && tas > 50
            {
                let track_rad = track.to_radians();
                let heading_rad = heading.to_radians();
                let tas = tas as f64;
                let wx = gs * libm::sin(track_rad) - tas * libm::sin(heading_rad);
                let wy = gs * libm::cos(track_rad) - tas * libm::cos(heading_rad);
                let speed = libm::hypot(wx, wy);
                // the triangle degenerates when the wind out-runs the speeds
                if speed < 250. {
                    let mut direction =
                        libm::atan2(wx, wy).to_degrees() + 180.;
                    if direction >= 360. {
                        direction -= 360.;
                    }
                    aircraft.derived.wind_speed = Some(speed);
                    aircraft.derived.wind_direction = Some(direction);
                    aircraft.derived.wind_altitude = aircraft.baro_alt;
                    aircraft.derived.wind_updated = now;
                }
            }
        }
        if let (Some(mach), Some(tas)) = (aircraft.mach, aircraft.tas) {
            if fresh(&aircraft.mach_valid)
                && fresh(&aircraft.tas_valid)
                && mach > 0.5
            {
                let tas = tas as f64;
                let kelvin = 288.15 * libm::pow(tas / (661.47 * mach), 2.);
                let oat = kelvin - 273.15;
                if (-80. ..=60.).contains(&oat) {
                    let tat =
                        (kelvin * (1. + 0.2 * mach * mach)) - 273.15;
                    aircraft.derived.oat = Some(oat);
                    aircraft.derived.tat = Some(tat);
                    aircraft.derived.oat_updated = now;
                }
            }
        }
    }

    /// Match a Mode A/C squawk against the Mode S tracks (driven by the
    /// scheduler at a coarse cadence). Returns how many tracks matched.
    pub fn match_mode_ac(&self, squawk: u16, now: u64) -> usize {
        let mut matched = 0;
        self.registry.for_each(|_, handle| {
            let aircraft = handle.lock().unwrap();
            if aircraft.squawk == Some(squawk)
                && aircraft.squawk_valid.is_valid(now)
            {
                matched += 1;
            }
        });
        matched
    }
}

fn valid_callsign(callsign: &str) -> bool {
    !callsign.is_empty()
        && callsign
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == ' ')
}

fn angle_delta(a: f64, b: f64) -> f64 {
    let mut delta = (a - b).abs() % 360.;
    if delta > 180. {
        delta = 360. - delta;
    }
    delta
}

/// Initial great-circle bearing from one position towards another
fn initial_bearing(from: &Position, to: &Position) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let d_lon = (to.longitude - from.longitude).to_radians();
    let y = libm::sin(d_lon) * libm::cos(lat2);
    let x = libm::cos(lat1) * libm::sin(lat2)
        - libm::sin(lat1) * libm::cos(lat2) * libm::cos(d_lon);
    let mut bearing = libm::atan2(y, x).to_degrees();
    if bearing < 0. {
        bearing += 360.;
    }
    bearing
}

fn tisb_addr_type(control_field_type: u8) -> AddressType {
    match control_field_type {
        0 => AddressType::AdsbNonIcao,
        1 => AddressType::AdsbNonIcao,
        2 => AddressType::TisbIcao,
        3 => AddressType::TisbOther,
        4 => AddressType::TisbTrackfile,
        5 => AddressType::TisbOther,
        6 => AddressType::Adsr,
        _ => AddressType::Unknown,
    }
}

fn tisb_non_icao(control_field_type: u8) -> bool {
    matches!(control_field_type, 1 | 3 | 4 | 5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::crc::modes_checksum;
    use deku::prelude::*;

    fn tracker() -> Tracker {
        let config = TrackerConfig {
            receiver: Some(Position {
                latitude: 48.0,
                longitude: 7.8,
            }),
            ..TrackerConfig::default()
        };
        Tracker::new(config, Arc::new(Registry::new()))
    }

    fn seal(mut bytes: [u8; 14]) -> [u8; 14] {
        bytes[11] = 0;
        bytes[12] = 0;
        bytes[13] = 0;
        let parity = modes_checksum(&bytes, 112);
        bytes[11] = (parity >> 16) as u8;
        bytes[12] = (parity >> 8) as u8;
        bytes[13] = parity as u8;
        bytes
    }

    /// Build a sealed DF17 airborne position frame
    fn df17_position(
        addr: u32,
        parity: CprFormat,
        lat_cpr: u32,
        lon_cpr: u32,
        alt_ft: i32,
    ) -> Frame {
        let mut bytes = [0u8; 14];
        bytes[0] = 0x8D;
        bytes[1] = (addr >> 16) as u8;
        bytes[2] = (addr >> 8) as u8;
        bytes[3] = addr as u8;
        // ME: tc=11, ss=0, saf=0, alt12, t=0, F, lat17, lon17
        let n = ((alt_ft + 1000) / 25) as u32;
        let alt12 = ((n & 0x7F0) << 1) | 0x10 | (n & 0x0F);
        let mut me: u64 = 0;
        me |= 11u64 << 51;
        me |= (alt12 as u64) << 36;
        me |= ((parity == CprFormat::Odd) as u64) << 34;
        me |= (lat_cpr as u64 & 0x1FFFF) << 17;
        me |= lon_cpr as u64 & 0x1FFFF;
        for i in 0..7 {
            bytes[4 + i] = (me >> (48 - 8 * i)) as u8;
        }
        let bytes = seal(bytes);
        Frame::from_bytes((&bytes, 0)).unwrap().1
    }

    /// CPR-encode an airborne position (inverse of the decoder)
    fn encode_airborne(lat: f64, lon: f64, parity: CprFormat) -> (u32, u32) {
        let (zones, p) = match parity {
            CprFormat::Even => (60., 0u64),
            CprFormat::Odd => (59., 1),
        };
        let d_lat = 360. / zones;
        let yz = libm::floor(
            131_072. * (lat.rem_euclid(d_lat)) / d_lat + 0.5,
        );
        let rlat = d_lat * (yz / 131_072. + libm::floor(lat / d_lat));
        let ni = std::cmp::max(cpr::nl(rlat) as i64 - p as i64, 1) as f64;
        let d_lon = 360. / ni;
        let xz = libm::floor(
            131_072. * (lon.rem_euclid(d_lon)) / d_lon + 0.5,
        );
        ((yz as u32) & 0x1FFFF, (xz as u32) & 0x1FFFF)
    }

    fn feed(
        tracker: &Tracker,
        frame: Frame,
        source: DataSource,
        now: u64,
        counters: &mut Counters,
    ) -> (Message, Option<Handle>) {
        let mut msg = Message::new(Payload::ModeS(frame), source, now);
        let handle = tracker.update_from_message(&mut msg, counters);
        (msg, handle)
    }

    /// Spec scenario: a matched even/odd pair yields one position, both
    /// reliability counters at one, and a trace point.
    #[test]
    fn test_global_airborne_decode() {
        let tracker = Tracker::new(
            TrackerConfig::default(),
            Arc::new(Registry::new()),
        );
        let mut counters = Counters::default();
        let (lat, lon) = (48.05, 7.9);
        let (even_lat, even_lon) = encode_airborne(lat, lon, CprFormat::Even);
        let (odd_lat, odd_lon) = encode_airborne(lat, lon, CprFormat::Odd);

        let even =
            df17_position(0x4B1803, CprFormat::Even, even_lat, even_lon, 38_000);
        let odd =
            df17_position(0x4B1803, CprFormat::Odd, odd_lat, odd_lon, 38_000);

        let (_, handle) =
            feed(&tracker, even, DataSource::Adsb, 1_000, &mut counters);
        let handle = handle.unwrap();
        {
            let aircraft = handle.lock().unwrap();
            assert_eq!(aircraft.pos_reliable_odd, 0.);
            assert!(aircraft.trace.is_empty());
        }

        let (msg, _) =
            feed(&tracker, odd, DataSource::Adsb, 3_000, &mut counters);
        assert!(!msg.pos_bad);
        let aircraft = handle.lock().unwrap();
        assert!((aircraft.lat - lat).abs() < 0.001, "lat {}", aircraft.lat);
        assert!((aircraft.lon - lon).abs() < 0.001, "lon {}", aircraft.lon);
        assert_eq!(aircraft.pos_reliable_odd, 1.);
        assert_eq!(aircraft.pos_reliable_even, 1.);
        assert!(aircraft.position_reliable());
        assert_eq!(aircraft.trace.len(), 1);
        assert_eq!(counters.cpr_global_ok, 1);
        assert_eq!(aircraft.baro_alt, Some(38_000));
        // the aircraft landed in exactly the tile its position maps to
        assert_eq!(
            aircraft.tile,
            Some(tiles::globe_index(aircraft.lat, aircraft.lon))
        );
    }

    /// Frames older than the type-specific gap must not pair up for a
    /// global decode.
    #[test]
    fn test_stale_pair_does_not_decode() {
        let tracker = Tracker::new(
            TrackerConfig::default(),
            Arc::new(Registry::new()),
        );
        let mut counters = Counters::default();
        let (even_lat, even_lon) = encode_airborne(48.05, 7.9, CprFormat::Even);
        let (odd_lat, odd_lon) = encode_airborne(48.05, 7.9, CprFormat::Odd);

        feed(
            &tracker,
            df17_position(0x4B1803, CprFormat::Even, even_lat, even_lon, 38_000),
            DataSource::Adsb,
            1_000,
            &mut counters,
        );
        // 15 s later: past the 10 s airborne pairing window
        let (_, handle) = feed(
            &tracker,
            df17_position(0x4B1803, CprFormat::Odd, odd_lat, odd_lon, 38_000),
            DataSource::Adsb,
            16_000,
            &mut counters,
        );
        let aircraft = handle.unwrap();
        let aircraft = aircraft.lock().unwrap();
        assert_eq!(counters.cpr_global_ok, 0);
        assert_eq!(counters.cpr_global_skipped, 1);
        assert!(!aircraft.position_reliable());
        assert_eq!(aircraft.pos_valid.source, DataSource::Invalid);
    }

    /// Spec scenario: an MLAT report cannot displace a fresh ADS-B
    /// position.
    #[test]
    fn test_mlat_downgrade_guard() {
        let tracker = Tracker::new(
            TrackerConfig::default(),
            Arc::new(Registry::new()),
        );
        let mut counters = Counters::default();
        let (lat, lon) = (48.05, 7.9);
        let (even_lat, even_lon) = encode_airborne(lat, lon, CprFormat::Even);
        let (odd_lat, odd_lon) = encode_airborne(lat, lon, CprFormat::Odd);
        feed(
            &tracker,
            df17_position(0x4B1803, CprFormat::Even, even_lat, even_lon, 38_000),
            DataSource::Adsb,
            1_000,
            &mut counters,
        );
        feed(
            &tracker,
            df17_position(0x4B1803, CprFormat::Odd, odd_lat, odd_lon, 38_000),
            DataSource::Adsb,
            3_000,
            &mut counters,
        );

        // MLAT now places the aircraft 400 km away
        let update = SbsUpdate {
            addr: 0x4B1803,
            latitude: Some(51.5),
            longitude: Some(7.9),
            ..SbsUpdate::default()
        };
        let mut msg = Message::new(
            Payload::Sbs(update),
            DataSource::Mlat,
            4_000,
        );
        tracker.update_from_message(&mut msg, &mut counters);

        let handle = tracker.registry.get(0x4B1803, false).unwrap();
        let aircraft = handle.lock().unwrap();
        assert!((aircraft.lat - lat).abs() < 0.001);
        assert_eq!(aircraft.pos_reliable_odd, 1.);
        assert_eq!(aircraft.pos_reliable_even, 1.);
        assert_eq!(aircraft.pos_valid.source, DataSource::Adsb);
    }

    /// Spec scenario: an impossible jump is rejected and punished.
    #[test]
    fn test_speed_check_reject() {
        let tracker = Tracker::new(
            TrackerConfig::default(),
            Arc::new(Registry::new()),
        );
        let mut counters = Counters::default();
        let handle = tracker.registry.get_or_create(0xA0B1C2, false, 0);
        let mut aircraft = handle.lock().unwrap();

        let mut msg = Message::new(
            Payload::ModeAc {
                squawk: 0,
                altitude: None,
            },
            DataSource::Adsb,
            1_000,
        );
        tracker.apply_position(
            &mut aircraft,
            Position {
                latitude: 0.,
                longitude: 0.,
            },
            8,
            186,
            false,
            &mut msg,
            &mut counters,
        );
        assert_eq!(aircraft.pos_reliable_odd, 1.);
        assert_eq!(aircraft.pos_reliable_even, 1.);

        // ~1100 km in 10 s
        let mut msg = Message::new(
            Payload::ModeAc {
                squawk: 0,
                altitude: None,
            },
            DataSource::Adsb,
            11_000,
        );
        tracker.apply_position(
            &mut aircraft,
            Position {
                latitude: 10.,
                longitude: 0.,
            },
            8,
            186,
            false,
            &mut msg,
            &mut counters,
        );
        assert!(msg.pos_bad);
        assert_eq!(counters.pos_bad, 1);
        assert!((aircraft.lat - 0.).abs() < 1e-9);
        // both counters took the hit, and hitting zero dropped the position
        assert_eq!(aircraft.pos_reliable_odd, 0.);
        assert_eq!(aircraft.pos_reliable_even, 0.);
        assert_eq!(aircraft.pos_valid.source, DataSource::Invalid);
    }

    /// Spec scenario: altitude fusion rejects a 5000 ft step at zero
    /// vertical rate, then recovers on consistent data.
    #[test]
    fn test_altitude_fusion() {
        let tracker = Tracker::new(
            TrackerConfig::default(),
            Arc::new(Registry::new()),
        );
        let mut counters = Counters::default();
        let handle = tracker.registry.get_or_create(0xA0B1C2, false, 0);
        let mut aircraft = handle.lock().unwrap();

        let mut msg = Message::new(
            Payload::ModeAc {
                squawk: 0,
                altitude: None,
            },
            DataSource::ModeSChecked,
            0,
        );
        tracker.apply_baro_altitude(&mut aircraft, 30_000, &mut msg, &mut counters);
        assert_eq!(aircraft.baro_alt, Some(30_000));
        // a zero rate report
        aircraft.baro_rate = Some(0);
        aircraft.baro_rate_valid.accept(DataSource::ModeSChecked, 0, 0);
        let reliable_before = aircraft.alt_reliable;

        let mut msg = Message::new(
            Payload::ModeAc {
                squawk: 0,
                altitude: None,
            },
            DataSource::ModeSChecked,
            1_000,
        );
        tracker.apply_baro_altitude(&mut aircraft, 35_000, &mut msg, &mut counters);
        assert_eq!(aircraft.baro_alt, Some(30_000), "altitude must not move");
        assert!(aircraft.alt_reliable < reliable_before);
        assert_eq!(counters.alt_reject, 1);

        // three consistent observations restore the counter
        for (i, alt) in [(2u64, 30_000), (3, 30_025), (4, 30_050)] {
            let mut msg = Message::new(
                Payload::ModeAc {
                    squawk: 0,
                    altitude: None,
                },
                DataSource::ModeSChecked,
                i * 1_000,
            );
            tracker.apply_baro_altitude(&mut aircraft, alt, &mut msg, &mut counters);
        }
        assert!(aircraft.alt_reliable >= reliable_before);
        assert_eq!(aircraft.baro_alt, Some(30_050));
    }

    #[test]
    fn test_untrusted_cannot_create() {
        let tracker = tracker();
        let mut counters = Counters::default();
        // an altitude reply is not address-reliable
        let mut bytes = [0u8; 7];
        bytes[0] = 4 << 3;
        let parity = modes_checksum(&bytes, 56) ^ 0xABCDEF;
        bytes[4] = (parity >> 16) as u8;
        bytes[5] = (parity >> 8) as u8;
        bytes[6] = parity as u8;
        let frame = Frame::from_bytes((&bytes, 0)).unwrap().1;
        let mut msg = Message::new(Payload::ModeS(frame), DataSource::ModeS, 0);
        assert!(tracker.update_from_message(&mut msg, &mut counters).is_none());
        assert_eq!(tracker.registry.len(), 0);
    }

    #[test]
    fn test_field_timestamps_monotone() {
        let tracker = tracker();
        let mut counters = Counters::default();
        let handle = tracker.registry.get_or_create(0x111111, false, 0);
        let mut aircraft = handle.lock().unwrap();

        let mut m1 = Message::new(
            Payload::ModeAc {
                squawk: 0,
                altitude: None,
            },
            DataSource::Adsb,
            5_000,
        );
        assert!(tracker.accept_data(&mut aircraft.gs_valid, &mut m1));
        // an older message of the same source must not rewind the clock
        let mut m0 = Message::new(
            Payload::ModeAc {
                squawk: 0,
                altitude: None,
            },
            DataSource::Adsb,
            4_000,
        );
        assert!(!tracker.accept_data(&mut aircraft.gs_valid, &mut m0));
        assert_eq!(aircraft.gs_valid.updated, 5_000);
    }

    #[test]
    fn test_wind_derivation() {
        let tracker = tracker();
        let handle = tracker.registry.get_or_create(0x222222, false, 0);
        let mut aircraft = handle.lock().unwrap();

        let now = 1_000;
        aircraft.gs = Some(400.);
        aircraft.gs_valid.accept(DataSource::Adsb, now, 0);
        aircraft.track = Some(90.);
        aircraft.track_valid.accept(DataSource::Adsb, now, 0);
        aircraft.tas = Some(430);
        aircraft.tas_valid.accept(DataSource::Adsb, now, 0);
        // flying due east, nose on the track: pure headwind
        aircraft.true_heading = Some(90.);
        aircraft.true_heading_valid.accept(DataSource::Adsb, now, 0);

        tracker.derive_wind_oat(&mut aircraft, now);
        let speed = aircraft.derived.wind_speed.unwrap();
        let direction = aircraft.derived.wind_direction.unwrap();
        assert!((speed - 30.).abs() < 0.5, "wind speed {speed}");
        assert!(
            (direction - 90.).abs() < 1.0,
            "wind direction {direction}"
        );
    }
}
