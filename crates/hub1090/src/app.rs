use crate::aircraftdb::AircraftDb;
use crate::cli::Options;
use crate::net::connector::Connector;
use crate::net::writer::NetWriter;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use track1090::clock::now_in_ms;
use track1090::stats::Stats;
use track1090::store::Registry;
use track1090::tracker::Tracker;

/// Everything the worker groups share. One per process in production;
/// tests construct as many as they like.
pub struct App {
    pub options: AppConfig,
    pub registry: Arc<Registry>,
    pub tracker: Tracker,
    pub stats: Mutex<Stats>,
    pub db: RwLock<AircraftDb>,

    pub beast_out: Mutex<NetWriter>,
    pub beast_reduce_out: Mutex<NetWriter>,
    pub raw_out: Mutex<NetWriter>,
    pub sbs_out: Mutex<NetWriter>,

    pub clients: Mutex<Vec<ClientInfo>>,
    /// Mode A/C codes heard recently, consumed by the periodic matcher
    pub mode_ac_squawks: Mutex<Vec<(u16, u64)>>,
    next_client_id: AtomicU64,
    pub shutdown: watch::Sender<bool>,
}

/// The subset of the command line the workers need at runtime
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    pub beast_in_ports: Vec<u16>,
    pub beast_out_ports: Vec<u16>,
    pub beast_reduce_out_ports: Vec<u16>,
    pub raw_in_ports: Vec<u16>,
    pub raw_out_ports: Vec<u16>,
    pub sbs_in_ports: Vec<u16>,
    pub sbs_out_ports: Vec<u16>,
    pub connectors: Vec<Connector>,
    pub json_dir: Option<PathBuf>,
    pub write_bincraft: bool,
    pub globe_history_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    pub json_interval_ms: u64,
    pub heartbeat_ms: u64,
    pub uuid: String,
    pub receiver_id: [u8; 8],
    pub debug_decode: bool,
}

/// Entry of clients.json, kept current by the connection tasks
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: u64,
    pub host: String,
    pub port: u16,
    pub service: &'static str,
    pub uuid: Option<String>,
    pub connected_since: u64,
    pub messages: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl App {
    pub fn new(options: &Options) -> Arc<App> {
        let registry = Arc::new(Registry::new());
        let tracker =
            Tracker::new(options.tracker_config(), registry.clone());
        let uuid = options
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut receiver_id = [0u8; 8];
        let digest = uuid.bytes().fold(0xcbf29ce484222325u64, |hash, b| {
            (hash ^ b as u64).wrapping_mul(0x100000001b3)
        });
        receiver_id.copy_from_slice(&digest.to_be_bytes());

        let (shutdown, _) = watch::channel(false);

        Arc::new(App {
            options: AppConfig {
                bind_address: options.net_bind_address.clone(),
                beast_in_ports: options.net_beast_in_port.clone(),
                beast_out_ports: options.net_beast_out_port.clone(),
                beast_reduce_out_ports: options
                    .net_beast_reduce_out_port
                    .clone(),
                raw_in_ports: options.net_raw_in_port.clone(),
                raw_out_ports: options.net_raw_out_port.clone(),
                sbs_in_ports: options.net_sbs_in_port.clone(),
                sbs_out_ports: options.net_sbs_out_port.clone(),
                connectors: options.net_connector.clone(),
                json_dir: options.write_json.clone(),
                write_bincraft: options.write_bincraft,
                globe_history_dir: options.globe_history_dir.clone(),
                state_dir: options.state_dir.clone(),
                json_interval_ms: options.json_interval,
                heartbeat_ms: options.heartbeat * 1000,
                uuid,
                receiver_id,
                debug_decode: options.debug_decode,
            },
            registry,
            tracker,
            stats: Mutex::new(Stats::new(now_in_ms())),
            db: RwLock::new(AircraftDb::open(options.db_file.clone())),
            beast_out: Mutex::new(NetWriter::default()),
            beast_reduce_out: Mutex::new(NetWriter::default()),
            raw_out: Mutex::new(NetWriter::default()),
            sbs_out: Mutex::new(NetWriter::default()),
            clients: Mutex::new(Vec::new()),
            mode_ac_squawks: Mutex::new(Vec::new()),
            next_client_id: AtomicU64::new(1),
            shutdown,
        })
    }

    pub fn next_client_id(&self) -> u64 {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Where persisted state lives: the configured state dir, or inside
    /// the history tree when only that is configured
    pub fn state_path(&self) -> Option<PathBuf> {
        self.options.state_dir.clone().or_else(|| {
            self.options
                .globe_history_dir
                .as_ref()
                .map(|dir| dir.join("internal_state"))
        })
    }

    pub fn register_client(&self, info: ClientInfo) {
        self.clients.lock().unwrap().push(info);
    }

    pub fn unregister_client(&self, id: u64) {
        self.clients.lock().unwrap().retain(|c| c.id != id);
    }

    /// Copy fresh registration and type data onto new aircraft
    pub fn apply_db_entry(&self, addr: u32) -> Option<(Option<String>, Option<String>, u32)> {
        let db = self.db.read().unwrap();
        db.get(addr).map(|entry| {
            (
                entry.registration.clone(),
                entry.type_code.clone(),
                entry.flags,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_independent_contexts() {
        let options = Options::parse_from(["hub1090"]);
        let a = App::new(&options);
        let b = App::new(&options);
        a.registry.get_or_create(0x123456, false, 0);
        assert_eq!(a.registry.len(), 1);
        assert_eq!(b.registry.len(), 0);
        assert_ne!(a.options.uuid, b.options.uuid);
    }

    #[test]
    fn test_client_registration() {
        let options = Options::parse_from(["hub1090"]);
        let app = App::new(&options);
        let id = app.next_client_id();
        app.register_client(ClientInfo {
            id,
            host: "10.0.0.9".into(),
            port: 4711,
            service: "beast_in",
            uuid: None,
            connected_since: 0,
            messages: 0,
            bytes_in: 0,
            bytes_out: 0,
        });
        assert_eq!(app.clients.lock().unwrap().len(), 1);
        app.unregister_client(id);
        assert!(app.clients.lock().unwrap().is_empty());
    }
}
