use crate::net::connector::Connector;
use clap::Parser;
use std::path::PathBuf;
use track1090::decode::cpr::Position;
use track1090::tracker::TrackerConfig;

#[derive(Debug, Parser)]
#[command(
    name = "hub1090",
    version,
    about = "ADS-B / Mode S aircraft-tracking server"
)]
pub struct Options {
    /// Listen for Beast input on these ports
    #[arg(long, value_delimiter = ',')]
    pub net_beast_in_port: Vec<u16>,

    /// Serve Beast output on these ports
    #[arg(long, value_delimiter = ',')]
    pub net_beast_out_port: Vec<u16>,

    /// Serve reduced-rate Beast output on these ports
    #[arg(long, value_delimiter = ',')]
    pub net_beast_reduce_out_port: Vec<u16>,

    /// Listen for raw ASCII input on these ports
    #[arg(long, value_delimiter = ',')]
    pub net_raw_in_port: Vec<u16>,

    /// Serve raw ASCII output on these ports
    #[arg(long, value_delimiter = ',')]
    pub net_raw_out_port: Vec<u16>,

    /// Listen for SBS BaseStation input on these ports
    #[arg(long, value_delimiter = ',')]
    pub net_sbs_in_port: Vec<u16>,

    /// Serve SBS BaseStation output on these ports
    #[arg(long, value_delimiter = ',')]
    pub net_sbs_out_port: Vec<u16>,

    /// Outbound connections as host,port,protocol[,uuid]; repeatable
    #[arg(long = "net-connector")]
    pub net_connector: Vec<Connector>,

    /// Bind address for all listeners
    #[arg(long, default_value = "0.0.0.0")]
    pub net_bind_address: String,

    /// Receiver latitude
    #[arg(long)]
    pub lat: Option<f64>,

    /// Receiver longitude
    #[arg(long)]
    pub lon: Option<f64>,

    /// Drop positions farther than this from the receiver (km)
    #[arg(long)]
    pub max_range: Option<f64>,

    /// Cap of the position reliability counters
    #[arg(long, default_value = "4")]
    pub filter_persistence: f64,

    /// Reliability level required for snapshot output
    #[arg(long, default_value = "1")]
    pub json_reliable: f64,

    /// Minimum spacing of trace points in seconds
    #[arg(long, default_value = "15")]
    pub json_trace_interval: f64,

    /// Interval between aircraft.json snapshots in milliseconds
    #[arg(long, default_value = "1000")]
    pub json_interval: u64,

    /// Directory for the JSON snapshots; none disables them
    #[arg(long)]
    pub write_json: Option<PathBuf>,

    /// Also write the per-tile binary snapshots
    #[arg(long, default_value = "false")]
    pub write_bincraft: bool,

    /// Directory of the trace history tree; none disables it
    #[arg(long)]
    pub globe_history_dir: Option<PathBuf>,

    /// Directory for persisted state across restarts; none disables it
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// CSV file with aircraft registrations and types
    #[arg(long)]
    pub db_file: Option<PathBuf>,

    /// UUID announced to Beast outputs (random if omitted)
    #[arg(long)]
    pub uuid: Option<String>,

    /// Heartbeat interval for idle connections in seconds
    #[arg(long, default_value = "60")]
    pub heartbeat: u64,

    /// Log every decoded message
    #[arg(long, default_value = "false")]
    pub debug_decode: bool,
}

impl Options {
    pub fn receiver(&self) -> Option<Position> {
        match (self.lat, self.lon) {
            (Some(latitude), Some(longitude)) => Some(Position {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            receiver: self.receiver(),
            max_range_km: self.max_range,
            filter_persistence: self.filter_persistence,
            json_reliable: self.json_reliable,
            json_trace_interval_ms: (self.json_trace_interval * 1000.) as u64,
            ..TrackerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typical_invocation() {
        let options = Options::parse_from([
            "hub1090",
            "--net-beast-in-port",
            "30004,30005",
            "--net-sbs-out-port",
            "30003",
            "--net-connector",
            "feed.example.net,30004,beast_out,uuid",
            "--lat",
            "48.0",
            "--lon",
            "7.8",
            "--max-range",
            "450",
            "--write-json",
            "/run/hub1090",
        ]);
        assert_eq!(options.net_beast_in_port, vec![30004, 30005]);
        assert_eq!(options.net_sbs_out_port, vec![30003]);
        assert_eq!(options.net_connector.len(), 1);
        assert!(options.net_connector[0].send_uuid);
        let config = options.tracker_config();
        assert_eq!(config.max_range_km, Some(450.));
        assert!(config.receiver.is_some());
    }

    #[test]
    fn test_receiver_requires_both_coordinates() {
        let options = Options::parse_from(["hub1090", "--lat", "48.0"]);
        assert!(options.receiver().is_none());
    }
}
