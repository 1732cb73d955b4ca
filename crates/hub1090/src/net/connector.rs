use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

/// Minimum delay between full connection attempts
pub const CONNECTOR_DELAY: Duration = Duration::from_secs(5);

/// Additional addresses of one DNS answer are tried at this stagger
pub const NEXT_ADDR_DELAY: Duration = Duration::from_millis(100);

/// Per-address connect deadline
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire protocol spoken on a connector or listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    BeastIn,
    BeastOut,
    BeastReduceOut,
    RawIn,
    RawOut,
    SbsIn,
    SbsInMlat,
    SbsInJaero,
    SbsInPrio,
    SbsOut,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::BeastIn => "beast_in",
            Protocol::BeastOut => "beast_out",
            Protocol::BeastReduceOut => "beast_reduce_out",
            Protocol::RawIn => "raw_in",
            Protocol::RawOut => "raw_out",
            Protocol::SbsIn => "sbs_in",
            Protocol::SbsInMlat => "sbs_in_mlat",
            Protocol::SbsInJaero => "sbs_in_jaero",
            Protocol::SbsInPrio => "sbs_in_prio",
            Protocol::SbsOut => "sbs_out",
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(
            self,
            Protocol::BeastIn
                | Protocol::RawIn
                | Protocol::SbsIn
                | Protocol::SbsInMlat
                | Protocol::SbsInJaero
                | Protocol::SbsInPrio
        )
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "beast_in" => Ok(Protocol::BeastIn),
            "beast_out" => Ok(Protocol::BeastOut),
            "beast_reduce_out" => Ok(Protocol::BeastReduceOut),
            "raw_in" => Ok(Protocol::RawIn),
            "raw_out" => Ok(Protocol::RawOut),
            "sbs_in" => Ok(Protocol::SbsIn),
            "sbs_in_mlat" => Ok(Protocol::SbsInMlat),
            "sbs_in_jaero" => Ok(Protocol::SbsInJaero),
            "sbs_in_prio" => Ok(Protocol::SbsInPrio),
            "sbs_out" => Ok(Protocol::SbsOut),
            other => Err(format!("unknown protocol {other:?}")),
        }
    }
}

/**
 * One configured outbound connection, `host,port,protocol` on the
 * command line. The connection is maintained forever: resolve, try each
 * address with a small stagger, and back off between rounds.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Connector {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// announce our UUID after connecting (Beast outputs only)
    pub send_uuid: bool,
}

impl FromStr for Connector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.split(',').map(str::trim).collect();
        if parts.len() < 3 {
            return Err(
                "expected host,port,protocol[,uuid]".to_string()
            );
        }
        let host = parts[0].to_string();
        if host.is_empty() {
            return Err("empty host".to_string());
        }
        let port: u16 = parts[1]
            .parse()
            .map_err(|e| format!("bad port: {e}"))?;
        let protocol: Protocol = parts[2].parse()?;
        let send_uuid = parts.get(3) == Some(&"uuid");
        Ok(Connector {
            host,
            port,
            protocol,
            send_uuid,
        })
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.protocol.name())
    }
}

impl Connector {
    /**
     * One full connection round: resolve the name, walk the answers with
     * [`NEXT_ADDR_DELAY`] between attempts, return the first stream that
     * connects.
     */
    pub async fn connect_once(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let addrs: Vec<SocketAddr> =
            lookup_host((self.host.as_str(), self.port)).await?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "name resolved to no addresses",
            ));
        }
        let mut last_err =
            io::Error::new(io::ErrorKind::Other, "no attempt made");
        for (i, addr) in addrs.iter().enumerate() {
            if i > 0 {
                sleep(NEXT_ADDR_DELAY).await;
            }
            match timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    info!("connected to {self} via {addr}");
                    return Ok((stream, *addr));
                }
                Ok(Err(e)) => {
                    warn!("connect {self} via {addr}: {e}");
                    last_err = e;
                }
                Err(_) => {
                    warn!("connect {self} via {addr}: timed out");
                    last_err = io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect timed out",
                    );
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_from_str() {
        let c: Connector = "feed.example.net,30004,beast_out".parse().unwrap();
        assert_eq!(c.host, "feed.example.net");
        assert_eq!(c.port, 30004);
        assert_eq!(c.protocol, Protocol::BeastOut);
        assert!(!c.send_uuid);

        let c: Connector =
            "feed.example.net,30004,beast_out,uuid".parse().unwrap();
        assert!(c.send_uuid);

        let c: Connector = "10.0.0.1,30005,beast_in".parse().unwrap();
        assert!(c.protocol.is_input());

        assert!(Connector::from_str("nohost").is_err());
        assert!(Connector::from_str("host,notaport,beast_in").is_err());
        assert!(Connector::from_str("host,30005,warp_drive").is_err());
    }
}
