use shared::{Role, DEFAULT_PORT};
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Timing knobs for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// How often a PING goes out.
    pub ping_interval: Duration,
    /// How often silence is measured against the thresholds below.
    pub check_interval: Duration,
    /// Silence after which the link is reported as lagging.
    pub lag_threshold: Duration,
    /// Silence after which the link is declared dead.
    pub silence_timeout: Duration,
    pub connect_timeout: Duration,
    pub accept_timeout: Duration,
    /// Upper bound on waiting for queued frames during an orderly shutdown.
    pub flush_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(1),
            check_interval: Duration::from_millis(50),
            lag_threshold: Duration::from_millis(200),
            silence_timeout: Duration::from_millis(5000),
            connect_timeout: Duration::from_secs(5),
            accept_timeout: Duration::from_secs(30),
            flush_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub role: Role,
    /// Bind address for the server, peer address for the client.
    pub addr: SocketAddr,
    pub link: LinkConfig,
}

impl EndpointConfig {
    /// Listens on every interface at `port`.
    pub fn server(port: u16) -> Self {
        Self::server_on(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    pub fn server_on(addr: SocketAddr) -> Self {
        Self {
            role: Role::Server,
            addr,
            link: LinkConfig::default(),
        }
    }

    pub fn client(peer: SocketAddr) -> Self {
        Self {
            role: Role::Client,
            addr: peer,
            link: LinkConfig::default(),
        }
    }

    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }
}

/// Accepts either `ip:port` or a bare IP, which gets `default_port`.
pub fn parse_peer_addr(input: &str, default_port: u16) -> Result<SocketAddr, AddrParseError> {
    let input = input.trim();
    match input.parse::<SocketAddr>() {
        Ok(addr) => Ok(addr),
        Err(_) => input
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, default_port)),
    }
}

/// Same as [`parse_peer_addr`] with the protocol's fixed port.
pub fn peer_addr(input: &str) -> Result<SocketAddr, AddrParseError> {
    parse_peer_addr(input, DEFAULT_PORT)
}
