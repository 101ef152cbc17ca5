use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use rand::Rng;

/// How many of the most recent response times feed the rolling average.
const RESPONSE_TIME_READINGS: usize = 5;

/// How long to wait for the initial TCP connect. This is the only timeout in
/// the provider layer; established connections block until the server
/// answers or the socket dies.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ConnectionType {
    Tcp,
    Ssl,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Tcp => write!(f, "TCP"),
            ConnectionType::Ssl => write!(f, "SSL"),
        }
    }
}

/// A single foreign-chain server.
///
/// Identity is `(hostname, port, connection_type)` only; the rolling response
/// times are operational state and are deliberately excluded from `Eq` and
/// `Hash` so that a rediscovered server matches its existing pool entry.
#[derive(Clone, Debug)]
pub struct Server {
    pub hostname: String,
    pub port: u16,
    pub connection_type: ConnectionType,
    response_times: VecDeque<u64>,
}

impl Server {
    pub fn new(hostname: impl Into<String>, connection_type: ConnectionType, port: u16) -> Self {
        Server {
            hostname: hostname.into(),
            port,
            connection_type,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_READINGS),
        }
    }

    /// Parses `tcp://host:port` or `ssl://host:port`.
    pub fn parse(s: &str) -> Option<Self> {
        let (connection_type, rest) = if let Some(rest) = s.strip_prefix("tcp://") {
            (ConnectionType::Tcp, rest)
        } else if let Some(rest) = s.strip_prefix("ssl://") {
            (ConnectionType::Ssl, rest)
        } else {
            return None;
        };

        let (hostname, port) = rest.rsplit_once(':')?;
        let port = port.parse::<u16>().ok()?;
        if hostname.is_empty() {
            return None;
        }

        Some(Server::new(hostname, connection_type, port))
    }

    pub fn add_response_time(&mut self, millis: u64) {
        while self.response_times.len() >= RESPONSE_TIME_READINGS {
            self.response_times.pop_front();
        }
        self.response_times.push_back(millis);
    }

    /// Rolling average response time in milliseconds, or zero until enough
    /// samples have been collected.
    pub fn average_response_time(&self) -> u64 {
        if self.response_times.len() < RESPONSE_TIME_READINGS {
            return 0;
        }
        self.response_times.iter().sum::<u64>() / self.response_times.len() as u64
    }
}

impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.connection_type == other.connection_type
            && self.port == other.port
            && self.hostname == other.hostname
    }
}

impl Eq for Server {}

impl Hash for Server {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hostname.hash(state);
        self.port.hash(state);
        self.connection_type.hash(state);
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.connection_type, self.hostname, self.port)
    }
}

/// Per-network pool of foreign-chain servers.
///
/// `known` only ever grows (via peer discovery); `remaining` is the subset
/// still untried in the current failover cycle and is refilled from `known`
/// when exhausted. `useless` servers stay in `known` for diagnostics but are
/// skipped during selection.
#[derive(Debug)]
pub struct ServerPool {
    known: Vec<Server>,
    remaining: Vec<Server>,
    useless: HashSet<Server>,
}

impl ServerPool {
    pub fn new(initial: Vec<Server>) -> Self {
        let mut known: Vec<Server> = Vec::new();
        for server in initial {
            if !known.contains(&server) {
                known.push(server);
            }
        }

        ServerPool {
            known,
            remaining: Vec::new(),
            useless: HashSet::new(),
        }
    }

    pub fn refill_if_empty(&mut self) {
        if self.remaining.is_empty() {
            self.remaining = self.known.clone();
        }
    }

    /// Removes and returns a uniformly random untried server. Random rather
    /// than round-robin so a fleet of clients restarting together does not
    /// herd onto the same "first" server.
    pub fn pick_random(&mut self) -> Option<Server> {
        while !self.remaining.is_empty() {
            let index = rand::thread_rng().gen_range(0..self.remaining.len());
            let server = self.remaining.remove(index);
            if self.useless.contains(&server) {
                continue;
            }
            return Some(server);
        }
        None
    }

    /// Merges peer-discovered servers, dropping exact duplicates of servers
    /// we already know.
    pub fn merge_discovered(&mut self, discovered: HashSet<Server>) {
        for server in discovered {
            if self.known.contains(&server) {
                continue;
            }
            self.known.push(server.clone());
            self.remaining.push(server);
        }
    }

    pub fn mark_useless(&mut self, server: &Server) {
        self.useless.insert(server.clone());
    }

    pub fn remaining_is_empty(&self) -> bool {
        self.remaining.is_empty()
    }

    pub fn known_servers(&self) -> Vec<Server> {
        self.known.clone()
    }

    pub fn remaining_servers(&self) -> Vec<Server> {
        self.remaining.clone()
    }

    pub fn useless_servers(&self) -> Vec<Server> {
        self.useless.iter().cloned().collect()
    }
}

/// A connected socket, plain or TLS.
///
/// Certificate validation is deliberately disabled: server authenticity is
/// established by comparing the reported genesis hash against the expected
/// one, not by the CA system, matching how public Electrum-style servers are
/// operated (self-signed certificates are the norm).
pub enum RemoteStream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

pub fn connect_stream(server: &Server) -> io::Result<RemoteStream> {
    let address = (server.hostname.as_str(), server.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "hostname did not resolve"))?;

    let tcp = TcpStream::connect_timeout(&address, CONNECT_TIMEOUT)?;
    tcp.set_nodelay(true)?;

    match server.connection_type {
        ConnectionType::Tcp => Ok(RemoteStream::Plain(tcp)),
        ConnectionType::Ssl => {
            let connector = native_tls::TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let tls = connector
                .connect(&server.hostname, tcp)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            Ok(RemoteStream::Tls(Box::new(tls)))
        }
    }
}

impl Read for RemoteStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            RemoteStream::Plain(stream) => stream.read(buf),
            RemoteStream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for RemoteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            RemoteStream::Plain(stream) => stream.write(buf),
            RemoteStream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            RemoteStream::Plain(stream) => stream.flush(),
            RemoteStream::Tls(stream) => stream.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_identity_ignores_response_times() {
        let mut a = Server::new("electrum.example", ConnectionType::Ssl, 50002);
        let b = Server::new("electrum.example", ConnectionType::Ssl, 50002);

        for millis in [10, 20, 30, 40, 50] {
            a.add_response_time(millis);
        }

        assert_eq!(a, b);
        assert_eq!(a.average_response_time(), 30);
        assert_eq!(b.average_response_time(), 0);
    }

    #[test]
    fn average_needs_enough_samples() {
        let mut server = Server::new("host", ConnectionType::Tcp, 50001);
        server.add_response_time(100);
        server.add_response_time(100);
        assert_eq!(server.average_response_time(), 0);
    }

    #[test]
    fn pool_refills_from_known_and_skips_useless() {
        let dead = Server::new("dead.example", ConnectionType::Tcp, 50001);
        let live = Server::new("live.example", ConnectionType::Tcp, 50001);
        let mut pool = ServerPool::new(vec![dead.clone(), live.clone()]);

        pool.mark_useless(&dead);
        pool.refill_if_empty();

        assert_eq!(pool.pick_random(), Some(live));
        assert_eq!(pool.pick_random(), None);

        // Useless servers stay known for diagnostics.
        assert!(pool.known_servers().contains(&dead));
        assert_eq!(pool.useless_servers(), vec![dead]);
    }

    #[test]
    fn discovery_drops_duplicates() {
        let seed = Server::new("seed.example", ConnectionType::Ssl, 50002);
        let mut pool = ServerPool::new(vec![seed.clone()]);

        let mut discovered = HashSet::new();
        discovered.insert(seed);
        discovered.insert(Server::new("peer.example", ConnectionType::Tcp, 50001));
        pool.merge_discovered(discovered);

        assert_eq!(pool.known_servers().len(), 2);
        assert_eq!(pool.remaining_servers().len(), 1);
    }

    #[test]
    fn parses_server_urls() {
        let server = Server::parse("ssl://electrum.example:50002").unwrap();
        assert_eq!(server.connection_type, ConnectionType::Ssl);
        assert_eq!(server.hostname, "electrum.example");
        assert_eq!(server.port, 50002);

        assert!(Server::parse("electrum.example:50002").is_none());
        assert!(Server::parse("tcp://:50001").is_none());
    }
}
