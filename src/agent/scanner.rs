//! Site discovery: a TCP connect sweep and a WAN latency probe.
//!
//! Both sit behind traits so the agent loop can run against fakes in tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::agent::AgentError;
use crate::config::ScanConfig;
use crate::storage::{HostRecord, HostState, PortState, ServiceRecord};

/// Smallest CIDR prefix accepted (a /16 is 65k addresses).
pub const MIN_CIDR_PREFIX: u8 = 16;

/// Result of one discovery pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanResult {
    /// Hosts that answered on at least one port.
    pub hosts: Vec<HostRecord>,
    /// Addresses probed, answering or not.
    pub addresses_scanned: usize,
}

/// Discovers hosts and services on the local network.
#[async_trait::async_trait]
pub trait Scanner: Send + Sync + 'static {
    async fn scan(&self) -> Result<ScanResult, AgentError>;

    /// Human-readable description of what is scanned.
    fn network(&self) -> Option<String> {
        None
    }
}

/// Measures round-trip latency to a WAN endpoint.
#[async_trait::async_trait]
pub trait LatencyProbe: Send + Sync + 'static {
    /// Average latency in milliseconds, `None` when the target never answered.
    async fn measure(&self) -> Option<f64>;
}

/// Expand IPv4 addresses and CIDR blocks into a de-duplicated host list.
///
/// Network and broadcast addresses are skipped for prefixes shorter than /31.
pub fn expand_targets(targets: &[String]) -> Result<Vec<Ipv4Addr>, AgentError> {
    let mut hosts = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for target in targets {
        let target = target.trim();
        let expanded = match target.split_once('/') {
            Some((addr, prefix)) => expand_cidr(target, addr, prefix)?,
            None => vec![target.parse::<Ipv4Addr>().map_err(|_| {
                AgentError::Config(format!("'{target}' is not an IPv4 address or CIDR block"))
            })?],
        };
        for host in expanded {
            if seen.insert(host) {
                hosts.push(host);
            }
        }
    }

    Ok(hosts)
}

fn expand_cidr(target: &str, addr: &str, prefix: &str) -> Result<Vec<Ipv4Addr>, AgentError> {
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| AgentError::Config(format!("invalid network address in '{target}'")))?;
    let prefix: u8 = prefix
        .parse()
        .ok()
        .filter(|p| *p <= 32)
        .ok_or_else(|| AgentError::Config(format!("invalid prefix length in '{target}'")))?;
    if prefix < MIN_CIDR_PREFIX {
        return Err(AgentError::Config(format!(
            "'{target}' is too large, prefixes below /{MIN_CIDR_PREFIX} are not scanned"
        )));
    }

    let mask = u32::MAX.checked_shl(u32::from(32 - prefix)).unwrap_or(0);
    let network = u32::from(addr) & mask;
    let broadcast = network | !mask;

    let (first, last) = if prefix >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    };
    Ok((first..=last).map(Ipv4Addr::from).collect())
}

/// Conventional service name for a well-known port.
fn service_name(port: u16) -> Option<&'static str> {
    Some(match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "domain",
        80 => "http",
        110 => "pop3",
        143 => "imap",
        443 => "https",
        445 => "microsoft-ds",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        8080 => "http-proxy",
        _ => return None,
    })
}

/// Probe one port: accepted is open, refused is closed, silence is filtered.
async fn probe_port(addr: SocketAddr, connect_timeout: Duration) -> PortState {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => PortState::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortState::Closed,
        Ok(Err(_)) | Err(_) => PortState::Filtered,
    }
}

/// TCP connect sweep over configured hosts and ports.
#[derive(Debug, Clone)]
pub struct TcpSweepScanner {
    targets: Vec<String>,
    hosts: Vec<Ipv4Addr>,
    ports: Vec<u16>,
    connect_timeout: Duration,
    concurrency: usize,
}

impl TcpSweepScanner {
    /// # Errors
    /// Returns `AgentError::Config` if a target cannot be parsed.
    pub fn new(
        targets: Vec<String>,
        ports: Vec<u16>,
        connect_timeout: Duration,
        concurrency: usize,
    ) -> Result<Self, AgentError> {
        let hosts = expand_targets(&targets)?;
        Ok(Self {
            targets,
            hosts,
            ports,
            connect_timeout,
            concurrency: concurrency.max(1),
        })
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, AgentError> {
        Self::new(
            config.targets.clone(),
            config.ports.clone(),
            config.connect_timeout,
            config.concurrency,
        )
    }
}

/// Run `task` over `items` with at most `limit` spawned tasks alive at once.
/// Results come back in completion order.
async fn run_bounded<I, F, Fut>(
    items: I,
    limit: usize,
    task: F,
) -> Result<Vec<Fut::Output>, AgentError>
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let limit = limit.max(1);
    let mut tasks = JoinSet::new();
    let mut results = Vec::new();

    for item in items {
        if tasks.len() >= limit
            && let Some(joined) = tasks.join_next().await
        {
            results.push(joined.map_err(|e| AgentError::Scan(e.to_string()))?);
        }
        tasks.spawn(task(item));
    }
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.map_err(|e| AgentError::Scan(e.to_string()))?);
    }

    Ok(results)
}

#[async_trait::async_trait]
impl Scanner for TcpSweepScanner {
    async fn scan(&self) -> Result<ScanResult, AgentError> {
        let connect_timeout = self.connect_timeout;
        let targets: Vec<SocketAddrV4> = self
            .hosts
            .iter()
            .flat_map(|host| {
                self.ports
                    .iter()
                    .map(move |&port| SocketAddrV4::new(*host, port))
            })
            .collect();

        let probed = run_bounded(targets, self.concurrency, move |addr| async move {
            (addr, probe_port(SocketAddr::V4(addr), connect_timeout).await)
        })
        .await?;

        let mut answers: BTreeMap<Ipv4Addr, Vec<(u16, PortState)>> = BTreeMap::new();
        for (addr, state) in probed {
            if matches!(state, PortState::Open | PortState::Closed) {
                answers.entry(*addr.ip()).or_default().push((addr.port(), state));
            }
        }

        let hosts = answers
            .into_iter()
            .map(|(ip, mut ports)| {
                ports.sort_by_key(|(port, _)| *port);
                HostRecord {
                    address: ip.to_string(),
                    hostname: None,
                    state: HostState::Up,
                    mac_address: None,
                    vendor: None,
                    os: None,
                    services: ports
                        .into_iter()
                        .filter(|(_, state)| *state == PortState::Open)
                        .map(|(port, state)| ServiceRecord {
                            port,
                            state,
                            service: service_name(port).map(str::to_string),
                            product: None,
                            version: None,
                        })
                        .collect(),
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            scanned = self.hosts.len(),
            up = hosts.len(),
            "TCP sweep finished"
        );

        Ok(ScanResult {
            hosts,
            addresses_scanned: self.hosts.len(),
        })
    }

    fn network(&self) -> Option<String> {
        (!self.targets.is_empty()).then(|| self.targets.join(","))
    }
}

/// Average TCP connect time to a `host:port` target.
#[derive(Debug, Clone)]
pub struct TcpLatencyProbe {
    target: String,
    samples: u32,
    connect_timeout: Duration,
}

impl TcpLatencyProbe {
    pub fn new(target: impl Into<String>, samples: u32, connect_timeout: Duration) -> Self {
        Self {
            target: target.into(),
            samples: samples.max(1),
            connect_timeout,
        }
    }
}

#[async_trait::async_trait]
impl LatencyProbe for TcpLatencyProbe {
    async fn measure(&self) -> Option<f64> {
        let mut total_ms = 0.0;
        let mut answered = 0u32;

        for _ in 0..self.samples {
            let start = Instant::now();
            match timeout(self.connect_timeout, TcpStream::connect(self.target.as_str())).await {
                Ok(Ok(_stream)) => {
                    total_ms += start.elapsed().as_secs_f64() * 1000.0;
                    answered += 1;
                }
                Ok(Err(e)) => {
                    tracing::debug!(wan_target = %self.target, error = %e, "WAN latency sample failed");
                }
                Err(_) => {
                    tracing::debug!(wan_target = %self.target, "WAN latency sample timed out");
                }
            }
        }

        if answered == 0 {
            tracing::warn!(wan_target = %self.target, "WAN target unreachable");
            return None;
        }
        let average = total_ms / f64::from(answered);
        Some((average * 100.0).round() / 100.0)
    }
}
