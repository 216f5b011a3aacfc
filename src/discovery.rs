//! Controller discovery by TCP connect scan
//!
//! Probes a single address or an IPv4 CIDR range for hosts that accept
//! connections on the given ports (102 for ISO-on-TCP controllers). Hosts
//! are checked by a pool of scoped worker threads fed over a channel.

use crate::backend::DEFAULT_PORT;
use crate::error::{Result, ScadaError};
use crossbeam_channel::bounded;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

/// Default per-connection timeout
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_millis(250);

/// Default worker count
pub const DEFAULT_SCAN_WORKERS: usize = 256;

const MAX_SCAN_WORKERS: usize = 1024;

/// A host with at least one open port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HostHit {
    pub ip: IpAddr,
    /// Open ports, in the order they were requested
    pub open_ports: Vec<u16>,
}

/// Hosts to probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Targets {
    Single(IpAddr),
    /// Inclusive IPv4 range
    Range(u32, u32),
}

impl Targets {
    fn parse(target: &str) -> Result<Self> {
        let s = target.trim();
        if s.is_empty() {
            return Err(ScadaError::Discovery("empty target".to_string()));
        }

        let Some((addr, prefix)) = s.split_once('/') else {
            return s
                .parse::<IpAddr>()
                .map(Targets::Single)
                .map_err(|e| ScadaError::Discovery(format!("invalid address '{}': {}", s, e)));
        };

        let addr: Ipv4Addr = addr.trim().parse().map_err(|e| {
            ScadaError::Discovery(format!("invalid network address '{}': {}", addr, e))
        })?;
        let prefix: u32 = prefix
            .trim()
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| ScadaError::Discovery(format!("invalid prefix length in '{}'", s)))?;

        // host bits of `addr` are ignored
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        let network = u32::from(addr) & mask;
        let broadcast = network | !mask;

        Ok(match prefix {
            32 => Targets::Single(IpAddr::V4(Ipv4Addr::from(network))),
            31 => Targets::Range(network, broadcast),
            _ => Targets::Range(network + 1, broadcast - 1),
        })
    }

    fn hosts(self) -> Box<dyn Iterator<Item = IpAddr> + Send> {
        match self {
            Targets::Single(ip) => Box::new(std::iter::once(ip)),
            Targets::Range(first, last) => {
                Box::new((first..=last).map(|n| IpAddr::V4(Ipv4Addr::from(n))))
            }
        }
    }
}

fn port_open(ip: IpAddr, port: u16, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&SocketAddr::new(ip, port), timeout).is_ok()
}

fn check_host(ip: IpAddr, ports: &[u16], timeout: Duration) -> Option<HostHit> {
    let open_ports: Vec<u16> = ports
        .iter()
        .copied()
        .filter(|&p| port_open(ip, p, timeout))
        .collect();
    (!open_ports.is_empty()).then_some(HostHit { ip, open_ports })
}

/// Scan `target` (an address or IPv4 CIDR) for hosts with open `ports`
///
/// - prefixes shorter than /31 exclude the network and broadcast addresses
/// - `timeout` of zero falls back to 250 ms
/// - `workers` is clamped to `1..=1024`
/// - `limit_hosts` keeps only the first N hosts of the range
///
/// Returns only hosts with at least one open port, sorted by address.
pub fn scan(
    target: &str,
    ports: &[u16],
    timeout: Duration,
    workers: usize,
    limit_hosts: Option<usize>,
) -> Result<Vec<HostHit>> {
    if ports.is_empty() {
        return Err(ScadaError::Discovery("port list is empty".to_string()));
    }
    let targets = Targets::parse(target)?;
    let timeout = if timeout.is_zero() {
        DEFAULT_SCAN_TIMEOUT
    } else {
        timeout
    };
    let workers = workers.clamp(1, MAX_SCAN_WORKERS);
    let limit = limit_hosts.unwrap_or(usize::MAX);

    tracing::info!(
        "Scanning {} on ports {:?} ({} workers, timeout {:?})",
        target,
        ports,
        workers,
        timeout
    );

    let (host_tx, host_rx) = bounded::<IpAddr>(workers * 2);
    let (hit_tx, hit_rx) = crossbeam_channel::unbounded();

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let host_rx = host_rx.clone();
            let hit_tx = hit_tx.clone();
            scope.spawn(move || {
                for ip in host_rx.iter() {
                    if let Some(hit) = check_host(ip, ports, timeout) {
                        tracing::debug!("Found {} with open ports {:?}", hit.ip, hit.open_ports);
                        let _ = hit_tx.send(hit);
                    }
                }
            });
        }
        drop(hit_tx);

        for ip in targets.hosts().take(limit) {
            if host_tx.send(ip).is_err() {
                break;
            }
        }
        drop(host_tx);
    });

    let mut hits: Vec<HostHit> = hit_rx.try_iter().collect();
    hits.sort();
    tracing::info!("Scan of {} found {} hosts", target, hits.len());
    Ok(hits)
}

/// Scan for controllers on the ISO-on-TCP port with default settings
pub fn scan_controllers(target: &str) -> Result<Vec<HostHit>> {
    scan(
        target,
        &[DEFAULT_PORT],
        DEFAULT_SCAN_TIMEOUT,
        DEFAULT_SCAN_WORKERS,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_parse_single_address() {
        assert_eq!(
            Targets::parse(" 10.92.44.222 ").unwrap(),
            Targets::Single("10.92.44.222".parse().unwrap())
        );
        assert!(Targets::parse("").is_err());
        assert!(Targets::parse("not-an-ip").is_err());
    }

    #[test]
    fn test_parse_cidr_excludes_network_and_broadcast() {
        let targets = Targets::parse("10.10.101.7/24").unwrap();
        let hosts: Vec<IpAddr> = targets.hosts().collect();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], "10.10.101.1".parse::<IpAddr>().unwrap());
        assert_eq!(hosts[253], "10.10.101.254".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_parse_small_prefixes() {
        assert_eq!(Targets::parse("192.168.1.4/31").unwrap().hosts().count(), 2);
        assert_eq!(Targets::parse("192.168.1.4/32").unwrap().hosts().count(), 1);
        assert!(Targets::parse("192.168.1.0/33").is_err());
    }

    #[test]
    fn test_empty_ports_rejected() {
        assert!(scan("127.0.0.1", &[], DEFAULT_SCAN_TIMEOUT, 4, None).is_err());
    }

    #[test]
    fn test_scan_finds_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open = listener.local_addr().unwrap().port();
        // a port that was just released is very likely closed
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let hits = scan(
            "127.0.0.1/32",
            &[closed, open],
            Duration::from_millis(500),
            0,
            None,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(hits[0].open_ports, vec![open]);
    }

    #[test]
    fn test_limit_hosts_zero_scans_nothing() {
        let hits = scan("127.0.0.0/30", &[1], DEFAULT_SCAN_TIMEOUT, 2, Some(0)).unwrap();
        assert!(hits.is_empty());
    }
}
