use std::net::{IpAddr, SocketAddr};

use local_ip_address::list_afinet_netifas;
use str0m::net::Protocol;
use str0m::Candidate;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::error::{Result, WebrtcError};

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over the `info` default.
pub fn init_log() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Pick an IPv4 address that can be shared with a remote ICE peer.
///
/// Skips loopback, link-local and broadcast addresses and returns the first routable
/// interface address.
pub fn select_host_address() -> Result<IpAddr> {
    let interfaces = list_afinet_netifas().map_err(|e| WebrtcError::Ice(e.to_string()))?;

    for (name, ip) in interfaces {
        debug!("iface: {} / {:?}", name, ip);
        if let IpAddr::V4(v) = ip {
            if !v.is_loopback() && !v.is_link_local() && !v.is_broadcast() {
                info!("Using {} ({}) for host candidates", v, name);
                return Ok(ip);
            }
        }
    }

    Err(WebrtcError::Ice("found no usable network interface".into()))
}

/// Host candidate for a socket bound on a routable address.
pub fn host_candidate(addr: SocketAddr) -> Result<Candidate> {
    Candidate::host(addr, Protocol::Udp).map_err(|e| WebrtcError::Ice(e.to_string()))
}
