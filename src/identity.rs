//! Resolution of the address, port and identity this instance registers under.

use std::io;
use std::net::{IpAddr, UdpSocket};

use local_ip_address::local_ip;
use tracing::{debug, warn};

pub const FALLBACK_ADDRESS: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;

const LOOPBACK_ALIASES: [&str; 2] = ["localhost", "127.0.0.1"];
const PROBE_TARGET: &str = "8.8.8.8:80";

/// Resolve the address announced to the registry.
///
/// Order: explicit override, machine hostname (unless it is a loopback alias),
/// the egress interface address, then `"localhost"`.
pub fn resolve_address(address_override: Option<&str>) -> String {
    select_address(address_override, machine_hostname(), outbound_ip)
}

/// Address selection with the environment lookups supplied by the caller.
/// `probe` only runs when the override and hostname are both unusable.
pub fn select_address<P>(address_override: Option<&str>, hostname: Option<String>, probe: P) -> String
where
    P: FnOnce() -> Option<String>,
{
    if let Some(address) = address_override.filter(|a| !a.is_empty()) {
        return address.to_string();
    }

    if let Some(hostname) = hostname
        .filter(|h| !h.is_empty() && !LOOPBACK_ALIASES.contains(&h.as_str()))
    {
        return hostname;
    }

    probe()
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| FALLBACK_ADDRESS.to_string())
}

/// Resolve the announced port: service override, then listen port, then 8080.
/// Unparsable values are logged and skipped.
pub fn resolve_port(service_port: Option<&str>, app_port: Option<&str>) -> u16 {
    for (key, raw) in [("SERVICE_PORT", service_port), ("APP_PORT", app_port)] {
        let Some(raw) = raw.filter(|r| !r.is_empty()) else {
            continue;
        };
        match raw.parse::<u16>() {
            Ok(port) => return port,
            Err(e) => warn!(key, value = raw, error = %e, "Failed to parse port, trying next source"),
        }
    }

    warn!(port = DEFAULT_PORT, "No usable port configured, using default");
    DEFAULT_PORT
}

/// Registry key for one process instance: `{service_name}-{address}-{port}`.
pub fn generate_identity(service_name: &str, address: &str, port: u16) -> String {
    format!("{}-{}-{}", service_name, address, port)
}

fn machine_hostname() -> Option<String> {
    match hostname::get() {
        Ok(name) => name.into_string().ok(),
        Err(e) => {
            debug!(error = %e, "Failed to read hostname");
            None
        }
    }
}

/// Address of the interface the OS routes egress traffic through. Connecting a
/// UDP socket sends nothing; it only selects a route.
fn outbound_ip() -> Option<String> {
    let probe = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(PROBE_TARGET)?;
        Ok(socket.local_addr()?.ip())
    };

    let ip = match probe() {
        Ok(ip) if !ip.is_unspecified() => Some(ip),
        Ok(_) => None,
        Err(e) => {
            debug!(error = %e, "Outbound route probe failed, asking interface table");
            None
        }
    };

    ip.or_else(|| local_ip().ok()).map(|ip| ip.to_string())
}
