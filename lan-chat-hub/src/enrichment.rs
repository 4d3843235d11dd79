//! Best-effort device details for a peer address.
//!
//! Lookups shell out to OS utilities (`getent` for the hostname, `arp` for
//! the MAC address) and degrade to [`UNAVAILABLE`] on any failure. They
//! never fail registration.

use std::{net::IpAddr, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use tokio::{process::Command, time::timeout};
use tracing::debug;

/// Marker reported when a detail could not be resolved.
pub const UNAVAILABLE: &str = "N/A";

/// Upper bound on each OS lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}").expect("static MAC pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub mac: String,
    pub hostname: String,
}

impl DeviceInfo {
    pub fn unavailable() -> Self {
        Self {
            mac: UNAVAILABLE.to_string(),
            hostname: UNAVAILABLE.to_string(),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::unavailable()
    }
}

#[async_trait]
pub trait DeviceLookup: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> DeviceInfo;
}

/// Skips enrichment entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

#[async_trait]
impl DeviceLookup for NoLookup {
    async fn lookup(&self, _ip: IpAddr) -> DeviceInfo {
        DeviceInfo::unavailable()
    }
}

/// Resolves details through the host's `getent` and `arp` commands.
#[derive(Debug, Clone)]
pub struct SystemLookup {
    timeout: Duration,
}

impl SystemLookup {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let output = match timeout(self.timeout, Command::new(program).args(args).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                debug!(program, ?error, "lookup command failed to start");
                return None;
            }
            Err(_) => {
                debug!(program, "lookup command timed out");
                return None;
            }
        };

        if !output.status.success() {
            debug!(program, status = %output.status, "lookup command exited unsuccessfully");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for SystemLookup {
    fn default() -> Self {
        Self::new(LOOKUP_TIMEOUT)
    }
}

#[async_trait]
impl DeviceLookup for SystemLookup {
    async fn lookup(&self, ip: IpAddr) -> DeviceInfo {
        let address = ip.to_string();
        let hosts_args = ["hosts", address.as_str()];
        let arp_args = ["-a", address.as_str()];
        let (hosts, arp) = tokio::join!(
            self.run("getent", &hosts_args),
            self.run("arp", &arp_args),
        );

        DeviceInfo {
            mac: arp
                .as_deref()
                .and_then(parse_mac)
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
            hostname: hosts
                .as_deref()
                .and_then(parse_hostname)
                .unwrap_or_else(|| UNAVAILABLE.to_string()),
        }
    }
}

/// First MAC address found in `arp` output.
pub fn parse_mac(output: &str) -> Option<String> {
    MAC_PATTERN.find(output).map(|m| m.as_str().to_string())
}

/// Canonical name from a `getent hosts` line (`<ip> <name> [aliases]`).
pub fn parse_hostname(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.split_whitespace().nth(1))
        .map(str::to_string)
}
