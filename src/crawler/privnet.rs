//! Private network detection
//!
//! The crawler must never reach into private address space, either when
//! fetching a link or when following one it discovered. Hosts are resolved
//! and every candidate address checked against the private, loopback, and
//! link-local ranges.

use std::net::IpAddr;

use anyhow::Context;
use async_trait::async_trait;

/// Implemented by types that can decide whether a host resolves to a
/// private network address.
#[async_trait]
pub trait PrivateNetworkDetector: Send + Sync {
    async fn is_private(&self, host: &str) -> anyhow::Result<bool>;
}

/// A detector that resolves hosts through the system resolver.
#[derive(Default)]
pub struct DnsPrivateNetworkDetector;

impl DnsPrivateNetworkDetector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PrivateNetworkDetector for DnsPrivateNetworkDetector {
    async fn is_private(&self, host: &str) -> anyhow::Result<bool> {
        // Literal addresses skip resolution.
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(is_private_ip(ip));
        }
        let addrs = tokio::net::lookup_host((host, 80))
            .await
            .with_context(|| format!("resolving host {host}"))?;
        Ok(addrs.map(|addr| addr.ip()).any(is_private_ip))
    }
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let prefix = v6.segments()[0];
            // fc00::/7 unique-local, fe80::/10 link-local
            v6.is_loopback()
                || v6.is_unspecified()
                || (prefix & 0xfe00) == 0xfc00
                || (prefix & 0xffc0) == 0xfe80
        }
    }
}
