//! Outbound target checks for plugin-originated requests.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::PluginError;

/// Hostnames that always resolve to the local machine or a metadata service.
const BLOCKED_HOSTNAMES: [&str; 3] = ["localhost", "metadata.google.internal", "metadata"];

fn is_private_v4(v4: &Ipv4Addr) -> bool {
    v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
}

fn is_private_v6(v6: &Ipv6Addr) -> bool {
    if v6.is_loopback() || v6.is_unspecified() {
        return true;
    }
    if let Some(v4) = v6.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = v6.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local
    (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

/// Reject loopback, private, link-local and metadata targets.
pub fn check_public_target(url: &Url) -> Result<(), PluginError> {
    match url.host() {
        None => Err(PluginError::PermissionDenied(format!(
            "URL has no host: '{url}'"
        ))),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if BLOCKED_HOSTNAMES.contains(&domain.as_str()) || domain.ends_with(".localhost") {
                return Err(PluginError::PermissionDenied(format!(
                    "HTTP requests to '{domain}' are blocked (private/reserved address)"
                )));
            }
            Ok(())
        }
        Some(Host::Ipv4(v4)) => {
            if is_private_v4(&v4) {
                return Err(PluginError::PermissionDenied(format!(
                    "HTTP requests to private IP '{v4}' are blocked"
                )));
            }
            Ok(())
        }
        Some(Host::Ipv6(v6)) => {
            if is_private_v6(&v6) {
                return Err(PluginError::PermissionDenied(format!(
                    "HTTP requests to private IP '{v6}' are blocked"
                )));
            }
            Ok(())
        }
    }
}
