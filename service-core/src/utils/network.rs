//! Client network metadata extraction.
//!
//! Precedence for the client address: first non-empty `x-forwarded-for`
//! entry, then `x-real-ip`, then the connected peer, then [`UNKNOWN`].
//! Missing metadata is never an error.

use axum::{
    extract::ConnectInfo,
    http::{Extensions, HeaderMap, header},
};
use std::net::SocketAddr;

/// Marker used when a value cannot be determined.
pub const UNKNOWN: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Network metadata about the caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientNetwork {
    pub ip_address: String,
    pub user_agent: String,
}

impl ClientNetwork {
    pub fn from_request(headers: &HeaderMap, extensions: &Extensions) -> Self {
        Self {
            ip_address: client_ip(headers, peer_addr(extensions)),
            user_agent: user_agent(headers),
        }
    }

    pub fn unknown() -> Self {
        Self {
            ip_address: UNKNOWN.to_string(),
            user_agent: UNKNOWN.to_string(),
        }
    }
}

impl Default for ClientNetwork {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Peer address recorded by `into_make_service_with_connect_info`, if any.
pub fn peer_addr(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|chain| {
            chain
                .split(',')
                .map(str::trim)
                .find(|entry| !entry.is_empty())
        });

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());

    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string()
}
