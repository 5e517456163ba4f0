//! Client IP resolution for requests behind a CDN or reverse proxy.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, HeaderMap},
};

/// Returned when no source yields an address.
pub const UNKNOWN_IP: &str = "unknown";

/// Headers checked in order. `x-forwarded-for` contributes its first entry.
const EDGE_IP_HEADER: &str = "x-nf-client-connection-ip";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REAL_IP_HEADER: &str = "x-real-ip";

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the client IP from proxy headers, falling back to the peer address.
pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(ip) = header_value(headers, EDGE_IP_HEADER) {
        return ip.to_string();
    }
    if let Some(first) = header_value(headers, FORWARDED_FOR_HEADER)
        .and_then(|list| list.split(',').map(str::trim).find(|ip| !ip.is_empty()))
    {
        return first.to_string();
    }
    if let Some(ip) = header_value(headers, REAL_IP_HEADER) {
        return ip.to_string();
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

/// Extractor for the resolved client IP.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(resolve(&parts.headers, peer)))
    }
}
