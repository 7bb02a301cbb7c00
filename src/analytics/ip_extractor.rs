//! Client IP extraction from proxy headers with trust validation
//!
//! Forwarding headers are only believed when the configuration says a proxy
//! sits in front of the redirect server. Otherwise the socket peer wins.

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Extract the client IP address for a redirect request
///
/// `socket_addr` is the TCP peer, used whenever the headers cannot be trusted.
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            if !peer_is_trusted(socket_addr, config) {
                return socket_addr;
            }
            extract_from_forwarded(headers, config)
                .or_else(|| extract_from_x_forwarded_for(headers, config))
                .unwrap_or(socket_addr)
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// With no CIDR list every peer counts as a proxy (hop counting decides instead)
fn peer_is_trusted(peer: IpAddr, config: &AnalyticsConfig) -> bool {
    config.trusted_proxies.is_empty() || is_trusted_proxy(peer, config)
}

fn is_trusted_proxy(ip: IpAddr, config: &AnalyticsConfig) -> bool {
    config.trusted_proxies.iter().any(|net| net.contains(&ip))
}

/// RFC 7239 `Forwarded: for=192.0.2.60;proto=http, for="[2001:db8::1]:4711"`
fn extract_from_forwarded(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let hops: Vec<IpAddr> = forwarded
        .split(',')
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let param = param.trim();
                let value = param
                    .strip_prefix("for=")
                    .or_else(|| param.strip_prefix("For="))?;
                parse_forwarded_node(value)
            })
        })
        .collect();

    pick_client(&hops, config)
}

fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with a port
    value.rsplit_once(':')?.0.parse().ok()
}

fn extract_from_x_forwarded_for(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let hops: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    pick_client(&hops, config)
}

/// Walk the chain right to left, skipping hops we trust
fn pick_client(hops: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if hops.is_empty() {
        return None;
    }

    if let Some(num_trusted) = config.num_trusted_proxies {
        // The peer itself is one of the trusted proxies
        let skip = num_trusted.saturating_sub(1);
        if hops.len() > skip {
            return Some(hops[hops.len() - skip - 1]);
        }
        return hops.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        return hops
            .iter()
            .rev()
            .find(|ip| !is_trusted_proxy(**ip, config))
            .or_else(|| hops.first())
            .copied();
    }

    hops.last().copied()
}
