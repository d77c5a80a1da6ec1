use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};

use crate::{AppState, config::TrustedProxiesConfig, services::RequestContext};

/// Resolve the client IP for a request.
///
/// Forwarding headers are only consulted when the connecting peer is a
/// trusted proxy. The rightmost untrusted address in the chain wins, since
/// everything left of it can be forged by the client.
pub fn extract_client_ip_from_parts(
    headers: &HeaderMap,
    connecting_addr: Option<SocketAddr>,
    trusted_proxies: &TrustedProxiesConfig,
) -> Option<IpAddr> {
    let connecting_ip = connecting_addr.map(|addr| addr.ip());

    if !trusted_proxies.is_configured() {
        return connecting_ip;
    }

    let parsed_cidrs = trusted_proxies.parsed_cidrs();

    let should_trust_headers = match connecting_ip {
        Some(ip) => {
            trusted_proxies.dangerously_trust_all
                || trusted_proxies.is_trusted_ip(ip, &parsed_cidrs)
        }
        None => trusted_proxies.dangerously_trust_all,
    };

    if !should_trust_headers {
        return connecting_ip;
    }

    if let Some(header_value) = headers.get(&trusted_proxies.real_ip_header)
        && let Ok(header_str) = header_value.to_str()
    {
        let ips: Vec<IpAddr> = header_str
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();

        if !ips.is_empty() {
            if trusted_proxies.dangerously_trust_all {
                return ips.into_iter().next();
            }

            if let Some(ip) = ips
                .into_iter()
                .rev()
                .find(|&ip| !trusted_proxies.is_trusted_ip(ip, &parsed_cidrs))
            {
                return Some(ip);
            }
        }
    }

    connecting_ip
}

/// IP and user agent for audit rows and sessions.
pub fn request_context(
    headers: &HeaderMap,
    connecting_addr: Option<SocketAddr>,
    trusted_proxies: &TrustedProxiesConfig,
) -> RequestContext {
    RequestContext {
        ip_address: extract_client_ip_from_parts(headers, connecting_addr, trusted_proxies)
            .map(|ip| ip.to_string()),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.chars().take(512).collect()),
    }
}

/// Extractor for the caller's [`RequestContext`]. Works with or without
/// `ConnectInfo`, so routers built for tests need no socket.
pub struct ClientContext(pub RequestContext);

impl FromRequestParts<AppState> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let connecting_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self(request_context(
            &parts.headers,
            connecting_addr,
            &state.config.server.trusted_proxies,
        )))
    }
}
