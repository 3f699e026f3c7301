//! Header and path rewriting applied to a request before it is proxied.
use std::net::SocketAddr;

use http::{HeaderMap, HeaderName, HeaderValue, Uri, header};
use url::{Position, Url};

use crate::core::auth::Claims;

pub const USER_ID: HeaderName = HeaderName::from_static("user-id");
pub const USER_UUID: HeaderName = HeaderName::from_static("user-uuid");
pub const PROFILE_IDS: HeaderName = HeaderName::from_static("profile-ids");
pub const PERMISSIONS: HeaderName = HeaderName::from_static("permissions");

pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Inbound headers a client could use to impersonate someone.
pub const IDENTITY_HEADERS: [HeaderName; 5] = [
    header::AUTHORIZATION,
    USER_ID,
    USER_UUID,
    PROFILE_IDS,
    PERMISSIONS,
];

pub fn sanitize_identity_headers(headers: &mut HeaderMap) {
    for name in &IDENTITY_HEADERS {
        headers.remove(name);
    }
}

/// Connection-scoped headers that must not travel past this hop.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    // Headers named by `Connection` are hop-by-hop too.
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}

/// Remove `prefix` from `path` when it applies. The result always has a
/// single leading `/` and is never empty.
pub fn strip_route_prefix(path: &str, prefix: &str) -> String {
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    let rest = rest.trim_start_matches('/');
    format!("/{rest}")
}

/// Client address: first `X-Forwarded-For` entry, else `X-Real-IP`, else
/// the peer address without its port.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header_value = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header_value(&X_FORWARDED_FOR)
        .and_then(|xff| xff.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(first.to_string());
    }
    if let Some(real) = header_value(&X_REAL_IP) {
        return Some(real.to_string());
    }
    peer.map(|addr| addr.ip().to_string())
}

/// `https` for TLS connections, otherwise the inbound `X-Forwarded-Proto`
/// or `http`.
pub fn forwarded_proto(headers: &HeaderMap, tls: bool) -> String {
    if tls {
        return "https".to_string();
    }
    headers
        .get(&X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http")
        .to_string()
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "Dropping header with invalid value"),
    }
}

/// Set `X-Forwarded-*` and `X-Real-IP` on an outbound request.
///
/// Must run before the `Host` header is rewritten to the backend authority.
pub fn apply_forwarding_headers(headers: &mut HeaderMap, peer: Option<SocketAddr>, tls: bool) {
    let original_host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ip = client_ip(headers, peer);
    let proto = forwarded_proto(headers, tls);

    if let Some(host) = original_host {
        set_header(headers, X_FORWARDED_HOST, &host);
    }
    if let Some(ip) = &ip {
        set_header(headers, X_REAL_IP, ip);
    }
    set_header(headers, X_FORWARDED_PROTO, &proto);

    if let Some(peer) = peer {
        let peer_ip = peer.ip().to_string();
        let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, {peer_ip}"),
            _ => peer_ip,
        };
        set_header(headers, X_FORWARDED_FOR, &chain);
    }
}

/// Rebuild identity headers from validated claims. Empty values are skipped.
pub fn inject_identity(headers: &mut HeaderMap, claims: &Claims) {
    if let Some(user_id) = claims.subject() {
        set_header(headers, USER_ID, &user_id);
    }
    if let Some(uuid) = claims.user_uuid.as_deref().filter(|u| !u.is_empty()) {
        set_header(headers, USER_UUID, uuid);
    }
    let profiles = claims.profile_ids();
    if !profiles.is_empty() {
        set_header(headers, PROFILE_IDS, &profiles.join(","));
    }
    if !claims.permissions.is_empty() {
        set_header(headers, PERMISSIONS, &claims.permissions.join(","));
    }
}

/// `host[:port]` of the backend, used as the outbound `Host`.
pub fn target_authority(target: &Url) -> &str {
    &target[Position::BeforeHost..Position::AfterPort]
}

/// Absolute backend URI: target base path joined with `path`, plus `query`.
pub fn build_upstream_uri(
    target: &Url,
    path: &str,
    query: Option<&str>,
) -> Result<Uri, http::uri::InvalidUri> {
    let base = target.path().trim_end_matches('/');
    let mut uri = format!(
        "{}://{}{}{}",
        target.scheme(),
        target_authority(target),
        base,
        path
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        uri.push('?');
        uri.push_str(query);
    }
    uri.parse()
}
