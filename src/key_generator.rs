//! Identity key derivation for rate limiting.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;

use crate::rate_limit_config::{LimitInfo, LimiterConfig};

/// Header carrying the caller-supplied token.
pub const TOKEN_HEADER: &str = "API_KEY";

/// The subject being rate limited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    Ip(String),
    Token(String),
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityKey::Ip(addr) => write!(f, "ip:{}", addr),
            IdentityKey::Token(token) => write!(f, "token:{}", token),
        }
    }
}

impl IdentityKey {
    /// Pick the identity for a request. A non-empty token always wins over the IP.
    pub fn from_request(token: Option<&str>, client_ip: &str) -> Self {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => IdentityKey::Token(token.to_string()),
            None => IdentityKey::Ip(client_ip.to_string()),
        }
    }

    /// Pair this identity with the policy that applies to it
    pub fn into_limit_info(self, config: &LimiterConfig) -> LimitInfo {
        let policy = match &self {
            IdentityKey::Ip(_) => config.ip,
            IdentityKey::Token(token) => config.policy_for_token(token),
        };
        LimitInfo::new(self.to_string(), policy)
    }
}

/// Derive the identity key and policy for a request.
pub fn resolve(token: Option<&str>, client_ip: &str, config: &LimiterConfig) -> LimitInfo {
    IdentityKey::from_request(token, client_ip).into_limit_info(config)
}

/// Read the token header, if present and valid UTF-8
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok())
}

/// Resolve the client address.
///
/// With `trust_proxy` set, the first `X-Forwarded-For` entry and then
/// `X-Real-IP` take precedence over the socket peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = real_ip {
            return ip.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

/// Resolve the client address of a request, using the socket peer recorded
/// by `ConnectInfo` when the server provides it.
pub fn request_client_ip(request: &Request, trust_proxy: bool) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_ip(request.headers(), peer, trust_proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit_config::LimitPolicy;
    use axum::http::HeaderValue;

    fn test_config() -> LimiterConfig {
        LimiterConfig::new(LimitPolicy::from_secs(2, 5), LimitPolicy::from_secs(5, 5))
            .with_token_override("test-token", LimitPolicy::from_secs(3, 5))
    }

    #[test]
    fn test_ip_identity() {
        let info = resolve(None, "192.168.1.1", &test_config());
        assert_eq!(info.key, "ip:192.168.1.1");
        assert_eq!(info.policy, LimitPolicy::from_secs(2, 5));
    }

    #[test]
    fn test_token_takes_precedence() {
        let info = resolve(Some("test-token"), "192.168.1.1", &test_config());
        assert_eq!(info.key, "token:test-token");
        assert_eq!(info.policy, LimitPolicy::from_secs(3, 5));
    }

    #[test]
    fn test_token_without_override_uses_global_policy() {
        let info = resolve(Some("someone-else"), "192.168.1.1", &test_config());
        assert_eq!(info.key, "token:someone-else");
        assert_eq!(info.policy, LimitPolicy::from_secs(5, 5));
    }

    #[test]
    fn test_token_is_trimmed() {
        let info = resolve(Some("  test-token \t"), "192.168.1.1", &test_config());
        assert_eq!(info.key, "token:test-token");
        assert_eq!(info.policy, LimitPolicy::from_secs(3, 5));
    }

    #[test]
    fn test_blank_token_falls_back_to_ip() {
        let info = resolve(Some("   "), "10.0.0.7", &test_config());
        assert_eq!(info.key, "ip:10.0.0.7");
    }

    #[test]
    fn test_client_ip_with_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(client_ip(&headers, None, true), "192.168.1.1");
    }

    #[test]
    fn test_client_ip_with_real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(client_ip(&headers, None, true), "203.0.113.1");
    }

    #[test]
    fn test_client_ip_ignores_headers_when_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("192.168.1.1"));
        let peer: SocketAddr = "172.16.0.4:51000".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer), false), "172.16.0.4");
    }

    #[test]
    fn test_client_ip_fallback() {
        assert_eq!(client_ip(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn test_request_client_ip_uses_connect_info() {
        let peer: SocketAddr = "198.51.100.7:40000".parse().unwrap();
        let mut request = axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "192.168.1.1")
            .body(axum::body::Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        assert_eq!(request_client_ip(&request, true), "192.168.1.1");
        assert_eq!(request_client_ip(&request, false), "198.51.100.7");

        let bare = axum::http::Request::new(axum::body::Body::empty());
        assert_eq!(request_client_ip(&bare, false), "unknown");
    }

    #[test]
    fn test_token_header_lookup() {
        let mut headers = HeaderMap::new();
        headers.insert("api_key", HeaderValue::from_static("abc"));

        assert_eq!(token_from_headers(&headers), Some("abc"));
        assert_eq!(token_from_headers(&HeaderMap::new()), None);
    }
}
