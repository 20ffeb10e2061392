//! Client identity and principal extraction.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};

/// Identity used when the peer address is unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// An authenticated caller, inserted into request extensions by an
/// authentication layer running before admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
}

/// Resolve the client identity for a request.
///
/// Forwarded headers are only consulted when the deployment sits behind a
/// proxy that sets them.
pub fn identify(headers: &HeaderMap, extensions: &Extensions, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(client) = forwarded {
            return client.to_string();
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Whether the request carries an authenticated principal.
pub fn is_authenticated(headers: &HeaderMap, extensions: &Extensions, principal_header: Option<&str>) -> bool {
    extensions.get::<Principal>().is_some()
        || principal_header.is_some_and(|name| headers.contains_key(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn with_peer(addr: &str) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(addr.parse::<SocketAddr>().unwrap()));
        extensions
    }

    #[test]
    fn test_identify_from_peer_address() {
        let extensions = with_peer("192.168.1.7:51234");
        assert_eq!(identify(&HeaderMap::new(), &extensions, false), "192.168.1.7");
    }

    #[test]
    fn test_identify_unknown_without_peer() {
        assert_eq!(identify(&HeaderMap::new(), &Extensions::new(), true), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"));
        let extensions = with_peer("10.0.0.1:443");

        assert_eq!(identify(&headers, &extensions, true), "203.0.113.9");
        assert_eq!(identify(&headers, &extensions, false), "10.0.0.1");
    }

    #[test]
    fn test_empty_forwarded_for_falls_back() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        let extensions = with_peer("10.0.0.1:443");
        assert_eq!(identify(&headers, &extensions, true), "10.0.0.1");
    }

    #[test]
    fn test_authentication_sources() {
        let mut extensions = Extensions::new();
        assert!(!is_authenticated(&HeaderMap::new(), &extensions, None));

        extensions.insert(Principal { id: "uid:1".to_string() });
        assert!(is_authenticated(&HeaderMap::new(), &extensions, None));

        let mut headers = HeaderMap::new();
        headers.insert("x-user", HeaderValue::from_static("1"));
        assert!(is_authenticated(&headers, &Extensions::new(), Some("x-user")));
        assert!(!is_authenticated(&headers, &Extensions::new(), Some("x-other")));
        assert!(!is_authenticated(&headers, &Extensions::new(), None));
    }
}
