use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Immutable set of accepted API keys. Empty means authentication is off.
#[derive(Clone, Default)]
pub struct ApiKeyGate {
    keys: Arc<[String]>,
}

impl std::fmt::Debug for ApiKeyGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyGate")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl ApiKeyGate {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys
            .into_iter()
            .map(Into::into)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys: keys.into() }
    }

    /// Comma-separated list; blank entries are dropped.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Byte-exact membership. Only the configured list is trimmed, never the
    /// presented key. Every stored key is compared so timing does not reveal
    /// which one matched.
    pub fn check(&self, presented: Option<&str>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let Some(presented) = presented else {
            return false;
        };
        let mut ok = subtle::Choice::from(0u8);
        for key in self.keys.iter() {
            ok |= presented.as_bytes().ct_eq(key.as_bytes());
        }
        ok.into()
    }
}

/// `x-api-key`, else `authorization: Bearer <key>`.
fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(k) = headers.get("x-api-key").and_then(|h| h.to_str().ok()) {
        return Some(k);
    }
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

fn client_hint(headers: &HeaderMap) -> &str {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|h| h.to_str().ok()))
        .unwrap_or("unknown")
}

pub async fn require_api_key(
    State(gate): State<ApiKeyGate>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if gate.check(presented_key(request.headers())) {
        return next.run(request).await;
    }

    warn!(
        client = client_hint(request.headers()),
        method = %request.method(),
        "rejected request with missing or invalid API key"
    );
    pinata_otel::metrics().record_rejection("unauthorized");

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"error":"Unauthorized","message":"missing or invalid API key"}"#,
        ))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_gate_allows_everything() {
        let gate = ApiKeyGate::from_csv(" , ,");
        assert!(!gate.is_enabled());
        assert!(gate.check(None));
        assert!(gate.check(Some("anything")));
    }

    #[test]
    fn membership_is_exact() {
        let gate = ApiKeyGate::from_csv("alpha, beta ,");
        assert!(gate.is_enabled());
        assert!(gate.check(Some("alpha")));
        assert!(gate.check(Some("beta")));
        assert!(!gate.check(Some("alph")));
        assert!(!gate.check(Some("alphaa")));
        assert!(!gate.check(Some("")));
        assert!(!gate.check(None));
    }

    #[test]
    fn presented_key_is_not_trimmed() {
        let gate = ApiKeyGate::from_csv("k1");
        assert!(!gate.check(Some(" k1")));
        assert!(!gate.check(Some("k1 ")));

        let mut h = HeaderMap::new();
        h.insert("authorization", "Bearer  k1".parse().expect("hv"));
        assert_eq!(presented_key(&h), Some(" k1"));
        assert!(!gate.check(presented_key(&h)));

        h.insert("authorization", "Bearer k1".parse().expect("hv"));
        assert!(gate.check(presented_key(&h)));
    }

    #[test]
    fn header_precedence_and_bearer_fallback() {
        let mut h = HeaderMap::new();
        h.insert("authorization", "Bearer from-bearer".parse().expect("hv"));
        assert_eq!(presented_key(&h), Some("from-bearer"));
        h.insert("x-api-key", "from-header".parse().expect("hv"));
        assert_eq!(presented_key(&h), Some("from-header"));

        let mut basic = HeaderMap::new();
        basic.insert("authorization", "Basic abc".parse().expect("hv"));
        assert_eq!(presented_key(&basic), None);
    }

    #[test]
    fn client_hint_prefers_forwarded_for() {
        let mut h = HeaderMap::new();
        assert_eq!(client_hint(&h), "unknown");
        h.insert("x-real-ip", "10.0.0.2".parse().expect("hv"));
        assert_eq!(client_hint(&h), "10.0.0.2");
        h.insert("x-forwarded-for", "10.0.0.1".parse().expect("hv"));
        assert_eq!(client_hint(&h), "10.0.0.1");
    }
}
