use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::types::{
    AddSignatureRequest, CreateGroupRequest, CreatePaymentInstructionRequest, FileListQuery,
    FileRef, GatewayContent, GatewayFetchRequest, GroupListQuery, GroupMembership, Network,
    PageQuery, PrivateLinkRequest, SignatureRef, UpdateFileRequest, UpdateGroupRequest,
    VectorQuery, group_body,
};

pub const DEFAULT_API_BASE_URL: &str = "https://api.pinata.cloud";
pub const DEFAULT_UPLOADS_BASE_URL: &str = "https://uploads.pinata.cloud";

/// Upper bound on gateway content returned to the caller.
pub const MAX_GATEWAY_CONTENT_BYTES: usize = 256 * 1024;

/// Upper bound on upstream error bodies carried in errors.
const MAX_ERROR_BODY_CHARS: usize = 2048;

#[derive(Debug, Error)]
pub enum PinataClientError {
    #[error("PINATA_JWT is not configured")]
    MissingCredential,
    #[error("gateway domain is not configured (set PINATA_GATEWAY_URL)")]
    MissingGateway,
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    InvalidBaseUrl(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("unexpected upstream response: {0}")]
    UnexpectedResponse(String),
}

#[derive(Clone)]
pub struct PinataClientOptions {
    pub api_base_url: Url,
    pub uploads_base_url: Url,
    pub gateway_base_url: Option<Url>,
    pub jwt: Option<String>,
    pub timeout: Duration,
}

impl PinataClientOptions {
    pub fn new(jwt: Option<String>) -> Result<Self, PinataClientError> {
        Ok(Self {
            api_base_url: Url::parse(DEFAULT_API_BASE_URL)?,
            uploads_base_url: Url::parse(DEFAULT_UPLOADS_BASE_URL)?,
            gateway_base_url: None,
            jwt: jwt.filter(|j| !j.trim().is_empty()),
            timeout: Duration::from_secs(30),
        })
    }

    /// Accepts either a bare domain (`example.mypinata.cloud`) or a full URL.
    pub fn with_gateway(mut self, domain_or_url: &str) -> Result<Self, PinataClientError> {
        let trimmed = domain_or_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            self.gateway_base_url = None;
            return Ok(self);
        }
        let url = if trimmed.contains("://") {
            Url::parse(trimmed)?
        } else {
            Url::parse(&format!("https://{trimmed}"))?
        };
        self.gateway_base_url = Some(url);
        Ok(self)
    }
}

impl fmt::Debug for PinataClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinataClientOptions")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("uploads_base_url", &self.uploads_base_url.as_str())
            .field("gateway_base_url", &self.gateway_base_url.as_ref().map(Url::as_str))
            .field("jwt", &self.jwt.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Client for the pinning service REST API and its gateway.
#[derive(Clone)]
pub struct PinataClient {
    http: reqwest::Client,
    api_base: Url,
    uploads_base: Url,
    gateway_base: Option<Url>,
    jwt: Option<Arc<str>>,
}

impl fmt::Debug for PinataClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinataClient")
            .field("api_base", &self.api_base.as_str())
            .field("has_jwt", &self.jwt.is_some())
            .finish_non_exhaustive()
    }
}

impl PinataClient {
    pub fn new(opts: PinataClientOptions) -> Result<Self, PinataClientError> {
        let http = reqwest::Client::builder()
            .timeout(opts.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            http,
            api_base: opts.api_base_url,
            uploads_base: opts.uploads_base_url,
            gateway_base: opts.gateway_base_url,
            jwt: opts.jwt.map(Arc::from),
        })
    }

    pub fn has_credential(&self) -> bool {
        self.jwt.is_some()
    }

    pub async fn test_authentication(&self) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.api_base, &["data", "testAuthentication"])?;
        self.send_json(Method::GET, url, None).await
    }

    pub async fn list_files(&self, q: &FileListQuery) -> Result<Value, PinataClientError> {
        let mut url = endpoint(&self.api_base, &["v3", "files", q.network.as_str()])?;
        append_query(&mut url, q.query_pairs());
        self.send_json(Method::GET, url, None).await
    }

    pub async fn get_file(&self, f: &FileRef) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.api_base, &["v3", "files", f.network.as_str(), &f.id])?;
        self.send_json(Method::GET, url, None).await
    }

    pub async fn update_file(&self, req: &UpdateFileRequest) -> Result<Value, PinataClientError> {
        let url = endpoint(
            &self.api_base,
            &["v3", "files", req.network.as_str(), &req.id],
        )?;
        self.send_json(Method::PUT, url, Some(req.body())).await
    }

    pub async fn delete_file(&self, f: &FileRef) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.api_base, &["v3", "files", f.network.as_str(), &f.id])?;
        self.send_json(Method::DELETE, url, None).await
    }

    pub async fn list_groups(&self, q: &GroupListQuery) -> Result<Value, PinataClientError> {
        let mut url = endpoint(&self.api_base, &["v3", "groups", q.network.as_str()])?;
        append_query(&mut url, q.query_pairs());
        self.send_json(Method::GET, url, None).await
    }

    pub async fn create_group(&self, req: &CreateGroupRequest) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.api_base, &["v3", "groups", req.network.as_str()])?;
        let body = group_body(Some(&req.name), req.is_public);
        self.send_json(Method::POST, url, Some(body)).await
    }

    pub async fn get_group(&self, g: &FileRef) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.api_base, &["v3", "groups", g.network.as_str(), &g.id])?;
        self.send_json(Method::GET, url, None).await
    }

    pub async fn update_group(&self, req: &UpdateGroupRequest) -> Result<Value, PinataClientError> {
        let url = endpoint(
            &self.api_base,
            &["v3", "groups", req.network.as_str(), &req.id],
        )?;
        let body = group_body(req.name.as_deref(), req.is_public);
        self.send_json(Method::PUT, url, Some(body)).await
    }

    pub async fn delete_group(&self, g: &FileRef) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.api_base, &["v3", "groups", g.network.as_str(), &g.id])?;
        self.send_json(Method::DELETE, url, None).await
    }

    pub async fn add_file_to_group(&self, m: &GroupMembership) -> Result<Value, PinataClientError> {
        let url = self.membership_url(m)?;
        self.send_json(Method::PUT, url, None).await
    }

    pub async fn remove_file_from_group(
        &self,
        m: &GroupMembership,
    ) -> Result<Value, PinataClientError> {
        let url = self.membership_url(m)?;
        self.send_json(Method::DELETE, url, None).await
    }

    fn membership_url(&self, m: &GroupMembership) -> Result<Url, PinataClientError> {
        endpoint(
            &self.api_base,
            &[
                "v3",
                "groups",
                m.network.as_str(),
                &m.group_id,
                "ids",
                &m.file_id,
            ],
        )
    }

    /// Returns the signed URL as a JSON string.
    pub async fn create_private_download_link(
        &self,
        req: &PrivateLinkRequest,
    ) -> Result<Value, PinataClientError> {
        let gateway = self
            .gateway_base
            .as_ref()
            .ok_or(PinataClientError::MissingGateway)?;
        let target = endpoint(gateway, &["files", &req.cid])?;
        let url = endpoint(&self.api_base, &["v3", "files", "private", "download_link"])?;
        let body = serde_json::json!({
            "url": target.as_str(),
            "expires": req.expires,
            "date": chrono::Utc::now().timestamp(),
            "method": "GET",
        });
        self.send_json(Method::POST, url, Some(body)).await
    }

    pub async fn fetch_from_gateway(
        &self,
        req: &GatewayFetchRequest,
    ) -> Result<GatewayContent, PinataClientError> {
        let url = match req.network {
            Network::Public => {
                let gateway = self
                    .gateway_base
                    .as_ref()
                    .ok_or(PinataClientError::MissingGateway)?;
                endpoint(gateway, &["ipfs", &req.cid])?
            }
            Network::Private => {
                let signed = self
                    .create_private_download_link(&PrivateLinkRequest {
                        cid: req.cid.clone(),
                        expires: 300,
                    })
                    .await?;
                let Some(s) = signed.as_str() else {
                    return Err(PinataClientError::UnexpectedResponse(
                        "download link is not a string".to_string(),
                    ));
                };
                Url::parse(s)?
            }
        };

        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(upstream_error(status.as_u16(), &body));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let declared = resp.content_length();
        let (body, truncated) = read_capped(resp, MAX_GATEWAY_CONTENT_BYTES).await?;

        Ok(GatewayContent {
            cid: req.cid.clone(),
            content_type,
            // Without a declared length only the bytes actually read are known.
            size: declared.unwrap_or(body.len() as u64),
            truncated,
            content: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    pub async fn list_payment_instructions(
        &self,
        q: &PageQuery,
    ) -> Result<Value, PinataClientError> {
        let mut url = endpoint(&self.api_base, &["v3", "x402", "payment_instructions"])?;
        append_query(&mut url, q.query_pairs());
        self.send_json(Method::GET, url, None).await
    }

    pub async fn create_payment_instruction(
        &self,
        req: &CreatePaymentInstructionRequest,
    ) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.api_base, &["v3", "x402", "payment_instructions"])?;
        self.send_json(Method::POST, url, Some(req.body())).await
    }

    pub async fn delete_payment_instruction(&self, id: &str) -> Result<Value, PinataClientError> {
        let url = endpoint(
            &self.api_base,
            &["v3", "x402", "payment_instructions", id],
        )?;
        self.send_json(Method::DELETE, url, None).await
    }

    pub async fn add_signature(&self, req: &AddSignatureRequest) -> Result<Value, PinataClientError> {
        let url = self.signature_url(req.network, &req.cid)?;
        let body = serde_json::json!({
            "signature": req.signature,
            "address": req.address,
        });
        self.send_json(Method::POST, url, Some(body)).await
    }

    pub async fn get_signature(&self, s: &SignatureRef) -> Result<Value, PinataClientError> {
        let url = self.signature_url(s.network, &s.cid)?;
        self.send_json(Method::GET, url, None).await
    }

    pub async fn delete_signature(&self, s: &SignatureRef) -> Result<Value, PinataClientError> {
        let url = self.signature_url(s.network, &s.cid)?;
        self.send_json(Method::DELETE, url, None).await
    }

    fn signature_url(&self, network: Network, cid: &str) -> Result<Url, PinataClientError> {
        endpoint(
            &self.api_base,
            &["v3", "files", network.as_str(), "signature", cid],
        )
    }

    pub async fn vectorize_file(&self, file_id: &str) -> Result<Value, PinataClientError> {
        let url = endpoint(&self.uploads_base, &["v3", "vectorize", "files", file_id])?;
        self.send_json(Method::POST, url, None).await
    }

    pub async fn query_vectors(&self, q: &VectorQuery) -> Result<Value, PinataClientError> {
        let url = endpoint(
            &self.uploads_base,
            &["v3", "vectorize", "groups", &q.group_id, "query"],
        )?;
        let body = serde_json::json!({ "text": q.text });
        self.send_json(Method::POST, url, Some(body)).await
    }

    async fn send_json(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<Value, PinataClientError> {
        let jwt = self
            .jwt
            .as_deref()
            .ok_or(PinataClientError::MissingCredential)?;

        let mut builder = self
            .http
            .request(method.clone(), url.clone())
            .bearer_auth(jwt)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(b) = &body {
            builder = builder.json(b);
        }

        let mut req = builder.build()?;
        // Safe even when tracing/OTel are disabled.
        pinata_otel::inject_trace_headers(req.headers_mut());

        let resp = self.http.execute(req).await?;
        let status = resp.status();
        let text = resp.text().await?;
        debug!(method = %method, path = %url.path(), status = status.as_u16(), "upstream call");

        if !status.is_success() {
            return Err(upstream_error(status.as_u16(), &text));
        }

        Ok(unwrap_data(parse_body(&text)))
    }
}

/// Append path segments to a base URL, percent-encoding each one.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, PinataClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| PinataClientError::InvalidBaseUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn append_query(url: &mut Url, pairs: Vec<(&'static str, String)>) {
    if pairs.is_empty() {
        return;
    }
    let mut q = url.query_pairs_mut();
    for (k, v) in pairs {
        q.append_pair(k, &v);
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return serde_json::json!({ "ok": true });
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// The v3 API wraps payloads as `{"data": ...}`.
fn unwrap_data(v: Value) -> Value {
    match v {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Read at most `cap` bytes of the body. The flag is set when more data
/// followed; the rest of the body is never buffered.
async fn read_capped(
    mut resp: reqwest::Response,
    cap: usize,
) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut buf = Vec::with_capacity(cap.min(64 * 1024));
    while let Some(chunk) = resp.chunk().await? {
        let room = cap - buf.len();
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
        if buf.len() == cap {
            // Exactly at the cap: one more chunk tells whether anything is left.
            let more = resp.chunk().await?.is_some_and(|c| !c.is_empty());
            return Ok((buf, more));
        }
    }
    Ok((buf, false))
}

fn upstream_error(status: u16, body: &str) -> PinataClientError {
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    PinataClientError::Upstream { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_segments_and_keeps_base_path() {
        let base = Url::parse("http://127.0.0.1:9000/prefix/").expect("url");
        let url = endpoint(&base, &["v3", "files", "public", "a b/c"]).expect("endpoint");
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/prefix/v3/files/public/a%20b%2Fc");
    }

    #[test]
    fn unwraps_data_envelope_only_when_alone() {
        assert_eq!(
            unwrap_data(serde_json::json!({"data": {"id": "1"}})),
            serde_json::json!({"id": "1"})
        );
        let both = serde_json::json!({"data": [], "next_page_token": "x"});
        assert_eq!(unwrap_data(both.clone()), both);
    }

    #[test]
    fn non_json_bodies_are_kept_as_text() {
        assert_eq!(parse_body("OK"), Value::String("OK".to_string()));
        assert_eq!(parse_body(""), serde_json::json!({"ok": true}));
    }

    #[test]
    fn gateway_accepts_bare_domain() {
        let opts = PinataClientOptions::new(None)
            .expect("opts")
            .with_gateway("example.mypinata.cloud/")
            .expect("gateway");
        assert_eq!(
            opts.gateway_base_url.as_ref().map(Url::as_str),
            Some("https://example.mypinata.cloud/")
        );
    }

    #[test]
    fn debug_never_prints_the_jwt() {
        let opts = PinataClientOptions::new(Some("secret-jwt".to_string())).expect("opts");
        assert!(!format!("{opts:?}").contains("secret-jwt"));
        let client = PinataClient::new(opts).expect("client");
        assert!(!format!("{client:?}").contains("secret-jwt"));
    }

    /// One-shot HTTP/1.1 server answering every connection with `body`.
    /// `declare_length: false` sends a close-delimited body.
    async fn serve_body(body: Vec<u8>, declare_length: bool) -> Url {
        use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut req = [0u8; 4096];
                    let _ = sock.read(&mut req).await;
                    let mut head =
                        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n"
                            .to_string();
                    if declare_length {
                        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
                    }
                    head.push_str("\r\n");
                    let _ = sock.write_all(head.as_bytes()).await;
                    // A reset after the capped read is fine.
                    let _ = sock.write_all(&body).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        Url::parse(&format!("http://{addr}/")).expect("url")
    }

    fn gateway_client(gateway: Url) -> PinataClient {
        let mut opts = PinataClientOptions::new(Some("jwt".to_string())).expect("opts");
        opts.gateway_base_url = Some(gateway);
        PinataClient::new(opts).expect("client")
    }

    fn public_fetch(cid: &str) -> GatewayFetchRequest {
        GatewayFetchRequest {
            cid: cid.to_string(),
            network: Network::Public,
        }
    }

    #[tokio::test]
    async fn gateway_fetch_stops_reading_at_the_cap() {
        let big = vec![b'a'; MAX_GATEWAY_CONTENT_BYTES * 4];
        let client = gateway_client(serve_body(big.clone(), true).await);
        let got = client
            .fetch_from_gateway(&public_fetch("bafy"))
            .await
            .expect("fetch");
        assert!(got.truncated);
        assert_eq!(got.size, big.len() as u64);
        assert_eq!(got.content.len(), MAX_GATEWAY_CONTENT_BYTES);
        assert_eq!(got.content_type.as_deref(), Some("text/plain"));

        let client = gateway_client(serve_body(big, false).await);
        let got = client
            .fetch_from_gateway(&public_fetch("bafy"))
            .await
            .expect("fetch");
        assert!(got.truncated);
        assert_eq!(got.size, MAX_GATEWAY_CONTENT_BYTES as u64);
    }

    #[tokio::test]
    async fn gateway_fetch_keeps_small_and_exact_bodies_whole() {
        let client = gateway_client(serve_body(b"hello".to_vec(), true).await);
        let got = client
            .fetch_from_gateway(&public_fetch("bafy"))
            .await
            .expect("fetch");
        assert!(!got.truncated);
        assert_eq!(got.size, 5);
        assert_eq!(got.content, "hello");

        let exact = vec![b'b'; MAX_GATEWAY_CONTENT_BYTES];
        let client = gateway_client(serve_body(exact, false).await);
        let got = client
            .fetch_from_gateway(&public_fetch("bafy"))
            .await
            .expect("fetch");
        assert!(!got.truncated);
        assert_eq!(got.size, MAX_GATEWAY_CONTENT_BYTES as u64);
    }

    #[tokio::test]
    async fn missing_jwt_fails_before_any_io() {
        let mut opts = PinataClientOptions::new(Some("  ".to_string())).expect("opts");
        // Unroutable; would hang or fail differently if a request were attempted.
        opts.api_base_url = Url::parse("http://192.0.2.1:9").expect("url");
        let client = PinataClient::new(opts).expect("client");
        assert!(!client.has_credential());
        let err = client.test_authentication().await.expect_err("must fail");
        assert!(matches!(err, PinataClientError::MissingCredential));
    }
}
