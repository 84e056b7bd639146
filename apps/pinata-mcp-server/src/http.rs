//! Streamable HTTP binding: one POST endpoint carrying JSON-RPC, DELETE for
//! client teardown and a health probe.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, get, post};
use axum::Json;
use pinata_mcp::{
    JsonRpcError, JsonRpcId, JsonRpcMessage, JsonRpcResponse, SESSION_ID_HEADER, encode_sse_event,
    error_codes,
};
use tower_http::trace::TraceLayer;
use tracing::{Instrument as _, error, info, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

use crate::auth::{ApiKeyGate, require_api_key};
use crate::framing::decode_message;
use crate::router::{Route, RouteError, SessionPath, SessionRouter};
use crate::session::SessionHandle;

#[derive(Debug, Clone)]
pub struct HttpOptions {
    /// Path of the MCP endpoint.
    pub path: String,
    /// Origins accepted in addition to loopback ones, e.g. `https://app.example.com`.
    pub allowed_origins: Vec<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct HttpState {
    pub router: SessionRouter,
    pub gate: ApiKeyGate,
    pub opts: Arc<HttpOptions>,
}

pub fn build_app(state: HttpState) -> Router {
    let path = normalize_path(&state.opts.path);
    let mcp: MethodRouter<HttpState> = post(http_post).delete(http_delete).route_layer(
        axum::middleware::from_fn_with_state(state.gate.clone(), require_api_key),
    );

    // The health probe is added after the auth layer so it stays public.
    let app = if path == "/" {
        Router::new().route("/", mcp.get(health))
    } else {
        Router::new().route("/", get(health)).route(&path, mcp)
    };

    app.layer(
        TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
            // Never include request headers or bodies in spans (may contain secrets).
            let span = tracing::info_span!(
                "http.request",
                http_method = %req.method(),
                http_path = %req.uri().path(),
            );
            let cx = pinata_otel::extract_trace_context(req.headers());
            let _ = span.set_parent(cx);
            span
        }),
    )
    .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    state: HttpState,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, path = %state.opts.path, "starting MCP HTTP server");
    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve http")?;
    Ok(())
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        return "/".to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

async fn health(State(st): State<HttpState>) -> Json<serde_json::Value> {
    let info = st.router.server_info();
    Json(serde_json::json!({
        "status": "ok",
        "name": info.name,
        "version": info.version,
        "sessions": st.router.session_count().await,
    }))
}

async fn http_delete(State(st): State<HttpState>, headers: HeaderMap) -> Response {
    if let Err((code, msg)) = validate_origin(&headers, &st.opts.allowed_origins) {
        return (code, msg).into_response();
    }

    let Some(sid) = session_header(&headers) else {
        return route_error_response(&RouteError::SessionRequired, JsonRpcId::Null);
    };
    match st.router.close_session(sid).await {
        Ok(()) => {
            info!(session_id = %sid, "session closed by client");
            StatusCode::OK.into_response()
        }
        Err(e) => route_error_response(&e, JsonRpcId::Null),
    }
}

async fn http_post(State(st): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    if let Err((code, msg)) = validate_origin(&headers, &st.opts.allowed_origins) {
        return (code, msg).into_response();
    }

    if let Some(v) = header_str(&headers, "mcp-protocol-version")
        && v.trim().is_empty()
    {
        return (StatusCode::BAD_REQUEST, "invalid mcp-protocol-version").into_response();
    }

    let msg = match decode_message(&body) {
        Ok(m) => m,
        Err(resp) => return jsonrpc_http_response(StatusCode::BAD_REQUEST, &resp, None),
    };

    let session_id = session_header(&headers).map(str::to_string);
    let id = msg.id();
    let span = tracing::info_span!("mcp.route", method = msg.method().unwrap_or("-"));

    async move {
        let (handle, path) = match st.router.resolve(session_id.as_deref(), &msg).await {
            Ok(Route::Session { handle, path }) => (handle, path),
            Ok(Route::Acknowledge) => return StatusCode::OK.into_response(),
            Err(e) => return route_error_response(&e, id),
        };

        // A fresh session has no id to announce until the handshake succeeded.
        if path != SessionPath::Fresh && wants_sse(&headers) {
            return sse_response(st.router.clone(), handle, path, msg);
        }

        let router = st.router.clone();
        let task = tokio::spawn(
            async move { router.deliver(&handle, path, msg).await }.in_current_span(),
        );
        match task.await {
            Ok(routed) => match routed.response {
                Some(resp) => {
                    jsonrpc_http_response(StatusCode::OK, &resp, routed.session_id.as_deref())
                }
                None => with_session_header(
                    StatusCode::OK.into_response(),
                    routed.session_id.as_deref(),
                ),
            },
            Err(e) => {
                error!(error = %e, "session handler failed before responding");
                let err = RouteError::Internal("handler failed".to_string());
                jsonrpc_http_response(StatusCode::INTERNAL_SERVER_ERROR, &err.to_jsonrpc(id), None)
            }
        }
    }
    .instrument(span)
    .await
}

/// Commit SSE headers now and stream the single response event once handling
/// finishes. A failure after this point can only be logged.
fn sse_response(
    router: SessionRouter,
    handle: SessionHandle,
    path: SessionPath,
    msg: JsonRpcMessage,
) -> Response {
    let session_id = handle.session_id().to_string();
    let event = async move {
        let task = tokio::spawn(
            async move { router.deliver(&handle, path, msg).await }.in_current_span(),
        );
        let bytes = match task.await {
            Ok(routed) => routed
                .response
                .map(|r| Bytes::from(encode_sse_event(&r)))
                .unwrap_or_default(),
            Err(e) => {
                error!(error = %e, "session handler failed after response was committed");
                Bytes::new()
            }
        };
        Ok::<_, Infallible>(bytes)
    }
    .in_current_span();

    let resp = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(futures::stream::once(event)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    with_session_header(resp, Some(&session_id))
}

/// SSE only when the client accepts event streams and not plain JSON.
fn wants_sse(headers: &HeaderMap) -> bool {
    let Some(accept) = header_str(headers, "accept") else {
        return false;
    };
    let has = |needle: &str| {
        accept
            .split(',')
            .any(|part| part.trim().to_ascii_lowercase().starts_with(needle))
    };
    has("text/event-stream") && !has("application/json")
}

fn route_error_response(err: &RouteError, id: JsonRpcId) -> Response {
    let status = match err {
        RouteError::SessionRequired => StatusCode::BAD_REQUEST,
        RouteError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
        RouteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    jsonrpc_http_response(status, &err.to_jsonrpc(id), None)
}

fn validate_origin(
    headers: &HeaderMap,
    allowed: &[String],
) -> Result<(), (StatusCode, &'static str)> {
    let Some(origin) = header_str(headers, "origin").filter(|s| !s.trim().is_empty()) else {
        return Ok(());
    };

    let normalized = origin.trim().trim_end_matches('/');
    if allowed
        .iter()
        .any(|a| a.trim().trim_end_matches('/').eq_ignore_ascii_case(normalized))
    {
        return Ok(());
    }

    let u = url::Url::parse(origin).map_err(|_| (StatusCode::FORBIDDEN, "invalid origin"))?;
    let host = u.host().ok_or((StatusCode::FORBIDDEN, "invalid origin"))?;
    let is_loopback = match host {
        url::Host::Domain(d) => d.eq_ignore_ascii_case("localhost"),
        url::Host::Ipv4(ip) => ip.is_loopback(),
        url::Host::Ipv6(ip) => ip.is_loopback(),
    };
    if !is_loopback {
        warn!(origin = %origin, "rejected request from disallowed origin");
        pinata_otel::metrics().record_rejection("origin");
        return Err((StatusCode::FORBIDDEN, "origin not allowed"));
    }

    Ok(())
}

fn jsonrpc_http_response(
    status: StatusCode,
    resp: &JsonRpcResponse,
    session_id: Option<&str>,
) -> Response {
    let body = serde_json::to_string(resp).unwrap_or_else(|_| fallback_error_body());
    let resp = Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
    with_session_header(resp, session_id)
}

fn fallback_error_body() -> String {
    let err = JsonRpcResponse::err(
        JsonRpcId::Null,
        JsonRpcError::new(error_codes::INTERNAL_ERROR, "internal error"),
    );
    serde_json::to_string(&err).unwrap_or_default()
}

fn with_session_header(mut resp: Response, session_id: Option<&str>) -> Response {
    if let Some(sid) = session_id
        && let Ok(v) = HeaderValue::from_str(sid)
    {
        resp.headers_mut().insert(SESSION_ID_HEADER, v);
    }
    resp
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, SESSION_ID_HEADER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}
