use std::sync::OnceLock;

use anyhow::Context as _;
use http::HeaderMap;
use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::trace::TraceContextExt as _;
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

static PROPAGATOR_INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct TracingInitOptions<'a> {
    pub service_name: &'a str,
    pub service_version: &'a str,
    pub default_env_filter: &'a str,
    /// Write log lines to stderr. Required when stdout carries protocol frames.
    pub log_to_stderr: bool,
}

fn ensure_propagator_installed() {
    PROPAGATOR_INSTALLED.get_or_init(|| {
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
    });
}

fn env_true(name: &str) -> bool {
    let Ok(v) = std::env::var(name) else {
        return false;
    };
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn otel_enabled() -> bool {
    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .is_some_and(|v| !v.trim().is_empty())
        || env_true("PINATA_MCP_OTEL")
}

fn otlp_endpoint() -> String {
    if let Ok(v) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        && !v.trim().is_empty()
    {
        return v;
    }
    // Local collector default, only reached when PINATA_MCP_OTEL is set.
    "http://127.0.0.1:4318".to_string()
}

fn join_otlp_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{base}{path}")
}

fn otlp_signal_endpoint(specific_var: &str, path: &str) -> String {
    if let Ok(v) = std::env::var(specific_var)
        && !v.trim().is_empty()
    {
        return v;
    }
    join_otlp_endpoint(&otlp_endpoint(), path)
}

pub fn init_tracing(opts: TracingInitOptions<'_>) -> anyhow::Result<()> {
    use tracing_subscriber::Layer as _;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    ensure_propagator_installed();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| opts.default_env_filter.into());

    let fmt_layer = if opts.log_to_stderr {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().json().boxed()
    };

    if !otel_enabled() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .context("install tracing subscriber")?;
        return Ok(());
    }

    use opentelemetry::KeyValue;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::{Protocol, WithExportConfig as _};
    use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(opts.service_name.to_string())
        .with_attributes([KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            opts.service_version.to_string(),
        )])
        .build();

    let span_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(otlp_signal_endpoint(
            "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
            "/v1/traces",
        ))
        .with_protocol(Protocol::HttpBinary)
        .build()
        .context("build otlp span exporter")?;

    let tracer_provider = SdkTracerProvider::builder()
        .with_batch_exporter(span_exporter)
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_resource(resource.clone())
        .build();
    let tracer = tracer_provider.tracer(opts.service_name.to_string());
    opentelemetry::global::set_tracer_provider(tracer_provider);

    let metric_exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(otlp_signal_endpoint(
            "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT",
            "/v1/metrics",
        ))
        .with_protocol(Protocol::HttpBinary)
        .build()
        .context("build otlp metric exporter")?;
    let meter_provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter)
        .with_resource(resource)
        .build();
    opentelemetry::global::set_meter_provider(meter_provider);

    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}

pub fn inject_trace_headers(headers: &mut HeaderMap) {
    ensure_propagator_installed();

    let cx = tracing::Span::current().context();
    if !cx.span().span_context().is_valid() {
        return;
    }

    opentelemetry::global::get_text_map_propagator(|prop| {
        prop.inject_context(&cx, &mut HeaderInjector { headers });
    });
}

pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    ensure_propagator_installed();
    opentelemetry::global::get_text_map_propagator(|prop| {
        prop.extract(&HeaderExtractor { headers })
    })
}

struct HeaderInjector<'a> {
    headers: &'a mut HeaderMap,
}

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let Ok(name) = http::header::HeaderName::from_bytes(key.as_bytes()) else {
            return;
        };
        let Ok(val) = http::header::HeaderValue::from_str(&value) else {
            return;
        };
        self.headers.insert(name, val);
    }
}

struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Metrics {
    sessions_opened_total: opentelemetry::metrics::Counter<u64>,
    sessions_closed_total: opentelemetry::metrics::Counter<u64>,
    requests_rejected_total: opentelemetry::metrics::Counter<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Process-wide counters. No-ops until a meter provider is installed.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let meter = opentelemetry::global::meter("pinata-mcp");

        let sessions_opened_total = meter
            .u64_counter("pinata_mcp_sessions_opened_total")
            .with_description("Sessions registered, by creation path.")
            .build();

        let sessions_closed_total = meter
            .u64_counter("pinata_mcp_sessions_closed_total")
            .with_description("Sessions removed after their transport closed.")
            .build();

        let requests_rejected_total = meter
            .u64_counter("pinata_mcp_requests_rejected_total")
            .with_description("Requests rejected before reaching a session, by reason.")
            .build();

        Metrics {
            sessions_opened_total,
            sessions_closed_total,
            requests_rejected_total,
        }
    })
}

impl Metrics {
    pub fn record_session_opened(&self, kind: &'static str) {
        self.sessions_opened_total
            .add(1, &[opentelemetry::KeyValue::new("kind", kind)]);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed_total.add(1, &[]);
    }

    pub fn record_rejection(&self, reason: &'static str) {
        self.requests_rejected_total
            .add(1, &[opentelemetry::KeyValue::new("reason", reason)]);
    }
}
