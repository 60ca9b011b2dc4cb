//! Client spans and request metrics.
//!
//! Two interceptors live here:
//! - [`ClientMetrics`]: active-request gauge, latency histogram and request
//!   counter, reported through a [`MetricsSink`]
//! - [`MonitorClient`]: one span per call, created through a [`SpanFactory`]
//!
//! The default pipeline installs each of them twice: outside the retry
//! wrapper under the slug suffixed with [`WRAPPED_SLUG_SUFFIX`] (one record
//! per logical call) and inside it under the plain slug (one record per
//! attempt).
//!
//! # Metrics
//! - `rpc_client_active_requests` (gauge): in-flight calls by method, slug
//! - `rpc_client_latency_seconds` (histogram): call latency by method, success, slug
//! - `rpc_client_requests_total` (counter): finished calls by method, success,
//!   exception type, status code, status name, slug

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, Span};

use crate::classify::{Classification, classify};
use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest, UnaryResult};
use crate::{CallContext, ClientError, ContextError};

/// Suffix appended to the slug of the telemetry wrapped around the retry
/// interceptor.
pub const WRAPPED_SLUG_SUFFIX: &str = "-with-retry";

pub const ACTIVE_REQUESTS: &str = "rpc_client_active_requests";
pub const LATENCY_SECONDS: &str = "rpc_client_latency_seconds";
pub const REQUESTS_TOTAL: &str = "rpc_client_requests_total";

/// Metric label keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricLabel {
    Method,
    Slug,
    Success,
    ExceptionType,
    StatusCode,
    StatusName,
}

impl MetricLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricLabel::Method => "rpc_method",
            MetricLabel::Slug => "rpc_slug",
            MetricLabel::Success => "rpc_success",
            MetricLabel::ExceptionType => "rpc_exception_type",
            MetricLabel::StatusCode => "rpc_status_code",
            MetricLabel::StatusName => "rpc_status_name",
        }
    }
}

/// Labels of the active-request gauge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveLabels {
    pub method: String,
    pub slug: String,
}

/// Labels of the latency histogram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LatencyLabels {
    pub method: String,
    pub success: bool,
    pub slug: String,
}

/// Labels of the request counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestLabels {
    pub method: String,
    pub success: bool,
    pub exception_type: String,
    pub status_code: String,
    pub status_name: String,
    pub slug: String,
}

/// Destination of client metrics.
pub trait MetricsSink: Send + Sync {
    fn active_requests_inc(&self, labels: &ActiveLabels);
    fn active_requests_dec(&self, labels: &ActiveLabels);
    fn observe_latency(&self, labels: &LatencyLabels, elapsed: Duration);
    fn increment_requests(&self, labels: &RequestLabels);
}

/// Reports through the `metrics` facade, so whichever recorder the
/// application installed receives the values.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsFacade;

impl MetricsSink for MetricsFacade {
    fn active_requests_inc(&self, labels: &ActiveLabels) {
        metrics::gauge!(
            ACTIVE_REQUESTS,
            MetricLabel::Method.as_str() => labels.method.clone(),
            MetricLabel::Slug.as_str() => labels.slug.clone()
        )
        .increment(1.0);
    }

    fn active_requests_dec(&self, labels: &ActiveLabels) {
        metrics::gauge!(
            ACTIVE_REQUESTS,
            MetricLabel::Method.as_str() => labels.method.clone(),
            MetricLabel::Slug.as_str() => labels.slug.clone()
        )
        .decrement(1.0);
    }

    fn observe_latency(&self, labels: &LatencyLabels, elapsed: Duration) {
        metrics::histogram!(
            LATENCY_SECONDS,
            MetricLabel::Method.as_str() => labels.method.clone(),
            MetricLabel::Success.as_str() => labels.success.to_string(),
            MetricLabel::Slug.as_str() => labels.slug.clone()
        )
        .record(elapsed.as_secs_f64());
    }

    fn increment_requests(&self, labels: &RequestLabels) {
        metrics::counter!(
            REQUESTS_TOTAL,
            MetricLabel::Method.as_str() => labels.method.clone(),
            MetricLabel::Success.as_str() => labels.success.to_string(),
            MetricLabel::ExceptionType.as_str() => labels.exception_type.clone(),
            MetricLabel::StatusCode.as_str() => labels.status_code.clone(),
            MetricLabel::StatusName.as_str() => labels.status_name.clone(),
            MetricLabel::Slug.as_str() => labels.slug.clone()
        )
        .increment(1);
    }
}

/// Records the metrics of one call. Dropping it reports the call, so a call
/// abandoned mid-flight is still counted (as cancelled).
struct InFlight {
    sink: Arc<dyn MetricsSink>,
    active: ActiveLabels,
    started: Instant,
    classification: Option<Classification>,
}

impl InFlight {
    fn start(sink: Arc<dyn MetricsSink>, active: ActiveLabels) -> Self {
        sink.active_requests_inc(&active);
        Self {
            sink,
            active,
            started: Instant::now(),
            classification: None,
        }
    }

    fn finish(mut self, result: &UnaryResult) {
        self.classification = Some(classify(result));
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let classification = self
            .classification
            .take()
            .unwrap_or_else(|| classify(&Err(ContextError::Canceled.into())));
        let success = classification.success();

        self.sink.active_requests_dec(&self.active);
        self.sink.observe_latency(
            &LatencyLabels {
                method: self.active.method.clone(),
                success,
                slug: self.active.slug.clone(),
            },
            self.started.elapsed(),
        );
        self.sink.increment_requests(&RequestLabels {
            method: std::mem::take(&mut self.active.method),
            success,
            exception_type: classification.exception_type,
            status_code: classification.status_code,
            status_name: classification.status_name,
            slug: std::mem::take(&mut self.active.slug),
        });
    }
}

/// Interceptor reporting call metrics under a fixed slug.
#[derive(Clone)]
pub struct ClientMetrics {
    slug: Arc<str>,
    sink: Arc<dyn MetricsSink>,
}

impl ClientMetrics {
    pub fn new(slug: &str, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            slug: Arc::from(slug),
            sink,
        }
    }
}

impl Interceptor for ClientMetrics {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let slug = self.slug.clone();
        let sink = self.sink.clone();
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let in_flight = InFlight::start(
                sink.clone(),
                ActiveLabels {
                    method: request.method.clone(),
                    slug: slug.to_string(),
                },
            );
            let call = next(ctx, request);
            Box::pin(async move {
                let result = call.await;
                in_flight.finish(&result);
                result
            })
        })
    }
}

/// Creates the span of one client call.
pub trait SpanFactory: Send + Sync {
    /// Start a span for a call to `method` of the service `slug`.
    fn client_span(&self, slug: &str, method: &str) -> Span;
}

/// Creates `tracing` spans following OpenTelemetry client conventions.
///
/// The span's `otel.name` is `<slug>.<method>`. `otel.status_code` and
/// `error` are recorded when the call finishes.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSpans;

impl SpanFactory for TracingSpans {
    fn client_span(&self, slug: &str, method: &str) -> Span {
        tracing::info_span!(
            "rpc_client",
            otel.name = %format_args!("{slug}.{method}"),
            otel.kind = "client",
            rpc.service = %slug,
            rpc.method = %method,
            otel.status_code = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    }
}

/// Decides which errors are not reported as span errors.
pub type Suppressor = Arc<dyn Fn(&ClientError) -> bool + Send + Sync>;

/// Suppresses application exceptions: the remote service answered as
/// declared in its IDL, so the call itself did not fail.
pub fn idl_exception_suppressor(error: &ClientError) -> bool {
    matches!(error, ClientError::Application(_))
}

/// Logs a warning the first time it fires, until reset.
#[derive(Debug, Default)]
pub struct WarnOnce {
    fired: AtomicBool,
}

static GLOBAL_WARN_ONCE: LazyLock<Arc<WarnOnce>> = LazyLock::new(|| Arc::new(WarnOnce::new()));

impl WarnOnce {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// The process-wide guard used when a builder is not given one.
    pub fn global() -> Arc<WarnOnce> {
        GLOBAL_WARN_ONCE.clone()
    }

    /// Log `message` at warn level unless this guard already fired.
    /// Returns whether the message was logged.
    pub fn warn(&self, message: &str) -> bool {
        let first = self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            tracing::warn!("{message}");
        }
        first
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }
}

/// Interceptor wrapping every call in a client span.
///
/// Without a span factory the interceptor is a pass-through.
#[derive(Clone)]
pub struct MonitorClient {
    slug: Arc<str>,
    spans: Option<Arc<dyn SpanFactory>>,
    suppressor: Suppressor,
    warn_once: Arc<WarnOnce>,
}

impl MonitorClient {
    pub fn new(
        slug: &str,
        spans: Option<Arc<dyn SpanFactory>>,
        suppressor: Suppressor,
        warn_once: Arc<WarnOnce>,
    ) -> Self {
        Self {
            slug: Arc::from(slug),
            spans,
            suppressor,
            warn_once,
        }
    }
}

impl Interceptor for MonitorClient {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let Some(spans) = self.spans.clone() else {
            self.warn_once
                .warn("client spans are disabled: no span factory configured");
            return next;
        };
        let slug = self.slug.clone();
        let suppressor = self.suppressor.clone();

        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let span = spans.client_span(&slug, &request.method);
            let call = next(ctx.with_span(span.clone()), request);
            let suppressor = suppressor.clone();
            Box::pin(async move {
                let result = call.instrument(span.clone()).await;
                match classify(&result).error {
                    Some(error) if !suppressor(&error) => {
                        span.record("otel.status_code", "ERROR");
                        span.record("error", tracing::field::display(&error));
                    }
                    _ => {
                        span.record("otel.status_code", "OK");
                    }
                }
                result
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{InterceptorChain, UnaryResponse};
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        active: Mutex<i64>,
        latencies: Mutex<Vec<LatencyLabels>>,
        requests: Mutex<Vec<RequestLabels>>,
    }

    impl MetricsSink for RecordingSink {
        fn active_requests_inc(&self, _labels: &ActiveLabels) {
            *self.active.lock().unwrap() += 1;
        }

        fn active_requests_dec(&self, _labels: &ActiveLabels) {
            *self.active.lock().unwrap() -= 1;
        }

        fn observe_latency(&self, labels: &LatencyLabels, _elapsed: Duration) {
            self.latencies.lock().unwrap().push(labels.clone());
        }

        fn increment_requests(&self, labels: &RequestLabels) {
            self.requests.lock().unwrap().push(labels.clone());
        }
    }

    fn returning(result: UnaryResult) -> UnaryFunc {
        Arc::new(move |_ctx: CallContext, _req: UnaryRequest| {
            let result = result.clone();
            Box::pin(async move { result })
        })
    }

    #[tokio::test]
    async fn test_metrics_labels_for_exception() {
        let sink = Arc::new(RecordingSink::default());
        let call = InterceptorChain::new()
            .with(ClientMetrics::new("users", sink.clone()))
            .wrap_unary(returning(Err(ClientError::application(404, "missing"))));

        let _ = call(CallContext::new(), UnaryRequest::new("getUser", Bytes::new())).await;

        assert_eq!(*sink.active.lock().unwrap(), 0);
        assert_eq!(
            sink.requests.lock().unwrap().as_slice(),
            &[RequestLabels {
                method: "getUser".into(),
                success: false,
                exception_type: "rpcweave.Error".into(),
                status_code: "404".into(),
                status_name: "NOT_FOUND".into(),
                slug: "users".into(),
            }]
        );
        assert!(!sink.latencies.lock().unwrap()[0].success);
    }

    #[tokio::test]
    async fn test_metrics_success() {
        let sink = Arc::new(RecordingSink::default());
        let call = InterceptorChain::new()
            .with(ClientMetrics::new("users", sink.clone()))
            .wrap_unary(returning(Ok(UnaryResponse::default())));

        call(CallContext::new(), UnaryRequest::new("getUser", Bytes::new()))
            .await
            .unwrap();

        let requests = sink.requests.lock().unwrap();
        assert!(requests[0].success);
        assert_eq!(requests[0].exception_type, "");
        assert_eq!(requests[0].status_code, "");
    }

    #[tokio::test]
    async fn test_metrics_recorded_when_call_is_dropped() {
        let sink = Arc::new(RecordingSink::default());
        let pending: UnaryFunc = Arc::new(|_ctx: CallContext, _req: UnaryRequest| {
            Box::pin(std::future::pending::<UnaryResult>())
        });
        let call = InterceptorChain::new()
            .with(ClientMetrics::new("users", sink.clone()))
            .wrap_unary(pending);

        let future = call(CallContext::new(), UnaryRequest::new("getUser", Bytes::new()));
        assert_eq!(*sink.active.lock().unwrap(), 1);
        drop(future);

        assert_eq!(*sink.active.lock().unwrap(), 0);
        let requests = sink.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].exception_type, "Canceled");
    }

    struct NamingSpans(Mutex<Vec<String>>);

    impl SpanFactory for NamingSpans {
        fn client_span(&self, slug: &str, method: &str) -> Span {
            self.0.lock().unwrap().push(format!("{slug}.{method}"));
            Span::none()
        }
    }

    #[tokio::test]
    async fn test_monitor_client_sets_span() {
        let spans = Arc::new(NamingSpans(Mutex::new(Vec::new())));
        let saw_span: UnaryFunc = Arc::new(|ctx: CallContext, _req: UnaryRequest| {
            let has_span = ctx.span().is_some();
            Box::pin(async move {
                assert!(has_span);
                Ok(UnaryResponse::default())
            })
        });
        let call = InterceptorChain::new()
            .with(MonitorClient::new(
                "users",
                Some(spans.clone() as Arc<dyn SpanFactory>),
                Arc::new(idl_exception_suppressor),
                Arc::new(WarnOnce::new()),
            ))
            .wrap_unary(saw_span);

        call(CallContext::new(), UnaryRequest::new("getUser", Bytes::new()))
            .await
            .unwrap();
        assert_eq!(*spans.0.lock().unwrap(), vec!["users.getUser"]);
    }

    #[test]
    fn test_warn_once() {
        let guard = WarnOnce::new();
        assert!(guard.warn("first"));
        assert!(!guard.warn("second"));
        guard.reset();
        assert!(guard.warn("third"));
    }

    #[test]
    fn test_disabled_spans_warn_once_at_build() {
        let warn_once = Arc::new(WarnOnce::new());
        let monitor = MonitorClient::new(
            "users",
            None,
            Arc::new(idl_exception_suppressor),
            warn_once.clone(),
        );

        let _ = InterceptorChain::new()
            .with(monitor.clone())
            .wrap_unary(returning(Ok(UnaryResponse::default())));
        assert!(!warn_once.warn("already fired"));
    }

    #[test]
    fn test_idl_exception_suppressor() {
        assert!(idl_exception_suppressor(&ClientError::application(500, "x")));
        assert!(!idl_exception_suppressor(&ClientError::PoolExhausted));
    }
}
