//! Composable client middleware pipeline for rpcweave RPC calls.
//!
//! This crate wraps outbound calls from a client to a remote service in an
//! ordered chain of interceptors. The default chain applies:
//!
//! - Method tagging, edge-context forwarding and client identity headers
//! - Client spans and request metrics, per logical call and per attempt
//! - Retries driven by a [`RetryPolicy`] and its filters
//! - An optional circuit breaker slot
//! - IDL exception extraction and normalization
//! - Deadline budget propagation
//! - Reserved header propagation
//! - Client-side fault injection
//!
//! The transport itself is supplied by the application through the
//! [`Transport`] trait.
//!
//! ## Example
//!
//! ```ignore
//! use rpcweave_client::{CallContext, ClientBuilder, RetryPolicy};
//! use std::time::Duration;
//!
//! let client = ClientBuilder::new("users")
//!     .address("users.svc:9090")
//!     .client_name("profile-service")
//!     .retry_policy(RetryPolicy::new().attempts(3))
//!     .build(transport)?;
//!
//! let ctx = CallContext::new().with_timeout(Duration::from_millis(250));
//! let response = client.call(ctx, "getUser", body).await?;
//! ```
//!
//! ## Interceptor Example
//!
//! ```ignore
//! use rpcweave_client::{ClientBuilder, FnInterceptor, UnaryNext};
//!
//! let client = ClientBuilder::new("users")
//!     .with_interceptor(FnInterceptor::unary(|ctx, req, next: UnaryNext| {
//!         Box::pin(async move {
//!             tracing::info!(method = %req.method, "calling");
//!             next.call(ctx, req).await
//!         })
//!     }))
//!     .build(transport)?;
//! ```

mod builder;
mod classify;
mod client;
mod config;
mod context;
mod error;
mod fault;
mod interceptor;
mod middleware;
mod pipeline;
mod telemetry;

pub use builder::{ClientBuildError, ClientBuilder, ClientMiddlewareArgs, default_client_middlewares};
pub use classify::{Classification, classify, extract};
pub use client::Client;
pub use config::{
    ClientConfig, ConfigError, Decision, ExponentialBackoff, FaultOutcomeConfig, FaultRuleConfig,
    Filter, RetryConfig, RetryPolicy, context_error_filter, defaults, execute, retry_all_filter,
    retryable_error_filter,
};
pub use context::{CallContext, HeaderTarget, MethodDescriptor};
pub use error::{ClientError, ContextError};
pub use fault::{
    ClientFaultMiddleware, FaultInjector, FaultOutcome, FaultRule, FaultRuleSource,
    HeaderCondition, InjectParams, SharedFaultRules, StaticFaultRules,
};
pub use interceptor::{
    BoxFuture, FnInterceptor, Interceptor, InterceptorChain, UnaryFunc, UnaryNext, UnaryRequest,
    UnaryResponse, UnaryResult,
};
pub use middleware::{
    ErrorNormalizer, ExceptionExtractor, ForwardEdgeContext, HeaderPropagation, HeaderResolver,
    MethodDescriptorInterceptor, PropagatingResolver, Retry, SetClientName, SetDeadlineBudget,
    deadline_budget_ms,
};
pub use pipeline::{Pipeline, Transport};
pub use telemetry::{
    ActiveLabels, ClientMetrics, LatencyLabels, MetricLabel, MetricsFacade, MetricsSink,
    MonitorClient, RequestLabels, SpanFactory, Suppressor, TracingSpans, WRAPPED_SLUG_SUFFIX,
    WarnOnce, idl_exception_suppressor,
};

// Re-export core types
pub use rpcweave_core::{
    ApplicationException, ErrorCode, HasStatusCode, HeaderError, HeaderSet, headers,
};
