//! Pipeline assembly.
//!
//! [`default_client_middlewares`] lays out the default interceptor order and
//! [`ClientBuilder`] provides a fluent API around it.

use std::sync::Arc;
use std::time::Duration;

use rpcweave_core::HeaderError;

use crate::client::Client;
use crate::config::{ClientConfig, ConfigError, RetryPolicy};
use crate::fault::{ClientFaultMiddleware, FaultRuleSource, SharedFaultRules, StaticFaultRules};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::middleware::{
    ErrorNormalizer, ExceptionExtractor, ForwardEdgeContext, HeaderPropagation, HeaderResolver,
    MethodDescriptorInterceptor, PropagatingResolver, Retry, SetClientName, SetDeadlineBudget,
};
use crate::pipeline::{Pipeline, Transport};
use crate::telemetry::{
    ClientMetrics, MetricsFacade, MetricsSink, MonitorClient, SpanFactory, Suppressor,
    TracingSpans, WRAPPED_SLUG_SUFFIX, WarnOnce, idl_exception_suppressor,
};

/// Error type for pipeline building failures.
#[derive(Debug, thiserror::Error)]
pub enum ClientBuildError {
    /// The client name is not a valid header value.
    #[error(transparent)]
    Header(#[from] HeaderError),

    /// The retry policy failed validation.
    #[error("invalid retry policy: {0}")]
    RetryPolicy(&'static str),

    /// The configuration could not be turned into runtime settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Everything the default pipeline is built from.
///
/// [`ClientMiddlewareArgs::new`] fills in the defaults: a single-attempt
/// retry policy, application exceptions suppressed on spans, no breaker, no
/// fault rules, metrics through the `metrics` facade, `tracing` spans,
/// forwarding of the inbound reserved headers and the process-wide
/// [`WarnOnce`] guard.
#[derive(Clone)]
pub struct ClientMiddlewareArgs {
    /// Slug of the remote service, used in metric labels and span names.
    pub slug: String,
    /// Address of the remote service. Fault injection is disabled without it.
    pub address: Option<String>,
    pub retry_policy: RetryPolicy,
    /// Errors the span middleware does not report as span errors.
    pub suppressor: Suppressor,
    /// Circuit breaker, installed between the retry wrapper and the
    /// per-attempt telemetry.
    pub breaker: Option<Arc<dyn Interceptor>>,
    /// Name sent as the user agent. Also identifies the client when caching
    /// propagated headers; the slug is used when absent.
    pub client_name: Option<String>,
    pub fault_rules: Arc<dyn FaultRuleSource>,
    pub metrics: Arc<dyn MetricsSink>,
    /// Span factory; `None` disables spans.
    pub spans: Option<Arc<dyn SpanFactory>>,
    pub header_resolver: Arc<dyn HeaderResolver>,
    pub warn_once: Arc<WarnOnce>,
}

impl std::fmt::Debug for ClientMiddlewareArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientMiddlewareArgs")
            .field("slug", &self.slug)
            .field("address", &self.address)
            .field("retry_policy", &self.retry_policy)
            .field("breaker", &self.breaker.is_some())
            .field("client_name", &self.client_name)
            .field("spans", &self.spans.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientMiddlewareArgs {
    pub fn new<S: Into<String>>(slug: S) -> Self {
        Self {
            slug: slug.into(),
            address: None,
            retry_policy: RetryPolicy::default(),
            suppressor: Arc::new(idl_exception_suppressor),
            breaker: None,
            client_name: None,
            fault_rules: Arc::new(StaticFaultRules::default()),
            metrics: Arc::new(MetricsFacade),
            spans: Some(Arc::new(TracingSpans)),
            header_resolver: Arc::new(PropagatingResolver),
            warn_once: WarnOnce::global(),
        }
    }
}

/// Build the default interceptor chain, outermost first:
///
/// 1. [`MethodDescriptorInterceptor`]
/// 2. [`ForwardEdgeContext`]
/// 3. [`SetClientName`], when a client name is set
/// 4. [`MonitorClient`] and [`ClientMetrics`] under `slug` + [`WRAPPED_SLUG_SUFFIX`]
/// 5. [`Retry`]
/// 6. the circuit breaker, when set
/// 7. [`MonitorClient`] and [`ClientMetrics`] under `slug`
/// 8. [`ErrorNormalizer`]
/// 9. [`ExceptionExtractor`]
/// 10. [`SetDeadlineBudget`]
/// 11. [`HeaderPropagation`]
/// 12. [`ClientFaultMiddleware`]
///
/// Fault injection must stay last: injected faults have to look exactly like
/// failures of the remote service to everything above it.
pub fn default_client_middlewares(
    args: ClientMiddlewareArgs,
) -> Result<InterceptorChain, ClientBuildError> {
    args.retry_policy
        .validate()
        .map_err(ClientBuildError::RetryPolicy)?;

    let wrapped_slug = format!("{}{WRAPPED_SLUG_SUFFIX}", args.slug);
    let client = args.client_name.as_deref().unwrap_or(&args.slug);
    let monitor = |slug: &str| {
        MonitorClient::new(
            slug,
            args.spans.clone(),
            args.suppressor.clone(),
            args.warn_once.clone(),
        )
    };

    let mut chain = InterceptorChain::new()
        .with(MethodDescriptorInterceptor::new(&args.slug))
        .with(ForwardEdgeContext);
    if let Some(name) = args.client_name.as_deref().filter(|name| !name.is_empty()) {
        chain = chain.with(SetClientName::new(name)?);
    }
    chain = chain
        .with(monitor(&wrapped_slug))
        .with(ClientMetrics::new(&wrapped_slug, args.metrics.clone()))
        .with(Retry::new(args.retry_policy.clone()));
    if let Some(breaker) = args.breaker.clone() {
        chain.push(breaker);
    }
    Ok(chain
        .with(monitor(&args.slug))
        .with(ClientMetrics::new(&args.slug, args.metrics.clone()))
        .with(ErrorNormalizer)
        .with(ExceptionExtractor)
        .with(SetDeadlineBudget)
        .with(HeaderPropagation::new(&args.slug, client, args.header_resolver.clone()))
        .with(ClientFaultMiddleware::new(
            args.address.as_deref(),
            args.fault_rules.clone(),
        )))
}

/// Builder for creating a [`Client`].
///
/// # Example
///
/// ```ignore
/// use rpcweave_client::{ClientBuilder, RetryPolicy};
///
/// let client = ClientBuilder::new("users")
///     .address("users.svc:9090")
///     .client_name("profile-service")
///     .retry_policy(RetryPolicy::new().attempts(3))
///     .build(transport)?;
/// ```
#[derive(Debug)]
pub struct ClientBuilder {
    args: ClientMiddlewareArgs,
    /// Interceptors installed outside the default chain.
    interceptors: InterceptorChain,
    default_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new<S: Into<String>>(slug: S) -> Self {
        Self {
            args: ClientMiddlewareArgs::new(slug),
            interceptors: InterceptorChain::new(),
            default_timeout: None,
        }
    }

    /// Create a builder from deserialized settings.
    ///
    /// Fault rules from the settings are installed as a [`SharedFaultRules`]
    /// source; use [`fault_rules`](Self::fault_rules) to keep a handle for
    /// replacing them later.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientBuildError> {
        let mut builder = Self::new(config.slug.clone())
            .retry_policy(config.retry.to_policy()?)
            .fault_rules(Arc::new(SharedFaultRules::new(config.fault_rules()?)));
        builder.args.address = config.address.clone();
        builder.args.client_name = config.client_name.clone();
        Ok(builder)
    }

    pub fn address<S: Into<String>>(mut self, address: S) -> Self {
        self.args.address = Some(address.into());
        self
    }

    pub fn client_name<S: Into<String>>(mut self, name: S) -> Self {
        self.args.client_name = Some(name.into());
        self
    }

    /// Set the default retry policy. Calls may override it through
    /// [`CallContext::with_retry_policy`](crate::CallContext::with_retry_policy).
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.args.retry_policy = policy;
        self
    }

    pub fn suppressor(mut self, suppressor: Suppressor) -> Self {
        self.args.suppressor = suppressor;
        self
    }

    pub fn breaker<I: Interceptor + 'static>(mut self, breaker: I) -> Self {
        self.args.breaker = Some(Arc::new(breaker));
        self
    }

    pub fn fault_rules(mut self, rules: Arc<dyn FaultRuleSource>) -> Self {
        self.args.fault_rules = rules;
        self
    }

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.args.metrics = sink;
        self
    }

    /// Set the span factory; `None` disables client spans.
    pub fn spans(mut self, spans: Option<Arc<dyn SpanFactory>>) -> Self {
        self.args.spans = spans;
        self
    }

    pub fn header_resolver(mut self, resolver: Arc<dyn HeaderResolver>) -> Self {
        self.args.header_resolver = resolver;
        self
    }

    pub fn warn_once(mut self, guard: Arc<WarnOnce>) -> Self {
        self.args.warn_once = guard;
        self
    }

    /// Add an interceptor outside the default chain. Interceptors run in
    /// the order they were added, before any default interceptor.
    pub fn with_interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Apply a timeout to every call. A shorter deadline already on the
    /// call's context wins.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Build the client around `transport`.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry policy is invalid or the client name is
    /// not a valid header value.
    pub fn build<T: Transport>(self, transport: T) -> Result<Client, ClientBuildError> {
        let mut chain = self.interceptors;
        chain.extend(default_client_middlewares(self.args)?);
        let pipeline = Pipeline::new(&chain, Arc::new(transport));
        Ok(Client::new(pipeline, self.default_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_length() {
        let args = ClientMiddlewareArgs::new("users");
        assert_eq!(default_client_middlewares(args).unwrap().len(), 12);

        let mut args = ClientMiddlewareArgs::new("users");
        args.client_name = Some("profile".into());
        args.breaker = Some(Arc::new(ForwardEdgeContext));
        assert_eq!(default_client_middlewares(args).unwrap().len(), 14);
    }

    #[test]
    fn test_invalid_settings_fail_to_build() {
        let mut args = ClientMiddlewareArgs::new("users");
        args.client_name = Some("bad\nname".into());
        assert!(matches!(
            default_client_middlewares(args),
            Err(ClientBuildError::Header(_))
        ));

        let mut args = ClientMiddlewareArgs::new("users");
        args.retry_policy = RetryPolicy::new().attempts(0);
        assert!(matches!(
            default_client_middlewares(args),
            Err(ClientBuildError::RetryPolicy(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"slug": "users", "address": "users.svc:9090", "retry": {"attempts": 3}}"#,
        )
        .unwrap();
        let builder = ClientBuilder::from_config(&config).unwrap();
        assert_eq!(builder.args.slug, "users");
        assert_eq!(builder.args.address.as_deref(), Some("users.svc:9090"));
        assert_eq!(builder.args.retry_policy.attempts, 3);
    }
}
