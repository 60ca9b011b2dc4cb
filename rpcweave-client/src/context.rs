//! Per-call ambient state.
//!
//! A [`CallContext`] travels down the interceptor chain with every call. It is
//! derived copy-on-write: the `with_*` methods consume the context and return a
//! new one, so an interceptor never changes what an outer interceptor sees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};
use rpcweave_core::headers::{self, HeaderError, HeaderSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::config::RetryPolicy;
use crate::error::ContextError;

/// The service and method a call targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Slug of the remote service.
    pub service: String,
    /// Method name.
    pub method: String,
}

impl MethodDescriptor {
    /// Create a new method descriptor.
    pub fn new<S: Into<String>, M: Into<String>>(service: S, method: M) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }
}

/// Destination of a set of propagated headers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HeaderTarget {
    pub service: String,
    pub client: String,
    pub method: String,
}

impl HeaderTarget {
    pub fn new(service: &str, client: &str, method: &str) -> Self {
        Self {
            service: service.to_string(),
            client: client.to_string(),
            method: method.to_string(),
        }
    }
}

type HeaderAdditions = Arc<[(HeaderName, HeaderValue)]>;

/// Propagated header additions already computed during one logical call.
///
/// Shared by every retry attempt of the call; a fresh cache is installed
/// each time a pipeline starts a call.
#[derive(Debug, Default)]
pub(crate) struct OutgoingHeaderCache {
    entries: Mutex<HashMap<HeaderTarget, HeaderAdditions>>,
}

impl OutgoingHeaderCache {
    pub(crate) fn get(&self, target: &HeaderTarget) -> Option<HeaderAdditions> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    pub(crate) fn store(&self, target: HeaderTarget, additions: HeaderAdditions) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, additions);
    }
}

/// Ambient state for one call.
///
/// # Example
///
/// ```ignore
/// use rpcweave_client::CallContext;
/// use std::time::Duration;
///
/// let ctx = CallContext::new()
///     .with_timeout(Duration::from_millis(250))
///     .with_header("x-request-id", "abc-123")?;
/// ```
#[derive(Clone, Debug)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    headers: HeaderSet,
    incoming: Arc<HeaderMap>,
    edge_context: Option<Arc<str>>,
    method: Option<MethodDescriptor>,
    span: Option<Span>,
    retry_policy: Option<Arc<RetryPolicy>>,
    header_cache: Arc<OutgoingHeaderCache>,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CallContext {
    /// Create an empty context with no deadline.
    pub fn new() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
            headers: HeaderSet::new(),
            incoming: Arc::new(HeaderMap::new()),
            edge_context: None,
            method: None,
            span: None,
            retry_policy: None,
            header_cache: Arc::new(OutgoingHeaderCache::default()),
        }
    }

    /// Set a deadline. A later deadline never extends an earlier one.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Set a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancel the call when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The token that cancels this call.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns an error if the context is already done.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.cancel.is_cancelled() {
            return Err(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Wait until the context is done and report why.
    ///
    /// Never resolves for a context without a deadline that is never cancelled.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.cancel.cancelled() => ContextError::Canceled,
                () = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                ContextError::Canceled
            }
        }
    }

    /// Add an application header to the outgoing call.
    ///
    /// Names inside the reserved namespace are rejected; only header
    /// propagation may write there.
    pub fn with_header(self, name: &str, value: &str) -> Result<Self, HeaderError> {
        if headers::is_reserved(name) {
            return Err(HeaderError::Reserved(name.to_string()));
        }
        let (name, value) = headers::parse_header(name, value)?;
        Ok(self.with_protocol_header(name, value))
    }

    /// Remove a header from the outgoing call.
    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Set a header without the reserved-namespace check.
    pub(crate) fn with_protocol_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub(crate) fn with_header_set(mut self, headers: HeaderSet) -> Self {
        self.headers = headers;
        self
    }

    /// The outgoing headers.
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// Look up an outgoing header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name)
    }

    /// Record the headers of the inbound request this call is made on behalf
    /// of. Only the reserved namespace is kept; those headers are forwarded on
    /// the outgoing call.
    pub fn with_incoming_headers(mut self, incoming: &HeaderMap) -> Self {
        self.incoming = Arc::new(headers::reserved_headers(incoming));
        self
    }

    /// Reserved headers received with the inbound request.
    pub fn incoming_headers(&self) -> &HeaderMap {
        &self.incoming
    }

    /// Attach the serialized edge request context.
    pub fn with_edge_context<S: Into<Arc<str>>>(mut self, edge_context: S) -> Self {
        self.edge_context = Some(edge_context.into());
        self
    }

    /// The serialized edge request context, if any.
    pub fn edge_context(&self) -> Option<&str> {
        self.edge_context.as_deref()
    }

    pub(crate) fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.method = Some(method);
        self
    }

    /// The method being called, once the descriptor middleware has run.
    pub fn method(&self) -> Option<&MethodDescriptor> {
        self.method.as_ref()
    }

    pub(crate) fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// The innermost client span wrapping this call, if any.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    /// Override the pipeline's retry policy for this call.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    /// The per-call retry policy override, if any.
    pub fn retry_policy(&self) -> Option<&Arc<RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    pub(crate) fn header_cache(&self) -> &OutgoingHeaderCache {
        &self.header_cache
    }

    /// Start a new logical call: headers computed by earlier calls made with
    /// the same context are not reused.
    pub(crate) fn begin_call(mut self) -> Self {
        self.header_cache = Arc::new(OutgoingHeaderCache::default());
        self
    }
}
