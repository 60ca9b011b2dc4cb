//! Interceptors for rpcweave calls.
//!
//! An interceptor wraps the "next" call function and returns a new one. The
//! [`InterceptorChain`] folds an ordered list of interceptors around a
//! terminal call function once, when the pipeline is built; every call then
//! descends through them outermost first.
//!
//! # Example
//!
//! ```ignore
//! use rpcweave_client::{FnInterceptor, UnaryNext};
//!
//! let logging = FnInterceptor::unary(|ctx, req, next: UnaryNext| {
//!     Box::pin(async move {
//!         println!("Calling: {}", req.method);
//!         let result = next.call(ctx, req).await;
//!         println!("Call completed");
//!         result
//!     })
//! });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use rpcweave_core::ApplicationException;

use crate::{CallContext, ClientError};

/// Type alias for a boxed future returning a result.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An encoded request for one method call.
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryRequest {
    /// The method being called.
    pub method: String,
    /// Request body (encoded arguments struct).
    pub body: Bytes,
}

impl UnaryRequest {
    /// Create a new unary request.
    pub fn new(method: impl Into<String>, body: Bytes) -> Self {
        Self {
            method: method.into(),
            body,
        }
    }
}

/// The decoded outcome of a call that reached the remote service.
///
/// A successful transport call may still carry an application exception
/// declared in the service's IDL; the extraction middleware turns it into an
/// error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnaryResponse {
    /// Headers sent back with the response.
    pub headers: HeaderMap,
    /// Response body (encoded result struct).
    pub body: Bytes,
    /// Exception set on the result struct, if any.
    pub exception: Option<ApplicationException>,
}

impl UnaryResponse {
    /// Create a new response.
    pub fn new(headers: HeaderMap, body: Bytes) -> Self {
        Self {
            headers,
            body,
            exception: None,
        }
    }

    /// Create a response whose result struct carries an exception.
    pub fn with_exception(exception: ApplicationException) -> Self {
        Self {
            exception: Some(exception),
            ..Self::default()
        }
    }
}

/// The result of a unary call.
pub type UnaryResult = Result<UnaryResponse, ClientError>;

/// The signature of a unary call.
///
/// Interceptors wrap this function to add logic before and after the call.
pub type UnaryFunc =
    Arc<dyn Fn(CallContext, UnaryRequest) -> BoxFuture<'static, UnaryResult> + Send + Sync>;

/// The "next" function in the interceptor chain.
///
/// Call this to proceed to the next interceptor or the actual transport call.
#[derive(Clone)]
pub struct UnaryNext {
    inner: UnaryFunc,
}

impl UnaryNext {
    /// Create a new UnaryNext wrapping a function.
    pub(crate) fn new(inner: UnaryFunc) -> Self {
        Self { inner }
    }

    /// Call the next interceptor or the transport.
    pub async fn call(self, ctx: CallContext, request: UnaryRequest) -> UnaryResult {
        (self.inner)(ctx, request).await
    }
}

/// An interceptor that wraps unary calls.
///
/// Implementations must be safe to share between concurrent calls: anything
/// captured in the returned function is read-only configuration.
pub trait Interceptor: Send + Sync {
    /// Wrap a unary call.
    ///
    /// The default implementation passes through to the next function unchanged.
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        next
    }
}

/// An ordered list of interceptors; the first one added is the outermost.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("count", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    /// Create a new empty interceptor chain.
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Add an interceptor to the chain.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    /// Add an interceptor to the chain, builder style.
    pub fn with<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Append every interceptor of `other` after the ones already in the chain.
    pub fn extend(&mut self, other: InterceptorChain) {
        self.interceptors.extend(other.interceptors);
    }

    /// Check if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Get the number of interceptors in the chain.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Wrap a unary function with all interceptors in the chain.
    ///
    /// Interceptors are applied in reverse order so that the first interceptor
    /// added is the first to process the request.
    pub fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let mut wrapped = next;
        for interceptor in self.interceptors.iter().rev() {
            wrapped = interceptor.wrap_unary(wrapped);
        }
        wrapped
    }
}

/// A function-based unary interceptor.
pub struct FnInterceptor<F> {
    func: F,
}

impl<F> FnInterceptor<F>
where
    F: Fn(CallContext, UnaryRequest, UnaryNext) -> BoxFuture<'static, UnaryResult>
        + Send
        + Sync
        + Clone
        + 'static,
{
    /// Create a new function-based unary interceptor.
    pub fn unary(func: F) -> Self {
        Self { func }
    }
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(CallContext, UnaryRequest, UnaryNext) -> BoxFuture<'static, UnaryResult>
        + Send
        + Sync
        + Clone
        + 'static,
{
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let func = self.func.clone();
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let next = UnaryNext::new(next.clone());
            func(ctx, request, next)
        })
    }
}

impl<F: Clone> Clone for FnInterceptor<F> {
    fn clone(&self) -> Self {
        Self {
            func: self.func.clone(),
        }
    }
}
