//! The composed call function of a client.

use std::sync::Arc;

use crate::interceptor::{BoxFuture, InterceptorChain, UnaryFunc, UnaryRequest, UnaryResult};
use crate::CallContext;

/// The RPC transport a pipeline ends in.
///
/// Implemented for every `Fn(CallContext, UnaryRequest) -> BoxFuture<...>`
/// closure.
pub trait Transport: Send + Sync + 'static {
    fn call(&self, ctx: CallContext, request: UnaryRequest) -> BoxFuture<'static, UnaryResult>;
}

impl<F> Transport for F
where
    F: Fn(CallContext, UnaryRequest) -> BoxFuture<'static, UnaryResult> + Send + Sync + 'static,
{
    fn call(&self, ctx: CallContext, request: UnaryRequest) -> BoxFuture<'static, UnaryResult> {
        self(ctx, request)
    }
}

/// An interceptor chain folded around a transport.
///
/// Built once; cloning is cheap and clones may be called concurrently.
#[derive(Clone)]
pub struct Pipeline {
    call: UnaryFunc,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(chain: &InterceptorChain, transport: Arc<dyn Transport>) -> Self {
        let terminal: UnaryFunc =
            Arc::new(move |ctx: CallContext, request: UnaryRequest| transport.call(ctx, request));
        Self {
            call: chain.wrap_unary(terminal),
        }
    }

    /// Run one logical call through the pipeline.
    pub async fn call(&self, ctx: CallContext, request: UnaryRequest) -> UnaryResult {
        (self.call)(ctx.begin_call(), request).await
    }
}
