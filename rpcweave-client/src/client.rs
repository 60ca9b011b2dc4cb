//! The client facade.

use std::time::Duration;

use bytes::Bytes;

use crate::CallContext;
use crate::interceptor::{UnaryRequest, UnaryResult};
use crate::pipeline::Pipeline;

/// An rpcweave client: a built pipeline plus client-wide call defaults.
///
/// Cheap to clone; clones share the pipeline and may be used concurrently.
#[derive(Clone, Debug)]
pub struct Client {
    pipeline: Pipeline,
    default_timeout: Option<Duration>,
}

impl Client {
    pub(crate) fn new(pipeline: Pipeline, default_timeout: Option<Duration>) -> Self {
        Self {
            pipeline,
            default_timeout,
        }
    }

    /// Create a builder for a client of the service `slug`.
    pub fn builder<S: Into<String>>(slug: S) -> crate::ClientBuilder {
        crate::ClientBuilder::new(slug)
    }

    /// Call `method` with an encoded arguments body.
    pub async fn call(&self, ctx: CallContext, method: &str, body: Bytes) -> UnaryResult {
        self.call_request(ctx, UnaryRequest::new(method, body)).await
    }

    /// Send a prepared request through the pipeline.
    pub async fn call_request(&self, ctx: CallContext, request: UnaryRequest) -> UnaryResult {
        let ctx = match self.default_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        };
        self.pipeline.call(ctx, request).await
    }

    /// The pipeline this client calls through.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}
