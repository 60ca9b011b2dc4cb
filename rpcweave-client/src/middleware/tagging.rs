use std::sync::Arc;

use http::{HeaderName, HeaderValue};
use rpcweave_core::headers::{EDGE_REQUEST_HEADER, HeaderError, USER_AGENT_HEADER};

use crate::context::MethodDescriptor;
use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest};
use crate::{CallContext, ClientError};

/// Attaches the [`MethodDescriptor`] of the call to its context, for the
/// telemetry further down the chain.
#[derive(Clone, Debug)]
pub struct MethodDescriptorInterceptor {
    service: Arc<str>,
}

impl MethodDescriptorInterceptor {
    pub fn new(service: &str) -> Self {
        Self {
            service: Arc::from(service),
        }
    }
}

impl Interceptor for MethodDescriptorInterceptor {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let service = self.service.clone();
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let descriptor = MethodDescriptor::new(&*service, request.method.as_str());
            next(ctx.with_method(descriptor), request)
        })
    }
}

/// Forwards the serialized edge request context of the inbound request.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardEdgeContext;

impl Interceptor for ForwardEdgeContext {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let name = HeaderName::from_static(EDGE_REQUEST_HEADER);
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let Some(edge) = ctx.edge_context() else {
                return next(ctx, request);
            };
            match HeaderValue::from_str(edge) {
                Ok(value) => next(ctx.with_protocol_header(name.clone(), value), request),
                Err(_) => {
                    let error = HeaderError::InvalidValue(EDGE_REQUEST_HEADER.to_string());
                    Box::pin(async move { Err(ClientError::from(error)) })
                }
            }
        })
    }
}

/// Sends the client's name as the `User-Agent` of every call.
#[derive(Clone, Debug)]
pub struct SetClientName {
    value: HeaderValue,
}

impl SetClientName {
    pub fn new(client_name: &str) -> Result<Self, HeaderError> {
        let value = HeaderValue::from_str(client_name)
            .map_err(|_| HeaderError::InvalidValue(USER_AGENT_HEADER.to_string()))?;
        Ok(Self { value })
    }
}

impl Interceptor for SetClientName {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let name = HeaderName::from_static(USER_AGENT_HEADER);
        let value = self.value.clone();
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            next(ctx.with_protocol_header(name.clone(), value.clone()), request)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{InterceptorChain, UnaryResponse};
    use bytes::Bytes;
    use std::sync::Mutex;

    fn capturing(seen: Arc<Mutex<Option<CallContext>>>) -> UnaryFunc {
        Arc::new(move |ctx: CallContext, _req: UnaryRequest| {
            *seen.lock().unwrap() = Some(ctx);
            Box::pin(async { Ok(UnaryResponse::default()) })
        })
    }

    async fn run(chain: InterceptorChain, ctx: CallContext) -> (CallContext, Result<(), ClientError>) {
        let seen = Arc::new(Mutex::new(None));
        let call = chain.wrap_unary(capturing(seen.clone()));
        let result = call(ctx.clone(), UnaryRequest::new("getUser", Bytes::new()))
            .await
            .map(|_| ());
        let seen = seen.lock().unwrap().take().unwrap_or(ctx);
        (seen, result)
    }

    #[tokio::test]
    async fn test_method_descriptor() {
        let chain = InterceptorChain::new().with(MethodDescriptorInterceptor::new("users"));
        let (ctx, _) = run(chain, CallContext::new()).await;
        assert_eq!(ctx.method(), Some(&MethodDescriptor::new("users", "getUser")));
    }

    #[tokio::test]
    async fn test_forward_edge_context() {
        let chain = InterceptorChain::new().with(ForwardEdgeContext);

        let (ctx, _) = run(chain.clone(), CallContext::new().with_edge_context("edge-blob")).await;
        assert_eq!(ctx.header(EDGE_REQUEST_HEADER), Some("edge-blob"));

        let (ctx, _) = run(chain.clone(), CallContext::new()).await;
        assert!(ctx.header(EDGE_REQUEST_HEADER).is_none());

        let (_, result) = run(chain, CallContext::new().with_edge_context("bad\nvalue")).await;
        assert_eq!(
            result.unwrap_err(),
            ClientError::Header(HeaderError::InvalidValue(EDGE_REQUEST_HEADER.to_string()))
        );
    }

    #[tokio::test]
    async fn test_set_client_name() {
        let chain = InterceptorChain::new().with(SetClientName::new("users-client").unwrap());
        let (ctx, _) = run(chain, CallContext::new()).await;
        assert_eq!(ctx.header(USER_AGENT_HEADER), Some("users-client"));

        assert!(SetClientName::new("bad\nname").is_err());
    }
}
