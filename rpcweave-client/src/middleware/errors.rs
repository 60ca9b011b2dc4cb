use std::sync::Arc;

use crate::classify;
use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest};
use crate::{CallContext, ClientError};

/// Turns an exception carried by a successful response into
/// [`ClientError::Application`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ExceptionExtractor;

impl Interceptor for ExceptionExtractor {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let call = next(ctx, request);
            Box::pin(async move { classify::extract(call.await) })
        })
    }
}

/// Rewrites application exceptions into their described form, whose
/// message carries the code, retry hint and details. The error stays a
/// [`ClientError::Application`] with every field intact.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorNormalizer;

impl Interceptor for ErrorNormalizer {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let call = next(ctx, request);
            Box::pin(async move {
                classify::extract(call.await).map_err(|error| match error {
                    ClientError::Application(exception) => {
                        ClientError::Application(exception.described())
                    }
                    other => other,
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{InterceptorChain, UnaryResponse, UnaryResult};
    use bytes::Bytes;
    use rpcweave_core::ApplicationException;

    fn returning(result: UnaryResult) -> UnaryFunc {
        Arc::new(move |_ctx: CallContext, _req: UnaryRequest| {
            let result = result.clone();
            Box::pin(async move { result })
        })
    }

    #[tokio::test]
    async fn test_extractor() {
        let exception = ApplicationException::of_type("users.UserBanned").with_message("banned");
        let call = InterceptorChain::new()
            .with(ExceptionExtractor)
            .wrap_unary(returning(Ok(UnaryResponse::with_exception(exception.clone()))));

        let error = call(CallContext::new(), UnaryRequest::new("get", Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(error, ClientError::Application(exception));
    }

    #[tokio::test]
    async fn test_normalizer_describes_exceptions() {
        let exception = ApplicationException::new(404, "no such user").with_retryable(false);
        let call = InterceptorChain::new()
            .with(ErrorNormalizer)
            .with(ExceptionExtractor)
            .wrap_unary(returning(Ok(UnaryResponse::with_exception(exception))));

        let error = call(CallContext::new(), UnaryRequest::new("get", Bytes::new()))
            .await
            .unwrap_err();
        let exception = error.exception().unwrap();
        assert!(exception.is_described());
        assert_eq!(exception.code, Some(404));
        assert_eq!(
            error.to_string(),
            "rpcweave.Error: \"no such user\" (code=404 NOT_FOUND) (retryable=false)"
        );
    }

    #[tokio::test]
    async fn test_normalizer_keeps_other_errors() {
        let call = InterceptorChain::new()
            .with(ErrorNormalizer)
            .wrap_unary(returning(Err(ClientError::PoolExhausted)));
        let error = call(CallContext::new(), UnaryRequest::new("get", Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(error, ClientError::PoolExhausted);
    }
}
