use std::sync::Arc;

use crate::classify;
use crate::config::{RetryPolicy, execute};
use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest};
use crate::CallContext;

/// Retries failed attempts according to a [`RetryPolicy`].
///
/// The policy attached to the call's context, if any, replaces the default
/// one. Every attempt runs the interceptors below this one again and shares
/// the call's deadline.
#[derive(Clone, Debug)]
pub struct Retry {
    policy: Arc<RetryPolicy>,
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }
}

impl Interceptor for Retry {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let default_policy = self.policy.clone();
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let next = next.clone();
            let policy = ctx
                .retry_policy()
                .cloned()
                .unwrap_or_else(|| default_policy.clone());
            Box::pin(async move {
                execute(&ctx, &policy, || {
                    let attempt = next(ctx.clone(), request.clone());
                    async move { classify::extract(attempt.await) }
                })
                .await
            })
        })
    }
}
