use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use rpcweave_core::headers::DEADLINE_BUDGET_HEADER;

use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest};
use crate::{CallContext, ClientError};

/// Milliseconds of budget left, rounded up and never below 1.
pub fn deadline_budget_ms(remaining: Duration) -> u64 {
    let ms = remaining.as_nanos().div_ceil(1_000_000);
    u64::try_from(ms).unwrap_or(u64::MAX).max(1)
}

/// Communicates the remaining deadline budget to the callee.
///
/// A call whose context is already done fails here and never reaches the
/// transport. Without a deadline no budget is sent.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetDeadlineBudget;

impl Interceptor for SetDeadlineBudget {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let name = HeaderName::from_static(DEADLINE_BUDGET_HEADER);
        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            if let Err(reason) = ctx.check() {
                return Box::pin(async move { Err(ClientError::from(reason)) });
            }
            let ctx = match ctx.remaining() {
                Some(remaining) => {
                    let value = HeaderValue::from(deadline_budget_ms(remaining));
                    ctx.with_protocol_header(name.clone(), value)
                }
                None => ctx.without_header(DEADLINE_BUDGET_HEADER),
            };
            next(ctx, request)
        })
    }
}
