//! The interceptors that make up the default client pipeline.
//!
//! Telemetry and fault injection live in their own modules; everything else
//! the default pipeline installs is here:
//! - [`MethodDescriptorInterceptor`]: tags the context with the called method
//! - [`ForwardEdgeContext`]: forwards the edge request context as a header
//! - [`SetClientName`]: sends the client's name as the user agent
//! - [`Retry`]: retries attempts according to a [`RetryPolicy`](crate::RetryPolicy)
//! - [`ErrorNormalizer`] and [`ExceptionExtractor`]: turn IDL exceptions into errors
//! - [`SetDeadlineBudget`]: tells the callee how long it has
//! - [`HeaderPropagation`]: writes the reserved header namespace

mod deadline;
mod errors;
mod headers;
mod retry;
mod tagging;

pub use deadline::{SetDeadlineBudget, deadline_budget_ms};
pub use errors::{ErrorNormalizer, ExceptionExtractor};
pub use headers::{HeaderPropagation, HeaderResolver, PropagatingResolver};
pub use retry::Retry;
pub use tagging::{ForwardEdgeContext, MethodDescriptorInterceptor, SetClientName};
