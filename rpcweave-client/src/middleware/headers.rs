//! Writes the reserved header namespace on outgoing calls.
//!
//! This interceptor is the only writer of the namespace. On every attempt it
//! strips what the resolver flags for removal from the write list, then adds
//! the resolver's headers. Additions are resolved once per logical call and
//! the cached copy is reused by retry attempts targeting the same
//! service, client and method.

use std::sync::Arc;

use http::{HeaderName, HeaderValue};
use rpcweave_core::headers;

use crate::CallContext;
use crate::context::HeaderTarget;
use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest};

/// Decides which headers a call carries in the reserved namespace.
pub trait HeaderResolver: Send + Sync {
    /// Whether an outgoing header must be stripped before the additions are
    /// written. Defaults to every name in the reserved namespace.
    fn should_remove(&self, name: &HeaderName) -> bool {
        headers::is_reserved(name.as_str())
    }

    /// Report the headers to add to a call to `target` through `set`.
    fn resolve(
        &self,
        ctx: &CallContext,
        target: &HeaderTarget,
        set: &mut dyn FnMut(HeaderName, HeaderValue),
    );
}

/// Forwards the reserved headers received with the inbound request.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropagatingResolver;

impl HeaderResolver for PropagatingResolver {
    fn resolve(
        &self,
        ctx: &CallContext,
        _target: &HeaderTarget,
        set: &mut dyn FnMut(HeaderName, HeaderValue),
    ) {
        for (name, value) in ctx.incoming_headers() {
            set(name.clone(), value.clone());
        }
    }
}

#[derive(Clone)]
pub struct HeaderPropagation {
    service: Arc<str>,
    client: Arc<str>,
    resolver: Arc<dyn HeaderResolver>,
}

impl HeaderPropagation {
    pub fn new(service: &str, client: &str, resolver: Arc<dyn HeaderResolver>) -> Self {
        Self {
            service: Arc::from(service),
            client: Arc::from(client),
            resolver,
        }
    }
}

impl Interceptor for HeaderPropagation {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let service = self.service.clone();
        let client = self.client.clone();
        let resolver = self.resolver.clone();

        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let target = HeaderTarget::new(&service, &client, &request.method);
            let additions = match ctx.header_cache().get(&target) {
                Some(additions) => additions,
                None => {
                    let mut resolved = Vec::new();
                    resolver.resolve(&ctx, &target, &mut |name: HeaderName, value: HeaderValue| {
                        resolved.push((name, value))
                    });
                    let resolved: Arc<[(HeaderName, HeaderValue)]> = resolved.into();
                    ctx.header_cache().store(target, resolved.clone());
                    resolved
                }
            };

            let mut outgoing = ctx.headers().clone();
            outgoing.retain_write_list(|name| resolver.should_remove(name));
            for (name, value) in additions.iter() {
                outgoing.insert(name.clone(), value.clone());
            }
            next(ctx.with_header_set(outgoing), request)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{InterceptorChain, UnaryResponse};
    use bytes::Bytes;
    use http::HeaderMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn capture_wire(seen: Arc<Mutex<Vec<(HeaderName, HeaderValue)>>>) -> UnaryFunc {
        Arc::new(move |ctx: CallContext, _req: UnaryRequest| {
            *seen.lock().unwrap() = ctx.headers().to_wire();
            Box::pin(async { Ok(UnaryResponse::default()) })
        })
    }

    fn names(wire: &[(HeaderName, HeaderValue)]) -> Vec<&str> {
        wire.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_forwards_incoming_reserved_headers() {
        let mut incoming = HeaderMap::new();
        incoming.insert("x-rpcweave-user", "u1".parse().unwrap());
        incoming.insert("cookie", "secret".parse().unwrap());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let call = InterceptorChain::new()
            .with(HeaderPropagation::new("users", "users-client", Arc::new(PropagatingResolver)))
            .wrap_unary(capture_wire(seen.clone()));

        let ctx = CallContext::new()
            .with_header("x-request-id", "r1")
            .unwrap()
            .with_incoming_headers(&incoming);
        call(ctx, UnaryRequest::new("get", Bytes::new())).await.unwrap();

        let wire = seen.lock().unwrap();
        assert_eq!(names(&wire), vec!["x-request-id", "x-rpcweave-user"]);
    }

    #[tokio::test]
    async fn test_strips_reserved_headers_that_slipped_in() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let call = InterceptorChain::new()
            .with(HeaderPropagation::new("users", "users-client", Arc::new(PropagatingResolver)))
            .wrap_unary(capture_wire(seen.clone()));

        let ctx = CallContext::new()
            .with_protocol_header(
                HeaderName::from_static("x-rpcweave-forged"),
                HeaderValue::from_static("1"),
            )
            .with_header("x-plain", "p")
            .unwrap();
        call(ctx, UnaryRequest::new("get", Bytes::new())).await.unwrap();

        assert_eq!(names(&seen.lock().unwrap()), vec!["x-plain"]);
    }

    struct CountingResolver(AtomicU32);

    impl HeaderResolver for CountingResolver {
        fn resolve(
            &self,
            _ctx: &CallContext,
            target: &HeaderTarget,
            set: &mut dyn FnMut(HeaderName, HeaderValue),
        ) {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            set(
                HeaderName::from_static("x-rpcweave-resolved"),
                HeaderValue::from_str(&format!("{}-{n}", target.method)).unwrap(),
            );
        }
    }

    #[tokio::test]
    async fn test_additions_cached_per_logical_call() {
        let resolver = Arc::new(CountingResolver(AtomicU32::new(0)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let call = InterceptorChain::new()
            .with(HeaderPropagation::new("users", "users-client", resolver.clone()))
            .wrap_unary(capture_wire(seen.clone()));

        let ctx = CallContext::new().begin_call();
        for _ in 0..3 {
            call(ctx.clone(), UnaryRequest::new("get", Bytes::new()))
                .await
                .unwrap();
        }
        assert_eq!(resolver.0.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap()[0].1, "get-0");

        // A different method is a different target.
        call(ctx.clone(), UnaryRequest::new("list", Bytes::new()))
            .await
            .unwrap();
        assert_eq!(resolver.0.load(Ordering::SeqCst), 2);

        // A new logical call resolves again.
        call(ctx.begin_call(), UnaryRequest::new("get", Bytes::new()))
            .await
            .unwrap();
        assert_eq!(resolver.0.load(Ordering::SeqCst), 3);
    }
}
