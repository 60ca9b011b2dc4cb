//! Client-side fault injection.
//!
//! A [`FaultInjector`] substitutes the outcome of a call according to rules
//! supplied from outside the pipeline. Injected outcomes are ordinary
//! [`ClientError`] values or responses, so every outer interceptor (retry,
//! metrics, spans) treats them exactly like a failure of the remote service.
//! For that reason [`ClientFaultMiddleware`] must be the innermost interceptor.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rpcweave_core::headers::{HOSTNAME_HEADER, HeaderSet};
use serde::Deserialize;

use crate::interceptor::{Interceptor, UnaryFunc, UnaryRequest, UnaryResponse, UnaryResult};
use crate::{CallContext, ClientError};

/// The outcome a matching rule forces.
#[derive(Clone, Debug, PartialEq)]
pub enum FaultOutcome {
    /// Fail the call with this error.
    Error(ClientError),
    /// Answer the call with this response without reaching the transport.
    Response(UnaryResponse),
}

/// An outgoing header that must be present with the given value.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HeaderCondition {
    pub name: String,
    pub value: String,
}

/// One fault injection rule.
///
/// Patterns are matched against the call's resolved host and method name:
/// `*` matches anything, a trailing `*` matches by prefix, anything else must
/// match exactly. An absent pattern matches anything.
#[derive(Clone, Debug, PartialEq)]
pub struct FaultRule {
    /// Address of the remote service the rule applies to.
    pub address: String,
    pub host_pattern: Option<String>,
    pub method_pattern: Option<String>,
    pub header: Option<HeaderCondition>,
    /// Sleep applied before the forced outcome.
    pub delay: Option<Duration>,
    /// Share of matching calls the rule applies to, 0-100.
    pub percentage: u8,
    pub outcome: FaultOutcome,
}

impl FaultRule {
    /// Create a rule that forces `outcome` on every call to `address`.
    pub fn new<S: Into<String>>(address: S, outcome: FaultOutcome) -> Self {
        Self {
            address: address.into(),
            host_pattern: None,
            method_pattern: None,
            header: None,
            delay: None,
            percentage: 100,
            outcome,
        }
    }

    pub fn host<S: Into<String>>(mut self, pattern: S) -> Self {
        self.host_pattern = Some(pattern.into());
        self
    }

    pub fn method<S: Into<String>>(mut self, pattern: S) -> Self {
        self.method_pattern = Some(pattern.into());
        self
    }

    pub fn when_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.header = Some(HeaderCondition {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Apply the rule to `percentage` percent of matching calls. Values above
    /// 100 are clamped.
    pub fn percentage(mut self, percentage: u8) -> Self {
        self.percentage = percentage.min(100);
        self
    }

    /// Returns whether the rule targets the call described by `params`.
    ///
    /// The percentage roll is not part of matching.
    pub fn matches(&self, params: &InjectParams<'_>) -> bool {
        self.address == params.address
            && pattern_matches(self.host_pattern.as_deref(), params.host)
            && pattern_matches(self.method_pattern.as_deref(), params.method)
            && self
                .header
                .as_ref()
                .is_none_or(|cond| params.headers.get_str(&cond.name) == Some(cond.value.as_str()))
    }

    fn rolls(&self) -> bool {
        match self.percentage {
            100.. => true,
            0 => false,
            percentage => rand::random_range(0..100u8) < percentage,
        }
    }
}

fn pattern_matches(pattern: Option<&str>, value: &str) -> bool {
    match pattern {
        None | Some("*") => true,
        Some(pattern) => match pattern.strip_suffix('*') {
            Some(prefix) => value.starts_with(prefix),
            None => pattern == value,
        },
    }
}

/// Source of the current fault rules.
///
/// Rules are owned outside the pipeline; the injector reads a snapshot per
/// call and never mutates it.
pub trait FaultRuleSource: Send + Sync {
    fn rules(&self) -> Arc<Vec<FaultRule>>;
}

/// A fixed set of rules.
#[derive(Clone, Debug, Default)]
pub struct StaticFaultRules(Arc<Vec<FaultRule>>);

impl StaticFaultRules {
    pub fn new(rules: Vec<FaultRule>) -> Self {
        Self(Arc::new(rules))
    }
}

impl FaultRuleSource for StaticFaultRules {
    fn rules(&self) -> Arc<Vec<FaultRule>> {
        self.0.clone()
    }
}

/// Rules that can be replaced atomically while calls are in flight, e.g. by
/// a configuration watcher.
#[derive(Debug)]
pub struct SharedFaultRules {
    rules: ArcSwap<Vec<FaultRule>>,
}

impl Default for SharedFaultRules {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl SharedFaultRules {
    pub fn new(rules: Vec<FaultRule>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
        }
    }

    /// Install a new rule set. Calls already past rule selection are unaffected.
    pub fn replace(&self, rules: Vec<FaultRule>) {
        self.rules.store(Arc::new(rules));
    }
}

impl FaultRuleSource for SharedFaultRules {
    fn rules(&self) -> Arc<Vec<FaultRule>> {
        self.rules.load_full()
    }
}

/// Parameters describing one call to the injector.
#[derive(Clone, Copy, Debug)]
pub struct InjectParams<'a> {
    pub address: &'a str,
    /// Resolved hostname of the peer, empty when unknown.
    pub host: &'a str,
    pub method: &'a str,
    pub headers: &'a HeaderSet,
}

/// Applies fault rules to calls.
#[derive(Clone)]
pub struct FaultInjector {
    source: Arc<dyn FaultRuleSource>,
}

impl std::fmt::Debug for FaultInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultInjector").finish_non_exhaustive()
    }
}

impl FaultInjector {
    pub fn new(source: Arc<dyn FaultRuleSource>) -> Self {
        Self { source }
    }

    /// Run `resume` unless a rule matches the call.
    ///
    /// The first matching rule decides. When its percentage roll succeeds it
    /// forces its outcome, after its delay, and `resume` is never invoked. A
    /// delay cut short by the context reports the context error instead.
    pub async fn inject<F, Fut>(
        &self,
        ctx: &CallContext,
        params: InjectParams<'_>,
        resume: F,
    ) -> UnaryResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = UnaryResult>,
    {
        let rules = self.source.rules();
        let Some(rule) = rules.iter().find(|rule| rule.matches(&params)) else {
            return resume().await;
        };
        if !rule.rolls() {
            return resume().await;
        }

        tracing::trace!(
            address = params.address,
            host = params.host,
            method = params.method,
            "injecting fault"
        );

        if let Some(delay) = rule.delay {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                reason = ctx.done() => return Err(reason.into()),
            }
        }

        match &rule.outcome {
            FaultOutcome::Error(error) => Err(error.clone()),
            FaultOutcome::Response(response) => Ok(response.clone()),
        }
    }
}

/// Interceptor that routes calls through a [`FaultInjector`].
///
/// Without an address injection is disabled and calls pass straight through.
#[derive(Clone, Debug)]
pub struct ClientFaultMiddleware {
    address: Option<Arc<str>>,
    injector: FaultInjector,
}

impl ClientFaultMiddleware {
    pub fn new(address: Option<&str>, source: Arc<dyn FaultRuleSource>) -> Self {
        Self {
            address: address.filter(|a| !a.is_empty()).map(Arc::from),
            injector: FaultInjector::new(source),
        }
    }
}

impl Interceptor for ClientFaultMiddleware {
    fn wrap_unary(&self, next: UnaryFunc) -> UnaryFunc {
        let Some(address) = self.address.clone() else {
            return next;
        };
        let injector = self.injector.clone();

        Arc::new(move |ctx: CallContext, request: UnaryRequest| {
            let next = next.clone();
            let injector = injector.clone();
            let address = address.clone();
            Box::pin(async move {
                let headers = ctx.headers().clone();
                let params = InjectParams {
                    address: &address,
                    host: headers.get_str(HOSTNAME_HEADER).unwrap_or_default(),
                    method: &request.method,
                    headers: &headers,
                };
                injector
                    .inject(&ctx, params, || next(ctx.clone(), request.clone()))
                    .await
            })
        })
    }
}
