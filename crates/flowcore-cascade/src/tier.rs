//! Tiers: a named handler plus the policy it runs under.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::retry::RetryPolicy;

/// The unit of work behind a tier.
///
/// The cascade imposes nothing on what a tier does. Return
/// [`TierSkipped`](crate::TierSkipped) (via `anyhow`) to decline the request
/// without counting as a failure.
#[async_trait]
pub trait TierHandler<I, O>: Send + Sync {
    async fn handle(&self, input: Arc<I>) -> anyhow::Result<O>;
}

#[async_trait]
impl<I, O, F, Fut> TierHandler<I, O> for F
where
    I: Send + Sync + 'static,
    O: Send + 'static,
    F: Fn(Arc<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    async fn handle(&self, input: Arc<I>) -> anyhow::Result<O> {
        (self)(input).await
    }
}

/// Default timeout for a canonical tier name.
///
/// `code`/`deterministic` 5s, `generative`/`inferred` 30s, `agentic` 5min,
/// `human` 24h, anything else 30s.
pub fn default_tier_timeout(name: &str) -> Duration {
    match name.to_ascii_lowercase().as_str() {
        "code" | "deterministic" => Duration::from_secs(5),
        "generative" | "inferred" => Duration::from_secs(30),
        "agentic" => Duration::from_secs(300),
        "human" => Duration::from_secs(86_400),
        _ => Duration::from_secs(30),
    }
}

/// Per-tier overrides. `None` falls back to the executor configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TierPolicy {
    pub timeout: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// Abort the handler's task on timeout instead of leaving it running.
    pub cancel_on_timeout: bool,
}

type SkipPredicate<I> = Arc<dyn Fn(&I) -> bool + Send + Sync>;

/// One capability level of a cascade.
pub struct Tier<I, O> {
    name: String,
    pub(crate) handler: Arc<dyn TierHandler<I, O>>,
    policy: TierPolicy,
    skip_if: Option<SkipPredicate<I>>,
}

impl<I, O> Clone for Tier<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            handler: self.handler.clone(),
            policy: self.policy,
            skip_if: self.skip_if.clone(),
        }
    }
}

impl<I, O> Tier<I, O>
where
    I: Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new(name: &str, handler: impl TierHandler<I, O> + 'static) -> Self {
        Self {
            name: name.to_string(),
            handler: Arc::new(handler),
            policy: TierPolicy::default(),
            skip_if: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.policy.retry = Some(retry);
        self
    }

    pub fn cancel_on_timeout(mut self, cancel: bool) -> Self {
        self.policy.cancel_on_timeout = cancel;
        self
    }

    /// Skip this tier whenever `predicate` holds for the request.
    pub fn skip_if(mut self, predicate: impl Fn(&I) -> bool + Send + Sync + 'static) -> Self {
        self.skip_if = Some(Arc::new(predicate));
        self
    }
}

impl<I, O> Tier<I, O> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    pub(crate) fn should_skip(&self, input: &I) -> bool {
        self.skip_if.as_ref().is_some_and(|predicate| predicate(input))
    }
}

impl<I, O> std::fmt::Debug for Tier<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("has_skip_predicate", &self.skip_if.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts_by_name() {
        assert_eq!(default_tier_timeout("code"), Duration::from_secs(5));
        assert_eq!(default_tier_timeout("Inferred"), Duration::from_secs(30));
        assert_eq!(default_tier_timeout("agentic"), Duration::from_secs(300));
        assert_eq!(default_tier_timeout("HUMAN"), Duration::from_secs(86_400));
        assert_eq!(default_tier_timeout("oracle"), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_closure_handler_and_skip() {
        let tier: Tier<u32, u32> = Tier::new("code", |n: Arc<u32>| async move { Ok::<_, anyhow::Error>(*n * 2) })
            .skip_if(|n| *n > 100)
            .with_timeout(Duration::from_millis(50));

        assert_eq!(tier.handler.handle(Arc::new(21)).await.unwrap(), 42);
        assert!(tier.should_skip(&101));
        assert!(!tier.should_skip(&7));
        assert_eq!(tier.policy().timeout, Some(Duration::from_millis(50)));
    }
}
