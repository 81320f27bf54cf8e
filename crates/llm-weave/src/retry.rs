//! Retry and backoff around provider calls.
//!
//! A [`Retrier`] runs one provider call under a [`RetryPolicy`]:
//!
//! - [`RetryMode::Off`]: one attempt.
//! - [`RetryMode::Builtin`]: attempt `k` failing with a kind listed in
//!   [`retries_on`](RetryPolicy::retries_on) sleeps `2^(k-1)` seconds and
//!   tries again, up to [`retries_count`](RetryPolicy::retries_count)
//!   retries. With the default of three retries the waits are 1, 2 and
//!   4 seconds and the provider sees four calls.
//! - [`RetryMode::Custom`]: a [`RetryStrategy`] receives a zero-argument
//!   [`Attempt`] closure and decides how often to invoke it and how long
//!   to wait in between; the engine adds no backoff of its own.
//!
//! Errors whose kind is not in `retries_on`, and validation errors in
//! every case, are never retried. In custom mode the attempt closure
//! latches after such an error and refuses further provider calls.
//!
//! Each retry emits `retry_attempt` and running out emits
//! `retry_exhausted` on the [`Instrumenter`].

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ErrorKind, LlmError};
use crate::instrument::{Event, Instrumenter};
use crate::provider::BoxFuture;

/// How retries are driven.
#[derive(Clone, Default)]
pub enum RetryMode {
    /// Never retry.
    Off,
    /// Exponential backoff owned by the engine.
    #[default]
    Builtin,
    /// Delegate attempt counting and waiting to a strategy.
    Custom(Arc<dyn RetryStrategy>),
}

impl fmt::Debug for RetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("Off"),
            Self::Builtin => f.write_str("Builtin"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retry driver.
    pub mode: RetryMode,
    /// Retries after the first attempt (builtin mode).
    pub retries_count: u32,
    /// Error kinds that may be retried.
    pub retries_on: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            mode: RetryMode::Builtin,
            retries_count: 3,
            retries_on: ErrorKind::default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn off() -> Self {
        Self {
            mode: RetryMode::Off,
            ..Self::default()
        }
    }

    /// A policy delegating to `strategy`.
    pub fn custom(strategy: impl RetryStrategy + 'static) -> Self {
        Self {
            mode: RetryMode::Custom(Arc::new(strategy)),
            ..Self::default()
        }
    }

    /// Whether `err` may be retried under this policy.
    pub fn retries(&self, err: &LlmError) -> bool {
        !err.is_validation() && self.retries_on.contains(&err.kind())
    }

    /// Builtin wait after failed attempt number `attempt` (1-based).
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use llm_weave::retry::RetryPolicy;
    ///
    /// let waits: Vec<_> = (1..=3).map(RetryPolicy::backoff).collect();
    /// assert_eq!(waits, [1, 2, 4].map(Duration::from_secs));
    /// ```
    pub fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(1u64 << attempt.saturating_sub(1).min(32))
    }
}

/// Outcome of one failed [`Attempt`] as seen by a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Kind of the underlying error.
    pub kind: ErrorKind,
    /// Whether the policy allows another try. Once `false`, every
    /// further invocation fails immediately without calling the provider.
    pub retryable: bool,
}

/// One provider call, invocable repeatedly by a [`RetryStrategy`].
pub type Attempt<'a> =
    Box<dyn FnMut() -> BoxFuture<'a, Result<(), AttemptFailure>> + Send + 'a>;

/// A caller-supplied retry driver.
///
/// The strategy owns attempt counting and any waiting. The call's result
/// is whatever the last invocation of `attempt` produced.
///
/// ```rust
/// use llm_weave::provider::BoxFuture;
/// use llm_weave::retry::{Attempt, RetryStrategy};
///
/// struct Twice;
///
/// impl RetryStrategy for Twice {
///     fn run<'a>(&'a self, mut attempt: Attempt<'a>) -> BoxFuture<'a, ()> {
///         Box::pin(async move {
///             for _ in 0..2 {
///                 match attempt().await {
///                     Ok(()) => return,
///                     Err(failure) if !failure.retryable => return,
///                     Err(_) => {}
///                 }
///             }
///         })
///     }
/// }
/// ```
pub trait RetryStrategy: Send + Sync {
    /// Drives `attempt` until the strategy is satisfied.
    fn run<'a>(&'a self, attempt: Attempt<'a>) -> BoxFuture<'a, ()>;
}

/// Suspends the calling task between builtin attempts.
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()>;
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Records requested waits and returns immediately.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingSleeper {
    /// Waits requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.sleeps).clone()
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'_, ()> {
        lock(&self.sleeps).push(duration);
        Box::pin(std::future::ready(()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs provider calls under a [`RetryPolicy`].
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    instrumenter: Instrumenter,
}

impl fmt::Debug for Retrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrier")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

struct Slot<T> {
    outcome: Option<Result<T, LlmError>>,
    calls: u32,
    latched: Option<AttemptFailure>,
}

impl Retrier {
    /// Creates a retrier sleeping on tokio.
    pub fn new(policy: RetryPolicy, instrumenter: Instrumenter) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            instrumenter,
        }
    }

    /// Replaces the sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replaces the instrumenter retry events are emitted on.
    #[must_use]
    pub fn with_instrumenter(mut self, instrumenter: Instrumenter) -> Self {
        self.instrumenter = instrumenter;
        self
    }

    /// The active policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `op` until it succeeds or the policy gives up.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, LlmError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, LlmError>> + Send,
    {
        match &self.policy.mode {
            RetryMode::Off => {
                let mut op = op;
                op().await
            }
            RetryMode::Builtin => self.run_builtin(op).await,
            RetryMode::Custom(strategy) => self.run_custom(strategy.as_ref(), op).await,
        }
    }

    async fn run_builtin<T, F, Fut>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_retries = self.policy.retries_count;
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !self.policy.retries(&err) {
                return Err(err);
            }
            if attempt > max_retries {
                warn!(attempts = attempt, error = %err, "retries exhausted");
                self.instrumenter.emit(&Event::RetryExhausted {
                    max_retries,
                    exception_kind: err.kind(),
                });
                return Err(err);
            }

            let backoff = RetryPolicy::backoff(attempt);
            debug!(attempt, ?backoff, error = %err, "retrying provider call");
            self.instrumenter.emit(&Event::RetryAttempt {
                attempt,
                max_retries,
                exception_kind: err.kind(),
                backoff_seconds: backoff.as_secs_f64(),
            });
            self.sleeper.sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn run_custom<T, F, Fut>(
        &self,
        strategy: &dyn RetryStrategy,
        op: F,
    ) -> Result<T, LlmError>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, LlmError>> + Send,
    {
        let slot = Mutex::new(Slot {
            outcome: None,
            calls: 0,
            latched: None,
        });
        let op = Mutex::new(op);

        let (slot_ref, op_ref) = (&slot, &op);
        let attempt: Attempt<'_> = Box::new(move || {
            let (slot, op) = (slot_ref, op_ref);
            Box::pin(async move {
                let call = {
                    let mut state = lock(slot);
                    if let Some(failure) = state.latched {
                        return Err(failure);
                    }
                    state.calls += 1;
                    if state.calls > 1 {
                        let kind = match &state.outcome {
                            Some(Err(err)) => err.kind(),
                            _ => ErrorKind::Other,
                        };
                        self.instrumenter.emit(&Event::RetryAttempt {
                            attempt: state.calls - 1,
                            max_retries: self.policy.retries_count,
                            exception_kind: kind,
                            backoff_seconds: 0.0,
                        });
                    }
                    drop(state);
                    let mut op = lock(op);
                    (*op)()
                };

                let result = call.await;
                let mut state = lock(slot);
                match result {
                    Ok(value) => {
                        state.outcome = Some(Ok(value));
                        Ok(())
                    }
                    Err(err) => {
                        let failure = AttemptFailure {
                            kind: err.kind(),
                            retryable: self.policy.retries(&err),
                        };
                        if !failure.retryable {
                            state.latched = Some(failure);
                        }
                        state.outcome = Some(Err(err));
                        Err(failure)
                    }
                }
            })
        });

        strategy.run(attempt).await;

        let slot = slot.into_inner().unwrap_or_else(PoisonError::into_inner);
        match slot.outcome {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => {
                if slot.latched.is_none() {
                    warn!(attempts = slot.calls, error = %err, "custom retry strategy gave up");
                    self.instrumenter.emit(&Event::RetryExhausted {
                        max_retries: self.policy.retries_count,
                        exception_kind: err.kind(),
                    });
                }
                Err(err)
            }
            None => Err(LlmError::Validation(
                "retry strategy finished without attempting the call".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn overloaded() -> LlmError {
        LlmError::Http {
            status: Some(http::StatusCode::SERVICE_UNAVAILABLE),
            message: "busy".into(),
        }
    }

    fn retrier(policy: RetryPolicy) -> (Retrier, RecordingSleeper, Instrumenter) {
        let sleeper = RecordingSleeper::default();
        let instrumenter = Instrumenter::default();
        let retrier = Retrier::new(policy, instrumenter.clone())
            .with_sleeper(Arc::new(sleeper.clone()));
        (retrier, sleeper, instrumenter)
    }

    fn record(instrumenter: &Instrumenter) -> Arc<Mutex<Vec<Event>>> {
        let events: Arc<Mutex<Vec<Event>>> = Arc::default();
        for name in ["retry_attempt", "retry_exhausted"] {
            let sink = Arc::clone(&events);
            instrumenter.subscribe(name, move |e: &Event| sink.lock().unwrap().push(e.clone()));
        }
        events
    }

    #[tokio::test]
    async fn test_builtin_backoff_sequence() {
        let (retrier, sleeper, instrumenter) = retrier(RetryPolicy::default());
        let events = record(&instrumenter);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(overloaded())
            })
            .await;

        assert!(matches!(result, Err(LlmError::Http { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(sleeper.sleeps(), [1, 2, 4].map(Duration::from_secs));

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[2],
            Event::RetryAttempt { attempt: 3, backoff_seconds, .. } if (backoff_seconds - 4.0).abs() < f64::EPSILON
        ));
        assert!(matches!(
            events[3],
            Event::RetryExhausted { max_retries: 3, exception_kind: ErrorKind::Overloaded }
        ));
    }

    #[tokio::test]
    async fn test_builtin_recovers() {
        let (retrier, sleeper, _) = retrier(RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let result = retrier
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::Timeout { elapsed_ms: 10 })
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(sleeper.sleeps().len(), 2);
    }

    #[tokio::test]
    async fn test_kind_outside_retries_on_is_not_retried() {
        let (retrier, sleeper, _) = retrier(RetryPolicy::default());
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Auth("bad key".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_validation_never_retried_even_if_listed() {
        let mut policy = RetryPolicy::default();
        policy.retries_on.insert(ErrorKind::Validation);
        let (retrier, _, _) = retrier(policy);
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Validation("bad".into()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_off_mode_single_attempt() {
        let (retrier, _, _) = retrier(RetryPolicy::off());
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(overloaded())
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct UpTo(u32);

    impl RetryStrategy for UpTo {
        fn run<'a>(&'a self, mut attempt: Attempt<'a>) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                for _ in 0..self.0 {
                    if attempt().await.is_ok() {
                        return;
                    }
                }
            })
        }
    }

    #[tokio::test]
    async fn test_custom_strategy_owns_counting() {
        let (retrier, sleeper, instrumenter) = retrier(RetryPolicy::custom(UpTo(5)));
        let events = record(&instrumenter);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(overloaded())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(sleeper.sleeps().is_empty());

        let events = events.lock().unwrap();
        let attempts = events
            .iter()
            .filter(|e| matches!(e, Event::RetryAttempt { .. }))
            .count();
        assert_eq!(attempts, 4);
        assert!(matches!(events.last(), Some(Event::RetryExhausted { .. })));
    }

    #[tokio::test]
    async fn test_custom_latches_on_non_retryable() {
        let (retrier, _, _) = retrier(RetryPolicy::custom(UpTo(5)));
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retrier
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::InvalidRequest("nope".into()))
            })
            .await;
        assert!(matches!(result, Err(LlmError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_strategy_that_never_calls() {
        struct Lazy;
        impl RetryStrategy for Lazy {
            fn run<'a>(&'a self, _attempt: Attempt<'a>) -> BoxFuture<'a, ()> {
                Box::pin(async {})
            }
        }
        let (retrier, _, _) = retrier(RetryPolicy::custom(Lazy));
        let result = retrier.run(|| async { Ok(1) }).await;
        assert!(matches!(result, Err(LlmError::Validation(_))));
    }
}
