use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use crate::call::CallError;

pub use webrtckit_core::reconnect::*;

/// One reconnection attempt, run after the backoff delay.
pub type ReconnectFuture = BoxFuture<'static, Result<(), CallError>>;

/// Drives recovery of a dropped peer connection with bounded, backed-off
/// retries.
pub struct ReconnectionManager {
    state: watch::Sender<ReconnectionState>,
    retry_count: AtomicU32,
    in_flight: AtomicBool,
    max_attempts: u32,
}

impl Default for ReconnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconnectionManager {
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_RETRY_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            state: watch::channel(ReconnectionState::Stable).0,
            retry_count: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
            max_attempts,
        }
    }

    pub fn state(&self) -> ReconnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconnectionState> {
        self.state.subscribe()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }

    pub fn is_reconnecting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn can_reconnect(&self) -> bool {
        self.retry_count() < self.max_attempts && self.state() != ReconnectionState::Failed
    }

    /// Delay the next attempt would wait.
    pub fn current_backoff_delay(&self) -> Duration {
        backoff_delay(self.retry_count())
    }

    /// Retries with `on_reconnect` until it succeeds or the attempts run out.
    ///
    /// A call made while another is running returns the current state
    /// without doing anything. Fatal failures are not retried.
    pub async fn handle_failure<F>(&self, failure: FailureType, mut on_reconnect: F) -> ReconnectionState
    where
        F: FnMut(ReconnectionStrategy) -> ReconnectFuture,
    {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Reconnection already in progress, ignoring {failure:?} failure");
            return self.state();
        }
        let _in_flight = scopeguard::guard(&self.in_flight, |flag| {
            flag.store(false, Ordering::SeqCst);
        });

        let Some(strategy) = failure.strategy() else {
            warn!("Fatal connection failure, not reconnecting");
            self.state.send_replace(ReconnectionState::Failed);
            return ReconnectionState::Failed;
        };

        loop {
            let attempt = self.retry_count();
            if attempt >= self.max_attempts {
                warn!("Giving up after {attempt} reconnection attempts");
                self.state.send_replace(ReconnectionState::Failed);
                return ReconnectionState::Failed;
            }

            self.retry_count.store(attempt + 1, Ordering::SeqCst);
            self.state.send_replace(ReconnectionState::Reconnecting {
                attempt: attempt + 1,
            });
            let delay = backoff_delay(attempt);
            info!(
                "Reconnection attempt {}/{} with {strategy:?} in {delay:?}",
                attempt + 1,
                self.max_attempts
            );
            tokio::time::sleep(delay).await;

            match on_reconnect(strategy).await {
                Ok(()) => {
                    self.handle_reconnection_success();
                    return ReconnectionState::Stable;
                }
                Err(e) => {
                    warn!("Reconnection attempt {} failed: {e}", attempt + 1);
                    if self.handle_reconnection_failure() == ReconnectionState::Failed {
                        return ReconnectionState::Failed;
                    }
                }
            }
        }
    }

    pub fn handle_reconnection_success(&self) {
        if self.retry_count.swap(0, Ordering::SeqCst) > 0 {
            info!("Connection recovered");
        }
        self.state.send_replace(ReconnectionState::Stable);
    }

    /// Failed once the attempts are used up, otherwise back to Stable so the
    /// next failure retries.
    pub fn handle_reconnection_failure(&self) -> ReconnectionState {
        let next = if self.retry_count() >= self.max_attempts {
            ReconnectionState::Failed
        } else {
            ReconnectionState::Stable
        };
        self.state.send_replace(next);
        next
    }

    pub fn reset(&self) {
        self.retry_count.store(0, Ordering::SeqCst);
        self.state.send_replace(ReconnectionState::Stable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::Arc;
    use std::sync::Mutex;
    use tokio::time::Instant;
    use webrtckit_core::engine::EngineError;

    fn failing() -> ReconnectFuture {
        async { Err(CallError::Engine(EngineError::Ice("still down".into()))) }.boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_second_attempt() {
        let manager = ReconnectionManager::new();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = attempts.clone();
        let started = Instant::now();

        let outcome = manager
            .handle_failure(FailureType::Minor, move |strategy| {
                let mut seen = seen.lock().unwrap();
                seen.push(strategy);
                if seen.len() < 2 {
                    failing()
                } else {
                    async { Ok(()) }.boxed()
                }
            })
            .await;

        assert_eq!(outcome, ReconnectionState::Stable);
        assert_eq!(manager.state(), ReconnectionState::Stable);
        assert_eq!(manager.retry_count(), 0);
        assert_eq!(
            *attempts.lock().unwrap(),
            vec![ReconnectionStrategy::IceRestart; 2]
        );
        // 1s + 2s of backoff.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let manager = ReconnectionManager::new();
        let mut strategies = Vec::new();
        let outcome = manager
            .handle_failure(FailureType::Major, |strategy| {
                strategies.push(strategy);
                failing()
            })
            .await;

        assert_eq!(outcome, ReconnectionState::Failed);
        assert_eq!(strategies.len(), MAX_RETRY_ATTEMPTS as usize);
        assert!(
            strategies
                .iter()
                .all(|s| *s == ReconnectionStrategy::FullReconnection)
        );
        assert!(!manager.can_reconnect());
    }

    #[tokio::test]
    async fn test_fatal_fails_immediately() {
        let manager = ReconnectionManager::new();
        let mut called = false;
        let outcome = manager
            .handle_failure(FailureType::Fatal, |_| {
                called = true;
                failing()
            })
            .await;
        assert_eq!(outcome, ReconnectionState::Failed);
        assert!(!called);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failure_is_ignored() {
        let manager = Arc::new(ReconnectionManager::new());
        let mut states = manager.subscribe();

        let running = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .handle_failure(FailureType::Minor, |_| async { Ok(()) }.boxed())
                    .await
            })
        };
        states
            .wait_for(|s| matches!(s, ReconnectionState::Reconnecting { .. }))
            .await
            .unwrap();

        let mut called = false;
        let ignored = manager
            .handle_failure(FailureType::Minor, |_| {
                called = true;
                failing()
            })
            .await;
        assert_eq!(ignored, ReconnectionState::Reconnecting { attempt: 1 });
        assert!(!called);
        assert_eq!(running.await.unwrap(), ReconnectionState::Stable);
        assert!(!manager.is_reconnecting());
    }

    #[test]
    fn test_failure_bookkeeping_and_reset() {
        let manager = ReconnectionManager::with_max_attempts(1);
        assert_eq!(manager.current_backoff_delay(), Duration::from_secs(1));
        assert_eq!(manager.handle_reconnection_failure(), ReconnectionState::Stable);

        manager.retry_count.store(1, Ordering::SeqCst);
        assert_eq!(manager.handle_reconnection_failure(), ReconnectionState::Failed);
        assert!(!manager.can_reconnect());

        manager.reset();
        assert_eq!(manager.state(), ReconnectionState::Stable);
        assert!(manager.can_reconnect());
    }
}
