use async_trait::async_trait;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_BACKGROUND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// What a backgrounded app does to its call.
#[async_trait]
pub trait SessionLifecycle: Send + Sync + 'static {
    /// Releases the session after too long in the background.
    async fn cleanup_session(&self);

    /// Brings a cleaned up session back on return to the foreground.
    async fn resume_session(&self);
}

#[derive(Default)]
struct BackgroundState {
    in_background: bool,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

/// Ends the session if the app stays in the background past a timeout, and
/// resumes it when the app returns.
pub struct BackgroundStateHandler<S: SessionLifecycle + ?Sized> {
    lifecycle: Arc<S>,
    timeout: Duration,
    state: Mutex<BackgroundState>,
    /// Cleanup that outlived its timer; never aborted.
    cleanup: Arc<StdMutex<Option<JoinHandle<()>>>>,
    cleaned_up: Arc<AtomicBool>,
}

impl<S: SessionLifecycle + ?Sized> BackgroundStateHandler<S> {
    pub fn new(lifecycle: Arc<S>) -> Self {
        Self::with_timeout(lifecycle, DEFAULT_BACKGROUND_TIMEOUT)
    }

    pub fn with_timeout(lifecycle: Arc<S>, timeout: Duration) -> Self {
        Self {
            lifecycle,
            timeout,
            state: Mutex::new(BackgroundState::default()),
            cleanup: Arc::new(StdMutex::new(None)),
            cleaned_up: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn enter_background(&self) {
        let mut state = self.state.lock().await;
        if state.in_background {
            return;
        }
        let deadline = Instant::now() + self.timeout;
        state.in_background = true;
        state.deadline = Some(deadline);

        let lifecycle = Arc::clone(&self.lifecycle);
        let cleanup = Arc::clone(&self.cleanup);
        let cleaned_up = Arc::clone(&self.cleaned_up);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            info!(target: "Background", "Background timeout reached, cleaning up session");
            // No await between the spawn and the store: an abort of the
            // timer cannot separate them.
            let running = tokio::spawn(async move {
                lifecycle.cleanup_session().await;
                cleaned_up.store(true, Ordering::SeqCst);
            });
            *cleanup.lock().unwrap_or_else(PoisonError::into_inner) = Some(running);
        }));
        info!(target: "Background", "Entered background, cleanup in {:?}", self.timeout);
    }

    /// Cancels a pending cleanup. A cleanup that already started is waited
    /// for, then the session is resumed.
    pub async fn enter_foreground(&self) {
        let timer = {
            let mut state = self.state.lock().await;
            if !state.in_background {
                return;
            }
            state.in_background = false;
            state.deadline = None;
            state.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
            // Settles whether the cleanup was handed off.
            let _ = timer.await;
        }
        let running = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            info!(target: "Background", "Waiting for background cleanup to finish");
            if let Err(e) = running.await {
                warn!(target: "Background", "Background cleanup did not complete: {e}");
            }
        }

        if self.cleaned_up.swap(false, Ordering::SeqCst) {
            info!(target: "Background", "Resuming session cleaned up in background");
            self.lifecycle.resume_session().await;
        } else {
            info!(target: "Background", "Entered foreground");
        }
    }

    pub async fn is_in_background(&self) -> bool {
        self.state.lock().await.in_background
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::SeqCst)
    }

    /// Time left before cleanup; `None` in the foreground.
    pub async fn time_remaining(&self) -> Option<Duration> {
        self.state
            .lock()
            .await
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

impl<S: SessionLifecycle + ?Sized> Drop for BackgroundStateHandler<S> {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.abort();
        }
    }
}
