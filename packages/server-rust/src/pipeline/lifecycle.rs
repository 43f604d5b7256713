//! Start/stop discipline shared by the reader and the processor.
//!
//! A [`Lifecycle`] owns at most one background task at a time. The mutex is
//! held only across the state check-and-flip, never across the task itself or
//! the join in [`Lifecycle::stop`], so `stop` always makes progress while the
//! task is blocked on I/O.

use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Component state.
///
/// State machine: Stopped -> Starting -> Running -> Stopping -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No background task exists.
    Stopped,
    /// `start` is spawning the background task.
    Starting,
    /// The background task has been spawned and not yet asked to stop.
    Running,
    /// `stop` has cancelled the task and is waiting for it to exit, or a
    /// `stop` was abandoned before the task exited.
    Stopping,
}

/// Contract violations on `start`/`stop`. Returned to the caller, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("{component} already started")]
    AlreadyStarted { component: &'static str },
    #[error("{component} is not running")]
    NotRunning { component: &'static str },
    #[error("{component} background task panicked")]
    TaskPanicked { component: &'static str },
}

struct Activation<T> {
    token: CancellationToken,
    handle: JoinHandle<T>,
}

struct Inner<T> {
    state: LifecycleState,
    activation: Option<Activation<T>>,
}

/// Hands an activation back to the lifecycle when a `stop` is dropped mid-join.
struct PendingJoin<'a, T> {
    inner: &'a Mutex<Inner<T>>,
    activation: Option<Activation<T>>,
}

impl<T> Drop for PendingJoin<'_, T> {
    fn drop(&mut self) {
        if let Some(activation) = self.activation.take() {
            self.inner.lock().activation = Some(activation);
        }
    }
}

/// Single-activation guard around one spawned task producing `T`.
pub struct Lifecycle<T> {
    component: &'static str,
    inner: Mutex<Inner<T>>,
}

impl<T: Send + 'static> Lifecycle<T> {
    /// Creates a stopped lifecycle. `component` labels errors and logs.
    #[must_use]
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                activation: None,
            }),
        }
    }

    /// Spawns `task` with a child of `parent`.
    ///
    /// `task` receives the child token and must return promptly once it is
    /// cancelled. Cancelling `parent` also cancels the task.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] unless the state is
    /// `Stopped`. The failed call spawns nothing and leaves the state untouched.
    pub fn start<F, Fut>(&self, parent: &CancellationToken, task: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.state != LifecycleState::Stopped {
            return Err(LifecycleError::AlreadyStarted {
                component: self.component,
            });
        }
        inner.state = LifecycleState::Starting;

        let token = parent.child_token();
        let handle = tokio::spawn(task(token.clone()));
        inner.activation = Some(Activation { token, handle });
        inner.state = LifecycleState::Running;
        debug!(component = self.component, "started");
        Ok(())
    }

    /// Cancels the running task and waits for it to exit, returning its output.
    ///
    /// Cancel-safe: if this future is dropped before the join completes, the
    /// activation is kept and the state stays `Stopping`; a later `stop`
    /// cancels again and finishes the join.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotRunning`] unless the state is `Running` or
    /// an interrupted `Stopping`, and [`LifecycleError::TaskPanicked`] if the
    /// task did not exit cleanly. The state is `Stopped` afterwards in both the
    /// success and panic cases.
    pub async fn stop(&self) -> Result<T, LifecycleError> {
        self.stop_with(|| {}).await
    }

    /// Like [`stop`](Self::stop), but runs `on_stopping` under the state lock
    /// at the moment the activation is claimed for stopping.
    ///
    /// No `start` can interleave with `on_stopping`, so it can safely tear down
    /// state that the next `start` installs again.
    ///
    /// # Errors
    ///
    /// Same as [`stop`](Self::stop). `on_stopping` is not called on error.
    pub async fn stop_with<F>(&self, on_stopping: F) -> Result<T, LifecycleError>
    where
        F: FnOnce(),
    {
        let activation = {
            let mut inner = self.inner.lock();
            if !matches!(
                inner.state,
                LifecycleState::Running | LifecycleState::Stopping
            ) {
                return Err(LifecycleError::NotRunning {
                    component: self.component,
                });
            }
            // A concurrent stop holding the activation leaves `None` here.
            let Some(activation) = inner.activation.take() else {
                return Err(LifecycleError::NotRunning {
                    component: self.component,
                });
            };
            inner.state = LifecycleState::Stopping;
            on_stopping();
            activation
        };

        let mut pending = PendingJoin {
            inner: &self.inner,
            activation: Some(activation),
        };
        let joined = match pending.activation.as_mut() {
            Some(Activation { token, handle }) => {
                token.cancel();
                handle.await
            }
            None => {
                return Err(LifecycleError::NotRunning {
                    component: self.component,
                })
            }
        };
        pending.activation = None;
        self.inner.lock().state = LifecycleState::Stopped;
        debug!(component = self.component, "stopped");

        joined.map_err(|_| LifecycleError::TaskPanicked {
            component: self.component,
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn stop_on_never_started_is_not_running() {
        let lifecycle: Lifecycle<()> = Lifecycle::new("test");
        assert_eq!(
            lifecycle.stop().await,
            Err(LifecycleError::NotRunning { component: "test" })
        );
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn second_start_fails_without_spawning() {
        let lifecycle = Lifecycle::new("test");
        let spawned = Arc::new(AtomicU32::new(0));
        let root = CancellationToken::new();

        let starts: Vec<_> = (0..2)
            .map(|_| {
                let spawned = Arc::clone(&spawned);
                lifecycle.start(&root, move |token| async move {
                    spawned.fetch_add(1, Ordering::SeqCst);
                    token.cancelled().await;
                })
            })
            .collect();
        assert_eq!(
            starts,
            vec![Ok(()), Err(LifecycleError::AlreadyStarted { component: "test" })]
        );

        let again = lifecycle.start(&root, |_| async {});
        assert_eq!(again, Err(LifecycleError::AlreadyStarted { component: "test" }));
        assert!(lifecycle.is_running());

        lifecycle.stop().await.unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_joins_and_returns_task_output() {
        let lifecycle = Lifecycle::new("test");
        let root = CancellationToken::new();
        lifecycle
            .start(&root, |token| async move {
                token.cancelled().await;
                7_u32
            })
            .unwrap();

        assert_eq!(lifecycle.stop().await, Ok(7));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
        assert_eq!(
            lifecycle.stop().await,
            Err(LifecycleError::NotRunning { component: "test" })
        );
    }

    #[tokio::test]
    async fn can_restart_after_stop() {
        let lifecycle = Lifecycle::new("test");
        let root = CancellationToken::new();

        for round in 0..3_u32 {
            lifecycle
                .start(&root, move |token| async move {
                    token.cancelled().await;
                    round
                })
                .unwrap();
            assert_eq!(lifecycle.stop().await, Ok(round));
        }
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_the_task() {
        let lifecycle = Lifecycle::new("test");
        let root = CancellationToken::new();
        lifecycle
            .start(&root, |token| async move { token.cancelled().await })
            .unwrap();

        root.cancel();
        // Still Running until someone calls stop; the task itself has exited.
        assert!(lifecycle.is_running());
        lifecycle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn panicking_task_is_reported_and_state_resets() {
        let lifecycle: Lifecycle<()> = Lifecycle::new("test");
        let root = CancellationToken::new();
        lifecycle
            .start(&root, |_| async { panic!("boom") })
            .unwrap();

        assert_eq!(
            lifecycle.stop().await,
            Err(LifecycleError::TaskPanicked { component: "test" })
        );
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_stop_can_be_finished_later() {
        let lifecycle = Lifecycle::new("test");
        let root = CancellationToken::new();
        lifecycle
            .start(&root, |token| async move {
                token.cancelled().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
                "drained"
            })
            .unwrap();

        let first = tokio::time::timeout(Duration::from_millis(1), lifecycle.stop()).await;
        assert!(first.is_err(), "task needs 5ms to exit");
        assert_eq!(lifecycle.state(), LifecycleState::Stopping);
        assert_eq!(
            lifecycle.start(&root, |_| async { "second" }),
            Err(LifecycleError::AlreadyStarted { component: "test" })
        );

        assert_eq!(lifecycle.stop().await, Ok("drained"));
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);

        lifecycle
            .start(&root, |token| async move {
                token.cancelled().await;
                "restarted"
            })
            .unwrap();
        assert_eq!(lifecycle.stop().await, Ok("restarted"));
    }

    #[tokio::test]
    async fn stop_hook_runs_only_when_a_task_is_claimed() {
        let lifecycle = Lifecycle::new("test");
        let root = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let refused = lifecycle
            .stop_with(|| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(refused, Err(LifecycleError::NotRunning { component: "test" }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        lifecycle
            .start(&root, |token| async move { token.cancelled().await })
            .unwrap();
        lifecycle
            .stop_with(|| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
