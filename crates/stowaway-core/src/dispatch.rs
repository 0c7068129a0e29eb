//! Operation dispatch
//!
//! Every facade operation is a blocking closure producing a
//! [`StorageResult`]. The dispatcher either runs it inline on the caller, or
//! moves it to the runtime's blocking pool and hands back a [`Completion`].
//!
//! ## Guarantees
//!
//! - Exactly one outcome per dispatch, never zero and never two
//! - A panic inside an operation becomes [`StorageError::Panicked`]
//! - Background work is bounded by a semaphore; excess operations wait
//! - Cancellation only applies before an operation starts; once running,
//!   it runs to completion
//! - No ordering between dispatches and no per-path locking

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Where an operation runs
#[derive(Debug, Clone, Default)]
pub enum DispatchMode {
    /// On the caller, blocking it; callbacks fire before `deliver` returns
    #[default]
    Inline,
    /// On the blocking pool; callbacks fire on the coordinating runtime
    Background,
    /// Like `Background`, but skipped if the token fires before it starts
    Cancellable(CancellationToken),
}

impl DispatchMode {
    /// Map the boolean "async" flag callers pass around
    pub fn from_async(is_async: bool) -> Self {
        if is_async {
            DispatchMode::Background
        } else {
            DispatchMode::Inline
        }
    }
}

/// Runs blocking operations inline or on a bounded background pool
#[derive(Clone)]
pub struct Dispatcher {
    /// Coordinating runtime; `None` means inline-only
    runtime: Option<Handle>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Bind to a runtime, allowing `max_concurrent` background operations at once
    pub fn new(runtime: Handle, max_concurrent: usize) -> Self {
        Self {
            runtime: Some(runtime),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Dispatcher without a runtime; background requests fail with `NoRuntime`
    pub fn inline_only() -> Self {
        Self {
            runtime: None,
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Whether background dispatch is available
    pub fn has_runtime(&self) -> bool {
        self.runtime.is_some()
    }

    /// Run `op` according to `mode`
    pub fn dispatch<T, F>(&self, mode: DispatchMode, op: F) -> Completion<T>
    where
        T: Send + 'static,
        F: FnOnce() -> StorageResult<T> + Send + 'static,
    {
        let token = match mode {
            DispatchMode::Inline => return Completion::ready(run_inline(op)),
            DispatchMode::Background => CancellationToken::new(),
            DispatchMode::Cancellable(token) => token,
        };

        let Some(runtime) = self.runtime.clone() else {
            warn!("Background dispatch requested without a runtime");
            return Completion::ready(Err(StorageError::NoRuntime));
        };

        let (tx, rx) = oneshot::channel();
        let permits = self.permits.clone();
        runtime.spawn(async move {
            let outcome = run_background(permits, token, op).await;
            // Receiver gone means nobody is listening; the work still ran
            let _ = tx.send(outcome);
        });

        Completion {
            state: State::Pending { rx, runtime },
        }
    }
}

fn run_inline<T>(op: impl FnOnce() -> StorageResult<T>) -> StorageResult<T> {
    panic::catch_unwind(AssertUnwindSafe(op)).unwrap_or_else(|payload| {
        let message = panic_message(payload);
        warn!("Inline operation panicked: {}", message);
        Err(StorageError::Panicked(message))
    })
}

async fn run_background<T, F>(
    permits: Arc<Semaphore>,
    token: CancellationToken,
    op: F,
) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = permits.acquire_owned() => permit.ok(),
    };
    let Some(_permit) = permit else {
        debug!("Operation cancelled while waiting for a worker");
        return Err(StorageError::Cancelled);
    };
    if token.is_cancelled() {
        return Err(StorageError::Cancelled);
    }

    match tokio::task::spawn_blocking(op).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            warn!("Background operation panicked: {}", message);
            Err(StorageError::Panicked(message))
        }
        Err(_) => Err(StorageError::Interrupted),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

enum State<T> {
    Ready(Option<StorageResult<T>>),
    Pending {
        rx: oneshot::Receiver<StorageResult<T>>,
        runtime: Handle,
    },
}

/// The single outcome of a dispatched operation
///
/// Await it, block on it with [`Completion::wait`], or hand it a pair of
/// callbacks with [`Completion::deliver`].
pub struct Completion<T> {
    state: State<T>,
}

// The outcome is only ever moved out, never pinned in place
impl<T> Unpin for Completion<T> {}

impl<T> Completion<T> {
    /// Completion that already holds its outcome
    pub fn ready(outcome: StorageResult<T>) -> Self {
        Self {
            state: State::Ready(Some(outcome)),
        }
    }

    /// Whether the outcome is already available without waiting
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Block the current thread until the outcome arrives
    ///
    /// Must not be called from inside an async context; await instead.
    pub fn wait(self) -> StorageResult<T> {
        match self.state {
            State::Ready(outcome) => outcome.unwrap_or(Err(StorageError::Interrupted)),
            State::Pending { rx, .. } => rx
                .blocking_recv()
                .unwrap_or(Err(StorageError::Interrupted)),
        }
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Invoke exactly one of `on_success` / `on_failure`
    ///
    /// Ready outcomes are delivered immediately on the caller. Pending ones
    /// are delivered from a task on the coordinating runtime.
    pub fn deliver<S, F>(self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(String) + Send + 'static,
    {
        match self.state {
            State::Ready(outcome) => {
                route(outcome.unwrap_or(Err(StorageError::Interrupted)), on_success, on_failure)
            }
            State::Pending { rx, runtime } => {
                runtime.spawn(async move {
                    let outcome = rx.await.unwrap_or(Err(StorageError::Interrupted));
                    route(outcome, on_success, on_failure);
                });
            }
        }
    }
}

fn route<T>(
    outcome: StorageResult<T>,
    on_success: impl FnOnce(T),
    on_failure: impl FnOnce(String),
) {
    match outcome {
        Ok(value) => on_success(value),
        Err(e) => on_failure(e.to_string()),
    }
}

impl<T> Future for Completion<T> {
    type Output = StorageResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            State::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(StorageError::Interrupted)))
            }
            State::Pending { rx, .. } => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(StorageError::Interrupted))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn dispatcher(max: usize) -> Dispatcher {
        Dispatcher::new(Handle::current(), max)
    }

    #[test]
    fn test_inline_runs_on_caller() {
        let dispatcher = Dispatcher::inline_only();
        let caller = thread::current().id();

        let completion = dispatcher.dispatch(DispatchMode::Inline, move || {
            Ok(thread::current().id() == caller)
        });

        assert!(completion.is_ready());
        assert!(completion.wait().unwrap());
    }

    #[test]
    fn test_inline_callbacks_fire_before_return() {
        let dispatcher = Dispatcher::inline_only();
        let hit = Arc::new(AtomicBool::new(false));

        let flag = hit.clone();
        dispatcher
            .dispatch(DispatchMode::Inline, || Ok(7))
            .deliver(
                move |v| {
                    assert_eq!(v, 7);
                    flag.store(true, Ordering::SeqCst);
                },
                |msg| panic!("unexpected failure: {msg}"),
            );

        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn test_inline_panic_becomes_failure() {
        let dispatcher = Dispatcher::inline_only();

        let outcome = dispatcher
            .dispatch::<(), _>(DispatchMode::Inline, || panic!("disk exploded"))
            .wait();

        match outcome {
            Err(StorageError::Panicked(msg)) => assert_eq!(msg, "disk exploded"),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_background_without_runtime() {
        let dispatcher = Dispatcher::inline_only();
        assert!(!dispatcher.has_runtime());
        let outcome = dispatcher.dispatch(DispatchMode::Background, || Ok(1)).wait();
        assert!(matches!(outcome, Err(StorageError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_background_runs_off_caller() {
        let dispatcher = dispatcher(4);
        assert!(dispatcher.has_runtime());
        let caller = thread::current().id();

        let ran_elsewhere = dispatcher
            .dispatch(DispatchMode::Background, move || {
                Ok(thread::current().id() != caller)
            })
            .await
            .unwrap();

        assert!(ran_elsewhere);
    }

    #[tokio::test]
    async fn test_background_panic_becomes_failure() {
        let dispatcher = dispatcher(4);

        let outcome = dispatcher
            .dispatch::<(), _>(DispatchMode::Background, || panic!("worker died"))
            .await;

        assert!(matches!(outcome, Err(StorageError::Panicked(ref m)) if m == "worker died"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_runs() {
        let dispatcher = dispatcher(4);
        let ran = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        token.cancel();

        let flag = ran.clone();
        let outcome = dispatcher
            .dispatch(DispatchMode::Cancellable(token), move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(outcome, Err(StorageError::Cancelled)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_while_queued() {
        let dispatcher = dispatcher(1);
        let (release_tx, release_rx) = mpsc::channel::<()>();

        // Occupy the only worker slot
        let blocker = dispatcher.dispatch(DispatchMode::Background, move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            Ok(())
        });

        let token = CancellationToken::new();
        let queued = dispatcher.dispatch(DispatchMode::Cancellable(token.clone()), || Ok(()));
        token.cancel();

        assert!(matches!(queued.await, Err(StorageError::Cancelled)));
        release_tx.send(()).unwrap();
        blocker.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let dispatcher = dispatcher(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let completions: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                dispatcher.dispatch(DispatchMode::Background, move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for completion in completions {
            completion.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_deliver_invokes_exactly_one_sink() {
        let dispatcher = dispatcher(4);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let ok_tx = tx.clone();
        let err_tx = tx.clone();
        dispatcher
            .dispatch(DispatchMode::Background, || Ok("done".to_string()))
            .deliver(
                move |v| ok_tx.send(format!("ok:{v}")).unwrap(),
                move |m| err_tx.send(format!("err:{m}")).unwrap(),
            );

        let ok_tx = tx.clone();
        let err_tx = tx;
        dispatcher
            .dispatch::<String, _>(DispatchMode::Background, || Err(StorageError::Cancelled))
            .deliver(
                move |v| ok_tx.send(format!("ok:{v}")).unwrap(),
                move |m| err_tx.send(format!("err:{m}")).unwrap(),
            );

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen[0], "err:Operation cancelled before it started");
        assert_eq!(seen[1], "ok:done");

        // Both senders were consumed by the sinks; nothing else arrives
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_wait_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dispatcher = Dispatcher::new(runtime.handle().clone(), 2);

        let value = dispatcher
            .dispatch(DispatchMode::Background, || Ok(40 + 2))
            .wait()
            .unwrap();

        assert_eq!(value, 42);
    }

    #[test]
    fn test_from_async_flag() {
        assert!(matches!(DispatchMode::from_async(true), DispatchMode::Background));
        assert!(matches!(DispatchMode::from_async(false), DispatchMode::Inline));
        assert!(matches!(DispatchMode::default(), DispatchMode::Inline));
    }
}
