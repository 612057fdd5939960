//! One-shot adaptation of repeating subscriptions.
//!
//! Sources such as auth-state observers call their listener every time the
//! observed state changes. [`first_notification`] turns such a source into a
//! future that yields the first delivered value and detaches the listener
//! before that value becomes visible to the caller.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::trace;

/// Callback registered with a notification source
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Cancellation capability returned by a notification source.
///
/// Consumes `self`, so a handle can be invoked at most once.
pub trait Unsubscribe: Send + 'static {
    fn unsubscribe(self);
}

impl<F> Unsubscribe for F
where
    F: FnOnce() + Send + 'static,
{
    fn unsubscribe(self) {
        self()
    }
}

enum State<T, U> {
    /// `subscribe` has not returned yet; a value may already have arrived
    Registering {
        tx: oneshot::Sender<T>,
        early: Option<T>,
    },
    Armed {
        tx: oneshot::Sender<T>,
        handle: U,
    },
    Resolved,
}

fn lock<S>(state: &Mutex<S>) -> MutexGuard<'_, S> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register with `subscribe` and resolve with the first value it delivers.
///
/// The handle returned by `subscribe` is invoked exactly once, before the
/// value is handed to the future. A value delivered while `subscribe` is
/// still running is held until the handle exists. If `subscribe` fails, its
/// error is returned as is.
///
/// The returned future has no timeout: if the source never fires it stays
/// pending.
pub fn first_notification<T, U, E, F>(subscribe: F) -> Result<FirstValue<T>, E>
where
    T: Send + 'static,
    U: Unsubscribe,
    F: FnOnce(Listener<T>) -> Result<U, E>,
{
    let (tx, rx) = oneshot::channel();
    let state: Arc<Mutex<State<T, U>>> =
        Arc::new(Mutex::new(State::Registering { tx, early: None }));

    let listener_state = Arc::clone(&state);
    let listener: Listener<T> = Arc::new(move |value: T| {
        let mut guard = lock(&listener_state);
        match std::mem::replace(&mut *guard, State::Resolved) {
            State::Registering { tx, early: None } => {
                *guard = State::Registering {
                    tx,
                    early: Some(value),
                };
            }
            registering @ State::Registering { .. } => {
                *guard = registering;
                trace!("Ignoring notification while registration is pending");
            }
            State::Armed { tx, handle } => {
                drop(guard);
                handle.unsubscribe();
                let _ = tx.send(value);
            }
            State::Resolved => {
                trace!("Ignoring notification after first value");
            }
        }
    });

    let handle = match subscribe(listener) {
        Ok(handle) => handle,
        Err(e) => {
            *lock(&state) = State::Resolved;
            return Err(e);
        }
    };

    let mut guard = lock(&state);
    match std::mem::replace(&mut *guard, State::Resolved) {
        State::Registering { tx, early: None } => {
            *guard = State::Armed { tx, handle };
        }
        State::Registering {
            tx,
            early: Some(value),
        } => {
            drop(guard);
            handle.unsubscribe();
            let _ = tx.send(value);
        }
        // Only the listener moves out of `Registering`, and only to itself
        State::Armed { .. } | State::Resolved => {
            drop(guard);
            handle.unsubscribe();
        }
    }

    Ok(FirstValue { rx })
}

/// Future returned by [`first_notification`].
#[must_use = "futures do nothing unless awaited"]
pub struct FirstValue<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for FirstValue<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            // The source dropped the listener without firing
            Poll::Ready(Err(_)) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}
