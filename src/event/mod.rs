//! In-process publish/subscribe.
//!
//! Events go through a bounded channel to a single loop that calls the listener registered under
//! the event name. A failing listener is retried with a fixed delay; the loop waits for it, so
//! events are handled one at a time in dispatch order.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const BUFFER_LIMIT: usize = 1000;
pub const RETRY_COUNT: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: Vec<Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Vec<Value>) -> Self {
        Event {
            name: name.into(),
            payload,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ListenerError(pub String);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("event loop has stopped")]
    Closed,
    #[error("event buffer is full")]
    Full,
}

pub type Listener = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<(), ListenerError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per event, first call included.
    pub attempts: u32,
    /// Sleep between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: RETRY_COUNT,
            delay: RETRY_DELAY,
        }
    }
}

type Listeners = Arc<Mutex<HashMap<String, Listener>>>;

fn table(listeners: &Listeners) -> MutexGuard<'_, HashMap<String, Listener>> {
    listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Producer handle. Clones share the channel and the listener table.
#[derive(Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<Event>,
    listeners: Listeners,
}

/// Consumer side; drive it with [`DispatchLoop::run`].
pub struct DispatchLoop {
    receiver: mpsc::Receiver<Event>,
    listeners: Listeners,
    retry: RetryPolicy,
}

impl Dispatcher {
    pub fn new(buffer: usize, retry: RetryPolicy) -> (Dispatcher, DispatchLoop) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let listeners: Listeners = Arc::default();
        (
            Dispatcher {
                sender,
                listeners: listeners.clone(),
            },
            DispatchLoop {
                receiver,
                listeners,
                retry,
            },
        )
    }

    /// Create a dispatcher and run its loop on the tokio runtime. The task ends once every
    /// `Dispatcher` clone is dropped and the buffer is drained.
    pub fn spawn(buffer: usize, retry: RetryPolicy) -> (Dispatcher, JoinHandle<()>) {
        let (dispatcher, dispatch_loop) = Self::new(buffer, retry);
        (dispatcher, tokio::spawn(dispatch_loop.run()))
    }

    /// Register `listener` under `name`, replacing any previous one.
    pub fn register<F, Fut>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let listener: Listener = Arc::new(move |payload| Box::pin(listener(payload)));
        table(&self.listeners).insert(name.into(), listener);
    }

    /// Returns whether a listener was registered under `name`.
    pub fn unregister(&self, name: &str) -> bool {
        table(&self.listeners).remove(name).is_some()
    }

    /// Enqueue, waiting while the buffer is full.
    pub async fn dispatch(&self, event: Event) -> Result<(), DispatchError> {
        self.sender.send(event).await.map_err(|_| DispatchError::Closed)
    }

    pub fn try_dispatch(&self, event: Event) -> Result<(), DispatchError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Full,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

impl DispatchLoop {
    pub async fn run(mut self) {
        while let Some(event) = self.receiver.recv().await {
            let listener = table(&self.listeners).get(&event.name).cloned();
            let Some(listener) = listener else {
                tracing::warn!(event = %event.name, "no listener registered; dropping event");
                continue;
            };
            self.deliver(&listener, event).await;
        }
        tracing::debug!("event loop stopped");
    }

    async fn deliver(&self, listener: &Listener, event: Event) {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match listener(event.payload.clone()).await {
                Ok(()) => return,
                Err(e) if attempt < attempts => {
                    tracing::warn!(event = %event.name, attempt, error = %e, "listener failed; retrying");
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(e) => {
                    tracing::error!(event = %event.name, attempts, error = %e, "listener failed; giving up");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn listener_runs_once_per_event() {
        let (dispatcher, handle) = Dispatcher::spawn(BUFFER_LIMIT, fast());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let calls = calls.clone();
            let seen = seen.clone();
            dispatcher.register("note.created", move |payload| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().extend(payload);
                async { Ok(()) }
            });
        }
        dispatcher
            .dispatch(Event::new("note.created", vec![json!("n1"), json!(2)]))
            .await
            .unwrap();
        drop(dispatcher);
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![json!("n1"), json!(2)]);
    }

    #[tokio::test]
    async fn unknown_event_does_not_block() {
        let (dispatcher, handle) = Dispatcher::spawn(4, fast());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dispatcher.register("known", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });
        dispatcher.try_dispatch(Event::new("unknown", vec![])).unwrap();
        dispatcher.try_dispatch(Event::new("known", vec![])).unwrap();
        drop(dispatcher);
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_retried_up_to_the_limit() {
        let (dispatcher, handle) = Dispatcher::spawn(4, fast());
        let flaky = Arc::new(AtomicUsize::new(0));
        let broken = Arc::new(AtomicUsize::new(0));
        {
            let flaky = flaky.clone();
            dispatcher.register("flaky", move |_| {
                let n = flaky.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 1 {
                        Err(ListenerError("transient".into()))
                    } else {
                        Ok(())
                    }
                }
            });
            let broken = broken.clone();
            dispatcher.register("broken", move |_| {
                broken.fetch_add(1, Ordering::SeqCst);
                async { Err(ListenerError("down".into())) }
            });
        }
        dispatcher.dispatch(Event::new("flaky", vec![])).await.unwrap();
        dispatcher.dispatch(Event::new("broken", vec![])).await.unwrap();
        drop(dispatcher);
        handle.await.unwrap();
        assert_eq!(flaky.load(Ordering::SeqCst), 2);
        assert_eq!(broken.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unregister_and_closed_loop() {
        let (dispatcher, dispatch_loop) = Dispatcher::new(1, fast());
        dispatcher.register("x", |_| async { Ok(()) });
        assert!(dispatcher.unregister("x"));
        assert!(!dispatcher.unregister("x"));

        dispatcher.try_dispatch(Event::new("x", vec![])).unwrap();
        assert_eq!(
            dispatcher.try_dispatch(Event::new("x", vec![])),
            Err(DispatchError::Full)
        );
        drop(dispatch_loop);
        assert_eq!(
            dispatcher.dispatch(Event::new("x", vec![])).await,
            Err(DispatchError::Closed)
        );
    }
}
