//! Request coalescing
//!
//! [`SingleFlight::work`] runs a load at most once per key at any instant.
//! Callers that arrive while a load for the same key is running wait for it
//! and receive a clone of its outcome, success or error alike. The record is
//! dropped as soon as the load finishes, so the next non-overlapping call
//! runs the load again; nothing is cached here.
//!
//! The lock only guards the in-flight map. Loads run outside it, so a slow
//! load for one key never stalls callers asking for another.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::error::{Error, Result};

type Outcome<T> = Option<Result<T>>;

/// Coalesces concurrent loads that share a key
pub struct SingleFlight<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Outcome<T>>>>,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

enum Role<T> {
    Leader(watch::Sender<Outcome<T>>),
    Follower(watch::Receiver<Outcome<T>>),
}

/// Removes the in-flight record when the executing caller finishes or is
/// dropped mid-load.
struct Landing<'a, T> {
    calls: &'a Mutex<HashMap<String, watch::Receiver<Outcome<T>>>>,
    key: &'a str,
}

impl<T> Drop for Landing<'_, T> {
    fn drop(&mut self) {
        self.calls.lock().remove(self.key);
    }
}

impl<T: Clone> SingleFlight<T> {
    /// Create an empty coalescer
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` for `key`, or join the run already in progress.
    ///
    /// If the caller running `f` is dropped before it finishes, the callers
    /// waiting on it get [`Error::LoadAbandoned`].
    pub async fn work<F, Fut>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let role = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    calls.insert(key.to_owned(), rx);
                    Role::Leader(tx)
                }
            }
        };

        let tx = match role {
            Role::Leader(tx) => tx,
            Role::Follower(rx) => {
                trace!(key, "joining in-flight load");
                return Self::wait(key, rx).await;
            }
        };

        let landing = Landing {
            calls: &self.calls,
            key,
        };
        let result = f().await;
        tx.send_replace(Some(result.clone()));
        drop(landing);
        result
    }

    /// Number of keys with a load in progress
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    async fn wait(key: &str, mut rx: watch::Receiver<Outcome<T>>) -> Result<T> {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(Error::LoadAbandoned(key.to_owned())))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_work_returns_value() {
        let flight = SingleFlight::new();
        let v = flight
            .work("key", || async { Ok::<_, Error>("bar".to_string()) })
            .await;
        assert_eq!(v.unwrap(), "bar");
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_work_returns_error() {
        let flight: SingleFlight<String> = SingleFlight::new();
        let v = flight
            .work("key", || async { Err(Error::Getter("boom".into())) })
            .await;
        assert_matches!(v, Err(Error::Getter(msg)) if msg == "boom");
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_calls_share_one_execution() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let flight = Arc::clone(&flight);
                let calls = Arc::clone(&calls);
                let release = Arc::clone(&release);
                tokio::spawn(async move {
                    flight
                        .work("key", || async move {
                            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                            release.notified().await;
                            Ok(format!("value-{}", n))
                        })
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(100)).await;
        release.notify_one();

        let results = futures::future::join_all(handles).await;
        for result in results {
            assert_eq!(result.unwrap().unwrap(), "value-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_execute_again() {
        let flight = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            flight
                .work("key", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1u32)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_is_not_remembered() {
        let flight = SingleFlight::new();

        let first = flight
            .work("key", || async { Err(Error::Getter("down".into())) })
            .await;
        assert!(first.is_err());

        let second = flight.work("key", || async { Ok(7u32) }).await;
        assert_eq!(second.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_other_keys_are_not_blocked() {
        let flight = Arc::new(SingleFlight::new());
        let release = Arc::new(Notify::new());

        let slow = {
            let flight = Arc::clone(&flight);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                flight
                    .work("slow", || async move {
                        release.notified().await;
                        Ok(1u32)
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            flight.work("fast", || async { Ok(2u32) }),
        )
        .await
        .expect("unrelated key must not wait");
        assert_eq!(fast.unwrap(), 2);
        assert_eq!(flight.in_flight(), 1);

        release.notify_one();
        assert_eq!(slow.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_load_releases_waiters() {
        let flight = Arc::new(SingleFlight::<u32>::new());

        let leader = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move {
                flight
                    .work("key", || std::future::pending::<Result<u32>>())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.work("key", || async { Ok(1) }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let outcome = waiter.await.unwrap();
        assert_matches!(outcome, Err(Error::LoadAbandoned(key)) if key == "key");
        assert_eq!(flight.in_flight(), 0);
    }
}
