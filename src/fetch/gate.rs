//! Single-flight gate keyed by destination root / 单飞门控
//!
//! Concurrent cold requests for the same destination share one fetch. The
//! flight runs on its own task, so it completes (and cleans up) even if
//! every waiter goes away. The entry is removed when the flight resolves.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type Flight<T> = Shared<BoxFuture<'static, Result<T, String>>>;

pub struct FetchGate<T: Clone> {
    flights: Arc<Mutex<HashMap<PathBuf, Flight<T>>>>,
}

impl<T: Clone> Clone for FetchGate<T> {
    fn clone(&self) -> Self {
        Self {
            flights: self.flights.clone(),
        }
    }
}

impl<T: Clone> Default for FetchGate<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T> FetchGate<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, or start one with `start` / 加入或发起拉取
    ///
    /// `Err` carries the message of a flight task that panicked.
    pub async fn run<F, Fut>(&self, key: PathBuf, start: F) -> Result<T, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let flight = {
            let mut flights = self.flights.lock();
            match flights.get(&key) {
                Some(flight) => {
                    tracing::debug!("Joining in-flight fetch for {:?}", key);
                    flight.clone()
                }
                None => {
                    let task = start();
                    let release = Release {
                        flights: self.flights.clone(),
                        key: key.clone(),
                    };
                    // The insert below happens under the lock `release` must
                    // take, so the entry is never removed before it exists.
                    let handle = tokio::spawn(async move {
                        let _release = release;
                        task.await
                    });
                    let flight = async move { handle.await.map_err(|e| e.to_string()) }
                        .boxed()
                        .shared();
                    flights.insert(key, flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// Number of unresolved flights / 进行中的拉取数量
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

/// Removes the flight entry when the flight task ends, panics included.
struct Release<T: Clone> {
    flights: Arc<Mutex<HashMap<PathBuf, Flight<T>>>>,
    key: PathBuf,
}

impl<T: Clone> Drop for Release<T> {
    fn drop(&mut self) {
        self.flights.lock().remove(&self.key);
    }
}
