//! Per-key in-flight registry for collapsing concurrent identical renders.
//!
//! The first caller for a key installs a shared future; callers arriving
//! while it runs await the same future. The entry is removed when the
//! installing caller finishes or is dropped, so a settled render is never
//! served from the registry.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Flight<T, E> {
    id: u64,
    future: SharedResult<T, E>,
}

pub struct SingleFlight<T, E> {
    in_flight: Mutex<HashMap<String, Flight<T, E>>>,
    next_id: AtomicU64,
}

/// Whether a call started the work or joined someone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    Leader,
    Follower,
}

impl<T, E> Default for SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with a render in progress.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Run `work` for `key`, or join the run already in progress.
    ///
    /// `work` is only polled when this call becomes the leader.
    pub async fn run<F>(&self, key: &str, work: F) -> (Result<T, E>, FlightRole)
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (future, leader) = {
            let mut map = self.lock();
            match map.get(key) {
                Some(flight) => (flight.future.clone(), None),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = work.boxed().shared();
                    map.insert(
                        key.to_string(),
                        Flight {
                            id,
                            future: future.clone(),
                        },
                    );
                    (future, Some(LeaderGuard { flight: self, key, id }))
                }
            }
        };

        let role = if leader.is_some() {
            FlightRole::Leader
        } else {
            FlightRole::Follower
        };
        let result = future.await;
        drop(leader);
        (result, role)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight<T, E>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the leader's registry entry on completion or cancellation.
struct LeaderGuard<'a, T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    flight: &'a SingleFlight<T, E>,
    key: &'a str,
    id: u64,
}

impl<T, E> Drop for LeaderGuard<'_, T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let mut map = self.flight.lock();
        if map.get(self.key).is_some_and(|f| f.id == self.id) {
            map.remove(self.key);
        }
    }
}
