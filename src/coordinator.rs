//! Single-flight token refresh.
//!
//! Every request that hits a 401 with the same stale token funnels through
//! [`RefreshCoordinator::coordinate`]. The first caller runs the refresh; the
//! rest wait in arrival order and share its outcome. If the running caller is
//! dropped before the refresh settles, the next waiter in line takes over.

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::RefreshFailure;

type Waiter = oneshot::Sender<Handoff>;

enum Handoff {
    Settled(Result<(), RefreshFailure>),
    /// The previous leader went away; the receiver runs the refresh now.
    Lead,
}

/// Which side of the single flight a caller ended up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshRole {
    /// Ran the refresh itself.
    Leader,
    /// Waited for another caller's refresh.
    Follower,
}

/// Outcome of one [`RefreshCoordinator::coordinate`] call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settled {
    pub role: RefreshRole,
    pub result: Result<(), RefreshFailure>,
}

#[derive(Default)]
pub struct RefreshCoordinator {
    pending: Mutex<HashMap<String, VecDeque<Waiter>>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stale tokens with a refresh currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs `refresh` unless one is already in flight for `stale_token`, in
    /// which case the caller is queued behind it.
    ///
    /// A queued caller only runs its own `refresh` when the current leader is
    /// dropped without settling.
    pub async fn coordinate<F, Fut>(&self, stale_token: &str, refresh: F) -> Settled
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RefreshFailure>>,
    {
        // Check and enqueue under one lock so two callers cannot both lead.
        let queued = {
            let mut pending = self.pending.lock();
            match pending.get_mut(stale_token) {
                Some(queue) => {
                    let (tx, rx) = oneshot::channel();
                    queue.push_back(tx);
                    Some(Queued {
                        coordinator: self,
                        key: stale_token.to_owned(),
                        rx,
                        received: false,
                    })
                }
                None => {
                    pending.insert(stale_token.to_owned(), VecDeque::new());
                    None
                }
            }
        };

        if let Some(mut queued) = queued {
            tracing::debug!("queued behind in-flight token refresh");
            match queued.wait().await {
                Handoff::Settled(result) => {
                    return Settled {
                        role: RefreshRole::Follower,
                        result,
                    }
                }
                Handoff::Lead => tracing::debug!("refresh leader went away, taking over"),
            }
        }

        let mut flight = Flight {
            coordinator: self,
            key: stale_token.to_owned(),
            settled: false,
        };
        tracing::debug!("starting token refresh");
        let result = refresh().await;
        flight.settle(result.clone());

        Settled {
            role: RefreshRole::Leader,
            result,
        }
    }

    fn release(&self, key: &str, result: Result<(), RefreshFailure>) {
        let waiters = self.pending.lock().remove(key).unwrap_or_default();
        tracing::debug!(
            waiters = waiters.len(),
            ok = result.is_ok(),
            "token refresh settled"
        );
        for waiter in waiters {
            // A waiter whose request was dropped no longer cares.
            let _ = waiter.send(Handoff::Settled(result.clone()));
        }
    }

    /// Promotes the oldest live waiter to leader, or ends the flight when
    /// nobody is left waiting.
    fn hand_off(&self, key: &str) {
        let mut pending = self.pending.lock();
        let Some(queue) = pending.get_mut(key) else {
            return;
        };
        while let Some(next) = queue.pop_front() {
            if next.send(Handoff::Lead).is_ok() {
                tracing::debug!(waiters = queue.len(), "token refresh handed to next waiter");
                return;
            }
        }
        pending.remove(key);
    }
}

// Passes the refresh on if the leader's future is dropped mid-refresh.
struct Flight<'a> {
    coordinator: &'a RefreshCoordinator,
    key: String,
    settled: bool,
}

impl Flight<'_> {
    fn settle(&mut self, result: Result<(), RefreshFailure>) {
        self.settled = true;
        self.coordinator.release(&self.key, result);
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.hand_off(&self.key);
        }
    }
}

// A follower's place in the queue. A promotion that lands after the follower
// was dropped is passed further down the line.
struct Queued<'a> {
    coordinator: &'a RefreshCoordinator,
    key: String,
    rx: oneshot::Receiver<Handoff>,
    received: bool,
}

impl Queued<'_> {
    async fn wait(&mut self) -> Handoff {
        let handoff = (&mut self.rx)
            .await
            .unwrap_or_else(|_| Handoff::Settled(Err(RefreshFailure::new("refresh abandoned"))));
        self.received = true;
        handoff
    }
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        if self.received {
            return;
        }
        self.rx.close();
        if let Ok(Handoff::Lead) = self.rx.try_recv() {
            self.coordinator.hand_off(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::{RefreshCoordinator, RefreshRole};
    use crate::RefreshFailure;

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                coordinator
                    .coordinate("stale", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(())
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for task in tasks {
            let settled = task.await.expect("task must not panic");
            assert_eq!(settled.result, Ok(()));
            if settled.role == RefreshRole::Leader {
                leaders += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter() {
        let coordinator = Arc::new(RefreshCoordinator::new());

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator
                    .coordinate("stale", || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(RefreshFailure::new("refresh endpoint returned 500"))
                    })
                    .await
            }));
        }

        for task in tasks {
            let settled = task.await.expect("task must not panic");
            assert_eq!(
                settled.result,
                Err(RefreshFailure::new("refresh endpoint returned 500"))
            );
        }
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn different_stale_tokens_refresh_independently() {
        let coordinator = RefreshCoordinator::new();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let refresh = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        };
        let (a, b) = tokio::join!(
            coordinator.coordinate("token-a", refresh),
            coordinator.coordinate("token-b", refresh),
        );

        assert_eq!(a.role, RefreshRole::Leader);
        assert_eq!(b.role, RefreshRole::Leader);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_leader_hands_refresh_to_next_waiter() {
        let coordinator = Arc::new(RefreshCoordinator::new());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .coordinate("stale", || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(())
                    })
                    .await
            })
        };
        while coordinator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .coordinate("stale", || async { Ok(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        let settled = follower.await.expect("follower must finish");
        assert_eq!(settled.role, RefreshRole::Leader);
        assert_eq!(settled.result, Ok(()));
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn promotion_skips_waiters_that_went_away() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let stuck = |coordinator: Arc<RefreshCoordinator>| {
            tokio::spawn(async move {
                coordinator
                    .coordinate("stale", || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(())
                    })
                    .await
            })
        };

        let leader = stuck(coordinator.clone());
        while coordinator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let dropped_waiter = stuck(coordinator.clone());
        let promoted_then_dropped = stuck(coordinator.clone());
        let last = {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                coordinator
                    .coordinate("stale", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        dropped_waiter.abort();
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        tokio::time::sleep(Duration::from_millis(20)).await;
        promoted_then_dropped.abort();

        let settled = last.await.expect("last waiter must finish");
        assert_eq!(settled.role, RefreshRole::Leader);
        assert_eq!(settled.result, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight(), 0);
    }
}
