//! Per-key FIFO lanes over a bounded worker pool.
//!
//! Jobs submitted under the same key run one at a time in submission order;
//! jobs under different keys run concurrently, capped by the worker count.
//! `submit` waits while `pending` jobs are already queued, which pushes back
//! on the receive loop instead of growing without bound.

use std::collections::VecDeque;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::core::config::Config;

pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneLimits {
    /// Jobs running at once across all keys
    pub workers: usize,
    /// Jobs accepted but not yet finished
    pub pending: usize,
}

impl LaneLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.worker_pool_size.max(1),
            pending: config.max_pending_events.max(1),
        }
    }
}

impl Default for LaneLimits {
    fn default() -> Self {
        Self {
            workers: 8,
            pending: 256,
        }
    }
}

struct Queued {
    /// Only touched by the drainer; the lock keeps the lane map `Sync`
    job: Mutex<Job>,
    permit: OwnedSemaphorePermit,
}

impl Queued {
    fn into_job(self) -> (Job, OwnedSemaphorePermit) {
        let job = self.job.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        (job, self.permit)
    }
}

struct Lanes<K> {
    /// A key is present exactly while a drainer task owns it
    queues: DashMap<K, VecDeque<Queued>>,
    pending: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
}

pub struct KeyedLanes<K> {
    inner: Arc<Lanes<K>>,
}

impl<K> Clone for KeyedLanes<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> KeyedLanes<K>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Display + 'static,
{
    pub fn new(limits: LaneLimits, tracker: TaskTracker) -> Self {
        Self {
            inner: Arc::new(Lanes {
                queues: DashMap::new(),
                pending: Arc::new(Semaphore::new(limits.pending.max(1))),
                workers: Arc::new(Semaphore::new(limits.workers.max(1))),
                tracker,
            }),
        }
    }

    /// Queues `job` behind earlier jobs for `key`.
    ///
    /// Returns `false` without queueing if `cancel` fires while waiting for room.
    pub async fn submit(&self, key: K, job: Job, cancel: &CancellationToken) -> bool {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            permit = Arc::clone(&self.inner.pending).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        let queued = Queued {
            job: Mutex::new(job),
            permit,
        };
        let start_drainer = match self.inner.queues.entry(key.clone()) {
            Entry::Occupied(mut lane) => {
                lane.get_mut().push_back(queued);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([queued]));
                true
            }
        };

        if start_drainer {
            let lanes = Arc::clone(&self.inner);
            self.inner.tracker.spawn(lanes.drain(key));
        }
        true
    }

    /// Jobs waiting behind a running job for their key.
    pub fn queued(&self) -> usize {
        self.inner.queues.iter().map(|lane| lane.len()).sum::<usize>()
    }

    pub fn active_keys(&self) -> usize {
        self.inner.queues.len()
    }
}

impl<K> Lanes<K>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Display + 'static,
{
    async fn drain(self: Arc<Self>, key: K) {
        loop {
            let next = self.queues.get_mut(&key).and_then(|mut lane| lane.pop_front());
            let Some((job, permit)) = next.map(Queued::into_job) else {
                // A submit may have slipped in since the pop; keep going if so.
                if self.queues.remove_if(&key, |_, lane| lane.is_empty()).is_some() {
                    return;
                }
                continue;
            };

            let Ok(worker) = Arc::clone(&self.workers).acquire_owned().await else {
                return;
            };
            if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                log::error!("Event handler for {} panicked", key);
            }
            drop(worker);
            drop(permit);
        }
    }
}
