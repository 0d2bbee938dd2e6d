//! Best-effort side tasks decoupled from the ride call.
//!
//! Ride operations push [`SideTask`]s onto an unbounded channel and return
//! immediately. A [`SideTaskWorker`] running on the tokio runtime drains the
//! channel, executing each task on the blocking pool with exponential
//! backoff between attempts. A task that exhausts its attempts is logged and
//! counted, never surfaced to the ride caller.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::SideTaskConfig;
use crate::degradation::DegradationCounters;
use crate::error::{Error, Result};
use crate::geo::GeoPoint;
use crate::model::PathPoint;
use crate::storage::{kickboards, paths, Storage};

/// Work deferred out of a ride transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum SideTask {
    /// Store the GPS trace of a finished ride.
    PersistPath {
        /// Ride the trace belongs to.
        ride_id: i64,
        /// Ordered samples.
        points: Vec<PathPoint>,
    },
    /// Retry releasing a kickboard whose in-transaction release failed.
    ReleaseKickboard {
        /// Kickboard to release.
        kickboard_id: String,
        /// Return position.
        location: GeoPoint,
    },
}

impl SideTask {
    /// Short task name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PersistPath { .. } => "persist_path",
            Self::ReleaseKickboard { .. } => "release_kickboard",
        }
    }

    fn run(&self, storage: &Storage) -> Result<()> {
        match self {
            Self::PersistPath { ride_id, points } => {
                storage.write(|tx| paths::upsert(tx, *ride_id, points))
            }
            Self::ReleaseKickboard {
                kickboard_id,
                location,
            } => storage.write(|tx| {
                if kickboards::release(tx, kickboard_id, *location)? {
                    Ok(())
                } else {
                    Err(Error::not_found("kickboard", kickboard_id))
                }
            }),
        }
    }
}

/// Sending half handed to ride services.
#[derive(Debug, Clone)]
pub struct SideTaskQueue {
    tx: mpsc::UnboundedSender<SideTask>,
    counters: Arc<DegradationCounters>,
}

impl SideTaskQueue {
    /// Queue a task. Never blocks; a closed channel is logged and counted.
    pub fn submit(&self, task: SideTask) {
        let name = task.name();
        if self.tx.send(task).is_err() {
            warn!(task = name, "Side task worker is gone, dropping task");
            self.counters.side_task_failure();
        } else {
            debug!(task = name, "Queued side task");
        }
    }
}

/// Totals reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Tasks that eventually succeeded.
    pub completed: u64,
    /// Tasks dropped after their last attempt.
    pub failed: u64,
}

/// Receiving half that executes queued tasks.
#[derive(Debug)]
pub struct SideTaskWorker {
    rx: mpsc::UnboundedReceiver<SideTask>,
    storage: Arc<Storage>,
    config: SideTaskConfig,
    counters: Arc<DegradationCounters>,
}

/// Create a connected queue and worker.
#[must_use]
pub fn channel(
    storage: Arc<Storage>,
    config: SideTaskConfig,
    counters: Arc<DegradationCounters>,
) -> (SideTaskQueue, SideTaskWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SideTaskQueue {
            tx,
            counters: Arc::clone(&counters),
        },
        SideTaskWorker {
            rx,
            storage,
            config,
            counters,
        },
    )
}

impl SideTaskWorker {
    /// Process tasks until every queue handle has been dropped and the
    /// channel is drained.
    pub async fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport::default();
        while let Some(task) = self.rx.recv().await {
            if self.execute(task).await {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
        }
        debug!(?report, "Side task worker stopped");
        report
    }

    async fn execute(&self, task: SideTask) -> bool {
        let name = task.name();
        let max_attempts = self.config.max_attempts.max(1);
        let task = Arc::new(task);

        for attempt in 1..=max_attempts {
            let storage = Arc::clone(&self.storage);
            let job = Arc::clone(&task);
            let result = tokio::task::spawn_blocking(move || job.run(&storage))
                .await
                .map_err(|e| Error::side_task(name, e.to_string()))
                .and_then(|r| r);

            match result {
                Ok(()) => {
                    debug!(task = name, attempt, "Side task completed");
                    return true;
                }
                Err(e) if e.is_not_found() => {
                    error!(task = name, error = %e, "Side task target no longer exists");
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        task = name,
                        attempt,
                        error = %e,
                        "Side task failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(task = name, attempts = attempt, error = %e, "Side task exhausted retries");
                }
            }
        }

        self.counters.side_task_failure();
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{KickboardStatus, NewKickboard, Role};
    use crate::storage::{riders, rides};
    use chrono::Utc;

    const HOME: GeoPoint = GeoPoint::new(37.5, 127.0);

    fn fast_config() -> SideTaskConfig {
        SideTaskConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    fn storage_with_ride() -> (Arc<Storage>, i64) {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let ride = storage
            .write(|tx| {
                riders::insert(tx, Some(1), "u1", Role::Rider)?;
                kickboards::insert(
                    tx,
                    &NewKickboard {
                        id: "K1".to_string(),
                        location: HOME,
                        battery: 80,
                        model: None,
                    },
                )?;
                kickboards::try_acquire(tx, "K1")?;
                rides::insert_active(tx, 1, "K1", HOME, Utc::now(), true)
            })
            .unwrap();
        (storage, ride)
    }

    #[tokio::test]
    async fn test_worker_persists_path_and_releases() {
        let (storage, ride) = storage_with_ride();
        let counters = Arc::new(DegradationCounters::new());
        let (queue, worker) = channel(Arc::clone(&storage), fast_config(), Arc::clone(&counters));

        queue.submit(SideTask::PersistPath {
            ride_id: ride,
            points: vec![PathPoint {
                location: HOME,
                speed: Some(10.0),
                timestamp: None,
            }],
        });
        queue.submit(SideTask::ReleaseKickboard {
            kickboard_id: "K1".to_string(),
            location: GeoPoint::new(37.6, 127.1),
        });
        drop(queue);

        let report = worker.run().await;
        assert_eq!(report, WorkerReport { completed: 2, failed: 0 });

        let path = storage.read(|c| paths::get(c, ride)).unwrap().unwrap();
        assert_eq!(path.len(), 1);
        let kb = storage.read(|c| kickboards::get(c, "K1")).unwrap().unwrap();
        assert_eq!(kb.status, KickboardStatus::Available);
        assert_eq!(counters.snapshot().side_task_failures, 0);
    }

    #[tokio::test]
    async fn test_worker_counts_exhausted_task() {
        let (storage, ride) = storage_with_ride();
        let counters = Arc::new(DegradationCounters::new());
        let (queue, worker) = channel(storage, fast_config(), Arc::clone(&counters));

        // Foreign key failure on every attempt.
        queue.submit(SideTask::PersistPath {
            ride_id: ride + 1000,
            points: Vec::new(),
        });
        drop(queue);

        let report = worker.run().await;
        assert_eq!(report.failed, 1);
        assert_eq!(counters.snapshot().side_task_failures, 1);
    }

    #[tokio::test]
    async fn test_release_of_missing_kickboard_is_not_retried() {
        let (storage, _) = storage_with_ride();
        let counters = Arc::new(DegradationCounters::new());
        let (queue, worker) = channel(storage, fast_config(), Arc::clone(&counters));

        queue.submit(SideTask::ReleaseKickboard {
            kickboard_id: "ghost".to_string(),
            location: HOME,
        });
        drop(queue);

        assert_eq!(worker.run().await.failed, 1);
    }

    #[test]
    fn test_submit_after_worker_dropped_is_counted() {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let counters = Arc::new(DegradationCounters::new());
        let (queue, worker) = channel(storage, fast_config(), Arc::clone(&counters));
        drop(worker);

        queue.submit(SideTask::PersistPath {
            ride_id: 1,
            points: Vec::new(),
        });
        assert_eq!(counters.snapshot().side_task_failures, 1);
    }
}
