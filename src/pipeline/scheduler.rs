// Periodic task scheduler
// Runs blocking jobs at a fixed cadence on the tokio blocking pool

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

/// What a job wants after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// One unit of periodic blocking work
///
/// A tick may block (capture, device I/O). The scheduler never runs two ticks
/// of the same job at once; a tick that overruns its period delays the next
/// one instead of queueing a burst.
pub trait Tick: Send + 'static {
    fn tick(&mut self) -> TickOutcome;
}

/// Spawns periodic jobs on a runtime
///
/// Ticks run through `spawn_blocking`, so the number of ticks in flight at
/// once is bounded by the runtime's blocking pool (`workers`).
#[derive(Clone)]
pub struct Scheduler {
    handle: Handle,
    workers: usize,
    active: Arc<AtomicUsize>,
}

impl Scheduler {
    pub fn new(handle: Handle, workers: usize) -> Self {
        Self {
            handle,
            workers: workers.max(1),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Scheduler on the current runtime
    pub fn current(workers: usize) -> Self {
        Self::new(Handle::current(), workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of periodic jobs currently scheduled
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `job` every `period` until it returns `Stop` or `cancel` flips to true
    ///
    /// The first tick fires one period after spawning. The handle resolves to
    /// the job once no tick of it is running any more; `None` if a tick
    /// panicked.
    pub fn spawn_periodic<J: Tick>(
        &self,
        name: String,
        period: Duration,
        job: J,
        mut cancel: watch::Receiver<bool>,
    ) -> JoinHandle<Option<J>> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        if running > self.workers {
            warn!(
                running,
                workers = self.workers,
                "More periodic tasks than workers, ticks will queue"
            );
        }
        let active = self.active.clone();
        let handle = self.handle.clone();

        self.handle.spawn(async move {
            let mut job = job;
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let result = loop {
                if *cancel.borrow() {
                    break Some(job);
                }
                tokio::select! {
                    biased;
                    changed = cancel.changed() => {
                        // Sender gone counts as cancellation
                        if changed.is_err() || *cancel.borrow() {
                            break Some(job);
                        }
                    }
                    _ = interval.tick() => {
                        let ticked = handle
                            .spawn_blocking(move || {
                                let outcome = job.tick();
                                (job, outcome)
                            })
                            .await;
                        match ticked {
                            Ok((j, TickOutcome::Continue)) => job = j,
                            Ok((j, TickOutcome::Stop)) => {
                                debug!(task = %name, "Task stopped itself");
                                break Some(j);
                            }
                            Err(e) => {
                                error!(task = %name, "Task panicked: {e}");
                                break None;
                            }
                        }
                    }
                }
            };

            active.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        ticks: usize,
        stop_after: usize,
    }

    impl Tick for Counter {
        fn tick(&mut self) -> TickOutcome {
            self.ticks += 1;
            if self.ticks >= self.stop_after {
                TickOutcome::Stop
            } else {
                TickOutcome::Continue
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_job_stops_itself() {
        let scheduler = Scheduler::current(2);
        let (_tx, rx) = watch::channel(false);
        let job = Counter { ticks: 0, stop_after: 3 };

        let handle = scheduler.spawn_periodic("count".into(), Duration::from_millis(5), job, rx);
        let job = handle.await.unwrap().unwrap();
        assert_eq!(job.ticks, 3);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_returns_job() {
        let scheduler = Scheduler::current(2);
        let (tx, rx) = watch::channel(false);
        let job = Counter { ticks: 0, stop_after: usize::MAX };

        let handle = scheduler.spawn_periodic("count".into(), Duration::from_millis(5), job, rx);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(scheduler.active(), 1);
        tx.send(true).unwrap();

        let job = handle.await.unwrap().unwrap();
        assert!(job.ticks >= 1);
        assert_eq!(scheduler.active(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_before_first_tick() {
        let scheduler = Scheduler::current(1);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let job = Counter { ticks: 0, stop_after: 1 };

        let handle = scheduler.spawn_periodic("idle".into(), Duration::from_secs(60), job, rx);
        assert_eq!(handle.await.unwrap().unwrap().ticks, 0);
    }
}
