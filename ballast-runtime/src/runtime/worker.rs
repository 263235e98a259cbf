use super::ramp::MemoryRamp;
use anyhow::{Context, Result};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

/// Identifies a worker over the lifetime of the process. Ids are never
/// reused, a respawned worker gets a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(super) struct WorkerId(pub(super) u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Handle to one CPU and memory worker.
///
/// The worker is a dedicated OS thread driving a [`MemoryRamp`]. Threads are
/// kernel scheduled, so each worker occupies one core without any runtime in
/// between, and the ramp buffer is owned by the thread alone. The handle is
/// never joined: a worker has no regular end and is only asked to stop when
/// the whole process shuts down.
pub(super) struct Worker {
    id: WorkerId,
    started: Instant,
    stop: Arc<AtomicBool>,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    /// Spawn a worker thread ramping towards `target_mib`.
    pub(super) fn spawn(id: WorkerId, target_mib: u64, budget_mib: u64) -> Result<Worker> {
        let stop = Arc::new(AtomicBool::new(false));
        let ramp = MemoryRamp::new(target_mib, budget_mib);
        let thread = thread::Builder::new()
            .name(id.to_string())
            .spawn({
                let stop = stop.clone();
                move || ramp.run(id, &stop)
            })
            .with_context(|| format!("failed to spawn {id}"))?;

        Ok(Worker {
            id,
            started: Instant::now(),
            stop,
            thread,
        })
    }

    pub(super) fn id(&self) -> WorkerId {
        self.id
    }

    /// Time since the spawn.
    pub(super) fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// True until the worker thread ran to completion.
    pub(super) fn is_alive(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Ask the worker to stop after its current pass.
    pub(super) fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    fn join(worker: &Worker) {
        for _ in 0..500 {
            if !worker.is_alive() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("worker did not stop");
    }

    #[test]
    fn display() {
        assert_eq!(WorkerId(3).to_string(), "worker-3");
    }

    #[test]
    fn stop_ends_the_worker() {
        let worker = Worker::spawn(WorkerId(0), 1, 1).unwrap();
        assert!(worker.is_alive());
        worker.stop();
        join(&worker);
    }

    #[test]
    fn workers_are_isolated() {
        let one = Worker::spawn(WorkerId(1), 1, 1).unwrap();
        let other = Worker::spawn(WorkerId(2), 1, 1).unwrap();

        one.stop();
        join(&one);

        assert!(other.is_alive());
        other.stop();
        join(&other);
    }
}
