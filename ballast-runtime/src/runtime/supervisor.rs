use super::{
    config::Config,
    worker::{Worker, WorkerId},
};
use anyhow::Result;
use humantime::format_duration;
use log::{debug, info};
use std::time::Duration;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

/// Reconciliation loop that keeps the configured number of workers alive.
pub(super) struct Supervisor {
    /// Number of workers to keep alive.
    count: usize,
    /// Memory target per worker in MiB.
    target_mib: u64,
    /// Process wide memory budget in MiB.
    budget_mib: u64,
    /// Close all gaps per poll instead of one.
    respawn_all: bool,
    /// Pause between spawns at startup.
    stagger: Duration,
    /// Liveness poll interval.
    poll: Duration,
    /// Live workers. Dead ones are removed on the next poll.
    workers: Vec<Worker>,
    /// Total number of spawns, used to mint worker ids.
    spawned: u32,
}

impl Supervisor {
    pub(super) fn new(config: &Config) -> Supervisor {
        Supervisor {
            count: config.cores,
            target_mib: config.memory_per_worker(),
            budget_mib: config.memory,
            respawn_all: config.respawn_all,
            stagger: config.stagger,
            poll: config.poll_interval,
            workers: Vec::with_capacity(config.cores),
            spawned: 0,
        }
    }

    /// Run the supervisor until cancelled.
    pub(super) async fn run(mut self, token: CancellationToken) -> Result<()> {
        // One worker at a time. The pause in between lets each ramp settle
        // before the next one joins.
        for _ in 0..self.count {
            self.spawn()?;
            select! {
                _ = token.cancelled() => {
                    self.stop();
                    return Ok(());
                }
                _ = time::sleep(self.stagger) => (),
            }
        }

        let mut tick = time::interval(self.poll);
        loop {
            select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = self.reconcile() {
                        self.stop();
                        return Err(e);
                    }
                }
            }
        }

        self.stop();
        Ok(())
    }

    /// Spawn one worker with a fresh id.
    fn spawn(&mut self) -> Result<()> {
        let id = WorkerId(self.spawned);
        self.spawned += 1;
        let worker = Worker::spawn(id, self.target_mib, self.budget_mib)?;
        info!("Spawned {} with a target of {} MiB", id, self.target_mib);
        self.workers.push(worker);
        Ok(())
    }

    /// Reap dead workers and close the deficit. Why a worker died is never
    /// inspected, liveness is the only signal. One replacement per call
    /// unless `respawn_all` is set.
    fn reconcile(&mut self) -> Result<()> {
        self.workers.retain(|worker| {
            if worker.is_alive() {
                true
            } else {
                info!(
                    "{} exited after {}",
                    worker.id(),
                    format_duration(worker.uptime())
                );
                false
            }
        });

        let deficit = self.count - self.workers.len();
        if deficit > 0 {
            debug!("{} of {} workers are alive", self.workers.len(), self.count);
            let respawns = if self.respawn_all { deficit } else { 1 };
            for _ in 0..respawns {
                self.spawn()?;
            }
        }
        Ok(())
    }

    /// Ask all workers to stop. Nothing waits for them: they exit after
    /// their current pass or with the process, whatever comes first.
    fn stop(&self) {
        debug!("Stopping {} workers", self.workers.len());
        for worker in &self.workers {
            worker.stop();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;
    use std::{env, thread};

    fn config(cores: usize) -> Config {
        Config {
            cores,
            // 1 MiB per worker keeps the ramps idle
            memory: cores as u64,
            write: None,
            max_file_size: None,
            scratch_dir: env::temp_dir(),
            stagger: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
            respawn_all: false,
        }
    }

    fn kill(worker: &Worker) {
        worker.stop();
        for _ in 0..500 {
            if !worker.is_alive() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("worker did not stop");
    }

    #[test]
    fn steady_state_is_left_alone() {
        let mut supervisor = Supervisor::new(&config(2));
        supervisor.spawn().unwrap();
        supervisor.spawn().unwrap();

        supervisor.reconcile().unwrap();

        assert_eq!(supervisor.workers.len(), 2);
        assert_eq!(supervisor.spawned, 2);
        supervisor.stop();
    }

    #[test]
    fn replaces_one_worker_per_poll() {
        let mut supervisor = Supervisor::new(&config(3));
        for _ in 0..3 {
            supervisor.spawn().unwrap();
        }

        kill(&supervisor.workers[0]);
        kill(&supervisor.workers[1]);

        supervisor.reconcile().unwrap();
        assert_eq!(supervisor.workers.len(), 2);

        supervisor.reconcile().unwrap();
        assert_eq!(supervisor.workers.len(), 3);
        assert!(supervisor.workers.iter().all(Worker::is_alive));

        supervisor.stop();
    }

    #[test]
    fn replaces_all_workers_per_poll() {
        let mut config = config(3);
        config.respawn_all = true;
        let mut supervisor = Supervisor::new(&config);
        for _ in 0..3 {
            supervisor.spawn().unwrap();
        }

        kill(&supervisor.workers[0]);
        kill(&supervisor.workers[2]);

        supervisor.reconcile().unwrap();
        assert_eq!(supervisor.workers.len(), 3);
        assert!(supervisor.workers.iter().all(Worker::is_alive));

        supervisor.stop();
    }

    #[test]
    fn ids_are_never_reused() {
        let mut supervisor = Supervisor::new(&config(2));
        supervisor.spawn().unwrap();
        supervisor.spawn().unwrap();

        kill(&supervisor.workers[0]);
        supervisor.reconcile().unwrap();

        let ids: Vec<_> = supervisor.workers.iter().map(Worker::id).collect();
        assert!(ids.contains(&WorkerId(1)));
        assert!(ids.contains(&WorkerId(2)));

        supervisor.stop();
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let supervisor = Supervisor::new(&config(2));
        let token = CancellationToken::new();
        let task = tokio::task::spawn(supervisor.run(token.clone()));

        time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
