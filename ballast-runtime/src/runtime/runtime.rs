use super::{config::Config, error::Error, supervisor::Supervisor, writer::DiskWriter};
use anyhow::{anyhow, Context};
use futures::{
    future::{pending, ready, Either},
    FutureExt,
};
use log::{debug, info, warn};
use std::future::Future;
use tokio::{
    select,
    task::{self, JoinHandle},
};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Runtime handle
pub enum Runtime {
    /// The runtime is created but not yet started.
    Created {
        /// Runtime configuration
        config: Config,
    },
    /// The runtime is started.
    Running {
        /// Drop guard to stop the runtime
        guard: DropGuard,
        /// Runtime task
        task: JoinHandle<anyhow::Result<()>>,
    },
}

impl Runtime {
    /// Create a new runtime instance with a checked configuration.
    pub fn new(config: Config) -> Result<Runtime, Error> {
        config.check()?;
        Ok(Runtime::Created { config })
    }

    /// Start the load generators.
    pub async fn start(self) -> Result<Runtime, Error> {
        let config = if let Runtime::Created { config } = self {
            config
        } else {
            panic!("Runtime::start called on a running runtime");
        };

        // Create the scratch file before anything is spawned. A missing or
        // full scratch dir is a startup error, not a runtime one.
        let writer = config
            .write
            .map(|rate| DiskWriter::new(&config.scratch_dir, rate, config.max_file_size))
            .transpose()?;

        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();

        // Start a task that drives the main loop and wait for shutdown results
        let task = task::spawn(run(config, writer, token));

        Ok(Runtime::Running { guard, task })
    }

    /// Stop the runtime and wait for the termination
    pub fn shutdown(self) -> impl Future<Output = Result<(), Error>> {
        if let Runtime::Running { guard, task } = self {
            drop(guard);
            Either::Left({
                task.then(|n| match n {
                    Ok(n) => ready(n.map_err(|e| e.into())),
                    Err(_) => ready(Ok(())),
                })
            })
        } else {
            Either::Right(ready(Ok(())))
        }
    }

    /// Wait for the runtime to stop
    pub async fn stopped(&mut self) -> Result<(), Error> {
        match self {
            Runtime::Running { ref mut task, .. } => match task.await {
                Ok(r) => r.map_err(|e| e.into()),
                Err(_) => Ok(()),
            },
            Runtime::Created { .. } => panic!("Stopped called on a stopped runtime"),
        }
    }
}

/// Main loop
async fn run(
    config: Config,
    writer: Option<DiskWriter>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut supervisor = (config.cores > 0).then(|| {
        let supervisor = Supervisor::new(&config);
        task::spawn(supervisor.run(token.clone()))
    });
    let mut writer = writer.map(|writer| task::spawn(writer.run(token.clone())));

    info!("Runtime up and running");

    loop {
        select! {
            // External shutdown via the token
            _ = token.cancelled() => {
                debug!("Stopping load generators");
                if supervisor.is_some() {
                    join(&mut supervisor)
                        .await
                        .context("supervisor failed during shutdown")?;
                }
                if writer.is_some() {
                    if let Err(e) = join(&mut writer).await {
                        warn!("Disk writer failed during shutdown: {:?}", e);
                    }
                }
                info!("Shutdown complete");
                break Ok(());
            }
            // The supervisor loops until cancelled. A return with the token
            // untripped means worker spawning is broken. The cancelled arm
            // and this one race during shutdown.
            result = join(&mut supervisor), if supervisor.is_some() => {
                if token.is_cancelled() {
                    result.context("supervisor failed during shutdown")?;
                    continue;
                }
                break match result {
                    Ok(()) => Err(anyhow!("supervisor stopped unexpectedly")),
                    Err(e) => Err(e.context("supervisor failed")),
                };
            }
            // A writer failure is contained while workers are running. With
            // no workers there is nothing left to generate load.
            result = join(&mut writer), if writer.is_some() => {
                if let Err(e) = result {
                    warn!("Disk writer failed: {:?}", e);
                    if supervisor.is_none() && !token.is_cancelled() {
                        break Err(e.context("disk writer failed with no workers running"));
                    }
                } else {
                    debug!("Disk writer stopped");
                }
            }
        }
    }
}

/// Wait for the task in `slot` and clear it. Pending if there is none.
/// Panics are flattened into errors.
async fn join(slot: &mut Option<JoinHandle<anyhow::Result<()>>>) -> anyhow::Result<()> {
    match slot.as_mut() {
        Some(task) => {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("task panicked: {e}")),
            };
            *slot = None;
            result
        }
        None => pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn new_checks_the_configuration() {
        let config = Config {
            cores: 0,
            memory: 0,
            write: None,
            max_file_size: None,
            scratch_dir: std::env::temp_dir(),
            stagger: std::time::Duration::from_millis(1),
            poll_interval: std::time::Duration::from_millis(10),
            respawn_all: false,
        };
        assert!(matches!(
            Runtime::new(config),
            Err(Error::Configuration(_))
        ));
    }
}
