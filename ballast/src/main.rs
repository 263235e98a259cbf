//! Ballast load generator main

#![deny(clippy::all)]
#![deny(missing_docs)]

use anyhow::{Context, Error};
use ballast_runtime::runtime::{config::Config, stats, Runtime};
use clap::Parser;
use log::{info, warn};
use std::{env, path::PathBuf, process::exit, thread, time::Duration};
use tokio::{select, signal::unix::SignalKind};

mod logger;

/// Synthetic CPU, memory and disk load generator
#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Opt {
    /// Number of CPU/memory workers. Defaults to the logical core count
    #[clap(short, long)]
    cores: Option<usize>,

    /// Memory budget over all workers in MiB. Defaults to the physical
    /// memory of the host
    #[clap(short, long)]
    memory: Option<u64>,

    /// Disk write rate in MiB/s. No disk load is generated if unset
    #[clap(short, long)]
    write: Option<u64>,

    /// Scratch file size cap in MiB
    #[clap(long, requires = "write")]
    max: Option<u64>,

    /// Directory the scratch file is created in
    #[clap(long)]
    scratch_dir: Option<PathBuf>,

    /// Pause between worker spawns at startup
    #[clap(long, value_parser = humantime::parse_duration, default_value = "3s")]
    stagger: Duration,

    /// Worker liveness poll interval
    #[clap(long, value_parser = humantime::parse_duration, default_value = "2s")]
    poll_interval: Duration,

    /// Respawn all dead workers per poll instead of one per poll
    #[clap(long)]
    respawn_all: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    let opt = Opt::parse();
    logger::init();

    let cores = match opt.cores {
        Some(cores) => cores,
        None => thread::available_parallelism()
            .context("failed to query the core count")?
            .get(),
    };
    let memory = match opt.memory {
        Some(memory) => memory,
        None => {
            stats::total_memory().context("failed to query the physical memory size")? / stats::MIB
        }
    };

    let config = Config {
        cores,
        memory,
        write: opt.write,
        max_file_size: opt.max,
        scratch_dir: opt.scratch_dir.unwrap_or_else(env::temp_dir),
        stagger: opt.stagger,
        poll_interval: opt.poll_interval,
        respawn_all: opt.respawn_all,
    };

    info!(
        "Stressing {} cores and {} MiB of memory",
        config.cores, config.memory
    );

    let mut runtime = Runtime::new(config)?
        .start()
        .await
        .context("failed to start the runtime")?;

    let mut sigint = tokio::signal::unix::signal(SignalKind::interrupt())
        .context("failed to install sigint handler")?;
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .context("failed to install sigterm handler")?;

    let status = select! {
        _ = sigint.recv() => {
            info!("Received SIGINT. Stopping ballast");
            runtime.shutdown().await
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM. Stopping ballast");
            runtime.shutdown().await
        }
        status = runtime.stopped() => status,
    };

    match status {
        Ok(_) => exit(0),
        Err(e) => {
            warn!("Runtime exited with {:?}", e);
            exit(1);
        }
    }
}
