use super::error::Error;
use nix::{sys::stat, unistd};
use std::{
    os::unix::prelude::{MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
    time::Duration,
};

/// Load generator configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of CPU and memory workers.
    pub cores: usize,
    /// Memory budget over all workers in MiB.
    pub memory: u64,
    /// Disk write rate in MiB per second. `None` disables the disk writer.
    pub write: Option<u64>,
    /// Scratch file size cap in MiB.
    pub max_file_size: Option<u64>,
    /// Directory the scratch file is created in.
    pub scratch_dir: PathBuf,
    /// Pause between worker spawns at startup.
    pub stagger: Duration,
    /// Interval of the worker liveness poll.
    pub poll_interval: Duration,
    /// Respawn all dead workers per poll instead of one per poll.
    pub respawn_all: bool,
}

impl Config {
    /// Memory target of a single worker in MiB.
    pub fn memory_per_worker(&self) -> u64 {
        self.memory / self.cores as u64
    }

    /// Validate the configuration.
    pub(crate) fn check(&self) -> Result<(), Error> {
        if self.cores == 0 && self.write.is_none() {
            return Err(Error::Configuration(
                "must have some cores to stress".into(),
            ));
        }

        if self.cores > 0 {
            if self.memory == 0 {
                return Err(Error::Configuration(
                    "memory budget must be at least 1 MiB".into(),
                ));
            }
            if self.memory_per_worker() == 0 {
                return Err(Error::Configuration(format!(
                    "budget of {} MiB is less than 1 MiB per worker",
                    self.memory
                )));
            }
        }

        match (self.write, self.max_file_size) {
            (Some(0), _) => {
                return Err(Error::Configuration(
                    "write rate must be at least 1 MiB/s".into(),
                ))
            }
            (Some(write), Some(max)) if max < write => {
                return Err(Error::Configuration(format!(
                    "max file size of {max} MiB is less than one write of {write} MiB"
                )))
            }
            (None, Some(_)) => {
                return Err(Error::Configuration(
                    "max file size needs a write rate".into(),
                ))
            }
            _ => (),
        }

        if self.write.is_some() {
            check_rw_directory(&self.scratch_dir)?;
        }

        if self.poll_interval.is_zero() {
            return Err(Error::Configuration("poll interval must not be zero".into()));
        }

        Ok(())
    }
}

/// Checks that the directory exists and that it is readable and writeable.
fn check_rw_directory(path: &Path) -> Result<(), Error> {
    if !path.is_dir() {
        Err(Error::Configuration(format!(
            "{} is not a directory",
            path.display()
        )))
    } else if !is_rw(path) {
        Err(Error::Configuration(format!(
            "{} is not read and/or writeable",
            path.display()
        )))
    } else {
        Ok(())
    }
}

/// Return true if path is read and writeable.
fn is_rw(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(stat) => {
            let same_uid = stat.uid() == unistd::getuid().as_raw();
            let same_gid = stat.gid() == unistd::getgid().as_raw();
            let mode = stat::Mode::from_bits_truncate(stat.permissions().mode());

            let is_readable = (same_uid && mode.contains(stat::Mode::S_IRUSR))
                || (same_gid && mode.contains(stat::Mode::S_IRGRP))
                || mode.contains(stat::Mode::S_IROTH);
            let is_writable = (same_uid && mode.contains(stat::Mode::S_IWUSR))
                || (same_gid && mode.contains(stat::Mode::S_IWGRP))
                || mode.contains(stat::Mode::S_IWOTH);

            is_readable && is_writable
        }
        Err(_) => false,
    }
}
