use super::stats::MIB;
use anyhow::{Context, Result};
use log::{debug, info, trace};
use rand::RngCore;
use std::{path::Path, time::Duration};
use tokio::{
    fs::File,
    io::{AsyncSeekExt, AsyncWriteExt},
    select,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Sustains a fixed write rate against an anonymous scratch file.
///
/// The file is created with [`tempfile::tempfile_in`]: it never has a
/// visible name and the blocks are reclaimed by the OS as soon as the
/// process exits, no matter how it exits.
pub(super) struct DiskWriter {
    file: File,
    /// One tick worth of filler bytes.
    chunk: Vec<u8>,
    /// File size cap in bytes.
    max: Option<u64>,
    /// Bytes written since the last wrap around.
    written: u64,
    /// Bytes written over the writer lifetime.
    total: u64,
}

impl DiskWriter {
    /// Create the scratch file and the filler chunk of `rate_mib` MiB.
    pub(super) fn new(dir: &Path, rate_mib: u64, max_mib: Option<u64>) -> Result<DiskWriter> {
        let file = tempfile::tempfile_in(dir)
            .with_context(|| format!("failed to create a scratch file in {}", dir.display()))?;
        let mut chunk = vec![0u8; (rate_mib * MIB) as usize];
        rand::thread_rng().fill_bytes(&mut chunk);

        Ok(DiskWriter {
            file: File::from_std(file),
            chunk,
            max: max_mib.map(|mib| mib * MIB),
            written: 0,
            total: 0,
        })
    }

    /// Write one chunk per second until cancelled. A wrap around or a slow
    /// disk delays the next tick instead of bursting to catch up.
    pub(super) async fn run(mut self, token: CancellationToken) -> Result<()> {
        info!(
            "Writing {} MiB/s to a scratch file{}",
            self.chunk.len() as u64 / MIB,
            self.max
                .map(|max| format!(" capped at {} MiB", max / MIB))
                .unwrap_or_default()
        );

        let mut tick = time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => self.write().await?,
            }
        }

        debug!("Disk writer stopped after {} MiB", self.total / MIB);
        Ok(())
    }

    /// Write one chunk, wrapping around first if the cap would be exceeded.
    async fn write(&mut self) -> Result<()> {
        if let Some(max) = self.max {
            if self.written + self.chunk.len() as u64 > max {
                debug!("Wrapping the scratch file after {} MiB", self.written / MIB);
                self.file
                    .rewind()
                    .await
                    .context("failed to rewind the scratch file")?;
                self.written = 0;
            }
        }

        self.file
            .write_all(&self.chunk)
            .await
            .context("failed to write to the scratch file")?;
        self.file
            .flush()
            .await
            .context("failed to flush the scratch file")?;
        self.written += self.chunk.len() as u64;
        self.total += self.chunk.len() as u64;
        trace!(
            "Wrote {} MiB, {} MiB since the last wrap",
            self.chunk.len() as u64 / MIB,
            self.written / MIB
        );
        Ok(())
    }
}
