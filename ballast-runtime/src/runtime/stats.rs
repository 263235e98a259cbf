use anyhow::{anyhow, Context, Result};
use std::fs;

/// Bytes per MiB. All sizes are configured and reported in whole MiB.
pub const MIB: u64 = 1024 * 1024;

// Usually the page size is set to 4kB by default
const PAGE_SIZE: u64 = 4096;

/// Resident set size of the own process in bytes.
///
/// Parsed from `/proc/self/statm`. The count includes mapped shared
/// libraries, so even a freshly started process reports a couple of MiB.
pub fn resident() -> Result<u64> {
    let statm =
        fs::read_to_string("/proc/self/statm").context("failed to read /proc/self/statm")?;
    resident_pages(&statm).map(|pages| pages * PAGE_SIZE)
}

/// Physical memory of the host in bytes.
pub fn total_memory() -> Result<u64> {
    let meminfo =
        fs::read_to_string("/proc/meminfo").context("failed to read /proc/meminfo")?;
    mem_total(&meminfo)
}

/// Parse the second field of statm: resident pages.
fn resident_pages(statm: &str) -> Result<u64> {
    statm
        .split_whitespace()
        .nth(1)
        .and_then(|pages| pages.parse::<u64>().ok())
        .ok_or_else(|| anyhow!("invalid statm content: {statm}"))
}

/// Parse the MemTotal line of meminfo. The value is given in kB.
fn mem_total(meminfo: &str) -> Result<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|line| line.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .ok_or_else(|| anyhow!("missing MemTotal in meminfo"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test {
    use super::*;

    #[test]
    fn statm_resident_field() {
        assert_eq!(resident_pages("2421 1466 1073 13 0 383 0\n").unwrap(), 1466);
    }

    #[test]
    fn statm_garbage() {
        assert!(resident_pages("").is_err());
        assert!(resident_pages("2421").is_err());
        assert!(resident_pages("2421 fourteen 0").is_err());
    }

    #[test]
    fn meminfo_mem_total() {
        let meminfo = "MemTotal:       16107060 kB\n\
                       MemFree:         8024224 kB\n\
                       MemAvailable:   11075468 kB\n";
        assert_eq!(mem_total(meminfo).unwrap(), 16107060 * 1024);
    }

    #[test]
    fn meminfo_without_mem_total() {
        assert!(mem_total("MemFree: 8024224 kB\n").is_err());
    }

    #[test]
    fn resident_of_self() {
        assert!(resident().unwrap() > 0);
    }

    #[test]
    fn total_memory_of_host() {
        assert!(total_memory().unwrap() > 0);
    }
}
