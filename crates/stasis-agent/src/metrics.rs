//! Per-process resource usage sampled from procfs.
//!
//! Reads `/proc/<pid>/stat` for CPU time and `/proc/<pid>/status` for
//! resident memory.

use std::path::Path;

use serde::{Deserialize, Serialize};
use stasis_common::error::{Result, StasisError};

/// Kernel ABI tick rate of the time fields in `/proc/<pid>/stat`.
const USER_HZ: u64 = 100;
const NANOS_PER_TICK: u64 = 1_000_000_000 / USER_HZ;

/// Resource usage of one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessUsage {
    /// User plus system CPU time in nanoseconds.
    pub cpu_ns: u64,
    /// Resident set size in bytes.
    pub memory_bytes: u64,
}

impl ProcessUsage {
    /// Adds another sample to this one.
    pub const fn accumulate(&mut self, other: Self) {
        self.cpu_ns = self.cpu_ns.saturating_add(other.cpu_ns);
        self.memory_bytes = self.memory_bytes.saturating_add(other.memory_bytes);
    }
}

/// Samples a host process.
///
/// # Errors
///
/// Returns an error if the process's procfs entries cannot be read.
pub fn read_proc_usage(pid: u32) -> Result<ProcessUsage> {
    read_proc_usage_at(Path::new("/proc"), pid)
}

/// Samples a process below an arbitrary procfs mount.
///
/// # Errors
///
/// Returns an error if the entries cannot be read or parsed.
pub fn read_proc_usage_at(proc_root: &Path, pid: u32) -> Result<ProcessUsage> {
    let dir = proc_root.join(pid.to_string());
    let stat_path = dir.join("stat");
    let stat = std::fs::read_to_string(&stat_path).map_err(|e| StasisError::Io {
        path: stat_path.clone(),
        source: e,
    })?;
    let ticks = parse_stat_cpu_ticks(&stat).ok_or_else(|| {
        StasisError::internal(format!("unparsable {}", stat_path.display()))
    })?;

    let status_path = dir.join("status");
    let status = std::fs::read_to_string(&status_path).map_err(|e| StasisError::Io {
        path: status_path,
        source: e,
    })?;
    // Kernel threads and zombies have no VmRSS line.
    let rss_kb = parse_status_rss_kb(&status).unwrap_or(0);

    Ok(ProcessUsage {
        cpu_ns: ticks.saturating_mul(NANOS_PER_TICK),
        memory_bytes: rss_kb.saturating_mul(1024),
    })
}

/// Extracts `utime + stime` (in clock ticks) from a `stat` line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so fields are counted from the last `)`.
#[must_use]
pub fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    // Field 3 (state) is the first after the name; utime is field 14.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime.saturating_add(stime))
}

/// Extracts the `VmRSS` value in kilobytes from a `status` file.
#[must_use]
pub fn parse_status_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|value| value.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}
