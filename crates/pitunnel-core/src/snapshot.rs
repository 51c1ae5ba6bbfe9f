//! Point-in-time reads of the OS process table

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tracing::debug;

use crate::error::TunnelError;

/// One process as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    pub command_line: String,
}

impl ProcessEntry {
    pub fn new(pid: u32, command_line: impl Into<String>) -> Self {
        Self {
            pid,
            command_line: command_line.into(),
        }
    }
}

/// Source of process snapshots
///
/// The orchestrator only talks to the process table through this trait, so
/// tests can hand it a fixed list instead of the live system.
pub trait ProcessSource: Send + Sync {
    /// Read every running process with its command line, ordered by pid
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, TunnelError>;
}

/// Process source backed by the live OS process table
#[derive(Debug, Default)]
pub struct SystemProcessSource;

impl SystemProcessSource {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessSource for SystemProcessSource {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, TunnelError> {
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );

        let mut entries: Vec<ProcessEntry> = sys
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| {
                let argv: Vec<String> = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect();
                let command_line = if argv.is_empty() {
                    process.name().to_string_lossy().into_owned()
                } else {
                    argv.join(" ")
                };
                ProcessEntry::new(pid.as_u32(), command_line)
            })
            .collect();

        // Every live system has at least this process in it
        if entries.is_empty() {
            return Err(TunnelError::SnapshotUnavailable(
                "the process table could not be read on this platform".to_string(),
            ));
        }

        entries.sort_by_key(|entry| entry.pid);
        debug!("Process snapshot: {} entries", entries.len());

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_snapshot_contains_current_process() {
        let entries = SystemProcessSource::new().snapshot().unwrap();
        let own_pid = std::process::id();
        assert!(entries.iter().any(|entry| entry.pid == own_pid));
    }

    #[test]
    fn test_system_snapshot_is_sorted_by_pid() {
        let entries = SystemProcessSource::new().snapshot().unwrap();
        assert!(entries.windows(2).all(|pair| pair[0].pid < pair[1].pid));
    }
}
