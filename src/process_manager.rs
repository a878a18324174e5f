//! Registry of live script processes.
//!
//! Runs are fire-and-forget, so the registry is what lets the shell reap
//! children that are still running when it shuts down. Entries are added at
//! spawn and removed by the waiter thread when the child exits.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::process::Command;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::protocol::RequestId;

/// Global singleton registry
pub static PROCESS_MANAGER: LazyLock<ProcessManager> = LazyLock::new(ProcessManager::new);

/// Information about a tracked child process
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub request_id: RequestId,
    pub run_type: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Thread-safe registry of active script processes
#[derive(Debug, Default)]
pub struct ProcessManager {
    active: RwLock<HashMap<u32, ProcessInfo>>,
}

impl ProcessManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Track a newly spawned child
    pub fn register(&self, pid: u32, request_id: RequestId, run_type: Option<&str>) {
        debug!(pid, request_id = %request_id, run_type = run_type.unwrap_or("-"), "Registering process");
        self.active.write().insert(
            pid,
            ProcessInfo {
                pid,
                request_id,
                run_type: run_type.map(str::to_string),
                started_at: Utc::now(),
            },
        );
    }

    /// Stop tracking a child that exited
    pub fn unregister(&self, pid: u32) {
        debug!(pid, "Unregistering process");
        self.active.write().remove(&pid);
    }

    /// Snapshot of currently tracked processes
    pub fn active(&self) -> Vec<ProcessInfo> {
        self.active.read().values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// Kill every tracked child. Used during shutdown.
    pub fn kill_all(&self) {
        let processes = self.active();
        if processes.is_empty() {
            return;
        }

        info!(count = processes.len(), "Killing active script process(es)");
        for process in &processes {
            kill_process_group(process.pid);
        }

        self.active.write().clear();
    }
}

/// Send SIGKILL to a child's process group.
///
/// Children are spawned with their own process group (pid == pgid), so this
/// takes down any grandchildren the script started too.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let negative_pgid = format!("-{}", pid);
    match Command::new("kill").args(["-9", &negative_pgid]).output() {
        Ok(output) => {
            if output.status.success() {
                info!(pid, "Killed process group");
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("No such process") {
                    debug!(pid, "Process already exited");
                } else {
                    warn!(pid, stderr = %stderr, "Failed to kill process group");
                }
            }
        }
        Err(e) => {
            warn!(pid, error = %e, "Failed to execute kill command");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) {
    warn!(pid, "Process kill not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister_process() {
        let manager = ProcessManager::new();
        let id = RequestId::new();

        manager.register(12345, id, Some("backup"));

        let active = manager.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pid, 12345);
        assert_eq!(active[0].request_id, id);
        assert_eq!(active[0].run_type.as_deref(), Some("backup"));

        manager.unregister(12345);
        assert!(manager.active().is_empty());
    }

    #[test]
    fn concurrent_runs_are_tracked_independently() {
        let manager = ProcessManager::new();

        manager.register(1001, RequestId::new(), Some("backup"));
        manager.register(1002, RequestId::new(), None);
        manager.register(1003, RequestId::new(), Some("restore"));
        assert_eq!(manager.active_count(), 3);

        manager.unregister(1002);
        assert_eq!(manager.active_count(), 2);

        let pids: Vec<u32> = manager.active().iter().map(|p| p.pid).collect();
        assert!(pids.contains(&1001));
        assert!(!pids.contains(&1002));
        assert!(pids.contains(&1003));
    }

    #[test]
    fn kill_all_clears_tracking() {
        let manager = ProcessManager::new();

        // Fake pids; kill fails gracefully for them
        manager.register(99991, RequestId::new(), None);
        manager.register(99992, RequestId::new(), Some("restore"));
        assert_eq!(manager.active_count(), 2);

        manager.kill_all();
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn unregistering_unknown_pid_is_a_no_op() {
        let manager = ProcessManager::new();
        manager.unregister(424242);
        assert_eq!(manager.active_count(), 0);
    }
}
