use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::hardware::MountRecord;

/// Read-only inputs shared by every replication of one run.
#[derive(Debug, Clone)]
pub struct ReplicationPlan {
    pub source: PathBuf,
    /// Single path segment joined under each mount point.
    pub destination_name: String,
    /// Permission bits of the source root, applied to each destination root.
    pub source_mode: u32,
    /// Best-effort entry count used to size progress.
    pub total_entries: u64,
}

/// One device to replicate onto. Owned by exactly one replication task.
#[derive(Debug, Clone)]
pub struct DestinationTarget {
    pub index: usize,
    pub mount: MountRecord,
    pub plan: Arc<ReplicationPlan>,
}

impl DestinationTarget {
    pub fn new(index: usize, mount: MountRecord, plan: Arc<ReplicationPlan>) -> Self {
        Self { index, mount, plan }
    }

    /// `{mount point}/{destination name}`
    pub fn destination(&self) -> PathBuf {
        self.mount.mount_point.join(&self.plan.destination_name)
    }

    pub fn source(&self) -> &Path {
        &self.plan.source
    }

    /// Label shown next to this target's progress.
    pub fn label(&self) -> String {
        format!("{}:{}", self.index, self.destination().display())
    }
}

/// Outcome of a replication that got past its guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationReport {
    pub index: usize,
    pub destination: PathBuf,
    pub entries_copied: u64,
    pub entries_failed: u64,
    pub duration: Duration,
}

/// Outcome of a whole run, across all targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub targets: usize,
    pub targets_completed: usize,
    pub targets_failed: usize,
    pub entries_failed: u64,
}
