use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::hardware::{HardwareAdapter, MountRecord, MountTable};

/// Default location of the live mount table.
pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Discovers devices from a mount table file.
pub struct LinuxAdapter {
    mount_table: PathBuf,
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new(PROC_MOUNTS)
    }
}

impl LinuxAdapter {
    pub fn new(mount_table: impl Into<PathBuf>) -> Self {
        Self {
            mount_table: mount_table.into(),
        }
    }
}

impl HardwareAdapter for LinuxAdapter {
    fn mounts(&self) -> Result<Vec<MountRecord>> {
        let table = MountTable::open(&self.mount_table).with_context(|| {
            format!("Failed to open mount table {}", self.mount_table.display())
        })?;

        let records = table
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("Failed to read mount table {}", self.mount_table.display()))?;

        debug!(
            mount_table = %self.mount_table.display(),
            mounts = records.len(),
            "Read mount table"
        );
        Ok(records)
    }
}
