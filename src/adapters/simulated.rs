use std::path::PathBuf;

use anyhow::Result;

use crate::core::hardware::{HardwareAdapter, MountRecord};

/// Treats a fixed list of directories as mounted devices of one filesystem
/// type. Lets the whole pipeline run without removable media attached.
pub struct SimulatedAdapter {
    mount_points: Vec<PathBuf>,
    fs_type: String,
}

impl SimulatedAdapter {
    pub fn new(mount_points: Vec<PathBuf>, fs_type: impl Into<String>) -> Self {
        Self {
            mount_points,
            fs_type: fs_type.into(),
        }
    }
}

impl HardwareAdapter for SimulatedAdapter {
    fn mounts(&self) -> Result<Vec<MountRecord>> {
        Ok(self
            .mount_points
            .iter()
            .enumerate()
            .map(|(i, mount_point)| MountRecord {
                device: format!("sim{}", i),
                mount_point: mount_point.clone(),
                fs_type: self.fs_type.clone(),
                options: "rw".to_string(),
            })
            .collect())
    }
}
