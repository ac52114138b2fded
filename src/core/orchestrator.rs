use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use nix::unistd::{AccessFlags, access};
use tracing::{error, info};

use crate::adapters;
use crate::context::AppContext;
use crate::core::counter;
use crate::core::hardware::HardwareAdapter;
use crate::core::models::{DestinationTarget, ReplicationPlan, RunSummary};
use crate::core::replicator::Replicator;

/// Discovers target devices and mirrors the source onto all of them at once.
pub struct Orchestrator {
    ctx: AppContext,
    adapter: Box<dyn HardwareAdapter>,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        let adapter = adapters::get_adapter(&ctx.config);
        Self::with_adapter(ctx, adapter)
    }

    pub fn with_adapter(ctx: AppContext, adapter: Box<dyn HardwareAdapter>) -> Self {
        Self { ctx, adapter }
    }

    /// Run one replication pass.
    ///
    /// Errors returned here are process-level: the source is unusable or the
    /// mount table could not be read. Failures of individual targets or
    /// entries are logged and reflected in the returned summary only.
    pub async fn run(&self) -> Result<RunSummary> {
        let config = &self.ctx.config;

        let source_mode = validate_source(&config.source)?;

        let devices = self
            .adapter
            .list_devices(&config.filesystem)
            .context("Failed to discover devices")?;

        let total_entries = counter::scan_source(&config.source)
            .await
            .context("Failed to count source entries")?;

        info!(source = %config.source.display(), "Source directory");
        info!(total_entries, "Source entry count");
        info!(destination_name = %config.destination_name, "Destination directory name");
        info!(
            filesystem = %config.filesystem,
            devices = devices.len(),
            "Eligible devices mounted"
        );

        let plan = Arc::new(ReplicationPlan {
            source: config.source.clone(),
            destination_name: config.destination_name.clone(),
            source_mode,
            total_entries,
        });
        let replicator = Arc::new(Replicator {
            sync_files: config.sync_files,
            preserve_timestamps: config.preserve_timestamps,
        });

        let mut handles = Vec::with_capacity(devices.len());
        for (index, mount) in devices.into_iter().enumerate() {
            let target = DestinationTarget::new(index, mount, Arc::clone(&plan));
            let mut sink = self.ctx.progress.sink(target.label(), total_entries);
            let replicator = Arc::clone(&replicator);

            handles.push(tokio::task::spawn_blocking(move || {
                let result = replicator.run(&target, sink.as_mut());
                (target, result)
            }));
        }

        let mut summary = RunSummary {
            targets: handles.len(),
            ..Default::default()
        };

        for handle in handles {
            match handle.await {
                Ok((_, Ok(report))) => {
                    summary.targets_completed += 1;
                    summary.entries_failed += report.entries_failed;
                    info!(
                        index = report.index,
                        destination = %report.destination.display(),
                        entries_copied = report.entries_copied,
                        entries_failed = report.entries_failed,
                        duration_secs = report.duration.as_secs(),
                        "Device replicated"
                    );
                }
                Ok((target, Err(e))) => {
                    summary.targets_failed += 1;
                    error!(
                        index = target.index,
                        device = %target.mount.device,
                        mount_point = %target.mount.mount_point.display(),
                        error = %e,
                        "Replication aborted for device"
                    );
                }
                Err(e) => {
                    summary.targets_failed += 1;
                    error!(error = %e, "Replication task failed");
                }
            }
        }

        info!(
            targets = summary.targets,
            completed = summary.targets_completed,
            failed = summary.targets_failed,
            entries_failed = summary.entries_failed,
            "All replications finished"
        );

        Ok(summary)
    }
}

/// Check that the source is a readable directory and return its permission bits.
fn validate_source(source: &Path) -> Result<u32> {
    let metadata = std::fs::metadata(source)
        .with_context(|| format!("Source {} is not accessible", source.display()))?;

    if !metadata.is_dir() {
        bail!("Source {} is not a directory", source.display());
    }

    access(source, AccessFlags::R_OK | AccessFlags::X_OK)
        .with_context(|| format!("Source {} is not readable", source.display()))?;

    Ok(metadata.permissions().mode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_validate_source_directory() {
        let temp = tempdir().unwrap();
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o750)).unwrap();
        let mode = validate_source(temp.path()).unwrap();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn test_validate_source_missing() {
        let temp = tempdir().unwrap();
        let err = validate_source(&temp.path().join("missing")).unwrap_err();
        assert!(err.to_string().contains("not accessible"));
    }

    #[test]
    fn test_validate_source_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, b"x").unwrap();
        let err = validate_source(&file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
