use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind};
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use super::models::{DestinationTarget, ReplicationReport};
use super::progress::{ProgressSink, ProgressState};
use super::walk::{Walk, WalkEntry};

/// Buffer size for file I/O operations (128KB for optimal throughput)
const BUFFER_SIZE: usize = 128 * 1024;

/// Only permission bits are carried over; file type bits are not.
const MODE_MASK: u32 = 0o7777;

/// Errors that end the replication of a single target. Sibling targets are
/// not affected.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("destination {0} is the same path as the source")]
    SamePath(PathBuf),

    #[error("destination {destination} lies inside source {source_dir}")]
    DestinationInsideSource {
        destination: PathBuf,
        source_dir: PathBuf,
    },

    #[error("source {source_dir} lies inside destination {destination}")]
    SourceInsideDestination {
        destination: PathBuf,
        source_dir: PathBuf,
    },

    #[error("failed to create destination root {path}: {source}")]
    CreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Mirrors the source tree onto one destination target.
///
/// The destination subtree is purged and rebuilt on every run. Failures on
/// individual entries are logged and skipped; only the path guards and the
/// creation of the destination root can end a replication early.
pub struct Replicator {
    /// Whether to fsync each file after writing (safer but slower)
    pub sync_files: bool,
    /// Whether to carry access/modification times over to copied files
    pub preserve_timestamps: bool,
}

impl Default for Replicator {
    fn default() -> Self {
        Self {
            sync_files: true,
            preserve_timestamps: true,
        }
    }
}

impl Replicator {
    /// Replicate onto `target`, reporting into `sink`. The sink is always
    /// finished, whatever the outcome.
    pub fn run(
        &self,
        target: &DestinationTarget,
        sink: &mut dyn ProgressSink,
    ) -> Result<ReplicationReport, ReplicationError> {
        let destination = target.destination();
        let span = info_span!(
            "replicate",
            index = target.index,
            device = %target.mount.device,
            destination = %destination.display()
        );
        let _enter = span.enter();

        let result = self.replicate(target, &destination, sink);
        sink.finish();
        result
    }

    fn replicate(
        &self,
        target: &DestinationTarget,
        destination: &Path,
        sink: &mut dyn ProgressSink,
    ) -> Result<ReplicationReport, ReplicationError> {
        let source = target.source();
        let start_time = Instant::now();

        check_paths(source, destination)?;

        purge(destination);

        let root_mode = target.plan.source_mode & MODE_MASK;
        create_dir(destination, root_mode).map_err(|source| ReplicationError::CreateRoot {
            path: destination.to_path_buf(),
            source,
        })?;
        let mut dir_modes = vec![(destination.to_path_buf(), root_mode)];

        info!("Starting replication");

        let mut state = ProgressState::new(target.plan.total_entries);
        let mut entries_copied: u64 = 0;
        let mut entries_failed: u64 = 0;

        for entry in Walk::new(source) {
            if entry.depth == 0 {
                // Root already created above; only a listing failure matters here.
                if let Some(e) = &entry.error {
                    warn!(path = %entry.path.display(), error = %e, "Failed to read source directory");
                    entries_failed += 1;
                }
                continue;
            }

            let path = entry.path.clone();
            match self.replicate_entry(source, destination, entry, &mut dir_modes) {
                Ok(()) => {
                    debug!(path = %path.display(), "Replicated entry");
                    entries_copied += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to replicate entry");
                    entries_failed += 1;
                }
            }

            state.processed += 1;
            sink.advance(1);
        }

        apply_dir_modes(&dir_modes);

        let duration = start_time.elapsed();
        info!(
            entries_copied,
            entries_failed,
            processed = state.processed,
            total = state.total,
            duration_ms = duration.as_millis() as u64,
            "Replication complete"
        );

        Ok(ReplicationReport {
            index: target.index,
            destination: destination.to_path_buf(),
            entries_copied,
            entries_failed,
            duration,
        })
    }

    fn replicate_entry(
        &self,
        source_root: &Path,
        destination_root: &Path,
        entry: WalkEntry,
        dir_modes: &mut Vec<(PathBuf, u32)>,
    ) -> io::Result<()> {
        let WalkEntry {
            path,
            metadata,
            error,
            ..
        } = entry;

        let Some(metadata) = metadata else {
            return Err(error.unwrap_or_else(|| {
                io::Error::new(ErrorKind::NotFound, "file info unavailable")
            }));
        };

        let relative = path.strip_prefix(source_root).map_err(|_| {
            io::Error::new(ErrorKind::InvalidInput, "entry is outside the source root")
        })?;
        let dest_path = destination_root.join(relative);
        let file_type = metadata.file_type();

        if file_type.is_dir() {
            let mode = metadata.permissions().mode() & MODE_MASK;
            create_dir(&dest_path, mode)?;
            dir_modes.push((dest_path, mode));
            // An unlistable directory is still mirrored, just empty.
            return match error {
                Some(e) => Err(e),
                None => Ok(()),
            };
        }

        if let Some(e) = error {
            return Err(e);
        }

        if file_type.is_file() {
            return self.copy_file(&path, &dest_path);
        }

        if file_type.is_symlink() {
            if fs::metadata(&path)?.is_file() {
                return self.copy_file(&path, &dest_path);
            }
            return Err(io::Error::new(
                ErrorKind::Unsupported,
                "symlink does not point to a regular file",
            ));
        }

        Err(io::Error::new(
            ErrorKind::Unsupported,
            format!("skipping special file ({})", special_kind(&file_type)),
        ))
    }

    /// Copy a single file's content and permission bits, then sync it.
    fn copy_file(&self, source: &Path, dest: &Path) -> io::Result<()> {
        let source_file = File::open(source)?;
        // Stat through the handle so a symlink reports its target's mode.
        let source_metadata = source_file.metadata()?;
        let mode = source_metadata.permissions().mode() & MODE_MASK;

        let dest_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(dest)?;

        let mut reader = BufReader::with_capacity(BUFFER_SIZE, source_file);
        let mut writer = BufWriter::with_capacity(BUFFER_SIZE, dest_file);
        io::copy(&mut reader, &mut writer)?;

        let dest_file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
        if self.sync_files {
            dest_file.sync_all()?;
        }

        // The umask may have trimmed the creation mode.
        fs::set_permissions(dest, fs::Permissions::from_mode(mode))?;

        if self.preserve_timestamps {
            let atime = filetime::FileTime::from_last_access_time(&source_metadata);
            let mtime = filetime::FileTime::from_last_modification_time(&source_metadata);
            if let Err(e) = filetime::set_file_handle_times(&dest_file, Some(atime), Some(mtime)) {
                debug!(dest = %dest.display(), error = %e, "Failed to preserve file timestamps");
            }
        }

        Ok(())
    }
}

/// Create a directory the owner can always write into; the real mode is
/// applied by [`apply_dir_modes`] once its children are in place.
fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(mode | 0o700)
        .create(path)
}

/// Set final directory modes, deepest first, so read-only directories do not
/// block their own children.
fn apply_dir_modes(dir_modes: &[(PathBuf, u32)]) {
    for (path, mode) in dir_modes.iter().rev() {
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(*mode)) {
            warn!(path = %path.display(), error = %e, "Failed to set directory mode");
        }
    }
}

fn special_kind(file_type: &fs::FileType) -> &'static str {
    if file_type.is_fifo() {
        "fifo"
    } else if file_type.is_socket() {
        "socket"
    } else if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else {
        "unknown type"
    }
}

/// Refuse destinations that would overwrite or destroy the source. Purely
/// lexical; nothing on disk is touched.
fn check_paths(source: &Path, destination: &Path) -> Result<(), ReplicationError> {
    let source_str = source.to_string_lossy();
    let destination_str = destination.to_string_lossy();

    if source_str.trim() == destination_str.trim() {
        return Err(ReplicationError::SamePath(destination.to_path_buf()));
    }
    if destination.starts_with(source) {
        return Err(ReplicationError::DestinationInsideSource {
            destination: destination.to_path_buf(),
            source_dir: source.to_path_buf(),
        });
    }
    if source.starts_with(destination) {
        return Err(ReplicationError::SourceInsideDestination {
            destination: destination.to_path_buf(),
            source_dir: source.to_path_buf(),
        });
    }
    Ok(())
}

/// Remove any previous copy. Failures are logged and replication carries on
/// over whatever is left.
fn purge(destination: &Path) {
    match fs::remove_dir_all(destination) {
        Ok(()) => debug!("Removed previous copy"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(error = %e, "Failed to remove previous copy"),
    }
}
