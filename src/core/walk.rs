//! Depth-first traversal of a directory tree.
//!
//! The walker only reports what it finds; what to do about a failed entry is
//! left to the consumer. Entries are visited in pre-order with siblings sorted
//! by name, the root first. Symlinks are reported but never followed.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

/// One visited path.
///
/// `metadata` is `None` when the entry could not be stat'ed. `error` is set
/// either alongside a missing `metadata`, or for a directory whose children
/// could not be listed.
#[derive(Debug)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub metadata: Option<Metadata>,
    pub error: Option<io::Error>,
    pub depth: usize,
}

impl WalkEntry {
    pub fn is_dir(&self) -> bool {
        self.metadata.as_ref().is_some_and(Metadata::is_dir)
    }
}

pub struct Walk {
    pending: Vec<(PathBuf, usize)>,
}

impl Walk {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            pending: vec![(root.as_ref().to_path_buf(), 0)],
        }
    }
}

impl Iterator for Walk {
    type Item = WalkEntry;

    fn next(&mut self) -> Option<WalkEntry> {
        let (path, depth) = self.pending.pop()?;

        let metadata = match path.symlink_metadata() {
            Ok(m) => m,
            Err(e) => {
                return Some(WalkEntry {
                    path,
                    metadata: None,
                    error: Some(e),
                    depth,
                });
            }
        };

        let mut error = None;
        if metadata.is_dir() {
            match read_children(&path) {
                Ok(children) => {
                    // Reverse so the smallest name is popped first.
                    self.pending
                        .extend(children.into_iter().rev().map(|c| (c, depth + 1)));
                }
                Err(e) => error = Some(e),
            }
        }

        Some(WalkEntry {
            path,
            metadata: Some(metadata),
            error,
            depth,
        })
    }
}

fn read_children(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut children = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    children.sort();
    Ok(children)
}
