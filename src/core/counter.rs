use std::path::Path;

use anyhow::Result;
use tracing::debug;

use super::walk::Walk;

/// Count every entry (files and directories) beneath `root`, excluding the
/// root itself. Entries that cannot be stat'ed are skipped, so the result is
/// a size hint rather than an exact figure.
pub fn count_entries(root: &Path) -> u64 {
    let mut count = 0;

    for entry in Walk::new(root) {
        if entry.depth == 0 {
            continue;
        }
        if entry.metadata.is_none() {
            if let Some(e) = &entry.error {
                debug!(path = %entry.path.display(), error = %e, "Skipping entry while counting");
            }
            continue;
        }
        count += 1;
    }

    count
}

/// Run [`count_entries`] on the blocking pool.
pub async fn scan_source(root: &Path) -> Result<u64> {
    let root = root.to_path_buf();
    Ok(tokio::task::spawn_blocking(move || count_entries(&root)).await?)
}
