//! Mount table parsing and device selection.
//!
//! The live mount table (`/proc/mounts` on Linux) lists one mount per line:
//! `<device> <mount point> <fs type> <options> [dump] [pass]`. Only the first
//! four fields are consulted.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Result;

/// One parsed line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: String,
}

impl MountRecord {
    /// Parse a single mount table line. Returns `None` for lines with fewer
    /// than four whitespace-separated fields.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let device = fields.next()?;
        let mount_point = fields.next()?;
        let fs_type = fields.next()?;
        let options = fields.next()?;

        Some(Self {
            device: unescape_field(device),
            mount_point: PathBuf::from(unescape_field(mount_point)),
            fs_type: fs_type.to_string(),
            options: options.to_string(),
        })
    }
}

/// Decode the octal escapes the kernel uses for whitespace and backslashes
/// (`\040`, `\011`, `\012`, `\134`). Anything else is kept as-is.
fn unescape_field(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }

    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Lazy reader over a mount table. Malformed lines are skipped; read errors
/// are surfaced to the caller.
pub struct MountTable<R> {
    lines: io::Lines<R>,
}

impl MountTable<BufReader<File>> {
    /// Open a mount table file. Failing to open it is fatal for discovery.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> MountTable<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for MountTable<R> {
    type Item = io::Result<MountRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) => {
                    if let Some(record) = MountRecord::parse(&line) {
                        return Some(Ok(record));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Keep the records whose filesystem type equals `fs_type` exactly, in table
/// order. Duplicates are kept.
pub fn filter_by_filesystem<'a, I>(
    records: I,
    fs_type: &'a str,
) -> impl Iterator<Item = MountRecord> + 'a
where
    I: IntoIterator<Item = MountRecord>,
    I::IntoIter: 'a,
{
    records
        .into_iter()
        .filter(move |record| record.fs_type == fs_type)
}

/// Filesystem names accepted on the command line, with their aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedFilesystem {
    Vfat,
    Msdos,
    Exfat,
}

impl SupportedFilesystem {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vfat" | "fat" | "fat32" | "fat16" => Some(Self::Vfat),
            "msdos" | "fat12" => Some(Self::Msdos),
            "exfat" => Some(Self::Exfat),
            _ => None,
        }
    }

    /// The name the kernel reports in the mount table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vfat => "vfat",
            Self::Msdos => "msdos",
            Self::Exfat => "exfat",
        }
    }

    /// Map a user-supplied name to the mount table spelling. Unknown names
    /// pass through unchanged so any filesystem type can still be targeted.
    pub fn normalize(s: &str) -> String {
        match Self::from_str(s) {
            Some(fs) => fs.as_str().to_string(),
            None => s.trim().to_string(),
        }
    }
}

/// Source of mounted devices.
pub trait HardwareAdapter: Send + Sync {
    /// Every mount currently known to the adapter, in table order.
    fn mounts(&self) -> Result<Vec<MountRecord>>;

    /// Mounts whose filesystem type matches `fs_type`.
    fn list_devices(&self, fs_type: &str) -> Result<Vec<MountRecord>> {
        Ok(filter_by_filesystem(self.mounts()?, fs_type).collect())
    }
}
