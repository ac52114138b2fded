//! End-to-end replication through the orchestrator, using temporary
//! directories as mount points and a synthesized mount table.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fatmirror::config::AppConfig;
use fatmirror::context::AppContext;
use fatmirror::core::{
    DestinationTarget, MountRecord, Orchestrator, ProgressMode, ProgressSink, ReplicationPlan,
    Replicator, count_entries,
};
use nix::unistd::Uid;
use tempfile::{TempDir, tempdir};

struct Fixture {
    _temp: TempDir,
    source: PathBuf,
    mounts: Vec<PathBuf>,
    mount_table: PathBuf,
}

/// Source tree plus `devices` vfat mount points and one ext4 decoy.
fn fixture(devices: usize) -> Fixture {
    let temp = tempdir().unwrap();
    let source = temp.path().join("src");

    fs::create_dir_all(source.join("sub/deeper")).unwrap();
    fs::create_dir(source.join("empty")).unwrap();
    fs::write(source.join("a.txt"), b"hello").unwrap();
    fs::write(source.join("sub/b.txt"), b"world").unwrap();
    fs::write(source.join("sub/deeper/run.sh"), b"#!/bin/sh\necho hi\n").unwrap();
    fs::write(source.join("big.bin"), vec![7u8; 300 * 1024]).unwrap();
    set_mode(&source.join("a.txt"), 0o644);
    set_mode(&source.join("sub/b.txt"), 0o600);
    set_mode(&source.join("sub/deeper/run.sh"), 0o755);

    let mut table = String::from("/dev/sda1 / ext4 rw,relatime 0 0\n");
    let mut mounts = Vec::new();
    for i in 0..devices {
        let mount = temp.path().join(format!("usb{}", i));
        fs::create_dir(&mount).unwrap();
        table.push_str(&format!("/dev/sd{}1 {} vfat rw 0 0\n", (b'b' + i as u8) as char, mount.display()));
        mounts.push(mount);
    }
    let decoy = temp.path().join("decoy");
    fs::create_dir(&decoy).unwrap();
    table.push_str(&format!("/dev/sdz1 {} ext4 rw 0 0\n", decoy.display()));

    let mount_table = temp.path().join("mounts");
    fs::write(&mount_table, table).unwrap();

    Fixture {
        _temp: temp,
        source,
        mounts,
        mount_table,
    }
}

fn set_mode(path: &Path, mode: u32) {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

fn config(f: &Fixture) -> AppConfig {
    AppConfig {
        source: f.source.clone(),
        destination_name: "backup".to_string(),
        mount_table: f.mount_table.clone(),
        progress: ProgressMode::None,
        ..Default::default()
    }
}

/// Relative path, kind, permission bits and content of every entry.
fn snapshot(root: &Path) -> Vec<(PathBuf, bool, u32, Vec<u8>)> {
    let mut out = Vec::new();
    collect(root, root, &mut out);
    out.sort();
    out
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(PathBuf, bool, u32, Vec<u8>)>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let meta = fs::metadata(&path).unwrap();
        let relative = path.strip_prefix(root).unwrap().to_path_buf();
        if meta.is_dir() {
            out.push((relative, true, 0, Vec::new()));
            collect(root, &path, out);
        } else {
            let mode = meta.permissions().mode() & 0o777;
            out.push((relative, false, mode, fs::read(&path).unwrap()));
        }
    }
}

#[derive(Default)]
struct CountingSink {
    advanced: u64,
    finished: bool,
}

impl ProgressSink for CountingSink {
    fn advance(&mut self, n: u64) {
        self.advanced += n;
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

#[tokio::test]
async fn test_replicates_to_every_vfat_device() {
    let f = fixture(3);
    let summary = Orchestrator::new(AppContext::new(config(&f)))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.targets, 3);
    assert_eq!(summary.targets_completed, 3);
    assert_eq!(summary.targets_failed, 0);
    assert_eq!(summary.entries_failed, 0);

    let expected = snapshot(&f.source);
    for mount in &f.mounts {
        assert_eq!(snapshot(&mount.join("backup")), expected);
    }

    let decoy = f.mount_table.parent().unwrap().join("decoy");
    assert!(!decoy.join("backup").exists());
}

#[tokio::test]
async fn test_example_layout() {
    let f = fixture(1);
    Orchestrator::new(AppContext::new(config(&f)))
        .run()
        .await
        .unwrap();

    let dest = f.mounts[0].join("backup");
    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "world");
    let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode(&dest.join("a.txt")), 0o644);
    assert_eq!(mode(&dest.join("sub/b.txt")), 0o600);
    assert_eq!(mode(&dest.join("sub/deeper/run.sh")), 0o755);
    assert!(dest.join("empty").is_dir());
}

#[tokio::test]
async fn test_targets_never_cross() {
    let f = fixture(2);
    fs::write(f.mounts[0].join("only-on-usb0.txt"), b"0").unwrap();
    fs::write(f.mounts[1].join("only-on-usb1.txt"), b"1").unwrap();

    Orchestrator::new(AppContext::new(config(&f)))
        .run()
        .await
        .unwrap();

    for (i, mount) in f.mounts.iter().enumerate() {
        let backup = snapshot(&mount.join("backup"));
        assert!(backup.iter().all(|(p, ..)| !p.to_string_lossy().contains("only-on")));

        let names: Vec<_> = fs::read_dir(mount)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(names.contains(&format!("only-on-usb{}.txt", i)));
        assert!(!names.contains(&format!("only-on-usb{}.txt", 1 - i)));
    }
}

#[tokio::test]
async fn test_running_twice_matches_running_once() {
    let f = fixture(1);
    let dest = f.mounts[0].join("backup");

    Orchestrator::new(AppContext::new(config(&f)))
        .run()
        .await
        .unwrap();
    let first = snapshot(&dest);

    fs::write(dest.join("leftover.txt"), b"stale").unwrap();

    Orchestrator::new(AppContext::new(config(&f)))
        .run()
        .await
        .unwrap();
    let second = snapshot(&dest);

    assert_eq!(first, second);
    assert!(!dest.join("leftover.txt").exists());
}

#[tokio::test]
async fn test_zero_devices_is_a_noop() {
    let f = fixture(0);
    let summary = Orchestrator::new(AppContext::new(config(&f)))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.targets, 0);
    assert_eq!(summary.targets_completed, 0);
}

#[tokio::test]
async fn test_missing_source_is_fatal() {
    let f = fixture(1);
    let mut cfg = config(&f);
    cfg.source = f.source.join("does-not-exist");

    let result = Orchestrator::new(AppContext::new(cfg)).run().await;
    assert!(result.is_err());
    assert!(!f.mounts[0].join("backup").exists());
}

#[tokio::test]
async fn test_missing_mount_table_is_fatal() {
    let f = fixture(1);
    let mut cfg = config(&f);
    cfg.mount_table = f.mount_table.with_file_name("no-mounts-here");

    let err = Orchestrator::new(AppContext::new(cfg))
        .run()
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("mount table"));
}

#[tokio::test]
async fn test_simulated_mounts_bypass_mount_table() {
    let f = fixture(0);
    let temp = tempdir().unwrap();
    let mut cfg = config(&f);
    cfg.mount_table = PathBuf::from("/nonexistent/mounts");
    cfg.simulated_mounts = vec![temp.path().join("a"), temp.path().join("b")];
    for m in &cfg.simulated_mounts {
        fs::create_dir(m).unwrap();
    }

    let summary = Orchestrator::new(AppContext::new(cfg.clone()))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.targets_completed, 2);
    for m in &cfg.simulated_mounts {
        assert_eq!(fs::read_to_string(m.join("backup/a.txt")).unwrap(), "hello");
    }
}

#[tokio::test]
async fn test_one_bad_device_does_not_stop_the_others() {
    let f = fixture(2);
    // Turn the first mount point into a file so its root cannot be created.
    fs::remove_dir(&f.mounts[0]).unwrap();
    fs::write(&f.mounts[0], b"not a directory").unwrap();

    let summary = Orchestrator::new(AppContext::new(config(&f)))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.targets, 2);
    assert_eq!(summary.targets_failed, 1);
    assert_eq!(summary.targets_completed, 1);
    assert_eq!(snapshot(&f.mounts[1].join("backup")), snapshot(&f.source));
}

#[test]
fn test_unreadable_file_is_skipped() {
    // Root ignores permission bits.
    if Uid::effective().is_root() {
        eprintln!("skipping: running as root");
        return;
    }

    let f = fixture(1);
    let locked = f.source.join("sub/locked.txt");
    fs::write(&locked, b"secret").unwrap();
    set_mode(&locked, 0o000);

    let total = count_entries(&f.source);
    let target = DestinationTarget::new(
        0,
        MountRecord {
            device: "/dev/sdb1".to_string(),
            mount_point: f.mounts[0].clone(),
            fs_type: "vfat".to_string(),
            options: "rw".to_string(),
        },
        Arc::new(ReplicationPlan {
            source: f.source.clone(),
            destination_name: "backup".to_string(),
            source_mode: 0o755,
            total_entries: total,
        }),
    );

    let mut sink = CountingSink::default();
    let report = Replicator::default().run(&target, &mut sink).unwrap();
    set_mode(&locked, 0o644);

    assert_eq!(report.entries_failed, 1);
    assert_eq!(report.entries_copied, total - 1);
    assert_eq!(sink.advanced, total);
    assert!(sink.finished);

    let dest = f.mounts[0].join("backup");
    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "world");
    assert!(dest.join("sub/deeper/run.sh").exists());
}

#[tokio::test]
async fn test_partial_purge_still_replicates() {
    // Root can delete from read-only directories.
    if Uid::effective().is_root() {
        eprintln!("skipping: running as root");
        return;
    }

    let f = fixture(1);
    let dest = f.mounts[0].join("backup");
    let locked = dest.join("locked");
    fs::create_dir_all(&locked).unwrap();
    fs::write(locked.join("stale.txt"), b"stale").unwrap();
    set_mode(&locked, 0o555);

    let result = Orchestrator::new(AppContext::new(config(&f))).run().await;
    set_mode(&locked, 0o755);

    let summary = result.unwrap();
    assert_eq!(summary.targets_completed, 1);
    assert_eq!(summary.entries_failed, 0);
    assert_eq!(fs::read_to_string(dest.join("a.txt")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(dest.join("sub/b.txt")).unwrap(), "world");
    assert!(dest.join("sub/deeper/run.sh").exists());
    assert!(locked.join("stale.txt").exists());
}
