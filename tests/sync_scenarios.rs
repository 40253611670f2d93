use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use filetime::{set_file_mtime, FileTime};
use std::path::Path;

use mpsync::log::{TransferLog, TransferStatus};
use mpsync::logger::NoopLogger;
use mpsync::memory::{Call, MemoryDevice};
use mpsync::options::SyncConfig;
use mpsync::sync::{decide, sync_with, to_device_epoch, Action, SyncReport, Synchronizer};

/// Host-epoch mtime given to local files
fn t_local() -> i64 {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap().timestamp()
}

/// Host time pushed to the device clock during a run
fn sync_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap()
}

fn write_file(root: &Path, rel: &str, mtime: i64) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, rel.as_bytes())?;
    set_file_mtime(&path, FileTime::from_unix_time(mtime, 0))?;
    Ok(())
}

fn run(dev: &mut MemoryDevice, config: &SyncConfig) -> Result<SyncReport> {
    let logger = NoopLogger;
    let synchronizer = Synchronizer::new(config, &logger).with_time(sync_time());
    sync_with(dev, &synchronizer)
}

fn mkdirs(dev: &MemoryDevice) -> Vec<String> {
    dev.calls()
        .iter()
        .filter_map(|c| match c {
            Call::MakeDirectory(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn empty_device_gets_everything_and_subdir_once() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", t_local())?;
    write_file(src.path(), "sub/b.txt", t_local())?;

    let mut dev = MemoryDevice::new();
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(mkdirs(&dev), vec!["/sub"]);
    assert_eq!(dev.file_data("/a.txt"), Some(&b"a.txt"[..]));
    assert_eq!(dev.file_data("/sub/b.txt"), Some(&b"sub/b.txt"[..]));
    assert_eq!(report.dirs_created, vec!["/sub"]);
    Ok(())
}

#[test]
fn second_run_uploads_nothing() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "main.py", t_local())?;
    write_file(src.path(), "lib/util.py", t_local())?;
    write_file(src.path(), "lib/deep/x.py", t_local())?;

    let mut dev = MemoryDevice::new();
    let config = SyncConfig::new("mem", src.path());
    assert_eq!(run(&mut dev, &config)?.uploaded, 3);

    dev.clear_calls();
    let second = run(&mut dev, &config)?;
    assert_eq!(second.uploaded, 0);
    assert_eq!(second.skipped, 3);
    assert!(second.nothing_to_do());
    assert!(mkdirs(&dev).is_empty());
    assert_eq!(dev.count(|c| matches!(c, Call::PutFile(_))), 0);
    Ok(())
}

#[test]
fn older_remote_copy_is_updated() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.add_file("/a.txt", b"old", to_device_epoch(t_local()) - 10);
    let config = SyncConfig {
        sync_clock: false,
        ..SyncConfig::new("mem", src.path())
    };
    let report = run(&mut dev, &config)?;

    assert_eq!(report.uploaded, 1);
    assert_eq!(dev.file_data("/a.txt"), Some(&b"a.txt"[..]));
    Ok(())
}

#[test]
fn equal_timestamp_is_up_to_date() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.add_file("/a.txt", b"same", to_device_epoch(t_local()));
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(report.uploaded, 0);
    assert_eq!(report.skipped, 1);
    assert!(report.nothing_to_do());
    assert_eq!(dev.file_data("/a.txt"), Some(&b"same"[..]));
    Ok(())
}

#[test]
fn newer_remote_copy_is_left_alone() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.txt", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.add_file("/a.txt", b"newer", to_device_epoch(t_local()) + 60);
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;
    assert_eq!(report.uploaded, 0);
    Ok(())
}

#[test]
fn decision_matches_rule_for_all_offsets() {
    let local = to_device_epoch(t_local());
    for delta in -3i64..=3 {
        let remote = local + delta;
        let action = decide(local, Some(remote));
        assert_eq!(action.is_upload(), local > remote, "delta {}", delta);
    }
    assert_eq!(decide(local, None), Action::UploadNew);
}

#[test]
fn shared_ancestors_created_once() -> Result<()> {
    let src = tempfile::tempdir()?;
    for rel in ["pkg/a.py", "pkg/b.py", "pkg/sub/c.py", "pkg/sub/d.py", "other/e.py"] {
        write_file(src.path(), rel, t_local())?;
    }

    let mut dev = MemoryDevice::new();
    dev.add_dir("/other");
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(report.uploaded, 5);
    assert_eq!(mkdirs(&dev), vec!["/pkg", "/pkg/sub"]);
    assert!(report.folders.is_superset(&report.indexed_folders));
    assert!(report.folders.contains("/pkg/sub"));
    assert!(report.indexed_folders.contains("/other"));
    Ok(())
}

#[test]
fn remote_root_prefixes_every_path() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "boot.py", t_local())?;
    write_file(src.path(), "lib/x.py", t_local())?;

    let mut dev = MemoryDevice::new();
    let config = SyncConfig {
        remote_root: "/app/".to_string(),
        ..SyncConfig::new("mem", src.path())
    };
    let report = run(&mut dev, &config)?;

    assert_eq!(report.uploaded, 2);
    assert_eq!(mkdirs(&dev), vec!["/app", "/app/lib"]);
    assert!(dev.file_data("/app/boot.py").is_some());
    assert!(dev.file_data("/app/lib/x.py").is_some());
    assert!(dev.file_data("/boot.py").is_none());
    Ok(())
}

#[test]
fn parent_entries_are_never_followed() -> Result<()> {
    let src = tempfile::tempdir()?;
    let mut dev = MemoryDevice::new();
    dev.add_file("/lib/a/b/c.py", b"", 1);
    run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    for call in dev.calls() {
        if let Call::ChangeDirectory(p) = call {
            assert!(!p.split('/').any(|seg| seg == ".."), "followed {}", p);
        }
    }
    assert_eq!(dev.cwd(), "/");
    Ok(())
}

#[test]
fn remote_only_files_survive() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "new.py", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.add_file("/keep.py", b"keep", 5);
    run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(dev.file_data("/keep.py"), Some(&b"keep"[..]));
    Ok(())
}

#[test]
fn one_failed_upload_does_not_stop_the_batch() -> Result<()> {
    let src = tempfile::tempdir()?;
    for rel in ["a.py", "b.py", "c.py"] {
        write_file(src.path(), rel, t_local())?;
    }

    let mut dev = MemoryDevice::new();
    dev.fail_put("/b.py");
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 1);
    assert!(dev.file_data("/a.py").is_some());
    assert!(dev.file_data("/c.py").is_some());
    Ok(())
}

#[test]
fn failed_directory_is_not_retried() -> Result<()> {
    let src = tempfile::tempdir()?;
    for rel in ["bad/a.py", "bad/b.py", "good/c.py"] {
        write_file(src.path(), rel, t_local())?;
    }

    let mut dev = MemoryDevice::new();
    dev.fail_mkdir("/bad");
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(mkdirs(&dev), vec!["/bad", "/good"]);
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.failed, 2);
    assert!(dev.file_data("/good/c.py").is_some());
    assert!(!report.folders.contains("/bad"));
    Ok(())
}

#[test]
fn dry_run_leaves_device_untouched() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "sub/a.py", t_local())?;
    write_file(src.path(), "b.py", t_local())?;

    let mut dev = MemoryDevice::new();
    let config = SyncConfig {
        dry_run: true,
        ..SyncConfig::new("mem", src.path())
    };
    let report = run(&mut dev, &config)?;

    assert_eq!(report.planned_uploads, 2);
    assert_eq!(report.uploaded, 0);
    assert!(mkdirs(&dev).is_empty());
    assert_eq!(dev.count(|c| matches!(c, Call::PutFile(_))), 0);
    Ok(())
}

#[test]
fn unreachable_device_aborts_before_indexing() {
    let src = tempfile::tempdir().unwrap();
    let mut dev = MemoryDevice::new();
    dev.refuse_open();

    let err = run(&mut dev, &SyncConfig::new("ser:/dev/ttyUSB9", src.path())).unwrap_err();
    assert!(err.to_string().contains("Unable to connect to MicroPython device at ser:/dev/ttyUSB9"));
    assert_eq!(dev.calls(), &[Call::Open]);
}

#[test]
fn session_closed_exactly_once() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.py", t_local())?;
    let mut dev = MemoryDevice::new();
    run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(dev.count(|c| matches!(c, Call::Close)), 1);
    assert!(matches!(dev.calls().last(), Some(Call::Close)));
    assert!(!dev.is_open());
    Ok(())
}

#[test]
fn clock_is_set_before_indexing_and_stamps_uploads() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.py", t_local())?;
    let mut dev = MemoryDevice::new();
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert!(report.clock_synced);
    assert!(matches!(&dev.calls()[1], Call::Execute(code) if code.contains("rtc.datetime((2024, 6, 1, 5, 8, 30, 0, 0))")));
    assert_eq!(dev.file_mtime("/a.py"), Some(to_device_epoch(sync_time().timestamp())));
    Ok(())
}

#[test]
fn clock_failure_is_not_fatal() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.py", t_local())?;
    let mut dev = MemoryDevice::new();
    dev.remove_rtc();
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert!(!report.clock_synced);
    assert_eq!(report.uploaded, 1);
    Ok(())
}

#[test]
fn unreadable_remote_entries_do_not_abort() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "lib/a.py", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.add_file("/lib/a.py", b"", to_device_epoch(t_local()));
    dev.add_file("/broken/z.py", b"", 1);
    dev.fail_stat("/lib/a.py");
    dev.fail_listing("/broken");
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    // Unknown mtime means the file is treated as new
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.index_stats.unreadable, 1);
    assert_eq!(report.index_stats.skipped_dirs, 1);
    assert_eq!(dev.cwd(), "/");
    Ok(())
}

#[test]
fn transfer_log_records_each_attempt() -> Result<()> {
    let src = tempfile::tempdir()?;
    let logs = tempfile::tempdir()?;
    write_file(src.path(), "a.py", t_local())?;
    write_file(src.path(), "b.py", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.add_file("/a.py", b"", 0);
    dev.fail_put("/b.py");
    let log_path = logs.path().join("transfers.jsonl");
    let config = SyncConfig {
        transfer_log: Some(log_path.clone()),
        ..SyncConfig::new("mem", src.path())
    };
    run(&mut dev, &config)?;

    let entries = TransferLog::new(&log_path).read_log()?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].destination, "/a.py");
    assert_eq!(entries[0].reason, "updated");
    assert_eq!(entries[0].status, TransferStatus::Completed);
    assert_eq!(entries[1].reason, "new");
    assert_eq!(entries[1].status, TransferStatus::Failed);
    Ok(())
}

#[test]
fn exclusions_apply_to_local_scan() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "main.py", t_local())?;
    write_file(src.path(), "README.md", t_local())?;
    write_file(src.path(), "__pycache__/main.pyc", t_local())?;

    let mut dev = MemoryDevice::new();
    let mut config = SyncConfig::new("mem", src.path());
    config.filter.exclude_files.push("*.md".into());
    config.filter.exclude_dirs.push("__pycache__".into());
    let report = run(&mut dev, &config)?;

    assert_eq!(report.uploaded, 1);
    assert!(dev.file_data("/main.py").is_some());
    assert!(mkdirs(&dev).is_empty());
    Ok(())
}

#[test]
fn directory_missing_from_index_is_reused() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a/b/c/x.py", t_local())?;
    write_file(src.path(), "a/b/y.py", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.add_dir("/a/b");
    // `/a/b` exists but the walk never sees it
    dev.fail_listing("/a");
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert!(!report.indexed_folders.contains("/a/b"));
    assert_eq!(mkdirs(&dev), vec!["/a/b", "/a/b/c"]);
    assert_eq!(report.uploaded, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.dirs_created, vec!["/a/b/c"]);
    assert!(dev.file_data("/a/b/c/x.py").is_some());
    assert!(dev.file_data("/a/b/y.py").is_some());
    Ok(())
}

#[test]
fn all_uploads_failing_uploads_nothing() -> Result<()> {
    let src = tempfile::tempdir()?;
    write_file(src.path(), "a.py", t_local())?;
    write_file(src.path(), "b.py", t_local())?;

    let mut dev = MemoryDevice::new();
    dev.fail_put("/a.py");
    dev.fail_put("/b.py");
    let report = run(&mut dev, &SyncConfig::new("mem", src.path()))?;

    assert_eq!(report.uploaded, 0);
    assert_eq!(report.failed, 2);
    assert!(report.nothing_to_do());
    Ok(())
}
