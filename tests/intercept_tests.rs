//! Integration tests for the interception pipeline
//!
//! Each test runs against a real temporary underlay directory and a real
//! verdict file, driving the hooks the way the protocol layer would.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mtdfs::config::{AuditConfig, PolicyConfig};
use mtdfs::{AuditMode, CallerContext, Guard, GuardConfig};
use nix::errno::Errno;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    underlay: PathBuf,
    logs: PathBuf,
    verdict: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let underlay = dir.path().join("underlay");
        let logs = dir.path().join("logs");
        fs::create_dir_all(&underlay).unwrap();
        fs::create_dir_all(&logs).unwrap();
        let verdict = logs.join("classifier.log");
        Self {
            _dir: dir,
            underlay,
            logs,
            verdict,
        }
    }

    fn config(&self) -> GuardConfig {
        GuardConfig {
            backing_root: self.underlay.clone(),
            audit: AuditConfig {
                dir: self.logs.clone(),
                mode: AuditMode::Rotating,
                ..AuditConfig::default()
            },
            policy: PolicyConfig {
                verdict_path: self.verdict.clone(),
                ..PolicyConfig::default()
            },
            ..GuardConfig::default()
        }
    }

    fn flag(&self, pids: &[u32]) {
        let body: String = pids.iter().map(|pid| format!("{}\n", pid)).collect();
        fs::write(&self.verdict, body).unwrap();
    }

    fn underlay_file(&self, name: &str) -> PathBuf {
        self.underlay.join(name)
    }
}

fn rows(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

#[test]
fn test_unlisted_process_write_goes_through() {
    let fx = Fixture::new();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let a = CallerContext::new(4242);

    let file = hooks.create(&a, Path::new("x.txt"), libc::O_RDWR, 0o644).unwrap();
    assert_eq!(hooks.write(&a, &file, 0, b"hello").unwrap(), 5);
    drop(file);

    assert_eq!(fs::read(fx.underlay_file("x.txt")).unwrap(), b"hello");

    let artifact = guard.audit().rotate().unwrap();
    let rows = rows(&artifact);
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("4242,-1.000000,create,txt,x.txt,"));
    assert!(rows[1].starts_with("4242,1.921928,write,txt,x.txt,"));
}

#[test]
fn test_flagged_process_write_is_silently_dropped() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("x.txt"), b"original").unwrap();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let a = CallerContext::new(666);

    let file = hooks.open(&a, Path::new("x.txt"), libc::O_RDWR).unwrap();
    fx.flag(&[666]);

    assert_eq!(hooks.write(&a, &file, 0, b"ENCRYPTED").unwrap(), 9);
    assert_eq!(fs::read(fx.underlay_file("x.txt")).unwrap(), b"original");

    let artifact = guard.audit().rotate().unwrap();
    let rows = rows(&artifact);
    assert_eq!(rows.len(), 1);
    let expected = format!("{:.6}", mtdfs::analysis::shannon_entropy(b"ENCRYPTED"));
    let fields: Vec<_> = rows[0].split(',').collect();
    assert_eq!(fields[0], "666");
    assert_eq!(fields[1], expected);
    assert_eq!(fields[2], "write");
}

#[test]
fn test_block_persists_after_verdict_cleared() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("keep.txt"), b"data").unwrap();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let a = CallerContext::new(77);

    fx.flag(&[77]);
    hooks.unlink(&a, Path::new("keep.txt")).unwrap();
    assert!(fx.underlay_file("keep.txt").exists());

    fx.flag(&[]);
    hooks.unlink(&a, Path::new("keep.txt")).unwrap();
    hooks
        .rename(&a, Path::new("keep.txt"), Path::new("keep.txt.locked"))
        .unwrap();
    assert!(fx.underlay_file("keep.txt").exists());
    assert!(!fx.underlay_file("keep.txt.locked").exists());
    assert!(hooks.policy().is_blocked(77));

    // An unrelated process is unaffected
    let b = CallerContext::new(78);
    hooks.unlink(&b, Path::new("keep.txt")).unwrap();
    assert!(!fx.underlay_file("keep.txt").exists());
}

#[test]
fn test_denied_read_returns_no_data() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("secret.doc"), b"payroll").unwrap();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();

    let ok = CallerContext::new(10);
    let bad = CallerContext::new(11);
    fx.flag(&[11]);

    let file = hooks.open(&ok, Path::new("secret.doc"), libc::O_RDONLY).unwrap();
    assert_eq!(hooks.read(&ok, &file, 0, 64).unwrap(), b"payroll");
    assert!(hooks.read(&bad, &file, 0, 64).unwrap().is_empty());
    // Tripwire is off by default
    assert!(fx.underlay_file("secret.doc").exists());
}

#[test]
fn test_tripwire_renames_file_on_malicious_read() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("bait.txt"), b"honeytoken").unwrap();
    let guard = Guard::new(GuardConfig {
        rename_on_malicious_read: true,
        ..fx.config()
    });
    let hooks = guard.interceptor();
    let bad = CallerContext::new(500);
    fx.flag(&[500]);

    let file = hooks.open(&bad, Path::new("bait.txt"), libc::O_RDONLY).unwrap();
    assert!(hooks.read(&bad, &file, 0, 16).unwrap().is_empty());

    assert!(!fx.underlay_file("bait.txt").exists());
    assert_eq!(fs::read(fx.underlay_file("_bait.txt")).unwrap(), b"honeytoken");
    assert_eq!(file.path(), PathBuf::from("_bait.txt"));
}

#[test]
fn test_tripwire_never_replaces_existing_file() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("a.txt"), b"bait").unwrap();
    fs::write(fx.underlay_file("_a.txt"), b"user file").unwrap();
    let guard = Guard::new(GuardConfig {
        rename_on_malicious_read: true,
        ..fx.config()
    });
    let hooks = guard.interceptor();
    let bad = CallerContext::new(501);
    fx.flag(&[501]);

    let file = hooks.open(&bad, Path::new("a.txt"), libc::O_RDONLY).unwrap();
    for _ in 0..2 {
        assert!(hooks.read(&bad, &file, 0, 16).unwrap().is_empty());
    }

    assert_eq!(fs::read(fx.underlay_file("a.txt")).unwrap(), b"bait");
    assert_eq!(fs::read(fx.underlay_file("_a.txt")).unwrap(), b"user file");
    assert!(!fx.underlay_file("__a.txt").exists());
    assert_eq!(file.path(), PathBuf::from("a.txt"));
}

#[test]
fn test_tripwire_fires_once_per_handle() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("a.txt"), b"bait").unwrap();
    let guard = Guard::new(GuardConfig {
        rename_on_malicious_read: true,
        ..fx.config()
    });
    let hooks = guard.interceptor();
    let bad = CallerContext::new(502);
    fx.flag(&[502]);

    let file = hooks.open(&bad, Path::new("a.txt"), libc::O_RDONLY).unwrap();
    for _ in 0..3 {
        assert!(hooks.read(&bad, &file, 0, 16).unwrap().is_empty());
    }

    let mut names: Vec<_> = fs::read_dir(&fx.underlay)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["_a.txt".to_string()]);
    assert_eq!(fs::read(fx.underlay_file("_a.txt")).unwrap(), b"bait");
}

#[test]
fn test_blocked_truncating_open_leaves_file_intact() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("doc.txt"), b"precious data").unwrap();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let bad = CallerContext::new(666);
    fx.flag(&[666]);

    let file = hooks
        .open(&bad, Path::new("doc.txt"), libc::O_WRONLY | libc::O_TRUNC)
        .unwrap();
    assert!(file.is_detached());
    assert_eq!(hooks.write(&bad, &file, 0, b"XXXX").unwrap(), 4);
    assert_eq!(fs::read(fx.underlay_file("doc.txt")).unwrap(), b"precious data");
    assert!(hooks.policy().is_blocked(666));

    let artifact = guard.audit().rotate().unwrap();
    let rows = rows(&artifact);
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("666,-1.000000,write,txt,doc.txt,"));
}

#[test]
fn test_blocked_creating_open_leaves_no_file() {
    let fx = Fixture::new();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let bad = CallerContext::new(667);
    fx.flag(&[667]);

    let file = hooks
        .open(&bad, Path::new("note.txt"), libc::O_WRONLY | libc::O_CREAT)
        .unwrap();
    assert!(file.is_detached());
    assert!(!fx.underlay_file("note.txt").exists());
}

#[test]
fn test_allowed_truncating_open_truncates() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("log.txt"), b"old contents").unwrap();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let a = CallerContext::new(12);

    let file = hooks
        .open(&a, Path::new("log.txt"), libc::O_WRONLY | libc::O_TRUNC)
        .unwrap();
    assert!(!file.is_detached());
    assert!(fs::read(fx.underlay_file("log.txt")).unwrap().is_empty());

    let artifact = guard.audit().rotate().unwrap();
    assert_eq!(rows(&artifact).len(), 1);
}

#[test]
fn test_denied_create_leaves_no_file() {
    let fx = Fixture::new();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let bad = CallerContext::new(9);
    fx.flag(&[9]);

    let file = hooks
        .create(&bad, Path::new("ransom_note.txt"), libc::O_WRONLY, 0o644)
        .unwrap();
    assert!(file.is_detached());
    assert_eq!(hooks.write(&bad, &file, 0, b"pay up").unwrap(), 6);
    assert!(!fx.underlay_file("ransom_note.txt").exists());
}

#[test]
fn test_allowed_errors_propagate_unchanged() {
    let fx = Fixture::new();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let a = CallerContext::new(1);

    assert_eq!(
        hooks.open(&a, Path::new("nope.txt"), libc::O_RDONLY).unwrap_err(),
        Errno::ENOENT
    );
    assert_eq!(hooks.unlink(&a, Path::new("nope.txt")).unwrap_err(), Errno::ENOENT);
    assert_eq!(
        hooks
            .rename(&a, Path::new("nope.txt"), Path::new("other.txt"))
            .unwrap_err(),
        Errno::ENOENT
    );

    // Failed operations are still audited
    let artifact = guard.audit().rotate().unwrap();
    assert_eq!(rows(&artifact).len(), 2);
}

#[test]
fn test_window_holds_exactly_n_rows() {
    let fx = Fixture::new();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();
    let a = CallerContext::new(3);

    let file = hooks.create(&a, Path::new("n.bin"), libc::O_RDWR, 0o600).unwrap();
    guard.audit().rotate().unwrap();

    for i in 0..25u64 {
        hooks.write(&a, &file, i * 4, b"abcd").unwrap();
    }
    let artifact = guard.audit().rotate().unwrap();
    let contents = fs::read_to_string(&artifact).unwrap();
    assert_eq!(contents.lines().count(), 26);
    assert_eq!(contents.lines().next(), Some(mtdfs::audit::CSV_HEADER));
}

#[test]
fn test_concurrent_writers_keep_rows_intact() {
    let fx = Fixture::new();
    let guard = Guard::new(fx.config());
    let hooks = guard.interceptor();

    let workers: Vec<_> = [(100u32, "one.txt"), (200u32, "two.txt")]
        .into_iter()
        .map(|(pid, name)| {
            let hooks = Arc::clone(&hooks);
            thread::spawn(move || {
                let ctx = CallerContext::new(pid);
                let file = hooks.create(&ctx, Path::new(name), libc::O_RDWR, 0o644).unwrap();
                for i in 0..200u64 {
                    hooks.write(&ctx, &file, i * 8, b"01234567").unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let artifact = guard.audit().rotate().unwrap();
    let rows = rows(&artifact);
    assert_eq!(rows.len(), 402);
    for row in &rows {
        let fields: Vec<_> = row.split(',').collect();
        assert_eq!(fields.len(), 6, "malformed row: {}", row);
        match fields[0] {
            "100" => assert_eq!(fields[4], "one.txt"),
            "200" => assert_eq!(fields[4], "two.txt"),
            other => panic!("unexpected pid {}", other),
        }
    }
    assert_eq!(fs::metadata(fx.underlay_file("one.txt")).unwrap().len(), 1600);
    assert_eq!(fs::metadata(fx.underlay_file("two.txt")).unwrap().len(), 1600);
}

#[test]
fn test_delay_waits_for_late_verdict() {
    let fx = Fixture::new();
    fs::write(fx.underlay_file("doc.txt"), b"safe").unwrap();
    let guard = Guard::new(GuardConfig {
        policy: PolicyConfig {
            verdict_path: fx.verdict.clone(),
            delay_modifications: true,
            delay_secs: 1,
            ..PolicyConfig::default()
        },
        ..fx.config()
    });
    let hooks = guard.interceptor();
    let bad = CallerContext::new(31337);
    let file = hooks.open(&bad, Path::new("doc.txt"), libc::O_RDWR).unwrap();

    // The classifier reaches its verdict while the write is held back
    let verdict = fx.verdict.clone();
    let classifier = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        fs::write(verdict, "31337\n").unwrap();
    });

    let start = Instant::now();
    assert_eq!(hooks.write(&bad, &file, 0, b"XXXX").unwrap(), 4);
    assert!(start.elapsed() >= Duration::from_secs(1));
    classifier.join().unwrap();

    assert_eq!(fs::read(fx.underlay_file("doc.txt")).unwrap(), b"safe");
}

#[test]
fn test_shutdown_cuts_delay_short() {
    let fx = Fixture::new();
    let guard = Guard::new(GuardConfig {
        policy: PolicyConfig {
            verdict_path: fx.verdict.clone(),
            delay_modifications: true,
            delay_secs: 60,
            ..PolicyConfig::default()
        },
        ..fx.config()
    });
    let hooks = guard.interceptor();
    let signal = Arc::clone(guard.shutdown_signal());

    let worker = thread::spawn(move || {
        let ctx = CallerContext::new(5);
        let start = Instant::now();
        hooks.unlink(&ctx, Path::new("missing")).unwrap_err();
        start.elapsed()
    });

    thread::sleep(Duration::from_millis(100));
    signal.trigger();
    assert!(worker.join().unwrap() < Duration::from_secs(60));
}

#[tokio::test]
async fn test_guard_shutdown_flushes_last_window() {
    let fx = Fixture::new();
    let mut guard = Guard::new(GuardConfig {
        audit: AuditConfig {
            dir: fx.logs.clone(),
            window_secs: 3600,
            ..AuditConfig::default()
        },
        ..fx.config()
    });
    guard.start();

    let hooks = guard.interceptor();
    let ctx = CallerContext::new(8);
    hooks.unlink(&ctx, Path::new("gone.txt")).unwrap_err();

    guard.shutdown().await;
    let rows = rows(&fx.logs.join("logfile1.csv"));
    assert_eq!(rows.len(), 1);
    assert!(rows[0].starts_with("8,-1.000000,unlink,txt,gone.txt,"));
}
