use crossbeam_utils::thread;
use pipekvs::BackupLimiter;
use std::fs;
use tempfile::TempDir;

#[test]
fn limit_of_zero_still_allows_one_backup() {
    assert_eq!(BackupLimiter::new(0).max(), 1);
}

#[test]
fn a_second_backup_waits_for_the_first_one() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    let limiter = BackupLimiter::new(1);

    limiter.backup(&dir.path().join("job-1.bck"), b"(a, 1)\n").unwrap();
    assert_eq!(limiter.in_flight(), 1);
    limiter.backup(&dir.path().join("job-2.bck"), b"(a, 2)\n").unwrap();
    // the first child was reaped before the second was started
    assert_eq!(limiter.in_flight(), 1);

    limiter.wait_all();
    assert_eq!(limiter.in_flight(), 0);
    assert_eq!(fs::read_to_string(dir.path().join("job-1.bck")).unwrap(), "(a, 1)\n");
    assert_eq!(fs::read_to_string(dir.path().join("job-2.bck")).unwrap(), "(a, 2)\n");
}

#[test]
fn concurrent_requests_never_exceed_the_limit() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    let limiter = BackupLimiter::new(2);

    thread::scope(|s| {
        for t in 0..4 {
            let limiter = &limiter;
            let dir = dir.path();
            s.spawn(move |_| {
                for n in 1..=5 {
                    let path = dir.join(format!("job{}-{}.bck", t, n));
                    limiter.backup(&path, format!("({}, {})\n", t, n).as_bytes()).unwrap();
                    assert!(limiter.in_flight() <= 2);
                }
            });
        }
    })
    .unwrap();

    limiter.wait_all();
    let backups = fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(backups, 20);
}

#[test]
fn an_unwritable_backup_does_not_fail_the_caller() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    let limiter = BackupLimiter::new(1);
    let path = dir.path().join("missing-dir").join("job-1.bck");

    limiter.backup(&path, b"(a, 1)\n").unwrap();
    limiter.wait_all();
    assert!(!path.exists());
}
