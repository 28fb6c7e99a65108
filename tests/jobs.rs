use pipekvs::{BackupLimiter, JobDispatcher, JobPool, KvStore, KvsEngine, Result, SessionId};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use walkdir::WalkDir;

/// a store that counts how many times each key was written
#[derive(Clone, Default)]
struct CountingStore {
    inner: KvStore,
    writes: Arc<Mutex<HashMap<String, usize>>>,
}

impl KvsEngine for CountingStore {
    fn write(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut writes = self.writes.lock().unwrap();
        for (key, _) in pairs {
            *writes.entry(key.clone()).or_default() += 1;
        }
        self.inner.write(pairs)
    }

    fn read(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        self.inner.read(keys)
    }

    fn delete(&self, keys: &[String]) -> Result<Vec<String>> {
        self.inner.delete(keys)
    }

    fn show(&self) -> Result<Vec<(String, String)>> {
        self.inner.show()
    }

    fn subscribe(&self, session: SessionId, key: &str) -> Result<bool> {
        self.inner.subscribe(session, key)
    }

    fn unsubscribe(&self, session: SessionId, key: &str) -> Result<bool> {
        self.inner.unsubscribe(session, key)
    }

    fn disconnect(&self, session: SessionId) -> Result<()> {
        self.inner.disconnect(session)
    }
}

fn run_jobs<E: KvsEngine>(dir: &Path, engine: E, threads: usize, max_backups: usize) {
    let limiter = Arc::new(BackupLimiter::new(max_backups));
    let dispatcher = JobDispatcher::open(dir, engine, limiter.clone()).unwrap();
    let pool = JobPool::new(threads).unwrap();
    dispatcher.run(&pool);
    limiter.wait_all();
}

fn output(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap()
}

#[test]
fn read_after_write_lands_in_the_output_file() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    fs::write(dir.path().join("simple.job"), "WRITE [(a,1)]\nREAD [a]\n").unwrap();

    run_jobs(dir.path(), KvStore::new(), 1, 1);

    assert_eq!(output(dir.path(), "simple.out"), "[(a,1)]\n");
}

#[test]
fn every_command_writes_its_result_in_order() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    let job = "\
# setup
WRITE [(b,2)(a,1)(c,3)]
READ [c,a,x]
DELETE [b,y]
SHOW
WAIT 10
WAIT 0
";
    fs::write(dir.path().join("all.job"), job).unwrap();

    run_jobs(dir.path(), KvStore::new(), 2, 1);

    assert_eq!(
        output(dir.path(), "all.out"),
        "[(a,1)(c,3)(x,KVSERROR)]\n[(y,KVSMISSING)]\n(a, 1)\n(c, 3)\nWaiting...\n"
    );
}

#[test]
fn invalid_commands_do_not_stop_the_job() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    fs::write(
        dir.path().join("broken.job"),
        "WRITE [(a,1)\nFROB\nWRITE [(a,2)]\nREAD [a]\n",
    )
    .unwrap();

    run_jobs(dir.path(), KvStore::new(), 1, 1);

    assert_eq!(output(dir.path(), "broken.out"), "[(a,2)]\n");
}

#[test]
fn a_line_that_is_not_utf8_does_not_stop_the_job() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    fs::write(dir.path().join("bytes.job"), b"WRITE [(a,1)]\n\xff\xfe\nREAD [a]\n").unwrap();

    run_jobs(dir.path(), KvStore::new(), 1, 1);

    assert_eq!(output(dir.path(), "bytes.out"), "[(a,1)]\n");
}

#[test]
fn files_without_the_job_extension_are_skipped() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    fs::write(dir.path().join("notes.txt"), "WRITE [(a,1)]\n").unwrap();
    fs::write(dir.path().join("jobless"), "WRITE [(a,1)]\n").unwrap();
    fs::create_dir(dir.path().join("nested.job")).unwrap();

    let store = KvStore::new();
    run_jobs(dir.path(), store.clone(), 2, 1);

    assert!(store.show().unwrap().is_empty());
    assert!(!dir.path().join("notes.out").exists());
    assert!(!dir.path().join("jobless.out").exists());
    assert!(!dir.path().join("nested.out").exists());
}

#[test]
fn two_backups_with_a_limit_of_one_are_both_written() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    fs::write(
        dir.path().join("snap.job"),
        "WRITE [(a,1)]\nBACKUP\nWRITE [(b,2)]\nBACKUP\n",
    )
    .unwrap();

    run_jobs(dir.path(), KvStore::new(), 1, 1);

    assert_eq!(output(dir.path(), "snap-1.bck"), "(a, 1)\n");
    assert_eq!(output(dir.path(), "snap-2.bck"), "(a, 1)\n(b, 2)\n");
    assert_eq!(output(dir.path(), "snap.out"), "");
}

#[test]
fn each_job_file_is_processed_exactly_once() {
    let dir = TempDir::new().expect("unable to create temporary working directory");
    for i in 0..40 {
        let job = format!("WRITE [(job{},{})]\nREAD [job{}]\n", i, i, i);
        fs::write(dir.path().join(format!("{}.job", i)), job).unwrap();
    }

    let store = CountingStore::default();
    run_jobs(dir.path(), store.clone(), 4, 2);

    let writes = store.writes.lock().unwrap();
    assert_eq!(writes.len(), 40);
    assert!(writes.values().all(|&count| count == 1));

    let outputs: Vec<_> = WalkDir::new(dir.path())
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "out"))
        .collect();
    assert_eq!(outputs.len(), 40);
    for i in 0..40 {
        assert_eq!(
            output(dir.path(), &format!("{}.out", i)),
            format!("[(job{},{})]\n", i, i)
        );
    }
}
