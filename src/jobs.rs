//! The job pipeline: every `.job` file of the jobs directory is executed exactly once, by
//! whichever job worker claims it first.
//!
//! Workers share one directory cursor behind a mutex. The lock is only held while the cursor
//! advances to the next `.job` entry, never while a file is being read or written.
use std::fs::{self, File, ReadDir};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::backup::BackupLimiter;
use crate::engine::{render_delete, render_read, render_show, KvsEngine};
use crate::parser::{Command, Commands, HELP_TEXT};
use crate::pool::JobPool;
use crate::Result;
use tracing::{debug, error, info, instrument, warn};

/// Executes the job files of a directory on a [`JobPool`]
pub struct JobDispatcher<E: KvsEngine> {
    dir: PathBuf,
    entries: Mutex<ReadDir>,
    engine: E,
    limiter: Arc<BackupLimiter>,
}

impl<E: KvsEngine> JobDispatcher<E> {
    /// opens the jobs directory `dir`
    ///
    /// # Errors
    /// returns an IO error if the directory cannot be read
    pub fn open(dir: &Path, engine: E, limiter: Arc<BackupLimiter>) -> Result<Self> {
        let entries = fs::read_dir(dir)?;
        Ok(JobDispatcher {
            dir: dir.to_path_buf(),
            entries: Mutex::new(entries),
            engine,
            limiter,
        })
    }

    /// runs one claim loop per pool thread and returns once the directory is exhausted
    pub fn run(&self, pool: &JobPool) {
        info!(dir = ?self.dir, threads = pool.threads(), "processing job files");
        pool.run_workers(|worker| self.drain(worker));
        info!(dir = ?self.dir, "all job files processed");
    }

    /// claims and executes job files until none are left.
    /// A file that cannot be opened is skipped, the worker moves on to the next one.
    #[instrument(skip(self))]
    fn drain(&self, worker: usize) {
        while let Some(path) = self.claim_next() {
            debug!(job = ?path, "claimed job file");
            if let Err(e) = self.execute_file(&path) {
                error!(job = ?path, "could not process job file: {}", e);
            }
        }
        debug!("no job files left");
    }

    /// advances the shared cursor to the next `.job` entry
    fn claim_next(&self) -> Option<PathBuf> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match entries.next()? {
                Ok(entry) if is_job_file(&entry) => return Some(entry.path()),
                Ok(entry) => debug!(path = ?entry.path(), "skipping non job file"),
                Err(e) => warn!("could not read directory entry: {}", e),
            }
        }
    }

    /// Executes every command of the job file at `input`, writing results into the
    /// sibling `.out` file.
    ///
    /// # Errors
    /// returns an IO error if the job file or its output file cannot be opened or written.
    /// Commands that fail are only logged.
    pub fn execute_file(&self, input: &Path) -> Result<()> {
        let commands = Commands::new(BufReader::new(File::open(input)?));
        let mut job = JobFile::new(input);
        let mut out = BufWriter::new(File::create(job.output_path())?);

        for command in commands {
            self.execute(command, &mut job, &mut out)?;
        }
        out.flush()?;
        Ok(())
    }

    fn execute<W: Write>(&self, command: Command, job: &mut JobFile, out: &mut W) -> Result<()> {
        match command {
            Command::Write(pairs) => {
                if let Err(e) = self.engine.write(&pairs) {
                    error!("failed to write pairs: {}", e);
                }
            }
            Command::Read(keys) => match self.engine.read(&keys) {
                Ok(values) => out.write_all(render_read(&values).as_bytes())?,
                Err(e) => error!("failed to read pairs: {}", e),
            },
            Command::Delete(keys) => match self.engine.delete(&keys) {
                Ok(missing) => out.write_all(render_delete(&missing).as_bytes())?,
                Err(e) => error!("failed to delete pairs: {}", e),
            },
            Command::Show => match self.engine.show() {
                Ok(pairs) => out.write_all(render_show(&pairs).as_bytes())?,
                Err(e) => error!("failed to show pairs: {}", e),
            },
            Command::Wait(delay) => {
                if delay > 0 {
                    out.write_all(b"Waiting...\n")?;
                    thread::sleep(Duration::from_millis(delay));
                }
            }
            Command::Backup => {
                let path = job.next_backup_path();
                match self.engine.show() {
                    Ok(pairs) => {
                        if let Err(e) = self.limiter.backup(&path, render_show(&pairs).as_bytes()) {
                            error!(backup = ?path, "failed to perform backup: {}", e);
                        }
                    }
                    Err(e) => error!(backup = ?path, "failed to snapshot the store: {}", e),
                }
            }
            Command::Help => print!("{}", HELP_TEXT),
            Command::Empty => {}
            Command::Invalid(line) => {
                warn!(job = ?job.input, "invalid command '{}', see HELP for usage", line)
            }
        }
        Ok(())
    }
}

/// a job file being executed, with the number of backups it requested so far
struct JobFile {
    input: PathBuf,
    backups: usize,
}

impl JobFile {
    fn new(input: &Path) -> Self {
        JobFile {
            input: input.to_path_buf(),
            backups: 0,
        }
    }

    /// `dir/name.job` → `dir/name.out`
    fn output_path(&self) -> PathBuf {
        self.input.with_extension("out")
    }

    /// `dir/name.job` → `dir/name-<n>.bck`, counting from 1
    fn next_backup_path(&mut self) -> PathBuf {
        self.backups += 1;
        let stem = self.input.file_stem().unwrap_or_default().to_string_lossy();
        self.input.with_file_name(format!("{}-{}.bck", stem, self.backups))
    }
}

/// true for regular files ending in `.job`
fn is_job_file(entry: &fs::DirEntry) -> bool {
    entry.file_type().map_or(false, |t| t.is_file())
        && entry
            .path()
            .extension()
            .map_or(false, |ext| ext.to_str() == Some("job"))
}
