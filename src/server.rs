use crate::backup::BackupLimiter;
use crate::engine::{KvStore, KvsEngine};
use crate::jobs::JobDispatcher;
use crate::pool::{JobPool, SessionPool};
use crate::protocol::{ConnectRequest, CONNECT_MESSAGE_LEN, MAX_SESSION_COUNT};
use crate::queue::{self, AdmissionSender};
use crate::session::SessionRegistry;
use crate::{KvsError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use signal_hook::consts::SIGUSR1;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// directory holding the server's entry pipe
pub const ENTRY_PIPE_DIR: &str = "/tmp";

/// Validated server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// directory scanned for `.job` files
    pub jobs_dir: PathBuf,
    /// maximum number of backup processes running at once
    pub max_backups: usize,
    /// number of job worker threads
    pub max_job_threads: usize,
    /// path of the pipe clients send connect requests to
    pub entry_pipe: PathBuf,
    /// number of session slots
    pub sessions: usize,
}

impl ServerConfig {
    /// validates the raw command line arguments.
    /// The entry pipe is created as `/tmp/<pipe_name>`.
    ///
    /// # Errors
    /// returns [`KvsError::Parsing`] if a number is not an integer of at least 1, or if the
    /// pipe name is empty
    pub fn build(
        jobs_dir: &str,
        max_backups: &str,
        max_job_threads: &str,
        pipe_name: &str,
    ) -> Result<ServerConfig> {
        let max_backups = parse_positive("max_concurrent_backups", max_backups)?;
        let max_job_threads = parse_positive("max_job_threads", max_job_threads)?;
        if pipe_name.is_empty() {
            return Err(KvsError::Parsing("the entry pipe name is empty".to_string()));
        }

        Ok(ServerConfig {
            jobs_dir: PathBuf::from(jobs_dir),
            max_backups,
            max_job_threads,
            entry_pipe: Path::new(ENTRY_PIPE_DIR).join(pipe_name),
            sessions: MAX_SESSION_COUNT,
        })
    }

    /// uses `path` as the entry pipe instead of the default location
    pub fn with_entry_pipe(mut self, path: impl Into<PathBuf>) -> Self {
        self.entry_pipe = path.into();
        self
    }

    /// changes the number of session slots
    pub fn with_sessions(mut self, sessions: usize) -> Self {
        self.sessions = sessions.max(1);
        self
    }
}

fn parse_positive(name: &str, value: &str) -> Result<usize> {
    let n: i64 = value
        .trim()
        .parse()
        .map_err(|_| KvsError::Parsing(format!("{} must be an integer, got '{}'", name, value)))?;
    if n < 1 {
        return Err(KvsError::Parsing(format!("{} must be at least 1, got {}", name, n)));
    }
    Ok(n as usize)
}

/// The key/value server: a job pipeline draining the jobs directory, plus client sessions
/// admitted from a named entry pipe.
///
/// # Example
/// ```rust
/// use pipekvs::{KvsServer, ServerConfig};
/// # use std::error::Error;
/// # fn main() -> Result<(), Box<dyn Error>> {
/// let config = ServerConfig::build("./jobs", "2", "4", "kvs-server")?;
/// let server = KvsServer::open(config);
/// let handle = server.handle(); // used to stop the server from another thread
/// // server.run()?;
/// # Ok(())
/// # }
/// ```
pub struct KvsServer<E: KvsEngine> {
    config: ServerConfig,
    engine: E,
    registry: Arc<SessionRegistry>,
    limiter: Arc<BackupLimiter>,
    shutdown: Arc<AtomicBool>,
    cleanup: Arc<AtomicBool>,
    // a message cancels an admission blocked on a full queue
    stop: (Sender<()>, Receiver<()>),
}

impl KvsServer<KvStore> {
    /// creates a server over a new, empty [`KvStore`] whose key changes are routed to the
    /// server's sessions
    pub fn open(config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.sessions));
        let engine = KvStore::with_notifier(registry.clone());
        KvsServer::with_engine(config, engine, registry)
    }
}

impl<E: KvsEngine> KvsServer<E> {
    /// creates a server using the given engine. `registry` must be the notifier of `engine`
    /// for subscriptions to reach clients.
    pub fn with_engine(config: ServerConfig, engine: E, registry: Arc<SessionRegistry>) -> Self {
        let limiter = Arc::new(BackupLimiter::new(config.max_backups));
        KvsServer {
            config,
            engine,
            registry,
            limiter,
            shutdown: Arc::new(AtomicBool::new(false)),
            cleanup: Arc::new(AtomicBool::new(false)),
            stop: channel::bounded(1),
        }
    }

    /// the engine shared by jobs and sessions
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// the session slots of this server
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// a handle that can stop the server or request a cleanup sweep from another thread
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            entry_pipe: self.config.entry_pipe.clone(),
            shutdown: self.shutdown.clone(),
            cleanup: self.cleanup.clone(),
            stop: self.stop.0.clone(),
        }
    }

    /// Runs the server until [`ServerHandle::shutdown`] is called.
    ///
    /// # Errors
    /// returns an error if the jobs directory cannot be opened, the entry pipe cannot be
    /// created, or a pool cannot be started
    pub fn run(self) -> Result<()> {
        info!("pipekvs {}", env!("CARGO_PKG_VERSION"));
        let dispatcher = JobDispatcher::open(
            &self.config.jobs_dir,
            self.engine.clone(),
            self.limiter.clone(),
        )?;
        let job_pool = JobPool::new(self.config.max_job_threads)?;
        let mut entry = EntryPipe::create(&self.config.entry_pipe)?;
        let sig_id = signal_hook::flag::register(SIGUSR1, self.cleanup.clone())?;

        let (admissions, waiting) = queue::bounded(self.config.sessions);
        SessionPool::spawn(
            self.config.sessions,
            waiting,
            self.registry.clone(),
            self.engine.clone(),
        )?;
        let jobs = thread::Builder::new()
            .name("job-dispatcher".to_string())
            .spawn(move || dispatcher.run(&job_pool))?;

        info!(entry_pipe = ?self.config.entry_pipe, "accepting connections");
        self.accept_loop(&mut entry, &admissions);

        info!("shutting down");
        drop(admissions);
        if jobs.join().is_err() {
            error!("the job dispatcher panicked");
        }
        self.limiter.wait_all();
        signal_hook::low_level::unregister(sig_id);
        info!("server stopped");
        Ok(())
    }

    /// receives connect messages and hands them to the session pool until shutdown.
    /// A pending cleanup request is served before every receive.
    fn accept_loop(&self, entry: &mut EntryPipe, admissions: &AdmissionSender) {
        let mut msg = [0u8; CONNECT_MESSAGE_LEN];
        while !self.shutdown.load(Ordering::SeqCst) {
            if self.cleanup.swap(false, Ordering::SeqCst) {
                info!("cleanup requested");
                self.registry.sweep(&self.engine);
            }

            if let Err(e) = entry.receive(&mut msg) {
                error!("could not read from the entry pipe: {}", e);
                return;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match ConnectRequest::decode(&msg) {
                Ok(request) => {
                    debug!(?request, "connect request received");
                    match admissions.enqueue_unless(request, &self.stop.1) {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("shutdown requested while every session was busy");
                            return;
                        }
                        Err(e) => {
                            error!("could not admit connection: {}", e);
                            return;
                        }
                    }
                }
                Err(_) if msg[0] == 0 => debug!("wake-up message received"),
                Err(e) => warn!("discarding message from the entry pipe: {}", e),
            }
        }
    }
}

/// Controls a running [`KvsServer`] from another thread
#[derive(Debug, Clone)]
pub struct ServerHandle {
    entry_pipe: PathBuf,
    shutdown: Arc<AtomicBool>,
    cleanup: Arc<AtomicBool>,
    stop: Sender<()>,
}

impl ServerHandle {
    /// Stops accepting connections. The server then waits for the job pipeline and the
    /// backups to finish before `run` returns.
    ///
    /// A connection the accept loop is still trying to admit is dropped.
    pub fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        // full means a stop is already pending
        let _ = self.stop.try_send(());
        self.wake()
    }

    /// asks the accept loop to sweep every session, like `SIGUSR1` does
    pub fn request_cleanup(&self) -> Result<()> {
        self.cleanup.store(true, Ordering::SeqCst);
        self.wake()
    }

    /// unblocks the accept loop with a message it discards
    fn wake(&self) -> Result<()> {
        let mut pipe = OpenOptions::new().write(true).open(&self.entry_pipe)?;
        pipe.write_all(&[0u8; CONNECT_MESSAGE_LEN])?;
        Ok(())
    }
}

/// The named pipe clients connect through.
///
/// The server keeps it open for reading and writing, so reads never see end of stream when
/// no client is connected. The pipe is removed when dropped.
struct EntryPipe {
    path: PathBuf,
    file: File,
}

impl EntryPipe {
    fn create(path: &Path) -> Result<Self> {
        match fs::remove_file(path) {
            Ok(()) => debug!(?path, "removed stale entry pipe"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        mkfifo(path, Mode::from_bits_truncate(0o666))?;

        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) => {
                let _ = fs::remove_file(path);
                return Err(e.into());
            }
        };
        Ok(EntryPipe {
            path: path.to_path_buf(),
            file,
        })
    }

    fn receive(&mut self, msg: &mut [u8; CONNECT_MESSAGE_LEN]) -> std::io::Result<()> {
        self.file.read_exact(msg)
    }
}

impl Drop for EntryPipe {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = ?self.path, "could not remove the entry pipe: {}", e);
        }
    }
}
