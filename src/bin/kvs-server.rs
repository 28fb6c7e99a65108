//! this binary starts the pipekvs server
//! to see the list of arguments, type: `kvs-server --help`
//!
//! `kvs-server <JOBS_DIR> <MAX_BACKUPS> <MAX_THREADS> <PIPE_NAME>`
//!
//!     Executes every `.job` file of JOBS_DIR with MAX_THREADS worker threads, running at
//!     most MAX_BACKUPS backups at once, and accepts client sessions on the named pipe
//!     `/tmp/PIPE_NAME`.
//!     Send SIGUSR1 to expire every client subscription, SIGINT or SIGTERM to stop.

use clap::{crate_version, App, Arg};
use pipekvs::{KvsServer, Result, ServerConfig, ServerHandle};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::process::exit;
use std::thread;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    // parse command line args
    let matches = App::new("kvs-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a key-value store server reachable over named pipes")
        .arg(Arg::with_name("JOBS_DIR")
            .required(true)
            .index(1)
            .help("directory containing the .job files to execute"))
        .arg(Arg::with_name("MAX_BACKUPS")
            .required(true)
            .index(2)
            .help("maximum number of backups running at the same time"))
        .arg(Arg::with_name("MAX_THREADS")
            .required(true)
            .index(3)
            .help("number of threads executing job files"))
        .arg(Arg::with_name("PIPE_NAME")
            .required(true)
            .index(4)
            .help("name of the pipe clients connect through, created under /tmp"))
        .get_matches();

    // validate command line options, store them in ServerConfig
    let config = match ServerConfig::build(
        matches.value_of("JOBS_DIR").unwrap_or_default(),
        matches.value_of("MAX_BACKUPS").unwrap_or_default(),
        matches.value_of("MAX_THREADS").unwrap_or_default(),
        matches.value_of("PIPE_NAME").unwrap_or_default(),
    ) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    // start the server
    if let Err(e) = run(config) {
        error!("{}", e);
        exit(1);
    }
}

fn run(config: ServerConfig) -> Result<()> {
    info!("jobs directory: {:?}", config.jobs_dir);
    info!("max concurrent backups: {}", config.max_backups);
    info!("job threads: {}", config.max_job_threads);

    let server = KvsServer::open(config);
    watch_termination(server.handle())?;
    server.run()
}

/// stops the server on SIGINT or SIGTERM
fn watch_termination(handle: ServerHandle) -> Result<()> {
    let mut signals = Signals::new(&[SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!(signal = sig, "termination requested");
                if let Err(e) = handle.shutdown() {
                    error!("could not stop the server: {}", e);
                    exit(1);
                }
            }
        })?;
    Ok(())
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than DEBUG (e.g, info, warn, etc.)
        // will be written.
        .with_max_level(Level::DEBUG)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
