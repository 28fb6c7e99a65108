//! The kvs-client executable opens a session with a running kvs-server:
//!
//! `kvs-client <CLIENT_ID> <PIPE_NAME>`
//!
//!     Connects through the server pipe `/tmp/PIPE_NAME`, using the pipes
//!     `/tmp/req<CLIENT_ID>`, `/tmp/resp<CLIENT_ID>` and `/tmp/notif<CLIENT_ID>`.
//!     Every notification received is printed as `(key,value)`.
//!
//! Commands are then read from stdin, one per line:
//!
//!     SUBSCRIBE <KEY>
//!     UNSUBSCRIBE <KEY>
//!     DELAY <MILLISECONDS>
//!     DISCONNECT
//!
//! The client exits after DISCONNECT or at the end of its input.

use clap::{crate_version, App, Arg};
use pipekvs::{KvsClient, KvsError, Result};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::thread;
use std::time::Duration;
use tracing::{warn, Level};
use tracing_subscriber::FmtSubscriber;

const PIPE_DIR: &str = "/tmp";

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    server_pipe: PathBuf,
    request: PathBuf,
    response: PathBuf,
    notification: PathBuf,
}

impl Opt {
    /// builds the pipe paths for `client_id`
    /// # Errors
    /// returns [`KvsError::Parsing`] if one of the parameters is empty
    fn build(client_id: &str, pipe_name: &str) -> Result<Opt> {
        if client_id.is_empty() || pipe_name.is_empty() {
            return Err(KvsError::Parsing(
                "the client id and the pipe name cannot be empty".to_string(),
            ));
        }
        let dir = Path::new(PIPE_DIR);
        Ok(Opt {
            server_pipe: dir.join(pipe_name),
            request: dir.join(format!("req{}", client_id)),
            response: dir.join(format!("resp{}", client_id)),
            notification: dir.join(format!("notif{}", client_id)),
        })
    }
}

/// A line read from stdin
#[derive(Debug, PartialEq)]
enum Input {
    Subscribe(String),
    Unsubscribe(String),
    Delay(u64),
    Disconnect,
}

fn main() {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let matches = App::new("kvs-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a client for the pipekvs server")
        .arg(Arg::with_name("CLIENT_ID").required(true).index(1))
        .arg(Arg::with_name("PIPE_NAME").required(true).index(2))
        .get_matches();

    let opt = match Opt::build(
        matches.value_of("CLIENT_ID").unwrap_or_default(),
        matches.value_of("PIPE_NAME").unwrap_or_default(),
    ) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

/// connects to the server then runs the commands read from stdin
fn run(opt: Opt) -> Result<()> {
    let mut client = KvsClient::connect(
        &opt.server_pipe,
        &opt.request,
        &opt.response,
        &opt.notification,
    )?;

    if let Some(notifications) = client.notifications() {
        thread::spawn(move || {
            for n in notifications {
                println!("({},{})", n.key, n.value);
            }
        });
    }

    for line in io::stdin().lock().lines() {
        let line = line?;
        let input = match parse_input(&line) {
            Some(input) => input,
            None => {
                if !line.trim().is_empty() {
                    warn!("invalid command: {}", line);
                }
                continue;
            }
        };
        match input {
            Input::Subscribe(key) => {
                let result = result_char(client.subscribe(&key)?);
                println!("Server returned {} for operation: subscribe", result);
            }
            Input::Unsubscribe(key) => {
                let result = result_char(client.unsubscribe(&key)?);
                println!("Server returned {} for operation: unsubscribe", result);
            }
            Input::Delay(ms) => thread::sleep(Duration::from_millis(ms)),
            Input::Disconnect => {
                let result = result_char(client.disconnect()?);
                println!("Server returned {} for operation: disconnect", result);
                return Ok(());
            }
        }
    }
    client.disconnect()?;
    Ok(())
}

/// parses one line of stdin
fn parse_input(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let input = match (words.next()?, words.next()) {
        ("SUBSCRIBE", Some(key)) => Input::Subscribe(key.to_string()),
        ("UNSUBSCRIBE", Some(key)) => Input::Unsubscribe(key.to_string()),
        ("DELAY", Some(ms)) => Input::Delay(ms.parse().ok()?),
        ("DISCONNECT", None) => Input::Disconnect,
        _ => return None,
    };
    Some(input)
}

fn result_char(ok: bool) -> char {
    if ok {
        '0'
    } else {
        '1'
    }
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        // only warnings and errors, stdout belongs to the notifications
        .with_max_level(Level::WARN)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        // completes the builder.
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting tracing default subscriber failed: {}", e);
    }
}
