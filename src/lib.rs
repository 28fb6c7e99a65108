#![deny(missing_docs)]
//! A concurrent key-value store server (pipekvs) reachable over named pipes.
//!
//! The server runs two independent workloads over one shared [`KvStore`]:
//!
//! - a **job pipeline** executing the `.job` command scripts found in a directory. Each file is
//! claimed by exactly one worker of a [`JobPool`] and its results are written to a sibling
//! `.out` file.
//! - **client sessions** opened through a public entry pipe. Clients subscribe to keys and
//! receive a notification every time one of those keys is written or deleted.
//!
//! ## Sessions
//! The accept loop reads fixed-size connect messages from the entry pipe and pushes them into a
//! bounded admission queue. A fixed [`SessionPool`] of [`MAX_SESSION_COUNT`] workers drains that
//! queue; each worker owns one session slot for the life of the server and serves one client
//! at a time. When every slot is busy the accept loop blocks, and so do new clients.
//!
//! Sending `SIGUSR1` to the server expires every subscription of every session. The signal
//! handler only raises a flag, the sweep itself runs in the accept loop before it reads its next
//! message.
//!
//! ## Job files
//! A job file holds one command per line, see the [`parser`] module for the grammar.
//! `BACKUP` snapshots the store into `<job>-<n>.bck` from a forked process; at most
//! `max_concurrent_backups` of those processes run at once, see [`BackupLimiter`].
//!
//! ## Custom Protocol
//! All messages have a fixed size, see the [`protocol`] module. Every request is answered with
//! two bytes: the request's operation code and a result byte, `'0'` for success and `'1'` for
//! failure.
//!
//! ### Client / Server executables
//! The [`kvs-server`] binary runs the server, [`kvs-client`] opens a session and reads
//! subscription commands from stdin.
//!
//! [`kvs-server`]: ./kvs-server.rs
//! [`kvs-client`]: ./kvs-client.rs

pub use backup::BackupLimiter;
pub use client::{KvsClient, Notifications};
pub use engine::{KvsEngine, KvStore, Notifier, SessionId};
pub use error::{KvsError, Result};
pub use jobs::JobDispatcher;
pub use pool::{JobPool, SessionPool};
pub use protocol::{ConnectRequest, Notification, OpCode, Response, ResultCode, MAX_SESSION_COUNT};
pub use server::{KvsServer, ServerConfig, ServerHandle};
pub use session::{SessionRegistry, SessionState};

mod backup;
mod client;
pub mod engine;
mod error;
mod jobs;
pub mod parser;
mod pool;
pub mod protocol;
pub mod queue;
mod server;
pub mod session;
