use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::protocol::{
    write_field, ConnectRequest, Notification, OpCode, Response, ResultCode, FIELD_LEN,
    NOTIFICATION_LEN,
};
use crate::{KvsError, Result};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use tracing::{debug, warn};

/// `KvsClient` contains the functionality for communication with a [`KvsServer`] over
/// named pipes.
///
/// The client owns its three pipes: they are created on connect and removed on drop.
///
/// [`KvsServer`]: crate::KvsServer
pub struct KvsClient {
    request: File,
    response: File,
    notifications: Option<File>,
    paths: [PathBuf; 3],
}

impl KvsClient {
    /// Creates the request, response and notification pipes, asks the server listening on
    /// `server_pipe` for a session and waits for its acknowledgment.
    ///
    /// Blocks while every session of the server is busy.
    ///
    /// # Errors
    /// returns [`KvsError::Protocol`] if the server refused the connection
    pub fn connect(
        server_pipe: &Path,
        request_path: &Path,
        response_path: &Path,
        notification_path: &Path,
    ) -> Result<Self> {
        let msg = ConnectRequest::new(request_path, response_path, notification_path).encode()?;
        let paths = [
            request_path.to_path_buf(),
            response_path.to_path_buf(),
            notification_path.to_path_buf(),
        ];
        for path in &paths {
            make_fifo(path)?;
        }

        match KvsClient::handshake(server_pipe, &msg, &paths) {
            Ok((request, response, notifications)) => {
                debug!(?response_path, "connected");
                Ok(KvsClient {
                    request,
                    response,
                    notifications: Some(notifications),
                    paths,
                })
            }
            Err(e) => {
                for path in &paths {
                    let _ = fs::remove_file(path);
                }
                Err(e)
            }
        }
    }

    /// sends the connect message then opens the client's ends of its pipes
    fn handshake(
        server_pipe: &Path,
        msg: &[u8],
        [request_path, response_path, notification_path]: &[PathBuf; 3],
    ) -> Result<(File, File, File)> {
        let mut server = OpenOptions::new().write(true).open(server_pipe)?;
        server.write_all(msg)?;
        drop(server);

        // same order as the server opens them
        let mut response = File::open(response_path)?;
        let request = OpenOptions::new().write(true).open(request_path)?;
        let notifications = File::open(notification_path)?;

        let ack = read_response(&mut response, OpCode::Connect)?;
        if ack != ResultCode::Success {
            return Err(KvsError::Protocol("the server refused the connection".to_string()));
        }
        Ok((request, response, notifications))
    }

    /// subscribes to changes of `key`
    /// ## Returns
    /// `Ok(true)` if the subscription was accepted, `Ok(false)` if the key does not exist
    pub fn subscribe(&mut self, key: &str) -> Result<bool> {
        self.keyed_request(OpCode::Subscribe, key)
    }

    /// removes the subscription to `key`
    /// ## Returns
    /// `Ok(true)` if the subscription existed, `Ok(false)` otherwise
    pub fn unsubscribe(&mut self, key: &str) -> Result<bool> {
        self.keyed_request(OpCode::Unsubscribe, key)
    }

    /// ends the session
    /// ## Returns
    /// `Ok(true)` if the server closed the session cleanly
    pub fn disconnect(&mut self) -> Result<bool> {
        self.request.write_all(&[OpCode::Disconnect as u8])?;
        let result = read_response(&mut self.response, OpCode::Disconnect)?;
        Ok(result == ResultCode::Success)
    }

    /// takes the stream of key changes pushed by the server.
    /// Returns `None` if it was already taken.
    pub fn notifications(&mut self) -> Option<Notifications> {
        self.notifications.take().map(|pipe| Notifications { pipe })
    }

    fn keyed_request(&mut self, op: OpCode, key: &str) -> Result<bool> {
        let mut msg = [0u8; 1 + FIELD_LEN];
        msg[0] = op as u8;
        write_field(&mut msg[1..], key)?;
        self.request.write_all(&msg)?;
        let result = read_response(&mut self.response, op)?;
        Ok(result == ResultCode::Success)
    }
}

impl Drop for KvsClient {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                warn!(?path, "could not remove client pipe: {}", e);
            }
        }
    }
}

/// Iterator over the notifications of a session, ends when the server closes the pipe
pub struct Notifications {
    pipe: File,
}

impl Iterator for Notifications {
    type Item = Notification;

    fn next(&mut self) -> Option<Notification> {
        let mut msg = [0u8; NOTIFICATION_LEN];
        match self.pipe.read_exact(&mut msg) {
            Ok(()) => Some(Notification::decode(&msg)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => {
                warn!("could not read notification: {}", e);
                None
            }
        }
    }
}

/// reads a response and checks that it answers `expected`
fn read_response(response: &mut File, expected: OpCode) -> Result<ResultCode> {
    let mut bytes = [0u8; 2];
    response.read_exact(&mut bytes)?;
    let response = Response::decode(bytes)?;
    if response.op != expected {
        return Err(KvsError::Protocol(format!(
            "expected a response to {:?} but got one to {:?}",
            expected, response.op
        )));
    }
    Ok(response.result)
}

/// creates a fifo at `path`, replacing whatever was there
fn make_fifo(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    mkfifo(path, Mode::from_bits_truncate(0o640))?;
    Ok(())
}
