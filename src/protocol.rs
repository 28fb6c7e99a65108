//! Fixed-size messages exchanged between clients and the server over named pipes.
//!
//! Every string on the wire (pipe paths, keys and values) travels in a field of
//! [`FIELD_LEN`] bytes, padded with NUL bytes. Messages have no length prefix, a reader
//! always knows how many bytes to expect from the operation code it just read.
//!
//! The result byte of a response is `'0'` on success and `'1'` on failure for every
//! operation, SUBSCRIBE included. Older clients that read a successful SUBSCRIBE as `'1'`
//! will see the opposite result.
use crate::{KvsError, Result};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// number of session slots, which is also the capacity of the admission queue
pub const MAX_SESSION_COUNT: usize = 8;
/// longest pipe path accepted in a connect message
pub const MAX_PIPE_PATH_LENGTH: usize = 40;
/// longest key or value accepted by the server
pub const MAX_STRING_SIZE: usize = 40;
/// maximum number of pairs (or keys) in a single job file command
pub const MAX_WRITE_SIZE: usize = 256;

/// size of one padded string field
pub const FIELD_LEN: usize = MAX_STRING_SIZE + 1;
const PATH_FIELD_LEN: usize = MAX_PIPE_PATH_LENGTH + 1;

/// size of a connect message: op code followed by three path fields
pub const CONNECT_MESSAGE_LEN: usize = 1 + 3 * PATH_FIELD_LEN;
/// size of a notification message: a key field followed by a value field
pub const NOTIFICATION_LEN: usize = 2 * FIELD_LEN;

/// value sent to subscribers when their key is deleted
pub const DELETED_VALUE: &str = "DELETED";

/// The operation codes understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// open a session, only valid on the server's entry pipe
    Connect = 1,
    /// close the session
    Disconnect = 2,
    /// get notified when a key changes
    Subscribe = 3,
    /// stop being notified about a key
    Unsubscribe = 4,
}

impl TryFrom<u8> for OpCode {
    type Error = KvsError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(OpCode::Connect),
            2 => Ok(OpCode::Disconnect),
            3 => Ok(OpCode::Subscribe),
            4 => Ok(OpCode::Unsubscribe),
            other => Err(KvsError::Protocol(format!("unknown op code {}", other))),
        }
    }
}

/// The result byte carried by every response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// the operation succeeded
    Success,
    /// the operation failed
    Failure,
}

impl ResultCode {
    /// the byte written on the wire
    pub fn as_byte(self) -> u8 {
        match self {
            ResultCode::Success => b'0',
            ResultCode::Failure => b'1',
        }
    }

    /// converts a wire byte back into a `ResultCode`, anything but `'0'` is a failure
    pub fn from_byte(byte: u8) -> Self {
        if byte == b'0' {
            ResultCode::Success
        } else {
            ResultCode::Failure
        }
    }
}

impl From<bool> for ResultCode {
    fn from(ok: bool) -> Self {
        if ok {
            ResultCode::Success
        } else {
            ResultCode::Failure
        }
    }
}

/// The two byte response sent for every request: the echoed op code and a result byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// the operation being answered
    pub op: OpCode,
    /// outcome of the operation
    pub result: ResultCode,
}

impl Response {
    /// builds a response for `op`
    pub fn new(op: OpCode, result: ResultCode) -> Self {
        Response { op, result }
    }

    /// encodes this response into its wire form
    pub fn encode(&self) -> [u8; 2] {
        [self.op as u8, self.result.as_byte()]
    }

    /// decodes a response read from a response pipe
    pub fn decode(bytes: [u8; 2]) -> Result<Self> {
        Ok(Response {
            op: OpCode::try_from(bytes[0])?,
            result: ResultCode::from_byte(bytes[1]),
        })
    }
}

/// The three pipes a client wants its session to use.
/// Built by the accept loop from a connect message and handed to exactly one session worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// client → server requests
    pub request_path: PathBuf,
    /// server → client responses
    pub response_path: PathBuf,
    /// server → client key change notifications
    pub notification_path: PathBuf,
}

impl ConnectRequest {
    /// creates a new connect request from the three pipe paths
    pub fn new(
        request_path: impl Into<PathBuf>,
        response_path: impl Into<PathBuf>,
        notification_path: impl Into<PathBuf>,
    ) -> Self {
        ConnectRequest {
            request_path: request_path.into(),
            response_path: response_path.into(),
            notification_path: notification_path.into(),
        }
    }

    /// encodes the request as a connect message
    ///
    /// # Errors
    /// returns [`KvsError::Protocol`] if a path does not fit in its field
    pub fn encode(&self) -> Result<[u8; CONNECT_MESSAGE_LEN]> {
        let mut msg = [0u8; CONNECT_MESSAGE_LEN];
        msg[0] = OpCode::Connect as u8;
        let paths = [
            &self.request_path,
            &self.response_path,
            &self.notification_path,
        ];
        for (i, path) in paths.iter().enumerate() {
            let start = 1 + i * PATH_FIELD_LEN;
            write_field(&mut msg[start..start + PATH_FIELD_LEN], &path_str(path)?)?;
        }
        Ok(msg)
    }

    /// decodes a connect message read from the entry pipe
    ///
    /// # Errors
    /// returns [`KvsError::Protocol`] if the message does not start with the connect op code
    pub fn decode(msg: &[u8; CONNECT_MESSAGE_LEN]) -> Result<Self> {
        if msg[0] != OpCode::Connect as u8 {
            return Err(KvsError::Protocol(format!(
                "expected op code {} but message started with {}",
                OpCode::Connect as u8,
                msg[0]
            )));
        }
        let field = |i: usize| {
            let start = 1 + i * PATH_FIELD_LEN;
            PathBuf::from(decode_field(&msg[start..start + PATH_FIELD_LEN]))
        };
        Ok(ConnectRequest::new(field(0), field(1), field(2)))
    }
}

/// A key change delivered on a session's notification pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// the key that changed
    pub key: String,
    /// its new value, or [`DELETED_VALUE`]
    pub value: String,
}

impl Notification {
    /// builds a notification
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Notification {
            key: key.into(),
            value: value.into(),
        }
    }

    /// encodes the notification into a key field and a value field
    pub fn encode(&self) -> Result<[u8; NOTIFICATION_LEN]> {
        let mut msg = [0u8; NOTIFICATION_LEN];
        write_field(&mut msg[..FIELD_LEN], &self.key)?;
        write_field(&mut msg[FIELD_LEN..], &self.value)?;
        Ok(msg)
    }

    /// decodes a notification read from a notification pipe
    pub fn decode(msg: &[u8; NOTIFICATION_LEN]) -> Self {
        Notification {
            key: decode_field(&msg[..FIELD_LEN]),
            value: decode_field(&msg[FIELD_LEN..]),
        }
    }
}

/// copies `s` into `field` and pads the remainder with NUL bytes.
/// The last byte of the field is always left as a NUL terminator.
pub fn write_field(field: &mut [u8], s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() >= field.len() {
        return Err(KvsError::Protocol(format!(
            "'{}' is longer than {} bytes",
            s,
            field.len() - 1
        )));
    }
    field[..bytes.len()].copy_from_slice(bytes);
    for b in &mut field[bytes.len()..] {
        *b = 0;
    }
    Ok(())
}

/// reads one string field of [`FIELD_LEN`] bytes
pub fn read_field<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut field = [0u8; FIELD_LEN];
    reader.read_exact(&mut field)?;
    Ok(decode_field(&field))
}

fn decode_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn path_str(path: &Path) -> Result<String> {
    path.to_str()
        .map(String::from)
        .ok_or_else(|| KvsError::Protocol(format!("{:?} is not valid UTF-8", path)))
}
