//! Client sessions: the registry of session slots and the request/response protocol run on
//! each established connection.
//!
//! A session slot is owned by one session worker for the whole life of the server. The slot
//! goes `Idle → Connecting → Established → Idle` once per connection it serves. Only two
//! things reach into a slot from other threads: the store, which routes key changes to the
//! slot's notification pipe, and the cleanup sweep triggered by `SIGUSR1`.
use crate::engine::{KvsEngine, Notifier, SessionId};
use crate::protocol::{read_field, ConnectRequest, Notification, OpCode, Response, ResultCode};
use crate::Result;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

/// Lifecycle of a session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// waiting for a connection from the admission queue
    #[default]
    Idle,
    /// opening the client's pipes
    Connecting,
    /// serving requests
    Established,
}

#[derive(Debug, Default)]
struct Slot {
    state: SessionState,
    // keys this session is subscribed to, mirrored from the store
    subscriptions: BTreeSet<String>,
    // set by a cleanup sweep, the worker closes the session on its next request
    evicted: bool,
}

/// Every session slot of the server plus the notification routes of the attached ones.
///
/// A route exists from the moment a session is attached until it is detached, so a
/// notification for a session that just went away is a silent routing miss.
#[derive(Debug)]
pub struct SessionRegistry {
    slots: Vec<Mutex<Slot>>,
    routes: DashMap<SessionId, File>,
}

impl SessionRegistry {
    /// creates a registry with `slots` idle sessions, numbered from zero
    pub fn new(slots: usize) -> Self {
        SessionRegistry {
            slots: (0..slots).map(|_| Mutex::new(Slot::default())).collect(),
            routes: DashMap::new(),
        }
    }

    /// number of session slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// true if the registry has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// current state of session `id`
    ///
    /// # Panics
    /// panics if `id` is not a slot of this registry, as do all the per-session methods
    pub fn state(&self, id: SessionId) -> SessionState {
        self.slot(id).state
    }

    pub(crate) fn set_state(&self, id: SessionId, state: SessionState) {
        self.slot(id).state = state;
    }

    /// marks session `id` as established and routes its notifications to `notification`
    pub fn attach(&self, id: SessionId, notification: File) {
        self.routes.insert(id, notification);
        let mut slot = self.slot(id);
        slot.state = SessionState::Established;
        slot.evicted = false;
    }

    /// removes the notification route of session `id` and marks it idle.
    /// Dropping the route closes the server's end of the notification pipe.
    pub fn detach(&self, id: SessionId) {
        self.routes.remove(&id);
        self.slot(id).state = SessionState::Idle;
    }

    /// puts session `id` back into its initial state
    pub(crate) fn reset(&self, id: SessionId) {
        self.routes.remove(&id);
        *self.slot(id) = Slot::default();
    }

    /// true if notifications for session `id` currently reach a client
    pub fn is_routable(&self, id: SessionId) -> bool {
        self.routes.contains_key(&id)
    }

    /// true if a cleanup sweep evicted the connection attached to session `id`
    pub fn is_evicted(&self, id: SessionId) -> bool {
        self.slot(id).evicted
    }

    /// the keys session `id` is subscribed to, in key order
    pub fn subscriptions(&self, id: SessionId) -> Vec<String> {
        self.slot(id).subscriptions.iter().cloned().collect()
    }

    pub(crate) fn add_subscription(&self, id: SessionId, key: String) {
        self.slot(id).subscriptions.insert(key);
    }

    pub(crate) fn remove_subscription(&self, id: SessionId, key: &str) -> bool {
        self.slot(id).subscriptions.remove(key)
    }

    pub(crate) fn clear_subscriptions(&self, id: SessionId) {
        self.slot(id).subscriptions.clear();
    }

    /// Expires every subscription of every session.
    ///
    /// Subscriptions are dropped from the store and from each slot, notification routes are
    /// removed and attached sessions are marked evicted so their worker closes them before
    /// serving another request.
    #[instrument(skip(self, engine))]
    pub fn sweep<E: KvsEngine>(&self, engine: &E) {
        for id in 0..self.slots.len() {
            let expired = {
                let mut slot = self.slot(id);
                if slot.state == SessionState::Established {
                    slot.evicted = true;
                }
                std::mem::take(&mut slot.subscriptions).len()
            };
            self.routes.remove(&id);
            if let Err(e) = engine.disconnect(id) {
                warn!(session = id, "could not drop subscriptions: {}", e);
            }
            debug!(session = id, expired, "session swept");
        }
        info!("all sessions swept");
    }

    fn slot(&self, id: SessionId) -> MutexGuard<'_, Slot> {
        self.slots[id].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Notifier for SessionRegistry {
    fn notify(&self, session: SessionId, key: &str, value: &str) {
        let msg = match Notification::new(key, value).encode() {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session, "could not encode notification: {}", e);
                return;
            }
        };
        match self.routes.get_mut(&session) {
            Some(mut pipe) => {
                if let Err(e) = pipe.write_all(&msg) {
                    warn!(session, key, "could not deliver notification: {}", e);
                }
            }
            None => debug!(session, key, "notification for a detached session dropped"),
        }
    }
}

/// Runs one connection on session slot `id`, from opening its pipes until the session
/// returns to idle. Failures only affect this connection and are logged.
#[instrument(skip(request, registry, engine), fields(session = id))]
pub fn serve<E: KvsEngine>(
    id: SessionId,
    request: ConnectRequest,
    registry: &SessionRegistry,
    engine: &E,
) {
    registry.set_state(id, SessionState::Connecting);
    let (mut conn, notification) = match Connection::open(&request) {
        Ok(opened) => opened,
        Err(e) => {
            warn!("could not connect client {:?}: {}", request.response_path, e);
            registry.set_state(id, SessionState::Idle);
            return;
        }
    };

    registry.attach(id, notification);
    if let Err(e) = conn.send(Response::new(OpCode::Connect, ResultCode::Success)) {
        warn!("could not acknowledge connection: {}", e);
        registry.detach(id);
        return;
    }
    info!(client = ?request.response_path, "session established");

    let clean = conn.serve_requests(id, registry, engine);

    registry.detach(id);
    if !clean {
        if let Err(e) = engine.disconnect(id) {
            warn!("could not drop subscriptions: {}", e);
        }
        registry.clear_subscriptions(id);
    }
    info!("session closed");
}

/// The request and response pipes of an established session
struct Connection {
    request: BufReader<File>,
    response: File,
}

impl Connection {
    /// Opens the response, request and notification pipes, in that order.
    /// If one of them fails, a failed connect acknowledgment is sent when the response pipe
    /// is already open.
    fn open(request: &ConnectRequest) -> Result<(Connection, File)> {
        let mut response = OpenOptions::new()
            .write(true)
            .open(&request.response_path)?;

        let refuse = |response: &mut File, e: io::Error| {
            let nack = Response::new(OpCode::Connect, ResultCode::Failure).encode();
            if let Err(e) = response.write_all(&nack) {
                warn!("could not refuse connection: {}", e);
            }
            e
        };

        let request_pipe =
            File::open(&request.request_path).map_err(|e| refuse(&mut response, e))?;
        let notification = OpenOptions::new()
            .write(true)
            .open(&request.notification_path)
            .map_err(|e| refuse(&mut response, e))?;

        let conn = Connection {
            request: BufReader::new(request_pipe),
            response,
        };
        Ok((conn, notification))
    }

    /// Serves requests until the client leaves.
    /// Returns `true` if the session ended with a `DISCONNECT` request.
    fn serve_requests<E: KvsEngine>(
        &mut self,
        id: SessionId,
        registry: &SessionRegistry,
        engine: &E,
    ) -> bool {
        loop {
            let op = match read_op(&mut self.request) {
                Ok(Some(op)) => op,
                Ok(None) => {
                    debug!("client closed its request pipe");
                    return false;
                }
                Err(e) => {
                    warn!("could not read request: {}", e);
                    return false;
                }
            };
            if registry.is_evicted(id) {
                info!("session was evicted by a cleanup sweep");
                return false;
            }

            match OpCode::try_from(op) {
                Ok(OpCode::Disconnect) => {
                    let result = match engine.disconnect(id) {
                        Ok(()) => ResultCode::Success,
                        Err(e) => {
                            warn!("could not drop subscriptions: {}", e);
                            ResultCode::Failure
                        }
                    };
                    self.reply(OpCode::Disconnect, result);
                    registry.clear_subscriptions(id);
                    return true;
                }
                Ok(OpCode::Subscribe) => {
                    let key = match read_field(&mut self.request) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!("could not read subscription key: {}", e);
                            return false;
                        }
                    };
                    let subscribed = engine.subscribe(id, &key).unwrap_or_else(|e| {
                        warn!(key = key.as_str(), "subscribe failed: {}", e);
                        false
                    });
                    if subscribed {
                        registry.add_subscription(id, key);
                    }
                    self.reply(OpCode::Subscribe, subscribed.into());
                }
                Ok(OpCode::Unsubscribe) => {
                    let key = match read_field(&mut self.request) {
                        Ok(key) => key,
                        Err(e) => {
                            warn!("could not read subscription key: {}", e);
                            return false;
                        }
                    };
                    let unsubscribed = engine.unsubscribe(id, &key).unwrap_or_else(|e| {
                        warn!(key = key.as_str(), "unsubscribe failed: {}", e);
                        false
                    });
                    if unsubscribed {
                        registry.remove_subscription(id, &key);
                    }
                    self.reply(OpCode::Unsubscribe, unsubscribed.into());
                }
                Ok(OpCode::Connect) | Err(_) => warn!(op, "ignoring unexpected op code"),
            }
        }
    }

    fn send(&mut self, response: Response) -> io::Result<()> {
        self.response.write_all(&response.encode())
    }

    /// a response that cannot be written is logged, the session keeps going
    fn reply(&mut self, op: OpCode, result: ResultCode) {
        if let Err(e) = self.send(Response::new(op, result)) {
            warn!(?op, "could not send response: {}", e);
        }
    }
}

/// reads one op code, `None` at end of stream
fn read_op<R: Read>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut op = [0u8; 1];
    loop {
        match reader.read(&mut op) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(op[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
