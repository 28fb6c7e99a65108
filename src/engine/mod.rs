//! This module provides the key/value storage engine used by both the job pipeline and the
//! client sessions.
//! The engine is reached only through the [`KvsEngine`] trait, so the job dispatcher and the
//! session workers never depend on how the data is actually kept.
use crate::Result;

/// Identifies a session slot, in `[0, MAX_SESSION_COUNT)`
pub type SessionId = usize;

/// A trait for the functionality of a key/value storage engine with key subscriptions
pub trait KvsEngine: Clone + Send + Sync + 'static {
    /// sets every `(key, value)` pair
    ///
    /// If a key already exists its previous value will be overwritten.
    fn write(&self, pairs: &[(String, String)]) -> Result<()>;

    /// Gets the values of the given `keys`, sorted by key.
    ///
    /// A key that does not exist is paired with `None`.
    fn read(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>>;

    /// Removes the given `keys` (and associated values) from the store
    ///
    /// Returns the keys that were not found, sorted.
    fn delete(&self, keys: &[String]) -> Result<Vec<String>>;

    /// Returns every `(key, value)` pair in key order
    fn show(&self) -> Result<Vec<(String, String)>>;

    /// Subscribes `session` to changes of `key`.
    ///
    /// Returns `false` if the key does not exist.
    fn subscribe(&self, session: SessionId, key: &str) -> Result<bool>;

    /// Removes the subscription of `session` to `key`.
    ///
    /// Returns `false` if the session was not subscribed to the key.
    fn unsubscribe(&self, session: SessionId, key: &str) -> Result<bool>;

    /// Removes every subscription held by `session`
    fn disconnect(&self, session: SessionId) -> Result<()>;
}

/// Receives key changes for a subscribed session.
///
/// The engine calls this while it still holds its table lock, so implementations must not
/// call back into the engine.
pub trait Notifier: Send + Sync {
    /// delivers the new `value` of `key` to `session`
    fn notify(&self, session: SessionId, key: &str, value: &str);
}

mod kvs;

pub use self::kvs::{render_delete, render_read, render_show, KvStore};
