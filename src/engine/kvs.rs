use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{KvsEngine, Notifier, SessionId};
use crate::error::{KvsError, Result};
use crate::protocol::DELETED_VALUE;
use tracing::{debug, instrument};

/// The in-memory [`KvsEngine`] shared by the job workers and the session workers.
///
/// Keys are kept sorted so reads and dumps come out in key order. Next to every key the
/// store keeps the set of sessions subscribed to it, and every write or delete of such a
/// key is pushed to those sessions through the [`Notifier`] given at construction.
///
/// Cloning a `KvStore` is cheap, all clones share the same table.
#[derive(Clone)]
pub struct KvStore {
    table: Arc<RwLock<Table>>,
    notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Default)]
struct Table {
    // the key/value pairs, in key order
    entries: BTreeMap<String, String>,

    // maps keys to the sessions subscribed to them
    subscribers: HashMap<String, BTreeSet<SessionId>>,
}

impl Table {
    fn notify(&self, notifier: &dyn Notifier, key: &str, value: &str) {
        if let Some(sessions) = self.subscribers.get(key) {
            for &session in sessions {
                notifier.notify(session, key, value);
            }
        }
    }
}

// used when nobody is listening for key changes
struct Silent;

impl Notifier for Silent {
    fn notify(&self, _session: SessionId, _key: &str, _value: &str) {}
}

impl KvStore {
    /// creates an empty store that drops all notifications
    pub fn new() -> KvStore {
        KvStore::with_notifier(Arc::new(Silent))
    }

    /// creates an empty store that delivers key changes to `notifier`
    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> KvStore {
        KvStore {
            table: Arc::new(RwLock::new(Table::default())),
            notifier,
        }
    }

    fn read_table(&self) -> Result<RwLockReadGuard<'_, Table>> {
        self.table
            .read()
            .map_err(|_| KvsError::StringErr("the store lock is poisoned".to_string()))
    }

    fn write_table(&self) -> Result<RwLockWriteGuard<'_, Table>> {
        self.table
            .write()
            .map_err(|_| KvsError::StringErr("the store lock is poisoned".to_string()))
    }
}

impl Default for KvStore {
    fn default() -> Self {
        KvStore::new()
    }
}

impl fmt::Debug for KvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvStore").field("table", &self.table).finish()
    }
}

impl KvsEngine for KvStore {
    /// inserts every pair into the store, overriding existing values, and notifies the
    /// subscribers of each key written
    #[instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    fn write(&self, pairs: &[(String, String)]) -> Result<()> {
        let mut table = self.write_table()?;
        for (key, value) in pairs {
            table.entries.insert(key.clone(), value.clone());
            table.notify(self.notifier.as_ref(), key, value);
        }
        Ok(())
    }

    fn read(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>> {
        let table = self.read_table()?;
        let mut values: Vec<_> = keys
            .iter()
            .map(|key| (key.clone(), table.entries.get(key).cloned()))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(values)
    }

    #[instrument(skip(self, keys), fields(keys = keys.len()))]
    fn delete(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut sorted = keys.to_vec();
        sorted.sort();

        let mut table = self.write_table()?;
        let mut missing = vec![];
        for key in sorted {
            if table.entries.remove(&key).is_some() {
                table.notify(self.notifier.as_ref(), &key, DELETED_VALUE);
            } else {
                missing.push(key);
            }
        }
        Ok(missing)
    }

    fn show(&self) -> Result<Vec<(String, String)>> {
        let table = self.read_table()?;
        Ok(table
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn subscribe(&self, session: SessionId, key: &str) -> Result<bool> {
        let mut table = self.write_table()?;
        if !table.entries.contains_key(key) {
            debug!(session, key, "subscription to a missing key");
            return Ok(false);
        }
        table
            .subscribers
            .entry(key.to_string())
            .or_default()
            .insert(session);
        Ok(true)
    }

    fn unsubscribe(&self, session: SessionId, key: &str) -> Result<bool> {
        let mut table = self.write_table()?;
        let removed = match table.subscribers.get_mut(key) {
            Some(sessions) => {
                let removed = sessions.remove(&session);
                if sessions.is_empty() {
                    table.subscribers.remove(key);
                }
                removed
            }
            None => false,
        };
        Ok(removed)
    }

    fn disconnect(&self, session: SessionId) -> Result<()> {
        let mut table = self.write_table()?;
        table.subscribers.retain(|_, sessions| {
            sessions.remove(&session);
            !sessions.is_empty()
        });
        Ok(())
    }
}

/// renders the result of a READ as `[(key,value)(key2,KVSERROR)]`
pub fn render_read(values: &[(String, Option<String>)]) -> String {
    let mut out = String::from("[");
    for (key, value) in values {
        let _ = write!(out, "({},{})", key, value.as_deref().unwrap_or("KVSERROR"));
    }
    out.push_str("]\n");
    out
}

/// renders the keys a DELETE could not find as `[(key,KVSMISSING)]`.
/// Nothing is rendered when every key was deleted.
pub fn render_delete(missing: &[String]) -> String {
    if missing.is_empty() {
        return String::new();
    }
    let mut out = String::from("[");
    for key in missing {
        let _ = write!(out, "({},KVSMISSING)", key);
    }
    out.push_str("]\n");
    out
}

/// renders the store contents, one `(key, value)` line per pair.
/// This is also the format of backup files.
pub fn render_show(pairs: &[(String, String)]) -> String {
    let mut out = String::new();
    for (key, value) in pairs {
        let _ = writeln!(out, "({}, {})", key, value);
    }
    out
}
