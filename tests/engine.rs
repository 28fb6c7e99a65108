use pipekvs::engine::{render_delete, render_read, render_show};
use pipekvs::{KvStore, KvsEngine, Notifier, SessionId};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};

/// remembers every notification it is asked to deliver
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(SessionId, String, String)>>,
}

impl Notifier for Recorder {
    fn notify(&self, session: SessionId, key: &str, value: &str) {
        self.seen
            .lock()
            .unwrap()
            .push((session, key.to_string(), value.to_string()));
    }
}

impl Recorder {
    fn take(&self) -> Vec<(SessionId, String, String)> {
        std::mem::take(&mut *self.seen.lock().unwrap())
    }
}

fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
    list.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

#[test]
fn read_returns_values_in_key_order() {
    let store = KvStore::new();
    store.write(&pairs(&[("b", "2"), ("a", "1")])).unwrap();

    let values = store.read(&keys(&["b", "c", "a"])).unwrap();
    assert_eq!(render_read(&values), "[(a,1)(b,2)(c,KVSERROR)]\n");
}

#[test]
fn write_overwrites_existing_values() {
    let store = KvStore::new();
    store.write(&pairs(&[("a", "1")])).unwrap();
    store.write(&pairs(&[("a", "one")])).unwrap();
    assert_eq!(
        store.read(&keys(&["a"])).unwrap(),
        vec![("a".to_string(), Some("one".to_string()))]
    );
}

#[test]
fn delete_reports_missing_keys_only() {
    let store = KvStore::new();
    store.write(&pairs(&[("a", "1"), ("b", "2")])).unwrap();

    let missing = store.delete(&keys(&["a", "zz"])).unwrap();
    assert_eq!(render_delete(&missing), "[(zz,KVSMISSING)]\n");

    let missing = store.delete(&keys(&["b"])).unwrap();
    assert_eq!(render_delete(&missing), "");
    assert!(store.show().unwrap().is_empty());
}

#[test]
fn show_lists_every_pair() {
    let store = KvStore::new();
    store.write(&pairs(&[("x", "9"), ("m", "5")])).unwrap();
    assert_eq!(render_show(&store.show().unwrap()), "(m, 5)\n(x, 9)\n");
}

#[test]
fn subscribers_are_notified_of_writes_and_deletes() {
    let recorder = Arc::new(Recorder::default());
    let store = KvStore::with_notifier(recorder.clone());
    store.write(&pairs(&[("a", "1"), ("b", "1")])).unwrap();

    assert!(store.subscribe(3, "a").unwrap());
    assert!(store.subscribe(5, "a").unwrap());
    store.write(&pairs(&[("a", "2"), ("b", "2")])).unwrap();
    assert_eq!(
        recorder.take(),
        vec![(3, "a".to_string(), "2".to_string()), (5, "a".to_string(), "2".to_string())]
    );

    store.delete(&keys(&["a"])).unwrap();
    assert_eq!(
        recorder.take(),
        vec![
            (3, "a".to_string(), "DELETED".to_string()),
            (5, "a".to_string(), "DELETED".to_string())
        ]
    );
}

#[test]
fn subscribing_to_a_missing_key_fails() {
    let store = KvStore::new();
    assert!(!store.subscribe(0, "ghost").unwrap());
}

#[test]
fn unsubscribe_only_succeeds_for_existing_subscriptions() {
    let recorder = Arc::new(Recorder::default());
    let store = KvStore::with_notifier(recorder.clone());
    store.write(&pairs(&[("a", "1")])).unwrap();

    assert!(!store.unsubscribe(1, "a").unwrap());
    assert!(store.subscribe(1, "a").unwrap());
    assert!(store.unsubscribe(1, "a").unwrap());
    assert!(!store.unsubscribe(1, "a").unwrap());

    store.write(&pairs(&[("a", "2")])).unwrap();
    assert!(recorder.take().is_empty());
}

#[test]
fn disconnect_drops_all_subscriptions_of_the_session() {
    let recorder = Arc::new(Recorder::default());
    let store = KvStore::with_notifier(recorder.clone());
    store.write(&pairs(&[("a", "1"), ("b", "1")])).unwrap();
    store.subscribe(2, "a").unwrap();
    store.subscribe(2, "b").unwrap();
    store.subscribe(4, "b").unwrap();

    store.disconnect(2).unwrap();
    store.write(&pairs(&[("a", "2"), ("b", "2")])).unwrap();
    assert_eq!(recorder.take(), vec![(4, "b".to_string(), "2".to_string())]);
}

#[test]
fn concurrent_writers_never_lose_keys() {
    let store = KvStore::new();
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(t);
                for i in 0..200 {
                    let value = rng.gen_range(0..1000).to_string();
                    store.write(&[(format!("t{}-{}", t, i), value)]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(store.show().unwrap().len(), 800);
}
