use std::sync::Arc;
use std::thread;

use crate::engine::{KvsEngine, SessionId};
use crate::queue::AdmissionReceiver;
use crate::session::{self, SessionRegistry};
use crate::Result;
use tracing::{debug, error, instrument};

/// A pool of session workers, one thread per session slot.
///
/// Every worker shares the receiving end of the admission queue (a crossbeam MPMC channel),
/// so each pending connection is picked up by exactly one idle worker.
///
/// If a worker panics while serving a client, its slot is reset and a new thread is started
/// for the same slot, so one misbehaving client never costs the server a session.
pub struct SessionPool;

impl SessionPool {
    /// starts `sessions` workers, numbered from zero, serving connections from `admissions`.
    /// The workers exit once the admission queue is closed and drained.
    pub fn spawn<E: KvsEngine>(
        sessions: usize,
        admissions: AdmissionReceiver,
        registry: Arc<SessionRegistry>,
        engine: E,
    ) -> Result<()> {
        for id in 0..sessions {
            let worker = SessionWorker {
                id,
                admissions: admissions.clone(),
                registry: registry.clone(),
                engine: engine.clone(),
            };
            spawn_worker(worker)?;
        }
        debug!("started {} session workers", sessions);
        Ok(())
    }
}

/// Everything a session worker needs. It is also responsible for restarting the worker
/// thread of its slot if that thread panicked.
#[derive(Clone)]
struct SessionWorker<E: KvsEngine> {
    id: SessionId,
    admissions: AdmissionReceiver,
    registry: Arc<SessionRegistry>,
    engine: E,
}

impl<E: KvsEngine> Drop for SessionWorker<E> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(session = self.id, "session worker panicked, starting a new one");
            self.registry.reset(self.id);
            if let Err(e) = self.engine.disconnect(self.id) {
                error!(session = self.id, "could not drop subscriptions: {}", e);
            }
            if let Err(e) = spawn_worker(self.clone()) {
                error!(session = self.id, "failed to spawn a session worker: {}", e);
            }
        }
    }
}

fn spawn_worker<E: KvsEngine>(worker: SessionWorker<E>) -> std::io::Result<()> {
    thread::Builder::new()
        .name(format!("session-{}", worker.id))
        .spawn(move || run_sessions(worker))?;
    Ok(())
}

/// waits for a connection to arrive on the admission queue, serves it, and loops
#[instrument(skip(worker), fields(session = worker.id))]
fn run_sessions<E: KvsEngine>(worker: SessionWorker<E>) {
    while let Some(request) = worker.admissions.dequeue() {
        debug!("picked up a connection");
        session::serve(worker.id, request, &worker.registry, &worker.engine);
    }
    debug!("admission queue closed, session worker exiting");
}
