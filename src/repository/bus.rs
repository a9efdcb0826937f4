//! In-process delivery of invalidations between the sessions of one
//! repository.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, Weak};

use crate::core::Result;
use crate::fragment::Invalidations;
use crate::session::SessionState;

struct Registration {
    sender: Sender<Invalidations>,
    state: Weak<Mutex<SessionState>>,
}

/// Registry of live sessions. Each session owns the receiving end of its
/// channel and drains it whenever it touches its state.
#[derive(Default)]
pub struct InvalidationBus {
    next_id: AtomicU64,
    sessions: Mutex<BTreeMap<u64, Registration>>,
}

impl std::fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns its id and mailbox.
    pub(crate) fn register(&self, state: &Arc<Mutex<SessionState>>) -> Result<(u64, Receiver<Invalidations>)> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (sender, receiver) = mpsc::channel();
        self.sessions.lock()?.insert(
            id,
            Registration {
                sender,
                state: Arc::downgrade(state),
            },
        );
        Ok((id, receiver))
    }

    pub(crate) fn unregister(&self, id: u64) -> Result<()> {
        self.sessions.lock()?.remove(&id);
        Ok(())
    }

    /// Sends a copy of `invalidations` to every session but `from`.
    /// Sessions whose receiver is gone are dropped.
    pub(crate) fn broadcast(&self, from: u64, invalidations: &Invalidations) -> Result<usize> {
        let mut sessions = self.sessions.lock()?;
        let mut dead = Vec::new();
        let mut sent = 0;
        for (id, registration) in sessions.iter().filter(|(id, _)| **id != from) {
            if registration.sender.send(invalidations.clone()).is_ok() {
                sent += 1;
            } else {
                dead.push(*id);
            }
        }
        for id in dead {
            log::debug!("Dropping session {} from the invalidation bus", id);
            sessions.remove(&id);
        }
        Ok(sent)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.sessions.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// States of the live sessions. The registry lock is released before
    /// the caller gets to lock any of them.
    pub(crate) fn states(&self) -> Result<Vec<Arc<Mutex<SessionState>>>> {
        Ok(self
            .sessions
            .lock()?
            .values()
            .filter_map(|r| r.state.upgrade())
            .collect())
    }
}
