use super::Shared;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Cancels a blocked mailbox call from another thread; the first call to
/// observe a raised token resets it
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    raised: AtomicBool,
    next_id: AtomicU64,
    parked: Mutex<HashMap<u64, Weak<Shared>>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the token and wake every call currently parked on it
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);

        let parked: Vec<Arc<Shared>> = self
            .inner
            .parked
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        debug!("Interrupt raised, waking {} parked call(s)", parked.len());
        for shared in parked {
            shared.wake_all();
        }
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Lower the token without waking anyone
    pub fn reset(&self) {
        self.inner.raised.store(false, Ordering::SeqCst);
    }

    /// Consume a raised token
    pub(crate) fn take(&self) -> bool {
        self.inner.raised.swap(false, Ordering::SeqCst)
    }

    // Register before the first `take` so a concurrent raise cannot be missed
    pub(crate) fn register(&self, shared: &Arc<Shared>) -> Registration<'_> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.parked.lock().insert(id, Arc::downgrade(shared));
        Registration {
            interrupt: self,
            id,
        }
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

pub(crate) struct Registration<'a> {
    interrupt: &'a Interrupt,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.interrupt.inner.parked.lock().remove(&self.id);
    }
}
