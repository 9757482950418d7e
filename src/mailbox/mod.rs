mod interrupt;
mod wait;

use crate::error::{Error, Result};
use crate::message::ArrivedMessage;
use crate::topic::TopicFilter;
use crate::MailboxStats;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, Level};

pub use interrupt::Interrupt;
pub use wait::Timeout;

use wait::{any_match, locate, Deadline, Query};

/// State of the owning session's connection as seen by the mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    Up,
    Down,
    /// The transport reported the connection gone, with its cause
    Lost(String),
}

impl Link {
    fn check(&self) -> Result<()> {
        match self {
            Link::Up => Ok(()),
            Link::Down => Err(Error::NotConnected),
            Link::Lost(cause) => Err(Error::ConnectionLost(cause.clone())),
        }
    }
}

/// Statistics counters for the mailbox
#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    consumed: AtomicU64,
    evicted: AtomicU64,
    dropped: AtomicU64,
}

struct State {
    messages: VecDeque<ArrivedMessage>,
    link: Link,
}

pub(crate) struct Shared {
    state: Mutex<State>,
    arrival: Condvar,
    counters: Counters,
}

impl Shared {
    // Locking first orders the wakeup after a waiter that is about to park
    pub(crate) fn wake_all(&self) {
        drop(self.state.lock());
        self.arrival.notify_all();
    }
}

/// Arrival-ordered buffer of messages delivered to one session.
///
/// The transport's delivery thread appends; any number of threads peek, pop
/// and wait for messages matching topic filters.
#[derive(Clone)]
pub struct Mailbox {
    shared: Arc<Shared>,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    /// Create an empty mailbox whose link is up
    pub fn new() -> Self {
        Self::with_link(Link::Up)
    }

    pub(crate) fn with_link(link: Link) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    messages: VecDeque::new(),
                    link,
                }),
                arrival: Condvar::new(),
                counters: Counters::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock()
    }

    /// Append a message and wake all waiters.
    ///
    /// Called from the transport's delivery thread; it never waits on
    /// consumers. Messages arriving while the link is down are dropped.
    pub fn enqueue(&self, message: ArrivedMessage) {
        let topic = tracing::enabled!(Level::DEBUG).then(|| message.topic().clone());
        let accepted = {
            let mut state = self.lock();
            if state.link == Link::Up {
                state.messages.push_back(message);
                Some(state.messages.len())
            } else {
                None
            }
        };

        match accepted {
            Some(buffered) => {
                self.shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                self.shared.arrival.notify_all();
                if let Some(topic) = topic {
                    debug!("Enqueued message on {} ({} buffered)", topic, buffered);
                }
            }
            None => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(topic) = topic {
                    debug!("Dropped message on {}: session not connected", topic);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    /// Remove every buffered message, returning how many were removed
    pub fn clear(&self) -> Result<usize> {
        let removed = {
            let mut state = self.lock();
            state.link.check()?;
            let removed = state.messages.len();
            state.messages.clear();
            removed
        };
        Ok(self.evicted_all(removed))
    }

    /// Empty the buffer whatever the link state, for session teardown
    pub(crate) fn purge(&self) -> usize {
        let removed = {
            let mut state = self.lock();
            let removed = state.messages.len();
            state.messages.clear();
            removed
        };
        self.evicted_all(removed)
    }

    fn evicted_all(&self, removed: usize) -> usize {
        self.count_evicted(removed);
        if removed > 0 {
            debug!("Cleared {} message(s) from mailbox", removed);
        }
        removed
    }

    /// Whether some buffered message matches `filter`
    pub fn contains(&self, filter: &TopicFilter) -> bool {
        any_match(&self.lock().messages, filter)
    }

    /// Whether every filter is matched by at least one buffered message.
    ///
    /// An empty filter set is never satisfied, so this returns `false` for
    /// `&[]` even when messages are buffered.
    pub fn contains_all(&self, filters: &[TopicFilter]) -> bool {
        if filters.is_empty() {
            return false;
        }
        Query::All(filters).is_satisfied(&self.lock().messages)
    }

    /// Keep only messages matching `filter`; returns whether anything was removed
    pub fn retain(&self, filter: &TopicFilter) -> Result<bool> {
        self.retain_all(std::slice::from_ref(filter))
    }

    /// Keep only messages matching at least one of `filters`.
    ///
    /// An empty filter set keeps nothing: the mailbox is emptied, and the
    /// result is `true` iff it held anything. Note the opposite convention
    /// from [`contains_all`](Self::contains_all).
    pub fn retain_all(&self, filters: &[TopicFilter]) -> Result<bool> {
        let removed = {
            let mut state = self.lock();
            state.link.check()?;
            let before = state.messages.len();
            state
                .messages
                .retain(|m| filters.iter().any(|f| f.matches(m.topic())));
            before - state.messages.len()
        };
        self.count_evicted(removed);
        if removed > 0 {
            debug!("Retain evicted {} message(s)", removed);
        }
        Ok(removed > 0)
    }

    /// Return the oldest message, removing it if `remove` is set.
    ///
    /// Blocks while the mailbox is empty, up to `timeout`. A timeout yields
    /// `Ok(None)`.
    pub fn get(&self, remove: bool, timeout: impl Into<Timeout>) -> Result<Option<ArrivedMessage>> {
        self.fetch(None, remove, timeout.into(), None)
    }

    /// Return the oldest message matching `filter`, removing it if `remove`
    /// is set. Other messages stay where they are.
    pub fn get_filtered(
        &self,
        filter: &TopicFilter,
        remove: bool,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<ArrivedMessage>> {
        self.fetch(Some(filter), remove, timeout.into(), None)
    }

    pub fn pop(&self, timeout: impl Into<Timeout>) -> Result<Option<ArrivedMessage>> {
        self.get(true, timeout)
    }

    pub fn pop_filtered(
        &self,
        filter: &TopicFilter,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<ArrivedMessage>> {
        self.get_filtered(filter, true, timeout)
    }

    pub fn peek(&self, timeout: impl Into<Timeout>) -> Result<Option<ArrivedMessage>> {
        self.get(false, timeout)
    }

    pub fn peek_filtered(
        &self,
        filter: &TopicFilter,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<ArrivedMessage>> {
        self.get_filtered(filter, false, timeout)
    }

    /// Pop with a timeout in milliseconds.
    ///
    /// Unlike [`get`](Self::get) and the [`Timeout`] conversions, a negative
    /// value is rejected with [`Error::InvalidArgument`] instead of meaning
    /// "wait forever".
    pub fn pop_timeout(&self, millis: i64) -> Result<Option<ArrivedMessage>> {
        if millis < 0 {
            return Err(Error::InvalidArgument(format!(
                "timeout must not be negative, got {}ms",
                millis
            )));
        }
        self.pop(Timeout::from_millis(millis))
    }

    /// Block until a message matching `filter` (or any message, for `None`)
    /// is buffered. Returns `false` on timeout. Nothing is consumed.
    pub fn wait(&self, filter: Option<&TopicFilter>, timeout: impl Into<Timeout>) -> Result<bool> {
        self.await_query(query_for(filter), timeout.into(), None)
    }

    /// Block until every filter is matched by some buffered message.
    ///
    /// With an empty filter set this waits for any message at all.
    pub fn wait_all(&self, filters: &[TopicFilter], timeout: impl Into<Timeout>) -> Result<bool> {
        self.await_query(query_for_all(filters), timeout.into(), None)
    }

    /// Remove and return every buffered message in arrival order
    pub fn drain(&self) -> Result<Vec<ArrivedMessage>> {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.link.check()?;
            state.messages.drain(..).collect()
        };
        self.count_consumed(drained.len());
        Ok(drained)
    }

    /// Remove and return every message matching `filter`, keeping the rest in place
    pub fn drain_filtered(&self, filter: &TopicFilter) -> Result<Vec<ArrivedMessage>> {
        let drained = {
            let mut state = self.lock();
            state.link.check()?;
            let (matched, kept): (VecDeque<_>, VecDeque<_>) = state
                .messages
                .drain(..)
                .partition(|m| filter.matches(m.topic()));
            state.messages = kept;
            Vec::from(matched)
        };
        self.count_consumed(drained.len());
        Ok(drained)
    }

    /// Copy of the buffered messages, oldest first
    pub fn snapshot(&self) -> Vec<ArrivedMessage> {
        self.lock().messages.iter().cloned().collect()
    }

    pub fn link(&self) -> Link {
        self.lock().link.clone()
    }

    /// Update the link state, waking parked callers when it goes down
    pub(crate) fn set_link(&self, link: Link) {
        let up = link == Link::Up;
        self.lock().link = link;
        if !up {
            self.shared.arrival.notify_all();
        }
    }

    pub fn stats(&self) -> MailboxStats {
        let counters = &self.shared.counters;
        MailboxStats {
            buffered: self.len(),
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            consumed: counters.consumed.load(Ordering::Relaxed),
            evicted: counters.evicted.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Blocking calls that can be cancelled by raising `interrupt`
    pub fn interruptible<'a>(&'a self, interrupt: &'a Interrupt) -> Interruptible<'a> {
        Interruptible {
            mailbox: self,
            interrupt,
        }
    }

    fn fetch(
        &self,
        filter: Option<&TopicFilter>,
        remove: bool,
        timeout: Timeout,
        interrupt: Option<&Interrupt>,
    ) -> Result<Option<ArrivedMessage>> {
        let found = self.park_until(timeout, interrupt, |messages| {
            let index = locate(messages, filter)?;
            if remove {
                messages.remove(index)
            } else {
                messages.get(index).cloned()
            }
        })?;

        if remove && found.is_some() {
            self.count_consumed(1);
        }
        Ok(found)
    }

    fn await_query(
        &self,
        query: Query<'_>,
        timeout: Timeout,
        interrupt: Option<&Interrupt>,
    ) -> Result<bool> {
        let satisfied = self.park_until(timeout, interrupt, |messages| {
            query.is_satisfied(messages).then_some(())
        })?;
        Ok(satisfied.is_some())
    }

    // Per round: interrupt, link, search, deadline. Only a successful search mutates.
    fn park_until<T>(
        &self,
        timeout: Timeout,
        interrupt: Option<&Interrupt>,
        mut search: impl FnMut(&mut VecDeque<ArrivedMessage>) -> Option<T>,
    ) -> Result<Option<T>> {
        let deadline = timeout.deadline();
        let mut state = self.lock();
        let _registration = interrupt.map(|i| i.register(&self.shared));

        loop {
            if interrupt.map_or(false, Interrupt::take) {
                return Err(Error::Interrupted);
            }
            state.link.check()?;
            if let Some(found) = search(&mut state.messages) {
                return Ok(Some(found));
            }

            match deadline {
                Deadline::Never => self.shared.arrival.wait(&mut state),
                Deadline::At(at) => {
                    if Instant::now() >= at {
                        return Ok(None);
                    }
                    self.shared.arrival.wait_until(&mut state, at);
                }
            }
        }
    }

    fn count_consumed(&self, n: usize) {
        self.shared
            .counters
            .consumed
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    fn count_evicted(&self, n: usize) {
        self.shared
            .counters
            .evicted
            .fetch_add(n as u64, Ordering::Relaxed);
    }
}

fn query_for(filter: Option<&TopicFilter>) -> Query<'_> {
    filter.map_or(Query::Any, Query::One)
}

fn query_for_all(filters: &[TopicFilter]) -> Query<'_> {
    if filters.is_empty() {
        Query::Any
    } else {
        Query::All(filters)
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Mailbox")
            .field("buffered", &state.messages.len())
            .field("link", &state.link)
            .finish()
    }
}

/// Blocking mailbox calls bound to an [`Interrupt`] token.
///
/// Behaves like the corresponding [`Mailbox`] methods, but a raised token
/// ends the call with [`Error::Interrupted`]. A message that arrives at the
/// same moment stays buffered for the next call.
#[derive(Debug, Clone, Copy)]
pub struct Interruptible<'a> {
    mailbox: &'a Mailbox,
    interrupt: &'a Interrupt,
}

impl<'a> Interruptible<'a> {
    pub fn get(&self, remove: bool, timeout: impl Into<Timeout>) -> Result<Option<ArrivedMessage>> {
        self.mailbox
            .fetch(None, remove, timeout.into(), Some(self.interrupt))
    }

    pub fn get_filtered(
        &self,
        filter: &TopicFilter,
        remove: bool,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<ArrivedMessage>> {
        self.mailbox
            .fetch(Some(filter), remove, timeout.into(), Some(self.interrupt))
    }

    pub fn pop(&self, timeout: impl Into<Timeout>) -> Result<Option<ArrivedMessage>> {
        self.get(true, timeout)
    }

    pub fn pop_filtered(
        &self,
        filter: &TopicFilter,
        timeout: impl Into<Timeout>,
    ) -> Result<Option<ArrivedMessage>> {
        self.get_filtered(filter, true, timeout)
    }

    pub fn wait(&self, filter: Option<&TopicFilter>, timeout: impl Into<Timeout>) -> Result<bool> {
        self.mailbox
            .await_query(query_for(filter), timeout.into(), Some(self.interrupt))
    }

    pub fn wait_all(&self, filters: &[TopicFilter], timeout: impl Into<Timeout>) -> Result<bool> {
        self.mailbox
            .await_query(query_for_all(filters), timeout.into(), Some(self.interrupt))
    }
}
