use super::Session;
use crate::ClientId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Connected sessions built with [`Session::with_registry`]
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<ClientId, Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            sessions: Arc::downgrade(&self.sessions),
        }
    }

    pub(crate) fn register(&self, session: &Session) {
        debug!("Registering session {}", session.id());
        self.sessions.write().insert(session.id(), session.clone());
    }

    pub(crate) fn unregister(&self, id: &ClientId) -> bool {
        debug!("Unregistering session {}", id);
        self.sessions.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.sessions.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.sessions.read().keys().copied().collect()
    }

    /// Best-effort disconnect of every registered session; returns how many
    /// disconnected cleanly
    pub fn disconnect_all(&self) -> usize {
        let sessions: Vec<Session> = self.sessions.write().drain().map(|(_, s)| s).collect();
        info!("Disconnecting {} session(s)", sessions.len());

        let mut clean = 0;
        for session in sessions {
            match session.disconnect() {
                Ok(()) => clean += 1,
                Err(e) => warn!("Ignoring disconnect failure for session {}: {}", session.id(), e),
            }
        }
        clean
    }
}

/// Non-owning registry handle held by sessions
#[derive(Clone)]
pub(crate) struct WeakRegistry {
    sessions: Weak<RwLock<HashMap<ClientId, Session>>>,
}

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<SessionRegistry> {
        self.sessions
            .upgrade()
            .map(|sessions| SessionRegistry { sessions })
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::message::QoS;
    use crate::session::loopback::LoopbackBroker;
    use crate::session::{DeliverySink, Transport};
    use crate::topic::{Topic, TopicFilter};
    use crate::SessionConfig;
    use bytes::Bytes;
    use tracing_test::traced_test;

    /// Connects fine, refuses to disconnect
    struct StuckTransport;

    impl Transport for StuckTransport {
        fn connect(&self, _sink: DeliverySink) -> Result<()> {
            Ok(())
        }

        fn disconnect(&self) -> Result<()> {
            Err(Error::Transport("socket already closed".into()))
        }

        fn publish(&self, _: &Topic, _: Bytes, _: QoS, _: bool) -> Result<()> {
            Ok(())
        }

        fn subscribe(&self, _: &TopicFilter, _: QoS) -> Result<()> {
            Ok(())
        }

        fn unsubscribe(&self, _: &TopicFilter) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_sessions_register_while_connected() {
        let broker = LoopbackBroker::start().unwrap();
        let registry = SessionRegistry::new();
        let session = Session::new(SessionConfig::default(), broker.transport())
            .unwrap()
            .with_registry(&registry);

        assert!(registry.is_empty());
        session.connect().unwrap();
        assert!(registry.contains(&session.id()));
        assert_eq!(registry.ids(), vec![session.id()]);

        session.disconnect().unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dropping_registry_releases_sessions() {
        let broker = LoopbackBroker::start().unwrap();
        let registry = SessionRegistry::new();
        let session = Session::new(SessionConfig::default(), broker.transport())
            .unwrap()
            .with_registry(&registry);
        session.connect().unwrap();

        let handle = registry.downgrade();
        drop(registry);
        // The registered session clone does not keep the registry alive
        assert!(handle.upgrade().is_none());
        session.disconnect().unwrap();
    }

    #[traced_test]
    #[test]
    fn test_disconnect_all_ignores_individual_failures() {
        let broker = LoopbackBroker::start().unwrap();
        let registry = SessionRegistry::new();

        let healthy: Vec<Session> = (0..2)
            .map(|_| {
                Session::new(SessionConfig::default(), broker.transport())
                    .unwrap()
                    .with_registry(&registry)
            })
            .collect();
        let stuck = Session::new(SessionConfig::default(), Arc::new(StuckTransport))
            .unwrap()
            .with_registry(&registry);

        for session in healthy.iter().chain(std::iter::once(&stuck)) {
            session.connect().unwrap();
        }
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.disconnect_all(), 2);
        assert!(registry.is_empty());
        assert!(healthy.iter().all(|s| !s.is_connected()));
        // Local teardown happens even though the transport failed
        assert!(!stuck.is_connected());
        assert!(logs_contain("Ignoring disconnect failure"));
    }
}
