pub mod loopback;
mod registry;

use crate::error::{Error, Result};
use crate::mailbox::{Link, Mailbox};
use crate::message::{ArrivedMessage, Payload, QoS};
use crate::topic::{Topic, TopicFilter};
use crate::{ClientId, SessionConfig};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub use registry::SessionRegistry;
use registry::WeakRegistry;

/// The wire-level client a session drives; it reports arrivals through the
/// [`DeliverySink`] handed to `connect`
pub trait Transport: Send + Sync {
    fn connect(&self, sink: DeliverySink) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn publish(&self, topic: &Topic, payload: Bytes, qos: QoS, retain: bool) -> Result<()>;
    fn subscribe(&self, filter: &TopicFilter, qos: QoS) -> Result<()>;
    fn unsubscribe(&self, filter: &TopicFilter) -> Result<()>;
}

/// Callback handle a transport uses to feed a session's mailbox
#[derive(Clone)]
pub struct DeliverySink {
    session: ClientId,
    mailbox: Mailbox,
}

impl DeliverySink {
    /// Report one arrived message; a malformed topic or QoS is discarded
    pub fn deliver(
        &self,
        topic: &str,
        payload: impl Into<Payload>,
        qos: u8,
        retained: bool,
        duplicate: bool,
    ) -> Result<()> {
        match ArrivedMessage::from_delivery(topic, payload, qos, retained, duplicate) {
            Ok(message) => {
                self.mailbox.enqueue(message);
                Ok(())
            }
            Err(e) => {
                warn!("Session {} discarded delivery on {:?}: {}", self.session, topic, e);
                Err(e)
            }
        }
    }

    /// Report that the connection dropped; parked consumers fail with the cause
    pub fn connection_lost(&self, cause: &str) {
        warn!("Session {} lost its connection: {}", self.session, cause);
        self.mailbox.set_link(Link::Lost(cause.to_string()));
    }
}

/// A client session: a mailbox plus the transport that fills it
#[derive(Clone)]
pub struct Session {
    id: ClientId,
    config: Arc<SessionConfig>,
    transport: Arc<dyn Transport>,
    mailbox: Mailbox,
    registry: Option<WeakRegistry>,
    lifecycle: Arc<Mutex<()>>,
}

impl Session {
    /// Create a new, disconnected session
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let id = ClientId::new();
        debug!("Creating session {} ({})", config.name, id);
        Ok(Self {
            id,
            config: Arc::new(config),
            transport,
            mailbox: Mailbox::with_link(Link::Down),
            registry: None,
            lifecycle: Arc::new(Mutex::new(())),
        })
    }

    /// Track this session in `registry` while it is connected.
    ///
    /// The session only keeps a weak reference, so dropping the registry
    /// releases every session it still holds.
    pub fn with_registry(mut self, registry: &SessionRegistry) -> Self {
        self.registry = Some(registry.downgrade());
        self
    }

    fn registry(&self) -> Option<SessionRegistry> {
        self.registry.as_ref().and_then(WeakRegistry::upgrade)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn link(&self) -> Link {
        self.mailbox.link()
    }

    pub fn is_connected(&self) -> bool {
        self.link() == Link::Up
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.link() {
            Link::Up => Ok(()),
            Link::Down => Err(Error::NotConnected),
            Link::Lost(cause) => Err(Error::ConnectionLost(cause)),
        }
    }

    /// Connect and subscribe the configured filters; a no-op when connected
    pub fn connect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        if self.is_connected() {
            debug!("Session {} is already connected", self.id);
            return Ok(());
        }

        info!("Connecting session {} ({})", self.config.name, self.id);
        // Up before the transport starts delivering, so nothing is dropped
        self.mailbox.set_link(Link::Up);
        let sink = DeliverySink {
            session: self.id,
            mailbox: self.mailbox.clone(),
        };
        if let Err(e) = self.transport.connect(sink) {
            self.mailbox.set_link(Link::Down);
            return Err(e);
        }

        if let Some(registry) = self.registry() {
            registry.register(self);
        }

        for filter in &self.config.subscribe_on_connect {
            if let Err(e) = self.transport.subscribe(filter, self.config.default_qos) {
                warn!("Session {} failed to subscribe to {}: {}", self.id, filter, e);
                self.abort_connect();
                return Err(e);
            }
            info!("Session {} subscribed to {}", self.id, filter);
        }
        Ok(())
    }

    /// Undo a partially completed connect so a later `connect` starts over
    fn abort_connect(&self) {
        if let Err(e) = self.transport.disconnect() {
            warn!("Ignoring disconnect failure for session {}: {}", self.id, e);
        }
        self.teardown();
    }

    fn teardown(&self) {
        self.mailbox.set_link(Link::Down);
        if self.config.clear_on_disconnect {
            self.mailbox.purge();
        }
        if let Some(registry) = self.registry() {
            registry.unregister(&self.id);
        }
    }

    /// Disconnect and tear down locally, even if the transport reports an error
    pub fn disconnect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock();
        if self.link() == Link::Down {
            return Err(Error::NotConnected);
        }

        info!("Disconnecting session {} ({})", self.config.name, self.id);
        let result = self.transport.disconnect();
        self.teardown();
        result
    }

    /// Publish with the configured default QoS
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>, retain: bool) -> Result<()> {
        self.publish_with_qos(topic, payload, self.config.default_qos, retain)
    }

    pub fn publish_with_qos(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        let topic = Topic::new(topic)?;
        self.ensure_connected()?;
        let payload = payload.into();
        debug!(
            "Session {} publishing to {} ({} bytes)",
            self.id,
            topic,
            payload.len()
        );
        self.transport.publish(&topic, payload, qos, retain)
    }

    /// Subscribe with the configured default QoS
    pub fn subscribe(&self, filter: &str) -> Result<()> {
        self.subscribe_with_qos(filter, self.config.default_qos)
    }

    pub fn subscribe_with_qos(&self, filter: &str, qos: QoS) -> Result<()> {
        let filter = TopicFilter::new(filter)?;
        self.ensure_connected()?;
        info!("Session {} subscribing to {}", self.id, filter);
        self.transport.subscribe(&filter, qos)
    }

    pub fn unsubscribe(&self, filter: &str) -> Result<()> {
        let filter = TopicFilter::new(filter)?;
        self.ensure_connected()?;
        info!("Session {} unsubscribing from {}", self.id, filter);
        self.transport.unsubscribe(&filter)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}
