use super::{DeliverySink, Transport};
use crate::error::{Error, Result};
use crate::message::QoS;
use crate::topic::{Topic, TopicFilter};
use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

enum Command {
    Attach { id: u64, sink: DeliverySink },
    Detach { id: u64 },
    Subscribe { id: u64, filter: TopicFilter, qos: QoS },
    Unsubscribe { id: u64, filter: TopicFilter },
    Publish { topic: Topic, payload: Bytes, qos: QoS, retain: bool },
    Sever { cause: String },
    Shutdown,
}

struct Client {
    sink: DeliverySink,
    subscriptions: Vec<(TopicFilter, QoS)>,
}

impl Client {
    /// Highest granted QoS among matching subscriptions
    fn granted(&self, topic: &Topic) -> Option<QoS> {
        self.subscriptions
            .iter()
            .filter(|(f, _)| f.matches(topic))
            .map(|(_, qos)| *qos)
            .max_by_key(|qos| u8::from(*qos))
    }
}

fn downgrade(published: QoS, granted: QoS) -> QoS {
    if u8::from(published) <= u8::from(granted) {
        published
    } else {
        granted
    }
}

/// Routing state, owned by the delivery thread
#[derive(Default)]
struct Router {
    clients: HashMap<u64, Client>,
    retained: BTreeMap<String, (Topic, Bytes, QoS)>,
}

impl Router {
    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(command) = commands.recv() {
            match command {
                Command::Attach { id, sink } => {
                    self.clients.insert(
                        id,
                        Client {
                            sink,
                            subscriptions: Vec::new(),
                        },
                    );
                }
                Command::Detach { id } => {
                    self.clients.remove(&id);
                }
                Command::Subscribe { id, filter, qos } => self.subscribe(id, filter, qos),
                Command::Unsubscribe { id, filter } => {
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.subscriptions.retain(|(f, _)| f != &filter);
                    }
                }
                Command::Publish {
                    topic,
                    payload,
                    qos,
                    retain,
                } => self.publish(topic, payload, qos, retain),
                Command::Sever { cause } => {
                    for (_, client) in self.clients.drain() {
                        client.sink.connection_lost(&cause);
                    }
                }
                Command::Shutdown => break,
            }
        }
        debug!("Loopback delivery thread exiting");
    }

    fn subscribe(&mut self, id: u64, filter: TopicFilter, qos: QoS) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        client.subscriptions.retain(|(f, _)| f != &filter);
        client.subscriptions.push((filter.clone(), qos));

        for (topic, payload, published) in self.retained.values() {
            if filter.matches(topic) {
                deliver(&client.sink, topic, payload, downgrade(*published, qos), true);
            }
        }
    }

    fn publish(&mut self, topic: Topic, payload: Bytes, qos: QoS, retain: bool) {
        if retain {
            // An empty retained publication clears the topic
            if payload.is_empty() {
                self.retained.remove(topic.name());
            } else {
                self.retained.insert(
                    topic.name().to_string(),
                    (topic.clone(), payload.clone(), qos),
                );
            }
        }

        for client in self.clients.values() {
            if let Some(granted) = client.granted(&topic) {
                deliver(&client.sink, &topic, &payload, downgrade(qos, granted), false);
            }
        }
    }
}

fn deliver(sink: &DeliverySink, topic: &Topic, payload: &Bytes, qos: QoS, retained: bool) {
    // The sink logs rejected deliveries itself
    let _ = sink.deliver(topic.name(), payload.clone(), qos.into(), retained, false);
}

/// An in-process broker with its own delivery thread. Retained messages are
/// replayed to new subscribers.
pub struct LoopbackBroker {
    commands: Sender<Command>,
    next_id: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl LoopbackBroker {
    /// Start the broker's delivery thread
    pub fn start() -> Result<Self> {
        let (commands, receiver) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("loopback-broker".into())
            .spawn(move || Router::default().run(receiver))?;

        info!("Started loopback broker");
        Ok(Self {
            commands,
            next_id: Arc::new(AtomicU64::new(1)),
            worker: Some(worker),
        })
    }

    /// A new transport connected to this broker
    pub fn transport(&self) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            commands: self.commands.clone(),
        })
    }

    /// Drop every attached connection, reporting `cause` to each session
    pub fn sever_all(&self, cause: &str) -> Result<()> {
        send(
            &self.commands,
            Command::Sever {
                cause: cause.to_string(),
            },
        )
    }
}

impl Drop for LoopbackBroker {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Loopback delivery thread panicked");
            }
        }
    }
}

fn send(commands: &Sender<Command>, command: Command) -> Result<()> {
    commands
        .send(command)
        .map_err(|_| Error::Transport("loopback broker has shut down".into()))
}

/// A session's connection to a [`LoopbackBroker`]
pub struct LoopbackTransport {
    id: u64,
    commands: Sender<Command>,
}

impl LoopbackTransport {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Transport for LoopbackTransport {
    fn connect(&self, sink: DeliverySink) -> Result<()> {
        send(&self.commands, Command::Attach { id: self.id, sink })
    }

    fn disconnect(&self) -> Result<()> {
        send(&self.commands, Command::Detach { id: self.id })
    }

    fn publish(&self, topic: &Topic, payload: Bytes, qos: QoS, retain: bool) -> Result<()> {
        send(
            &self.commands,
            Command::Publish {
                topic: topic.clone(),
                payload,
                qos,
                retain,
            },
        )
    }

    fn subscribe(&self, filter: &TopicFilter, qos: QoS) -> Result<()> {
        send(
            &self.commands,
            Command::Subscribe {
                id: self.id,
                filter: filter.clone(),
                qos,
            },
        )
    }

    fn unsubscribe(&self, filter: &TopicFilter) -> Result<()> {
        send(
            &self.commands,
            Command::Unsubscribe {
                id: self.id,
                filter: filter.clone(),
            },
        )
    }
}
