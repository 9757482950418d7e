use crate::error::{Error, Result};
use crate::topic::Topic;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::time::SystemTime;

/// Quality-of-service level attached to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(Error::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

/// A view onto a range of a shared byte buffer.
///
/// The transport hands over whole packet buffers; the payload is the slice
/// of it that carries application data. Cloning never copies the bytes.
#[derive(Clone)]
pub struct Payload {
    buffer: Bytes,
    offset: usize,
    len: usize,
}

impl Payload {
    /// Create a view over `len` bytes of `buffer` starting at `offset`
    pub fn new(buffer: Bytes, offset: usize, len: usize) -> Result<Self> {
        match offset.checked_add(len) {
            Some(end) if end <= buffer.len() => Ok(Self {
                buffer,
                offset,
                len,
            }),
            _ => Err(Error::InvalidArgument(format!(
                "payload range {}+{} exceeds buffer of {} bytes",
                offset,
                len,
                buffer.len()
            ))),
        }
    }

    /// The effective payload bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// The effective payload as an owned, zero-copy `Bytes` handle
    pub fn to_bytes(&self) -> Bytes {
        self.buffer.slice(self.offset..self.offset + self.len)
    }

    /// The whole backing buffer, including bytes outside the view
    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Compare backing buffer, offset and length rather than just the view
    pub fn exact_eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.len == other.len && self.buffer == other.buffer
    }
}

impl From<Bytes> for Payload {
    fn from(buffer: Bytes) -> Self {
        let len = buffer.len();
        Self {
            buffer,
            offset: 0,
            len,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl From<&'static [u8]> for Payload {
    fn from(data: &'static [u8]) -> Self {
        Bytes::from_static(data).into()
    }
}

impl Deref for Payload {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("bytes", &String::from_utf8_lossy(self.as_bytes()))
            .finish()
    }
}

/// A message delivered by the transport and buffered in a mailbox
#[derive(Debug, Clone)]
pub struct ArrivedMessage {
    topic: Topic,
    payload: Payload,
    qos: QoS,
    retained: bool,
    duplicate: bool,
    received_at: SystemTime,
}

impl ArrivedMessage {
    /// Create a new message with no retained/duplicate flags set
    pub fn new(topic: Topic, payload: impl Into<Payload>, qos: QoS) -> Self {
        Self {
            topic,
            payload: payload.into(),
            qos,
            retained: false,
            duplicate: false,
            received_at: SystemTime::now(),
        }
    }

    /// Build a message from the raw values a transport callback receives
    pub fn from_delivery(
        topic: &str,
        payload: impl Into<Payload>,
        qos: u8,
        retained: bool,
        duplicate: bool,
    ) -> Result<Self> {
        Ok(Self::new(Topic::new(topic)?, payload, QoS::try_from(qos)?)
            .with_retained(retained)
            .with_duplicate(duplicate))
    }

    pub fn with_retained(mut self, retained: bool) -> Self {
        self.retained = retained;
        self
    }

    pub fn with_duplicate(mut self, duplicate: bool) -> Self {
        self.duplicate = duplicate;
        self
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Whether the broker held this message and redelivered it
    pub fn is_retained(&self) -> bool {
        self.retained
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    /// When the mailbox side received the message
    pub fn received_at(&self) -> SystemTime {
        self.received_at
    }

    /// Value equality that also requires identical payload backing buffers
    pub fn exact_eq(&self, other: &Self) -> bool {
        self == other && self.payload.exact_eq(&other.payload)
    }
}

/// Records compare by topic, QoS, flags and effective payload bytes.
/// The arrival timestamp is not part of a record's value.
impl PartialEq for ArrivedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.topic == other.topic
            && self.qos == other.qos
            && self.retained == other.retained
            && self.duplicate == other.duplicate
            && self.payload == other.payload
    }
}

impl Eq for ArrivedMessage {}

impl fmt::Display for ArrivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, qos {})",
            self.topic,
            self.payload.len(),
            u8::from(self.qos)
        )
    }
}
