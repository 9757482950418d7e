use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid topic filter syntax: {0}")]
    InvalidFilterSyntax(String),

    #[error("Invalid topic name: {0}")]
    InvalidTopic(String),

    #[error("Topic name too long")]
    TopicTooLong,

    #[error("Invalid QoS level: {0}")]
    InvalidQos(u8),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session is not connected")]
    NotConnected,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Wait interrupted")]
    Interrupted,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
