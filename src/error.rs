use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::address::Address;
use crate::connection::ConnectionStatus;

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while registering, binding, sending or bridging
#[derive(Error, Debug)]
pub enum Error {
    #[error("channel already registered by this endpoint: {0}")]
    AlreadyRegistered(String),

    #[error("channel not found: {0}")]
    NotFound(String),

    #[error("channel {name} is held by {holder}, not the caller")]
    NotOwner { name: String, holder: Address },

    #[error("could not connect to channel: {0}")]
    ConnectFailed(String),

    #[error("connection is not bound (status: {0:?})")]
    NotBound(ConnectionStatus),

    #[error("endpoint closed: {0}")]
    EndpointClosed(Address),

    #[error("endpoint {0} already has a dispatcher")]
    DispatcherActive(Address),

    #[error("message carries no return address")]
    NoReturnAddress,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),
}
