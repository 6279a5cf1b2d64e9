//! Tether - typed, bidirectional asynchronous message channels
//!
//! This library connects a client endpoint to a server endpoint through a
//! named channel. Each side owns a mailbox drained by its own dispatcher;
//! messages carry a return address so the server can answer without any
//! request/response correlation.
//!
//! - [`Endpoint`] - an addressable mailbox
//! - [`Registry`] - channel names to server addresses, last writer wins
//! - [`Connection`] - a client's bind/unbind lease, with liveness tracking
//! - [`Dispatcher`] - drains a mailbox and calls a [`Handler`]
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether::{Connection, Dispatcher, EchoService, Endpoint, Message, Registry};
//! use tether::{ClientRequest, MemorySink, ReplyRenderer};
//!
//! async fn demo<E: executor_core::Executor>(executor: &E) -> tether::Result<()> {
//!     let registry = Arc::new(Registry::new());
//!
//!     // Server side
//!     let server = Endpoint::create(&registry);
//!     server.register("channel-x")?;
//!     Dispatcher::spawn(&server, EchoService::for_current_process(), executor)?;
//!
//!     // Client side
//!     let client = Endpoint::create(&registry);
//!     let sink = Arc::new(MemorySink::new());
//!     Dispatcher::spawn(&client, ReplyRenderer::new(sink.clone()), executor)?;
//!
//!     let connection = Connection::connect("channel-x", &client);
//!     connection.send(Message::request(
//!         ClientRequest::from_current_process("hello", "demo").into_payload(),
//!     ))?;
//!     Ok(())
//! }
//! ```
//!
//! # Crossing processes
//!
//! The [`bridge`] module carries a channel over a Unix domain socket using
//! length-prefixed MessagePack frames.

mod address;
pub mod bridge;
mod config;
mod connection;
mod dispatcher;
mod endpoint;
mod error;
mod message;
pub mod messenger;
mod registry;

// Re-export public types
pub use address::Address;
pub use bridge::{BridgeServer, RemoteClient};
pub use config::{BridgeConfig, BridgeConfigBuilder, DEFAULT_MAX_FRAME_LEN};
pub use connection::{Connection, ConnectionObserver, ConnectionStatus};
pub use dispatcher::{DispatchContext, Dispatcher, DispatcherHandle, Handler, HandlerFn, handler_fn};
pub use endpoint::{Endpoint, EndpointState};
pub use error::{Error, Result};
pub use message::{Message, MessageKind, Payload, Value};
pub use messenger::{
    ClearOnUnbind, ClientRequest, DEFAULT_CHANNEL, EchoService, MemorySink, MessengerClient,
    RenderSink, RenderedState, ReplyRenderer, ServiceReply,
};
pub use registry::{ChannelEntry, Registry};
/// Re-export rmp_serde for callers encoding payloads themselves.
pub use rmp_serde;
