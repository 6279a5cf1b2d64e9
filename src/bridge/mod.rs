//! Bridging a channel across processes
//!
//! The bridge exposes one named channel of a [`Registry`](crate::Registry)
//! over a Unix domain socket. Each accepted stream gets a proxy endpoint in
//! the serving process and a [`Connection`](crate::Connection) to the
//! channel; frames from the remote side become requests, and replies
//! addressed to the proxy travel back over the stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether::bridge::{BridgeServer, RemoteClient};
//! use tether::{BridgeConfig, ClientRequest};
//!
//! let config = BridgeConfig::builder().socket_path("/tmp/tether.sock").build()?;
//!
//! // Serving process
//! let server = BridgeServer::bind(&registry, &config, executor).await?;
//!
//! // Client process
//! let mut client = RemoteClient::connect(&config).await?;
//! let reply = client
//!     .request(ClientRequest::from_current_process("hello", "demo").into_payload())
//!     .await?;
//! ```

mod client;
mod protocol;
mod server;

pub use client::RemoteClient;
pub use protocol::Frame;
pub use server::BridgeServer;
