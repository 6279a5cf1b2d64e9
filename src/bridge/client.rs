//! Bridge client used from another process

use std::net::Shutdown;
use std::time::Duration;

use async_io::Timer;
use async_net::unix::UnixStream;
use futures_lite::future;

use crate::bridge::protocol::{Frame, read_frame, write_frame};
use crate::config::BridgeConfig;
use crate::connection::ConnectionStatus;
use crate::error::{Error, Result};
use crate::message::{Message, Payload};

/// Remote side of a bridged connection
pub struct RemoteClient {
    stream: UnixStream,
    max_frame_len: usize,
    reply_timeout: Option<Duration>,
    unbound: bool,
}

impl RemoteClient {
    /// Connect to the bridge socket named in `config`
    pub async fn connect(config: &BridgeConfig) -> Result<Self> {
        let stream = UnixStream::connect(config.socket_path()).await?;
        tracing::debug!(path = %config.socket_path().display(), "connected to bridge");
        Ok(Self {
            stream,
            max_frame_len: config.max_frame_len(),
            reply_timeout: config.reply_timeout(),
            unbound: false,
        })
    }

    /// Whether the server has reported the connection as unbound
    pub fn is_unbound(&self) -> bool {
        self.unbound
    }

    /// Send a request payload; the server stamps the return address
    pub async fn send(&mut self, payload: Payload) -> Result<()> {
        if self.unbound {
            return Err(Error::NotBound(ConnectionStatus::Unbound));
        }
        write_frame(&mut self.stream, &Frame::Send { payload }).await
    }

    /// Wait for the next delivered message
    ///
    /// Returns `None` once the connection is unbound or the stream ends.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        if self.unbound {
            return Ok(None);
        }
        match read_frame(&mut self.stream, self.max_frame_len).await? {
            Some(Frame::Deliver { message }) => Ok(Some(message)),
            Some(Frame::Error { reason }) => Err(Error::Remote(reason)),
            Some(Frame::Unbound) | None => {
                self.unbound = true;
                Ok(None)
            }
            Some(Frame::Send { .. }) => Err(Error::InvalidProtocol(
                "server sent a client frame".to_string(),
            )),
        }
    }

    /// Send a request and wait for the next message, honouring the reply
    /// timeout
    ///
    /// A timeout may cut a frame in half, so the client is unbound afterwards
    /// and must reconnect.
    pub async fn request(&mut self, payload: Payload) -> Result<Message> {
        self.send(payload).await?;

        let reply = match self.reply_timeout {
            Some(timeout) => {
                let received = future::or(async { Some(self.recv().await) }, async move {
                    Timer::after(timeout).await;
                    None
                })
                .await;
                match received {
                    Some(reply) => reply?,
                    None => {
                        self.abandon();
                        return Err(Error::Timeout(timeout));
                    }
                }
            }
            None => self.recv().await?,
        };
        reply.ok_or(Error::NotBound(ConnectionStatus::Unbound))
    }

    fn abandon(&mut self) {
        self.unbound = true;
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            tracing::debug!(error = %e, "failed to shut down bridge stream");
        }
    }
}
