//! Bridge server
//!
//! Unix domain socket server giving remote processes a connection to one
//! channel of the local registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_net::unix::{UnixListener, UnixStream};
use executor_core::{Executor, Task};
use futures_lite::future;
use smol::channel::{Receiver, Sender};

use crate::bridge::protocol::{Frame, read_frame, write_frame};
use crate::config::BridgeConfig;
use crate::connection::{Connection, ConnectionObserver};
use crate::dispatcher::{DispatchContext, Dispatcher, Handler};
use crate::endpoint::{Endpoint, Mailbox};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;

/// Bridge server listening on a Unix domain socket
pub struct BridgeServer {
    socket_path: PathBuf,
    stop: Sender<()>,
}

impl BridgeServer {
    /// Bind the socket and start accepting remote clients
    ///
    /// # Arguments
    /// * `registry` - Registry the configured channel is resolved in
    /// * `config` - Socket path, channel name and frame limit
    /// * `executor` - Executor to spawn the accept loop and stream tasks on
    pub async fn bind<E: Executor + Clone + 'static>(
        registry: &Arc<Registry>,
        config: &BridgeConfig,
        executor: E,
    ) -> Result<Self> {
        let socket_path = config.socket_path().to_path_buf();
        let (stop, stopped) = smol::channel::bounded(1);

        // Remove a stale socket file left by a previous run
        let _ = std::fs::remove_file(&socket_path);

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path)?;

        tracing::info!(
            path = %socket_path.display(),
            channel = %config.channel(),
            "bridge listening"
        );

        let settings = StreamSettings {
            registry: Arc::clone(registry),
            channel: config.channel().to_string(),
            max_frame_len: config.max_frame_len(),
        };
        executor
            .spawn(run_server(listener, settings, stopped, executor.clone()))
            .detach();

        Ok(Self { socket_path, stop })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting new streams and release the listener
    ///
    /// Streams already accepted keep running until their client leaves.
    pub fn stop(&self) {
        if self.stop.close() {
            tracing::debug!(path = %self.socket_path.display(), "bridge stopping");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_closed()
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.stop();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

#[derive(Clone)]
struct StreamSettings {
    registry: Arc<Registry>,
    channel: String,
    max_frame_len: usize,
}

/// Main accept loop; ends once the stop channel closes
async fn run_server<E: Executor + Clone + 'static>(
    listener: UnixListener,
    settings: StreamSettings,
    stopped: Receiver<()>,
    executor: E,
) {
    loop {
        let accepted = future::or(async { Some(listener.accept().await) }, async {
            let _ = stopped.recv().await;
            None
        })
        .await;

        match accepted {
            Some(Ok((stream, _addr))) => {
                let settings = settings.clone();
                executor
                    .spawn(handle_stream(stream, settings, executor.clone()))
                    .detach();
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "failed to accept bridge stream");
            }
            None => break,
        }
    }
    tracing::debug!("bridge accept loop finished");
}

/// Closes the proxy endpoint once its connection leaves the bound state
struct CloseOnUnbind {
    proxy: Arc<Mailbox>,
}

impl ConnectionObserver for CloseOnUnbind {
    fn on_unbound(&self, channel: &str) {
        tracing::debug!(channel, proxy = %self.proxy.address(), "bridge connection unbound");
        self.proxy.close();
    }
}

/// Turns every message reaching the proxy into a `Deliver` frame
struct Forwarder {
    outbox: Sender<Frame>,
}

impl Handler for Forwarder {
    async fn handle(&mut self, _ctx: &DispatchContext, message: Message) {
        if self.outbox.send(Frame::Deliver { message }).await.is_err() {
            tracing::debug!("bridge stream gone, message dropped");
        }
    }
}

/// Serve a single remote client
async fn handle_stream<E: Executor + Clone + 'static>(
    stream: UnixStream,
    settings: StreamSettings,
    executor: E,
) {
    let proxy = Endpoint::create(&settings.registry);
    let observer = Arc::new(CloseOnUnbind {
        proxy: Arc::clone(proxy.mailbox()),
    });
    let connection =
        Connection::connect_with_observer(settings.channel.clone(), &proxy, observer);

    // All writes go through one task so frames never interleave.
    let (outbox, inbox) = smol::channel::unbounded::<Frame>();
    let mut writer = stream.clone();
    executor
        .spawn(async move {
            while let Ok(frame) = inbox.recv().await {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::debug!(error = %e, "failed to write bridge frame");
                    break;
                }
            }
        })
        .detach();

    if !connection.is_bound() {
        let reason = Error::ConnectFailed(settings.channel.clone()).to_string();
        tracing::warn!(channel = %settings.channel, "bridge client could not bind");
        let _ = outbox.send(Frame::Error { reason }).await;
        return;
    }

    let forward = match Dispatcher::run(
        &proxy,
        Forwarder {
            outbox: outbox.clone(),
        },
    ) {
        Ok(forward) => forward,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start bridge forwarder");
            return;
        }
    };
    let unbound_outbox = outbox.clone();
    executor
        .spawn(async move {
            forward.await;
            let _ = unbound_outbox.send(Frame::Unbound).await;
        })
        .detach();

    tracing::debug!(proxy = %proxy.address(), channel = %settings.channel, "bridge stream bound");

    let mut reader = stream;
    loop {
        let frame = match read_frame(&mut reader, settings.max_frame_len).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read bridge frame");
                let _ = outbox
                    .send(Frame::Error {
                        reason: e.to_string(),
                    })
                    .await;
                break;
            }
        };

        match frame {
            Frame::Send { payload } => {
                if let Err(e) = connection.send(Message::request(payload)) {
                    let _ = outbox
                        .send(Frame::Error {
                            reason: e.to_string(),
                        })
                        .await;
                }
            }
            other => {
                tracing::warn!(frame = ?other, "unexpected frame from bridge client");
                let _ = outbox
                    .send(Frame::Error {
                        reason: "unexpected frame".to_string(),
                    })
                    .await;
            }
        }
    }

    tracing::debug!(proxy = %proxy.address(), "bridge stream closed");
    drop(connection);
    proxy.close();
}
