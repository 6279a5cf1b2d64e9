//! Connections: a client's lease on a named channel
//!
//! A connection resolves a channel name through the [`Registry`], links
//! itself to the death of the server endpoint, and stamps every message it
//! sends with the client's return address.
//!
//! ```text
//! Connecting ──► Bound ──► Unbound ──(bind)──► Connecting
//!      │
//!      └───────► Failed
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::address::Address;
use crate::endpoint::{Endpoint, EndpointState, LinkId, Mailbox};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;

/// Lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Bound,
    Unbound,
    Failed,
}

/// Receives connection lifecycle notifications
///
/// `on_unbound` is called on every path that leaves `Bound`: an explicit
/// disconnect, the server endpoint closing, and the connection being dropped.
/// Callbacks run without any connection lock held.
pub trait ConnectionObserver: Send + Sync {
    fn on_bound(&self, channel: &str, server: Address) {
        let _ = (channel, server);
    }

    fn on_unbound(&self, channel: &str) {
        let _ = channel;
    }

    fn on_failed(&self, channel: &str) {
        let _ = channel;
    }
}

struct Lease {
    status: ConnectionStatus,
    server: Option<Arc<Mailbox>>,
    link: Option<LinkId>,
}

enum Notice {
    Bound(Address),
    Unbound,
    Failed,
}

struct Shared {
    channel: String,
    client: Arc<Mailbox>,
    registry: Arc<Registry>,
    observer: Option<Arc<dyn ConnectionObserver>>,
    lease: Mutex<Lease>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lease> {
        self.lease.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notice: Notice) {
        let Some(observer) = &self.observer else {
            return;
        };
        match notice {
            Notice::Bound(server) => observer.on_bound(&self.channel, server),
            Notice::Unbound => observer.on_unbound(&self.channel),
            Notice::Failed => observer.on_failed(&self.channel),
        }
    }

    fn bind(self: &Arc<Self>) -> ConnectionStatus {
        let (status, notice) = {
            let mut lease = self.lock();
            if matches!(lease.status, ConnectionStatus::Bound | ConnectionStatus::Failed) {
                return lease.status;
            }
            lease.status = ConnectionStatus::Connecting;
            let notice = match self.attach(&mut lease) {
                Some(server) => Notice::Bound(server),
                None => {
                    lease.status = ConnectionStatus::Failed;
                    Notice::Failed
                }
            };
            (lease.status, notice)
        };
        self.notify(notice);
        status
    }

    /// Resolve the channel and take a lease on the server mailbox
    ///
    /// The lease lock is held throughout so a death link firing mid-bind
    /// observes the final state.
    fn attach(self: &Arc<Self>, lease: &mut Lease) -> Option<Address> {
        if self.client.state() == EndpointState::Closed {
            tracing::debug!(channel = %self.channel, "client endpoint closed, not binding");
            return None;
        }
        let Some(address) = self.registry.resolve(&self.channel) else {
            tracing::debug!(channel = %self.channel, "channel not published");
            return None;
        };
        let server = self.registry.mailbox(address)?;

        let weak = Arc::downgrade(self);
        let link = server.link_to_death(Box::new(move |dead| {
            if let Some(shared) = weak.upgrade() {
                shared.server_died(dead);
            }
        }))?;
        let count = server.acquire();

        tracing::debug!(
            channel = %self.channel,
            client = %self.client.address(),
            server = %address,
            connections = count,
            "connection bound"
        );
        lease.status = ConnectionStatus::Bound;
        lease.server = Some(server);
        lease.link = Some(link);
        Some(address)
    }

    fn unbind(&self) -> bool {
        let (server, link) = {
            let mut lease = self.lock();
            if lease.status != ConnectionStatus::Bound {
                return false;
            }
            lease.status = ConnectionStatus::Unbound;
            (lease.server.take(), lease.link.take())
        };
        if let Some(server) = server {
            if let Some(link) = link {
                server.unlink(link);
            }
            server.release();
            tracing::debug!(channel = %self.channel, server = %server.address(), "connection unbound");
        }
        self.notify(Notice::Unbound);
        true
    }

    fn server_died(&self, dead: Address) {
        let was_bound = {
            let mut lease = self.lock();
            let bound_to_dead = lease.status == ConnectionStatus::Bound
                && lease.server.as_ref().map(|s| s.address()) == Some(dead);
            if bound_to_dead {
                lease.status = ConnectionStatus::Unbound;
                lease.server = None;
                lease.link = None;
            }
            bound_to_dead
        };
        if was_bound {
            tracing::debug!(channel = %self.channel, server = %dead, "server endpoint died");
            self.notify(Notice::Unbound);
        }
    }
}

/// A client's lease on a resolved channel
///
/// Dropping a connection disconnects it.
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Bind `client` to the server currently published under `channel`
    ///
    /// The returned connection is `Bound` or `Failed`; it never blocks on the
    /// server.
    pub fn connect(channel: impl Into<String>, client: &Endpoint) -> Self {
        Self::build(channel.into(), client, None)
    }

    /// Like [`Connection::connect`], reporting lifecycle changes to `observer`
    pub fn connect_with_observer(
        channel: impl Into<String>,
        client: &Endpoint,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self::build(channel.into(), client, Some(observer))
    }

    fn build(
        channel: String,
        client: &Endpoint,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            channel,
            client: Arc::clone(client.mailbox()),
            registry: Arc::clone(client.registry()),
            observer,
            lease: Mutex::new(Lease {
                status: ConnectionStatus::Connecting,
                server: None,
                link: None,
            }),
        });
        shared.bind();
        Self { shared }
    }

    /// Bind again after an unbind; a no-op while bound
    pub fn bind(&self) -> ConnectionStatus {
        self.shared.bind()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().status
    }

    pub fn is_bound(&self) -> bool {
        self.status() == ConnectionStatus::Bound
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    pub fn client(&self) -> Address {
        self.shared.client.address()
    }

    /// Address of the bound server, if any
    pub fn server(&self) -> Option<Address> {
        self.shared.lock().server.as_ref().map(|s| s.address())
    }

    /// Send a message to the server, stamped with the client's address
    ///
    /// Failures are reported to the caller and never retried.
    pub fn send(&self, message: Message) -> Result<()> {
        let server = {
            let lease = self.shared.lock();
            match (lease.status, &lease.server) {
                (ConnectionStatus::Bound, Some(server)) => Arc::clone(server),
                (status, _) => return Err(Error::NotBound(status)),
            }
        };
        let message = message.with_sender(self.client());
        server.push(message).inspect_err(|e| {
            tracing::warn!(channel = %self.shared.channel, error = %e, "send failed, message discarded");
        })
    }

    /// Release the lease; idempotent
    pub fn disconnect(&self) {
        self.shared.unbind();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.unbind();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("channel", &self.shared.channel)
            .field("client", &self.client())
            .field("status", &self.status())
            .finish()
    }
}
