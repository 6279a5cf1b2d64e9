//! Endpoints and their mailboxes

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use smol::channel::{Receiver, Sender};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::Registry;

/// Lifecycle state of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Unregistered,
    Registered,
    Closed,
}

/// Callback fired once when the endpoint it is linked to closes
pub(crate) type DeathLink = Box<dyn FnOnce(Address) + Send>;

/// Handle for removing a death link before it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LinkId(u64);

struct MailboxState {
    state: EndpointState,
    names: Vec<String>,
    links: Vec<(LinkId, DeathLink)>,
    next_link: u64,
    connections: u32,
}

/// Shared half of an endpoint
///
/// The registry's routing table, connections and dispatchers all hold the
/// mailbox; only the owning [`Endpoint`] decides when it closes.
pub(crate) struct Mailbox {
    address: Address,
    registry: Weak<Registry>,
    tx: Sender<Message>,
    rx: Receiver<Message>,
    dispatching: AtomicBool,
    state: Mutex<MailboxState>,
}

impl Mailbox {
    fn new(registry: &Arc<Registry>) -> Self {
        let (tx, rx) = smol::channel::unbounded();
        Self {
            address: Address::next(),
            registry: Arc::downgrade(registry),
            tx,
            rx,
            dispatching: AtomicBool::new(false),
            state: Mutex::new(MailboxState {
                state: EndpointState::Unregistered,
                names: Vec::new(),
                links: Vec::new(),
                next_link: 0,
                connections: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn state(&self) -> EndpointState {
        self.lock().state
    }

    /// Append a message to the tail of the mailbox
    pub(crate) fn push(&self, message: Message) -> Result<()> {
        // An unbounded channel only rejects sends once closed.
        self.tx
            .try_send(message)
            .map_err(|_| Error::EndpointClosed(self.address))
    }

    pub(crate) fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Take the receiving side for a dispatcher; at most one may run
    pub(crate) fn claim_receiver(&self) -> Result<Receiver<Message>> {
        if self.dispatching.swap(true, Ordering::SeqCst) {
            return Err(Error::DispatcherActive(self.address));
        }
        Ok(self.rx.clone())
    }

    /// Register a callback for when this mailbox closes
    ///
    /// Returns `None` if the mailbox is already closed; the link is dropped
    /// without being called.
    pub(crate) fn link_to_death(&self, link: DeathLink) -> Option<LinkId> {
        let mut state = self.lock();
        if state.state == EndpointState::Closed {
            return None;
        }
        let id = LinkId(state.next_link);
        state.next_link += 1;
        state.links.push((id, link));
        Some(id)
    }

    pub(crate) fn unlink(&self, id: LinkId) {
        self.lock().links.retain(|(link, _)| *link != id);
    }

    /// Record a newly bound connection, returning the new count
    pub(crate) fn acquire(&self) -> u32 {
        let mut state = self.lock();
        state.connections += 1;
        state.connections
    }

    pub(crate) fn release(&self) {
        let mut state = self.lock();
        state.connections = state.connections.saturating_sub(1);
    }

    pub(crate) fn connection_count(&self) -> u32 {
        self.lock().connections
    }

    fn register(&self, registry: &Registry, name: String) -> Result<()> {
        let mut state = self.lock();
        if state.state == EndpointState::Closed {
            return Err(Error::EndpointClosed(self.address));
        }
        if state.names.contains(&name) {
            return Err(Error::AlreadyRegistered(name));
        }
        registry.publish(name.clone(), self.address);
        state.names.push(name);
        state.state = EndpointState::Registered;
        Ok(())
    }

    fn unregister(&self, registry: &Registry, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.names.retain(|n| n != name);
        if state.names.is_empty() && state.state == EndpointState::Registered {
            state.state = EndpointState::Unregistered;
        }
        registry.unpublish(name, self.address)
    }

    fn names(&self) -> Vec<String> {
        self.lock().names.clone()
    }

    /// Close the mailbox
    ///
    /// Queued messages stay available to the dispatcher; new pushes fail.
    /// Every name is unpublished and every death link fires exactly once.
    pub(crate) fn close(&self) {
        let (names, links) = {
            let mut state = self.lock();
            if state.state == EndpointState::Closed {
                return;
            }
            state.state = EndpointState::Closed;
            state.connections = 0;
            (
                std::mem::take(&mut state.names),
                std::mem::take(&mut state.links),
            )
        };

        self.tx.close();

        if let Some(registry) = self.registry.upgrade() {
            for name in &names {
                // Taken over by a newer server: nothing to remove.
                if let Err(e) = registry.unpublish(name, self.address) {
                    tracing::debug!(channel = %name, error = %e, "skipped unpublish on close");
                }
            }
            registry.detach(self.address);
        }

        tracing::debug!(
            address = %self.address,
            pending = self.rx.len(),
            links = links.len(),
            "endpoint closed"
        );

        for (_, link) in links {
            link(self.address);
        }
    }
}

/// An addressable mailbox owned by one side of a conversation
///
/// Dropping an endpoint closes it.
pub struct Endpoint {
    mailbox: Arc<Mailbox>,
    registry: Arc<Registry>,
}

impl Endpoint {
    /// Create an endpoint with a fresh address and an empty mailbox
    pub fn create(registry: &Arc<Registry>) -> Self {
        let mailbox = Arc::new(Mailbox::new(registry));
        registry.attach(Arc::clone(&mailbox));
        tracing::debug!(address = %mailbox.address(), "endpoint created");
        Self {
            mailbox,
            registry: Arc::clone(registry),
        }
    }

    pub fn address(&self) -> Address {
        self.mailbox.address()
    }

    pub fn state(&self) -> EndpointState {
        self.mailbox.state()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == EndpointState::Closed
    }

    /// Number of messages waiting in the mailbox
    pub fn pending(&self) -> usize {
        self.mailbox.pending()
    }

    /// Number of connections currently bound to this endpoint
    pub fn connection_count(&self) -> u32 {
        self.mailbox.connection_count()
    }

    /// Channel names this endpoint has published
    pub fn names(&self) -> Vec<String> {
        self.mailbox.names()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Publish this endpoint under `name`
    pub fn register(&self, name: impl Into<String>) -> Result<()> {
        self.mailbox.register(&self.registry, name.into())
    }

    /// Withdraw this endpoint from `name`
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.mailbox.unregister(&self.registry, name)
    }

    /// Append a message to the mailbox
    pub fn enqueue(&self, message: Message) -> Result<()> {
        self.mailbox.push(message)
    }

    /// Close the endpoint; idempotent
    pub fn close(&self) {
        self.mailbox.close();
    }

    pub(crate) fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.mailbox.close();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("address", &self.address())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use std::sync::atomic::AtomicUsize;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::new())
    }

    #[test]
    fn test_create_is_unregistered() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);
        assert_eq!(endpoint.state(), EndpointState::Unregistered);
        assert_eq!(endpoint.pending(), 0);
        assert_eq!(registry.endpoint_count(), 1);
    }

    #[test]
    fn test_register_publishes() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);

        endpoint.register("channel-x").unwrap();
        assert_eq!(endpoint.state(), EndpointState::Registered);
        assert_eq!(registry.resolve("channel-x"), Some(endpoint.address()));
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);

        endpoint.register("channel-x").unwrap();
        let result = endpoint.register("channel-x");
        assert!(matches!(result, Err(Error::AlreadyRegistered(name)) if name == "channel-x"));
    }

    #[test]
    fn test_unregister_returns_to_unregistered() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);

        endpoint.register("a").unwrap();
        endpoint.unregister("a").unwrap();
        assert_eq!(endpoint.state(), EndpointState::Unregistered);
        assert_eq!(registry.resolve("a"), None);
        // Can register again afterwards
        endpoint.register("a").unwrap();
    }

    #[test]
    fn test_enqueue_after_close_fails() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);

        endpoint.enqueue(Message::request(Payload::new())).unwrap();
        endpoint.close();

        let result = endpoint.enqueue(Message::request(Payload::new()));
        assert!(matches!(result, Err(Error::EndpointClosed(a)) if a == endpoint.address()));
        // Messages queued before close are kept for draining
        assert_eq!(endpoint.pending(), 1);
    }

    #[test]
    fn test_close_unpublishes_and_detaches() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);
        endpoint.register("svc").unwrap();

        endpoint.close();
        assert!(endpoint.is_closed());
        assert_eq!(registry.resolve("svc"), None);
        assert_eq!(registry.endpoint_count(), 0);
    }

    #[test]
    fn test_close_keeps_newer_holder() {
        let registry = registry();
        let old = Endpoint::create(&registry);
        let new = Endpoint::create(&registry);
        old.register("svc").unwrap();
        new.register("svc").unwrap();

        old.close();
        assert_eq!(registry.resolve("svc"), Some(new.address()));
    }

    #[test]
    fn test_death_links_fire_once() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        endpoint
            .mailbox()
            .link_to_death(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        let counter = Arc::clone(&fired);
        let removed = endpoint
            .mailbox()
            .link_to_death(Box::new(move |_| {
                counter.fetch_add(100, Ordering::SeqCst);
            }))
            .unwrap();
        endpoint.mailbox().unlink(removed);

        endpoint.close();
        endpoint.close();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(endpoint.mailbox().link_to_death(Box::new(|_| {})).is_none());
    }

    #[test]
    fn test_drop_closes() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);
        endpoint.register("svc").unwrap();
        drop(endpoint);
        assert_eq!(registry.resolve("svc"), None);
        assert_eq!(registry.endpoint_count(), 0);
    }

    #[test]
    fn test_single_dispatcher_claim() {
        let registry = registry();
        let endpoint = Endpoint::create(&registry);
        assert!(endpoint.mailbox().claim_receiver().is_ok());
        assert!(matches!(
            endpoint.mailbox().claim_receiver(),
            Err(Error::DispatcherActive(_))
        ));
    }
}
