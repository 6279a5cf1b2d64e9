//! Channel registry
//!
//! The registry maps well-known channel names to the address of the server
//! endpoint currently answering on them, and routes messages to mailboxes by
//! address. It is an explicit object: create one per process (or per test)
//! and hand an `Arc<Registry>` to every endpoint and connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::address::Address;
use crate::endpoint::Mailbox;
use crate::error::{Error, Result};
use crate::message::Message;

/// A published channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEntry {
    pub name: String,
    pub address: Address,
    pub registered_at: SystemTime,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, ChannelEntry>,
    mailboxes: HashMap<Address, Arc<Mailbox>>,
}

/// Process-wide directory of channels and mailboxes
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `address` under `name`
    ///
    /// The last writer wins: an existing mapping is replaced and returned.
    pub fn publish(&self, name: impl Into<String>, address: Address) -> Option<ChannelEntry> {
        let name = name.into();
        let entry = ChannelEntry {
            name: name.clone(),
            address,
            registered_at: SystemTime::now(),
        };
        let previous = self.lock().channels.insert(name.clone(), entry);
        if let Some(prev) = &previous {
            tracing::debug!(channel = %name, old = %prev.address, new = %address, "channel taken over");
        } else {
            tracing::debug!(channel = %name, address = %address, "channel published");
        }
        previous
    }

    /// Resolve a channel name to its current holder
    pub fn resolve(&self, name: &str) -> Option<Address> {
        self.lock().channels.get(name).map(|entry| entry.address)
    }

    /// Look up the full entry for a channel
    pub fn lookup(&self, name: &str) -> Result<ChannelEntry> {
        self.lock()
            .channels
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Remove a mapping, but only if `caller` is the current holder
    ///
    /// A stale server can therefore never unregister a newer one.
    pub fn unpublish(&self, name: &str, caller: Address) -> Result<()> {
        let mut inner = self.lock();
        let holder = inner
            .channels
            .get(name)
            .map(|entry| entry.address)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if holder != caller {
            return Err(Error::NotOwner {
                name: name.to_string(),
                holder,
            });
        }
        inner.channels.remove(name);
        tracing::debug!(channel = %name, address = %caller, "channel unpublished");
        Ok(())
    }

    /// All published channels, sorted by name
    pub fn channels(&self) -> Vec<ChannelEntry> {
        let mut entries: Vec<ChannelEntry> = self.lock().channels.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Number of live mailboxes known to this registry
    pub fn endpoint_count(&self) -> usize {
        self.lock().mailboxes.len()
    }

    pub(crate) fn attach(&self, mailbox: Arc<Mailbox>) {
        self.lock().mailboxes.insert(mailbox.address(), mailbox);
    }

    pub(crate) fn detach(&self, address: Address) {
        self.lock().mailboxes.remove(&address);
    }

    pub(crate) fn mailbox(&self, address: Address) -> Option<Arc<Mailbox>> {
        self.lock().mailboxes.get(&address).cloned()
    }

    /// Deliver a message to the mailbox at `address`
    pub(crate) fn deliver(&self, address: Address, message: Message) -> Result<()> {
        let mailbox = self
            .mailbox(address)
            .ok_or(Error::EndpointClosed(address))?;
        mailbox.push(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_writer_wins() {
        let registry = Registry::new();
        let a = Address::next();
        let b = Address::next();

        assert!(registry.publish("channel-x", a).is_none());
        let displaced = registry.publish("channel-x", b).unwrap();

        assert_eq!(displaced.address, a);
        assert_eq!(registry.resolve("channel-x"), Some(b));
    }

    #[test]
    fn test_resolve_unknown() {
        let registry = Registry::new();
        assert_eq!(registry.resolve("ghost"), None);
        assert!(matches!(registry.lookup("ghost"), Err(Error::NotFound(name)) if name == "ghost"));
    }

    #[test]
    fn test_stale_holder_cannot_unpublish() {
        let registry = Registry::new();
        let stale = Address::next();
        let current = Address::next();

        registry.publish("svc", stale);
        registry.publish("svc", current);

        let result = registry.unpublish("svc", stale);
        assert!(matches!(result, Err(Error::NotOwner { holder, .. }) if holder == current));
        assert_eq!(registry.resolve("svc"), Some(current));

        registry.unpublish("svc", current).unwrap();
        assert_eq!(registry.resolve("svc"), None);
    }

    #[test]
    fn test_unpublish_unknown() {
        let registry = Registry::new();
        let result = registry.unpublish("svc", Address::next());
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_channels_sorted() {
        let registry = Registry::new();
        registry.publish("b", Address::next());
        registry.publish("a", Address::next());

        let names: Vec<String> = registry.channels().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_deliver_to_unknown_address() {
        let registry = Registry::new();
        let addr = Address::next();
        let result = registry.deliver(addr, Message::request(Default::default()));
        assert!(matches!(result, Err(Error::EndpointClosed(a)) if a == addr));
    }
}
