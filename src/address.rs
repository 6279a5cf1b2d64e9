use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Opaque address of an endpoint
///
/// Addresses are unique per process instance: they combine the OS process id
/// with a sequence number that is never reused while the process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pid: u32,
    seq: u64,
}

impl Address {
    /// Allocate a fresh address for this process
    pub(crate) fn next() -> Self {
        Self {
            pid: std::process::id(),
            seq: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Process id of the process that allocated this address
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pid, self.seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addresses_are_unique() {
        let a = Address::next();
        let b = Address::next();
        assert_ne!(a, b);
        assert_eq!(a.pid(), b.pid());
        assert!(b.seq() > a.seq());
    }

    #[test]
    fn test_address_display() {
        let addr = Address::next();
        assert_eq!(addr.to_string(), format!("{}:{}", addr.pid(), addr.seq()));
    }
}
