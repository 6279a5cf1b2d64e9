//! Messages and their payloads
//!
//! A [`Message`] is what travels between endpoints. Its [`Payload`] is an
//! ordered set of named fields, each holding an integer, a string, or a
//! nested payload.

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Distinguishes requests from replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Request,
    Reply,
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Str(String),
    Nested(Payload),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Payload> for Value {
    fn from(value: Payload) -> Self {
        Value::Nested(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Field {
    name: String,
    value: Value,
}

/// Ordered set of uniquely-named fields
///
/// Fields keep their insertion order. Inserting a name that is already
/// present replaces the value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    fields: Vec<Field>,
}

impl Payload {
    /// Create an empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, returning the previous value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => Some(std::mem::replace(&mut field.value, value)),
            None => {
                self.fields.push(Field { name, value });
                None
            }
        }
    }

    pub fn with_int(mut self, name: impl Into<String>, value: i64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn with_str(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn with_nested(mut self, name: impl Into<String>, value: Payload) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Str(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_nested(&self, name: &str) -> Option<&Payload> {
        match self.get(name) {
            Some(Value::Nested(v)) => Some(v),
            _ => None,
        }
    }

    /// Remove a field, returning its value
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|f| f.name == name)?;
        Some(self.fields.remove(index).value)
    }

    /// Iterate fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|f| (f.name.as_str(), &f.value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A message exchanged between endpoints
///
/// Messages are moved into a mailbox on enqueue and never mutated afterwards.
/// The sender address is the return address used for replies; it is absent
/// for fire-and-forget messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    sender: Option<Address>,
    kind: MessageKind,
    payload: Payload,
}

impl Message {
    /// Create a fire-and-forget request
    pub fn request(payload: Payload) -> Self {
        Self {
            sender: None,
            kind: MessageKind::Request,
            payload,
        }
    }

    /// Create a reply
    pub fn reply(payload: Payload) -> Self {
        Self {
            sender: None,
            kind: MessageKind::Reply,
            payload,
        }
    }

    /// Set the return address
    pub fn with_sender(mut self, sender: Address) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn sender(&self) -> Option<Address> {
        self.sender
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn is_request(&self) -> bool {
        self.kind == MessageKind::Request
    }

    pub fn is_reply(&self) -> bool {
        self.kind == MessageKind::Reply
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_keeps_insertion_order() {
        let payload = Payload::new()
            .with_str("message", "hello")
            .with_int("pid", 4321)
            .with_str("package_name", "demo");

        let names: Vec<&str> = payload.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["message", "pid", "package_name"]);
    }

    #[test]
    fn test_payload_insert_replaces_in_place() {
        let mut payload = Payload::new().with_int("a", 1).with_int("b", 2);

        let previous = payload.insert("a", 10);
        assert_eq!(previous, Some(Value::Int(1)));
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.get_int("a"), Some(10));
        assert_eq!(payload.iter().next().map(|(name, _)| name), Some("a"));
    }

    #[test]
    fn test_payload_typed_getters() {
        let inner = Payload::new().with_int("depth", 2);
        let payload = Payload::new()
            .with_int("pid", 7)
            .with_str("message", "hi")
            .with_nested("inner", inner.clone());

        assert_eq!(payload.get_int("pid"), Some(7));
        assert_eq!(payload.get_str("message"), Some("hi"));
        assert_eq!(payload.get_nested("inner"), Some(&inner));
        // Wrong type or missing name
        assert_eq!(payload.get_int("message"), None);
        assert_eq!(payload.get_str("missing"), None);
    }

    #[test]
    fn test_payload_remove() {
        let mut payload = Payload::new().with_int("a", 1).with_int("b", 2);
        assert_eq!(payload.remove("a"), Some(Value::Int(1)));
        assert_eq!(payload.remove("a"), None);
        assert_eq!(payload.len(), 1);
    }

    #[test]
    fn test_message_constructors() {
        let request = Message::request(Payload::new());
        assert!(request.is_request());
        assert_eq!(request.sender(), None);

        let addr = Address::next();
        let reply = Message::reply(Payload::new().with_int("pid", 1)).with_sender(addr);
        assert!(reply.is_reply());
        assert_eq!(reply.sender(), Some(addr));
        assert_eq!(reply.into_payload().get_int("pid"), Some(1));
    }
}
