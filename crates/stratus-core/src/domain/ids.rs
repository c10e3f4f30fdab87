//! Strongly-typed identifiers.
//!
//! ULID based: sortable by creation time and generated without coordination,
//! so every publisher process can stamp its own messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier stamped on every published queue message (AMQP `message_id`).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Ulid);

impl MessageId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for MessageId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix() {
        let id = MessageId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("msg-"));
    }

    #[test]
    fn ids_are_sortable_by_creation_time() {
        let id1 = MessageId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = MessageId::from_ulid(Ulid::new());

        assert!(id1 < id2);
    }
}
