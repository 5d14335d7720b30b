//! Branded ID newtypes for type safety.
//!
//! Every entity has a distinct ID type implemented as a newtype wrapper
//! around `String`. This prevents accidentally passing a contact ID where a
//! thread ID is expected.
//!
//! Thread and contact IDs come from the server as opaque strings;
//! notification IDs are minted locally as UUID v7 (time-ordered).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a conversation thread.
    ThreadId
}

branded_id! {
    /// Unique identifier for a ledger notification (minted locally).
    NotificationId
}

branded_id! {
    /// Unique identifier for an external contact.
    ContactId
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_id_new_is_uuid_v7() {
        let id = NotificationId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        let a = NotificationId::new();
        let b = NotificationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn thread_id_from_str() {
        let id = ThreadId::from("thread-42");
        assert_eq!(id.as_str(), "thread-42");
    }

    #[test]
    fn deref_to_str() {
        let id = ThreadId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn display() {
        let id = ContactId::from("display-me");
        assert_eq!(format!("{id}"), "display-me");
    }

    #[test]
    fn into_string() {
        let id = ThreadId::from("convert");
        let s: String = id.into();
        assert_eq!(s, "convert");
    }

    #[test]
    fn serde_is_transparent() {
        let id = ThreadId::from("t-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"t-1\"");
        let back: ThreadId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let id = ThreadId::from("same");
        let _ = set.insert(id.clone());
        let _ = set.insert(id.clone());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn thread_ids_usable_as_map_keys() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        let _ = map.insert(ThreadId::from("a"), 1u32);
        let _ = map.insert(ThreadId::from("b"), 2u32);
        assert_eq!(map.get(&ThreadId::from("a")), Some(&1));
    }
}
