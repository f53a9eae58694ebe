use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id!(UserId);
uuid_id!(ChatId);
uuid_id!(MessageId);
uuid_id!(TaskId);
uuid_id!(ExecutionId);
uuid_id!(QueuedMessageId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_json() {
        let id = ChatId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ChatId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn distinct_id_types_do_not_mix() {
        let chat = ChatId::new();
        let task = TaskId::new();
        assert_ne!(chat.as_uuid(), Uuid::nil());
        assert_ne!(task.as_uuid(), Uuid::nil());
    }

    #[test]
    fn display_matches_uuid_display() {
        let raw = Uuid::new_v4();
        let id = MessageId::from(raw);
        assert_eq!(id.to_string(), raw.to_string());
    }
}
