use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ChatId = i64;
pub type MessageId = i64;

/// Public view of a user. The password hash never leaves parley-db.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub created_at: DateTime<Utc>,
}

/// Unordered pair of distinct users, stored normalized as (low, high).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatPair {
    low: UserId,
    high: UserId,
}

impl ChatPair {
    /// Returns `None` when both ids are the same user.
    pub fn new(a: UserId, b: UserId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }

    /// Key backing the storage-level uniqueness constraint.
    pub fn key(&self) -> String {
        format!("{}:{}", self.low, self.high)
    }
}

/// A stored message joined with its author's username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub chat_id: ChatId,
    #[serde(rename = "user_id")]
    pub author_id: UserId,
    pub username: String,
    pub content: String,
    /// Position within the chat, starting at 1.
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
    pub username: String,
}

/// One row of a user's chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    pub chat_created_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
    pub participants: Vec<User>,
}
