use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatId, MessageRecord, User, UserId};

/// Events pushed to clients over the WebSocket gateway.
///
/// Frames are flat JSON objects tagged by `type`, so clients that only look
/// at `type` can keep treating them as "re-fetch" signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    /// Server confirms the connection is authenticated and registered
    Ready {
        user_id: UserId,
        connection_id: Uuid,
    },

    /// A message was appended to a chat the receiver participates in
    NewMessage {
        chat_id: ChatId,
        message: MessageRecord,
    },

    /// A new user registered
    NewUser { user: User },
}

impl PushEvent {
    /// Returns the chat this event is scoped to, if any.
    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            Self::NewMessage { chat_id, .. } => Some(*chat_id),
            Self::Ready { .. } | Self::NewUser { .. } => None,
        }
    }

    /// Wire name of the event, as found in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::NewMessage { .. } => "new_message",
            Self::NewUser { .. } => "new_user",
        }
    }
}

/// Commands sent from client to server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Authenticate the connection with a token from /auth/login or /register
    Identify { token: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn new_message_frame_keeps_legacy_type_tag() {
        let event = PushEvent::NewMessage {
            chat_id: 10,
            message: MessageRecord {
                id: 1,
                chat_id: 10,
                author_id: 1,
                username: "alice".into(),
                content: "hi".into(),
                seq: 1,
                created_at: Utc::now(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["chat_id"], 10);
        assert_eq!(json["message"]["content"], "hi");
        assert_eq!(event.kind(), "new_message");
        assert_eq!(event.chat_id(), Some(10));
    }

    #[test]
    fn identify_command_parses() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"identify","token":"abc"}"#).unwrap();
        let GatewayCommand::Identify { token } = cmd;
        assert_eq!(token, "abc");
    }
}
