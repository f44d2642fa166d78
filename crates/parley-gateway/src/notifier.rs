use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use parley_db::Database;
use parley_types::events::PushEvent;
use parley_types::models::{MessageRecord, User};

use crate::hub::ConnectionHub;

/// Turns committed mutations into push events.
///
/// Delivery is best effort and at most once: nothing is retried or
/// buffered, and failures here never reach whoever caused the mutation.
#[derive(Clone)]
pub struct Notifier {
    hub: ConnectionHub,
    db: Arc<Database>,
    lookup_timeout: Duration,
}

impl Notifier {
    pub fn new(hub: ConnectionHub, db: Arc<Database>, lookup_timeout: Duration) -> Self {
        Self {
            hub,
            db,
            lookup_timeout,
        }
    }

    /// Push `new_message` to the live connections of the chat's participants.
    pub async fn message_appended(&self, message: &MessageRecord) -> usize {
        let chat_id = message.chat_id;
        let db = self.db.clone();
        let lookup = tokio::task::spawn_blocking(move || db.participant_ids(chat_id));

        let participants = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(Ok(ids))) => ids,
            Ok(Ok(Err(e))) => {
                warn!("Dropping new_message for chat {}: {}", chat_id, e);
                return 0;
            }
            Ok(Err(e)) => {
                error!("spawn_blocking join error: {}", e);
                return 0;
            }
            Err(_) => {
                warn!("Dropping new_message for chat {}: participant lookup timed out", chat_id);
                return 0;
            }
        };

        let event = PushEvent::NewMessage {
            chat_id,
            message: message.clone(),
        };
        self.hub.broadcast(&event, Some(participants.as_slice())).await
    }

    /// Push `new_user` to every live connection.
    pub async fn user_registered(&self, user: &User) -> usize {
        let event = PushEvent::NewUser { user: user.clone() };
        self.hub.broadcast(&event, None).await
    }
}
