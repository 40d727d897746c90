use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat line as stored in the room log. Sender fields and the timestamp are
/// stamped by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Uuid,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
    /// Set for private messages; private lines never appear in snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_to: Option<Uuid>,
}
