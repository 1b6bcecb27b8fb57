//! Chat transcript.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One question and the assistant's reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub patient_id: String,
    pub user_message: String,
    pub bot_reply: String,
    pub sent_at: NaiveDateTime,
}

impl ChatMessage {
    pub fn new(patient_id: String, user_message: String, bot_reply: String, sent_at: NaiveDateTime) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            user_message,
            bot_reply,
            sent_at,
        }
    }
}
