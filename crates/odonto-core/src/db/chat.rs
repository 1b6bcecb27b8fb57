//! Chat transcript database operations.

use rusqlite::params;

use super::{timestamp, Database, DbResult};
use crate::models::ChatMessage;

impl Database {
    pub fn insert_chat_message(&self, message: &ChatMessage) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO chat_messages (id, patient_id, user_message, bot_reply, sent_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                message.id,
                message.patient_id,
                message.user_message,
                message.bot_reply,
                message.sent_at,
            ],
        )?;
        Ok(())
    }

    /// Latest messages of a patient, newest first.
    pub fn recent_chat_messages(&self, patient_id: &str, limit: u32) -> DbResult<Vec<ChatMessage>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, patient_id, user_message, bot_reply, sent_at
            FROM chat_messages
            WHERE patient_id = ?1 AND deleted = 0
            ORDER BY sent_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )?;
        let rows = stmt.query_map(params![patient_id, limit], |row| {
            Ok(ChatMessage {
                id: row.get(0)?,
                patient_id: row.get(1)?,
                user_message: row.get(2)?,
                bot_reply: row.get(3)?,
                sent_at: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Soft delete a patient's whole transcript.
    pub fn clear_chat_history(&self, patient_id: &str) -> DbResult<usize> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE chat_messages SET deleted = 1, deleted_at = ?2
            WHERE patient_id = ?1 AND deleted = 0
            "#,
            params![patient_id, timestamp()],
        )?;
        Ok(rows_affected)
    }
}
