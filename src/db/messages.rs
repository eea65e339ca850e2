use sqlx::{Pool, Sqlite};

use crate::db::conversations::ConversationRepository;
use crate::db::models::Message;
use crate::db::with_retry;
use crate::error::AppError;

const MAX_CONTENT_LEN: usize = 4096;

pub struct MessageRepository;

impl MessageRepository {
    /// Append a message to the durable log for the `(sender, receiver)`
    /// pair. Assigns the id from the append sequence and a timestamp
    /// that never regresses, even if the wall clock does; both
    /// conversation summaries are refreshed in the same transaction.
    pub async fn append(
        pool: &Pool<Sqlite>,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> Result<Message, AppError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::InvalidContent(
                "Message content must not be empty".to_string(),
            ));
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(AppError::InvalidContent(format!(
                "Message content must be at most {} bytes",
                MAX_CONTENT_LEN
            )));
        }

        with_retry(|| async move {
            let mut tx = pool.begin().await?;

            let sender_name = sqlx::query_scalar::<_, String>(
                "SELECT display_name FROM users WHERE id = ?",
            )
            .bind(sender_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} does not exist", sender_id)))?;

            let receiver_exists =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ?")
                    .bind(receiver_id)
                    .fetch_one(&mut *tx)
                    .await?;
            if receiver_exists == 0 {
                return Err(AppError::NotFound(format!(
                    "User {} does not exist",
                    receiver_id
                )));
            }

            let now = chrono::Utc::now().timestamp_millis();

            let message = sqlx::query_as::<_, Message>(
                r#"
INSERT INTO messages (sender_id, receiver_id, content, sender_name, timestamp, is_read)
VALUES (?, ?, ?, ?, MAX(?, COALESCE((SELECT MAX(timestamp) FROM messages), 0)), 0)
RETURNING *
                "#,
            )
            .bind(sender_id)
            .bind(receiver_id)
            .bind(content)
            .bind(&sender_name)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            ConversationRepository::apply_append(&mut tx, &message).await?;

            tx.commit().await?;
            Ok(message)
        })
        .await
    }

    /// All messages exchanged between the pair, ascending by
    /// `(timestamp, id)`. Symmetric in the two users. `after` skips
    /// messages at or before the given timestamp; `limit` bounds the
    /// result for point-in-time reads.
    pub async fn conversation(
        pool: &Pool<Sqlite>,
        user_a: &str,
        user_b: &str,
        after: Option<i64>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, AppError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
SELECT * FROM messages
WHERE ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
  AND timestamp > ?3
ORDER BY timestamp ASC, id ASC
LIMIT ?4
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(after.unwrap_or(i64::MIN))
        .bind(limit.unwrap_or(-1))
        .fetch_all(pool)
        .await?;

        Ok(messages)
    }

    pub async fn get_by_id(pool: &Pool<Sqlite>, id: i64) -> Result<Option<Message>, AppError> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(message)
    }

    /// Mark a message read on behalf of `requester_id`. Only the
    /// receiver may do this, and only the `false -> true` transition
    /// exists; repeating it succeeds without effect. Returns the
    /// message and whether the flag actually flipped.
    pub async fn mark_read(
        pool: &Pool<Sqlite>,
        message_id: i64,
        requester_id: &str,
    ) -> Result<(Message, bool), AppError> {
        with_retry(|| async move {
            let mut tx = pool.begin().await?;

            let mut message =
                sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?")
                    .bind(message_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Message {} does not exist", message_id))
                    })?;

            if message.receiver_id != requester_id {
                return Err(AppError::Forbidden(
                    "Only the receiver may mark a message read".to_string(),
                ));
            }

            if message.is_read {
                return Ok((message, false));
            }

            sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?")
                .bind(message_id)
                .execute(&mut *tx)
                .await?;
            message.is_read = true;

            ConversationRepository::apply_read(&mut tx, &message).await?;

            tx.commit().await?;
            Ok((message, true))
        })
        .await
    }

    /// Unread messages addressed to `user_id` from `peer_id`, counted
    /// straight off the log.
    pub async fn unread_from(
        pool: &Pool<Sqlite>,
        user_id: &str,
        peer_id: &str,
    ) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM messages WHERE receiver_id = ? AND sender_id = ? AND is_read = 0",
        )
        .bind(user_id)
        .bind(peer_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
