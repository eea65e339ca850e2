use std::collections::HashMap;

use sqlx::{Pool, Sqlite, Transaction};

use crate::db::models::{ConversationSummary, Message};
use crate::error::AppError;

/// Read-optimized view over the message log: one row per
/// `(viewer, peer)` with the latest message snapshot and the viewer's
/// unread count. Maintained only inside message-store transactions;
/// the log stays the single source of truth.
pub struct ConversationRepository;

impl ConversationRepository {
    /// Refresh both viewers' rows for a freshly appended message.
    /// Runs in the same transaction as the append.
    pub(crate) async fn apply_append(
        tx: &mut Transaction<'_, Sqlite>,
        message: &Message,
    ) -> Result<(), AppError> {
        // The receiver gains an unread message.
        sqlx::query(
            r#"
INSERT INTO conversations (user_id, peer_id, last_message, last_message_time, last_message_sender, unread_count)
VALUES (?, ?, ?, ?, ?, 1)
ON CONFLICT(user_id, peer_id) DO UPDATE SET
    last_message = excluded.last_message,
    last_message_time = excluded.last_message_time,
    last_message_sender = excluded.last_message_sender,
    unread_count = conversations.unread_count + 1
            "#,
        )
        .bind(&message.receiver_id)
        .bind(&message.sender_id)
        .bind(&message.content)
        .bind(message.timestamp)
        .bind(&message.sender_id)
        .execute(&mut **tx)
        .await?;

        // The sender only sees a fresher snapshot.
        sqlx::query(
            r#"
INSERT INTO conversations (user_id, peer_id, last_message, last_message_time, last_message_sender, unread_count)
VALUES (?, ?, ?, ?, ?, 0)
ON CONFLICT(user_id, peer_id) DO UPDATE SET
    last_message = excluded.last_message,
    last_message_time = excluded.last_message_time,
    last_message_sender = excluded.last_message_sender
            "#,
        )
        .bind(&message.sender_id)
        .bind(&message.receiver_id)
        .bind(&message.content)
        .bind(message.timestamp)
        .bind(&message.sender_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Settle the receiver's unread count after a message flipped to
    /// read. Runs in the same transaction as the flip.
    pub(crate) async fn apply_read(
        tx: &mut Transaction<'_, Sqlite>,
        message: &Message,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
UPDATE conversations SET unread_count = MAX(unread_count - 1, 0)
WHERE user_id = ? AND peer_id = ?
            "#,
        )
        .bind(&message.receiver_id)
        .bind(&message.sender_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// The viewer's conversation list, most recent activity first.
    pub async fn summaries_for(
        pool: &Pool<Sqlite>,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let summaries = sqlx::query_as::<_, ConversationSummary>(
            r#"
SELECT c.peer_id, u.display_name AS peer_name, c.last_message,
       c.last_message_time, c.last_message_sender, c.unread_count
FROM conversations c
JOIN users u ON u.id = c.peer_id
WHERE c.user_id = ?
ORDER BY c.last_message_time DESC, c.peer_id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(summaries)
    }

    /// The same summaries derived by a full rescan of the message log.
    /// The materialized rows must always agree with this; tests hold
    /// the two against each other.
    pub async fn recompute_for(
        pool: &Pool<Sqlite>,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, AppError> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
SELECT * FROM messages
WHERE sender_id = ?1 OR receiver_id = ?1
ORDER BY timestamp ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let mut by_peer: HashMap<String, ConversationSummary> = HashMap::new();
        for message in &messages {
            let peer_id = if message.sender_id == user_id {
                &message.receiver_id
            } else {
                &message.sender_id
            };

            let entry = by_peer
                .entry(peer_id.clone())
                .or_insert_with(|| ConversationSummary {
                    peer_id: peer_id.clone(),
                    peer_name: String::new(),
                    last_message: String::new(),
                    last_message_time: 0,
                    last_message_sender: String::new(),
                    unread_count: 0,
                });

            entry.last_message = message.content.clone();
            entry.last_message_time = message.timestamp;
            entry.last_message_sender = message.sender_id.clone();
            if message.receiver_id == user_id && !message.is_read {
                entry.unread_count += 1;
            }
        }

        for summary in by_peer.values_mut() {
            summary.peer_name =
                sqlx::query_scalar::<_, String>("SELECT display_name FROM users WHERE id = ?")
                    .bind(&summary.peer_id)
                    .fetch_optional(pool)
                    .await?
                    .unwrap_or_default();
        }

        let mut summaries: Vec<ConversationSummary> = by_peer.into_values().collect();
        summaries.sort_by(|a, b| {
            b.last_message_time
                .cmp(&a.last_message_time)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;
    use crate::db::MessageRepository;

    async fn assert_consistent(pool: &Pool<Sqlite>, user_id: &str) {
        let materialized = ConversationRepository::summaries_for(pool, user_id)
            .await
            .unwrap();
        let recomputed = ConversationRepository::recompute_for(pool, user_id)
            .await
            .unwrap();
        assert_eq!(materialized, recomputed, "index diverged for {}", user_id);
    }

    #[tokio::test]
    async fn summaries_track_latest_message_and_unread() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;
        let bob = testing::seed_user(&pool, "bob@example.com", "Bob").await;

        MessageRepository::append(&pool, &alice.id, &bob.id, "first").await.unwrap();
        MessageRepository::append(&pool, &alice.id, &bob.id, "second").await.unwrap();

        let bobs = ConversationRepository::summaries_for(&pool, &bob.id)
            .await
            .unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].peer_id, alice.id);
        assert_eq!(bobs[0].peer_name, "Alice");
        assert_eq!(bobs[0].last_message, "second");
        assert_eq!(bobs[0].last_message_sender, alice.id);
        assert_eq!(bobs[0].unread_count, 2);

        let alices = ConversationRepository::summaries_for(&pool, &alice.id)
            .await
            .unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].unread_count, 0);
        assert_eq!(alices[0].last_message, "second");
    }

    #[tokio::test]
    async fn index_matches_full_rescan_after_interleaving() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;
        let bob = testing::seed_user(&pool, "bob@example.com", "Bob").await;
        let carol = testing::seed_user(&pool, "carol@example.com", "Carol").await;

        let m1 = MessageRepository::append(&pool, &alice.id, &bob.id, "a->b 1").await.unwrap();
        MessageRepository::append(&pool, &bob.id, &alice.id, "b->a 1").await.unwrap();
        MessageRepository::append(&pool, &alice.id, &carol.id, "a->c 1").await.unwrap();
        MessageRepository::mark_read(&pool, m1.id, &bob.id).await.unwrap();
        let m4 = MessageRepository::append(&pool, &carol.id, &alice.id, "c->a 1").await.unwrap();
        MessageRepository::append(&pool, &alice.id, &bob.id, "a->b 2").await.unwrap();
        MessageRepository::mark_read(&pool, m4.id, &alice.id).await.unwrap();
        // Repeat: already read, must not drift the counts.
        MessageRepository::mark_read(&pool, m4.id, &alice.id).await.unwrap();

        for user in [&alice.id, &bob.id, &carol.id] {
            assert_consistent(&pool, user).await;
        }

        // And the counts match the log-derived definition.
        let bobs = ConversationRepository::summaries_for(&pool, &bob.id)
            .await
            .unwrap();
        assert_eq!(
            bobs[0].unread_count,
            MessageRepository::unread_from(&pool, &bob.id, &alice.id)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn summaries_order_most_recent_first() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;
        let bob = testing::seed_user(&pool, "bob@example.com", "Bob").await;
        let carol = testing::seed_user(&pool, "carol@example.com", "Carol").await;

        MessageRepository::append(&pool, &bob.id, &alice.id, "older").await.unwrap();
        MessageRepository::append(&pool, &carol.id, &alice.id, "newer").await.unwrap();

        let summaries = ConversationRepository::summaries_for(&pool, &alice.id)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].last_message_time >= summaries[1].last_message_time);
    }
}
