use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::db::models::Session;
use crate::db::with_retry;
use crate::error::AppError;

pub struct SessionRepository;

impl SessionRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        user_id: &str,
        expiry_hours: i64,
    ) -> Result<Session, AppError> {
        with_retry(|| async move {
            let id = Uuid::new_v4().to_string();
            let token = Uuid::new_v4().to_string();
            let created_at = chrono::Utc::now().timestamp_millis();
            let expires_at = created_at + expiry_hours * 3_600_000;

            let session = sqlx::query_as::<_, Session>(
                r#"
INSERT INTO sessions (id, user_id, token, expires_at, created_at)
VALUES (?, ?, ?, ?, ?)
RETURNING *
                "#,
            )
            .bind(&id)
            .bind(user_id)
            .bind(&token)
            .bind(expires_at)
            .bind(created_at)
            .fetch_one(pool)
            .await?;

            Ok(session)
        })
        .await
    }

    pub async fn get_by_token(
        pool: &Pool<Sqlite>,
        token: &str,
    ) -> Result<Option<Session>, AppError> {
        let now = chrono::Utc::now().timestamp_millis();

        let session =
            sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE token = ? AND expires_at > ?")
                .bind(token)
                .bind(now)
                .fetch_optional(pool)
                .await?;

        Ok(session)
    }

    pub async fn delete(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
        with_retry(|| async move {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(token)
                .execute(pool)
                .await?;

            Ok(())
        })
        .await
    }

    pub async fn cleanup_expired(pool: &Pool<Sqlite>) -> Result<(), AppError> {
        let now = chrono::Utc::now().timestamp_millis();

        sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[tokio::test]
    async fn token_lookup_honors_expiry() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;

        let live = SessionRepository::create(&pool, &alice.id, 24).await.unwrap();
        assert!(SessionRepository::get_by_token(&pool, &live.token)
            .await
            .unwrap()
            .is_some());

        let expired = SessionRepository::create(&pool, &alice.id, -1).await.unwrap();
        assert!(SessionRepository::get_by_token(&pool, &expired.token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_revokes_the_token() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;

        let session = SessionRepository::create(&pool, &alice.id, 24).await.unwrap();
        SessionRepository::delete(&pool, &session.token).await.unwrap();
        assert!(SessionRepository::get_by_token(&pool, &session.token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cleanup_sweeps_only_expired_sessions() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;

        let live = SessionRepository::create(&pool, &alice.id, 24).await.unwrap();
        let expired = SessionRepository::create(&pool, &alice.id, -1).await.unwrap();

        SessionRepository::cleanup_expired(&pool).await.unwrap();

        let remaining = sqlx::query_as::<_, Session>("SELECT * FROM sessions")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token, live.token);
        assert_ne!(remaining[0].token, expired.token);
    }
}
