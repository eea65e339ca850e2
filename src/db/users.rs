use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::db::models::User;
use crate::db::with_retry;
use crate::error::AppError;

pub struct UserRepository;

impl UserRepository {
    pub async fn create(
        pool: &Pool<Sqlite>,
        email: &str,
        display_name: &str,
        password_hash: &[u8; 32],
        password_salt: &[u8; 32],
    ) -> Result<User, AppError> {
        with_retry(|| async move {
            let id = Uuid::new_v4().to_string();
            let now = chrono::Utc::now().timestamp_millis();

            let result = sqlx::query_as::<_, User>(
                r#"
INSERT INTO users (id, email, display_name, password_hash, password_salt, is_online, last_seen, created_at)
VALUES (?, ?, ?, ?, ?, 0, ?, ?)
RETURNING *
                "#,
            )
            .bind(&id)
            .bind(email)
            .bind(display_name)
            .bind(password_hash.as_slice())
            .bind(password_salt.as_slice())
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await;

            match result {
                Ok(user) => Ok(user),
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                    AppError::Conflict(format!("Email {} is already registered", email)),
                ),
                Err(err) => Err(err.into()),
            }
        })
        .await
    }

    pub async fn get_by_id(pool: &Pool<Sqlite>, id: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    pub async fn get_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(pool)
            .await?;

        Ok(user)
    }

    /// Every user except the caller, in a stable snapshot order.
    pub async fn list_excluding(
        pool: &Pool<Sqlite>,
        user_id: &str,
    ) -> Result<Vec<User>, AppError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id != ? ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(users)
    }

    /// Flip the online flag and stamp `last_seen`. The stamp never
    /// moves backwards. Returns the stored `last_seen`.
    pub async fn set_online_status(
        pool: &Pool<Sqlite>,
        user_id: &str,
        is_online: bool,
    ) -> Result<i64, AppError> {
        with_retry(|| async move {
            let now = chrono::Utc::now().timestamp_millis();

            let last_seen = sqlx::query_scalar::<_, i64>(
                r#"
UPDATE users SET is_online = ?, last_seen = MAX(last_seen, ?)
WHERE id = ?
RETURNING last_seen
                "#,
            )
            .bind(is_online)
            .bind(now)
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {} does not exist", user_id)))?;

            Ok(last_seen)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing;

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let pool = testing::pool().await;
        testing::seed_user(&pool, "alice@example.com", "Alice").await;

        let err = UserRepository::create(&pool, "alice@example.com", "Other", &[0; 32], &[0; 32])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn listing_excludes_the_caller() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;
        let bob = testing::seed_user(&pool, "bob@example.com", "Bob").await;
        let carol = testing::seed_user(&pool, "carol@example.com", "Carol").await;

        let listed = UserRepository::list_excluding(&pool, &alice.id).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&bob.id.as_str()));
        assert!(ids.contains(&carol.id.as_str()));
        assert!(!ids.contains(&alice.id.as_str()));

        // Same snapshot, same order.
        let again = UserRepository::list_excluding(&pool, &alice.id).await.unwrap();
        let again_ids: Vec<&str> = again.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, again_ids);
    }

    #[tokio::test]
    async fn online_status_stamps_last_seen() {
        let pool = testing::pool().await;
        let alice = testing::seed_user(&pool, "alice@example.com", "Alice").await;

        let stamped = UserRepository::set_online_status(&pool, &alice.id, true)
            .await
            .unwrap();
        let user = UserRepository::get_by_id(&pool, &alice.id)
            .await
            .unwrap()
            .unwrap();
        assert!(user.is_online);
        assert_eq!(user.last_seen, stamped);
        assert!(stamped >= alice.last_seen);

        let later = UserRepository::set_online_status(&pool, &alice.id, false)
            .await
            .unwrap();
        let user = UserRepository::get_by_id(&pool, &alice.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!user.is_online);
        assert!(later >= stamped);
    }

    #[tokio::test]
    async fn online_status_for_unknown_user_is_not_found() {
        let pool = testing::pool().await;
        let err = UserRepository::set_online_status(&pool, "nope", true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
