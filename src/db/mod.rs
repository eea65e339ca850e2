pub mod conversations;
pub mod messages;
pub mod models;
pub mod sessions;
pub mod users;

pub use conversations::ConversationRepository;
pub use messages::MessageRepository;
pub use models::{ConversationSummary, Message, Session, User};
pub use sessions::SessionRepository;
pub use users::UserRepository;

use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

const MAX_WRITE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(25);

/// Run a storage operation, retrying transient failures with backoff.
/// Validation errors surface immediately; only busy/locked storage
/// conditions are retried, up to `MAX_WRITE_ATTEMPTS`.
pub(crate) async fn with_retry<T, F, Fut>(op: F) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(AppError::Database(err)) if attempt < MAX_WRITE_ATTEMPTS && is_transient(&err) => {
                tracing::warn!("Transient storage failure (attempt {}): {}", attempt, err);
                tokio::time::sleep(RETRY_BASE_DELAY * 2u32.pow(attempt - 1)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let message = db.message();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};

    use super::{models::User, UserRepository};

    /// Fresh in-memory database with migrations applied. A single
    /// connection keeps every handle on the same memory store.
    pub async fn pool() -> Pool<Sqlite> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("migrations");

        pool
    }

    pub async fn seed_user(pool: &Pool<Sqlite>, email: &str, display_name: &str) -> User {
        UserRepository::create(pool, email, display_name, &[0u8; 32], &[0u8; 32])
            .await
            .expect("seed user")
    }
}
