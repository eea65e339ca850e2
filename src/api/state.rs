use std::sync::Arc;

use sqlx::{Pool, Sqlite};

use crate::config::Config;
use crate::realtime::Subscriptions;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Sqlite>,
    pub subscriptions: Arc<Subscriptions>,
    pub config: Arc<Config>,
}
