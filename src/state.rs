use crate::config::Config;
use crate::domain::prizes::PrizePool;
use crate::middleware::AttemptLimiter;
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub prizes: Arc<PrizePool>,
    pub bill_limiter: AttemptLimiter,
    pub bot: teloxide::Bot,
}

pub type SharedState = Arc<AppState>;
