pub mod invitations;

use crate::domain::models::{RatingDimension, Ratings, RewardStatus, SurveyStep};
use crate::domain::prizes::{generate_code, Prize, PrizePool};
use crate::time_utils;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use thiserror::Error;

const CODE_ATTEMPTS: usize = 5;

pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedbackRow {
    pub id: i64,
    pub user_id: i64,
    pub visit_id: String,
    pub service: Option<i64>,
    pub taste: Option<i64>,
    pub speed: Option<i64>,
    pub clean: Option<i64>,
    pub comment: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub alert_sent: bool,
}

impl FeedbackRow {
    pub fn ratings(&self) -> Ratings {
        Ratings {
            service: self.service,
            taste: self.taste,
            speed: self.speed,
            clean: self.clean,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveySession {
    pub user_id: i64,
    pub visit_id: String,
    pub step: SurveyStep,
}

#[derive(Debug, Clone, FromRow)]
pub struct RewardRow {
    pub code: String,
    pub title: String,
    #[sqlx(rename = "type")]
    pub category: String,
    pub valid_until: String,
    pub user_id: i64,
    pub visit_id: String,
    pub status: String,
    pub created_at: String,
    pub redeemed_at: Option<String>,
    pub redeemed_by: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct IssuedReward {
    pub code: String,
    pub prize: Prize,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitUsage {
    Fresh,
    /// Unfinished survey by the same guest.
    Resumable,
    Used,
}

#[derive(Error, Debug)]
pub enum RedeemError {
    #[error("code not found")]
    NotFound,
    #[error("code expired")]
    Expired,
    #[error("code status is {0}")]
    NotRedeemable(String),
    #[error("stored expiry `{0}` is unreadable")]
    InvalidExpiry(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Default, FromRow)]
pub struct FeedbackStats {
    pub count: i64,
    pub avg_service: Option<f64>,
    pub avg_taste: Option<f64>,
    pub avg_speed: Option<f64>,
    pub avg_clean: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ExportRow {
    pub created_at: String,
    pub user_id: i64,
    pub visit_id: String,
    pub service: Option<i64>,
    pub taste: Option<i64>,
    pub speed: Option<i64>,
    pub clean: Option<i64>,
    pub comment: Option<String>,
    pub prize_code: Option<String>,
    pub prize_title: Option<String>,
    pub prize_status: Option<String>,
    pub valid_until: Option<String>,
}

// ========== Guests & visits ==========

pub async fn ensure_guest(pool: &SqlitePool, user_id: i64, username: Option<&str>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO guests (user_id, username, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE SET username = excluded.username
        "#,
    )
    .bind(user_id)
    .bind(username)
    .bind(time_utils::now())
    .execute(pool)
    .await?;
    Ok(())
}

/// First guest to present a visit becomes its owner. Returns whether
/// `user_id` owns the visit afterwards.
pub async fn record_visit(pool: &SqlitePool, visit_id: &str, user_id: i64) -> Result<bool> {
    sqlx::query(
        r#"
        INSERT INTO visits (visit_id, user_id, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT (visit_id) DO NOTHING
        "#,
    )
    .bind(visit_id)
    .bind(user_id)
    .bind(time_utils::now())
    .execute(pool)
    .await?;

    let owner: i64 = sqlx::query_scalar("SELECT user_id FROM visits WHERE visit_id = ?")
        .bind(visit_id)
        .fetch_one(pool)
        .await?;
    Ok(owner == user_id)
}

pub async fn visit_usage(pool: &SqlitePool, visit_id: &str, user_id: i64) -> Result<VisitUsage> {
    let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
        r#"
        SELECT user_id, completed_at
        FROM feedback
        WHERE visit_id = ?
        "#,
    )
    .bind(visit_id)
    .fetch_all(pool)
    .await?;

    if rows.iter().any(|(owner, completed)| completed.is_some() || *owner != user_id) {
        return Ok(VisitUsage::Used);
    }

    // claimed by another guest who has not answered yet
    let owner: Option<i64> = sqlx::query_scalar("SELECT user_id FROM visits WHERE visit_id = ?")
        .bind(visit_id)
        .fetch_optional(pool)
        .await?;
    if matches!(owner, Some(owner) if owner != user_id) {
        return Ok(VisitUsage::Used);
    }
    if rows.is_empty() {
        Ok(VisitUsage::Fresh)
    } else {
        Ok(VisitUsage::Resumable)
    }
}

// ========== Survey sessions ==========

/// Starts (or restarts) the survey for `user_id` at the first question.
pub async fn open_session(
    pool: &SqlitePool,
    user_id: i64,
    visit_id: &str,
    ttl_minutes: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO survey_sessions (user_id, visit_id, step, started_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE SET
            visit_id = excluded.visit_id,
            step = excluded.step,
            started_at = excluded.started_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(user_id)
    .bind(visit_id)
    .bind(SurveyStep::FIRST.as_str())
    .bind(now)
    .bind(now + Duration::minutes(ttl_minutes))
    .execute(pool)
    .await?;
    Ok(())
}

/// Live session for the guest; expired sessions count as absent.
pub async fn load_session(
    pool: &SqlitePool,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<SurveySession>> {
    let row: Option<(String, String)> = sqlx::query_as(
        r#"
        SELECT visit_id, step
        FROM survey_sessions
        WHERE user_id = ? AND expires_at > ?
        "#,
    )
    .bind(user_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    let Some((visit_id, step)) = row else {
        return Ok(None);
    };
    match SurveyStep::try_from(step.as_str()) {
        Ok(step) => Ok(Some(SurveySession {
            user_id,
            visit_id,
            step,
        })),
        Err(_) => {
            tracing::warn!("Unknown survey step `{}` for user {}, dropping session", step, user_id);
            close_session(pool, user_id).await?;
            Ok(None)
        }
    }
}

pub async fn set_session_step(
    pool: &SqlitePool,
    user_id: i64,
    step: SurveyStep,
    ttl_minutes: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE survey_sessions
        SET step = ?, expires_at = ?
        WHERE user_id = ?
        "#,
    )
    .bind(step.as_str())
    .bind(now + Duration::minutes(ttl_minutes))
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn close_session(pool: &SqlitePool, user_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM survey_sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn purge_expired_sessions(pool: &SqlitePool, now: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM survey_sessions WHERE expires_at <= ?")
        .bind(now)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ========== Feedback ==========

fn rating_upsert_sql(dim: RatingDimension) -> &'static str {
    match dim {
        RatingDimension::Service => {
            r#"
            INSERT INTO feedback (user_id, visit_id, created_at, service) VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, visit_id) DO UPDATE SET service = excluded.service
            "#
        }
        RatingDimension::Taste => {
            r#"
            INSERT INTO feedback (user_id, visit_id, created_at, taste) VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, visit_id) DO UPDATE SET taste = excluded.taste
            "#
        }
        RatingDimension::Speed => {
            r#"
            INSERT INTO feedback (user_id, visit_id, created_at, speed) VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, visit_id) DO UPDATE SET speed = excluded.speed
            "#
        }
        RatingDimension::Clean => {
            r#"
            INSERT INTO feedback (user_id, visit_id, created_at, clean) VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, visit_id) DO UPDATE SET clean = excluded.clean
            "#
        }
    }
}

/// Stores one answer, creating the feedback record on the first one.
/// Answering the same question again overwrites the earlier value.
pub async fn store_rating(
    pool: &SqlitePool,
    user_id: i64,
    visit_id: &str,
    dim: RatingDimension,
    value: i64,
    now: DateTime<Utc>,
) -> Result<FeedbackRow> {
    sqlx::query(rating_upsert_sql(dim))
        .bind(user_id)
        .bind(visit_id)
        .bind(now)
        .bind(value)
        .execute(pool)
        .await?;

    find_feedback(pool, user_id, visit_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("feedback for user {user_id} visit {visit_id} vanished"))
}

pub async fn find_feedback(
    pool: &SqlitePool,
    user_id: i64,
    visit_id: &str,
) -> Result<Option<FeedbackRow>> {
    let row = sqlx::query_as::<_, FeedbackRow>(
        r#"
        SELECT id, user_id, visit_id, service, taste, speed, clean, comment,
               created_at, completed_at, alert_sent
        FROM feedback
        WHERE user_id = ? AND visit_id = ?
        "#,
    )
    .bind(user_id)
    .bind(visit_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_feedback_by_id(pool: &SqlitePool, id: i64) -> Result<Option<FeedbackRow>> {
    let row = sqlx::query_as::<_, FeedbackRow>(
        r#"
        SELECT id, user_id, visit_id, service, taste, speed, clean, comment,
               created_at, completed_at, alert_sent
        FROM feedback
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn save_comment(pool: &SqlitePool, feedback_id: i64, comment: &str) -> Result<()> {
    sqlx::query("UPDATE feedback SET comment = ? WHERE id = ?")
        .bind(comment)
        .bind(feedback_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Flips `alert_sent`; returns true only for the caller that flipped it.
pub async fn claim_alert(pool: &SqlitePool, feedback_id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE feedback SET alert_sent = 1 WHERE id = ? AND alert_sent = 0")
        .bind(feedback_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn acknowledge_alert(
    pool: &SqlitePool,
    feedback_id: i64,
    staff_id: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE feedback
        SET alert_ack_by = ?, alert_ack_at = ?
        WHERE id = ? AND alert_sent = 1 AND alert_ack_by IS NULL
        "#,
    )
    .bind(staff_id)
    .bind(now)
    .bind(feedback_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

// ========== Rewards ==========

/// Draws a prize, stores it under a fresh code, marks the feedback complete
/// and ends the survey session in one transaction.
///
/// Returns `None` when the feedback is missing or already complete, so a
/// visit is rewarded at most once.
pub async fn issue_reward<R: Rng + Send + ?Sized>(
    pool: &SqlitePool,
    rng: &mut R,
    prizes: &PrizePool,
    user_id: i64,
    visit_id: &str,
    valid_days: i64,
    now: DateTime<Utc>,
) -> Result<Option<IssuedReward>> {
    let mut tx = pool.begin().await?;

    let completed = sqlx::query(
        r#"
        UPDATE feedback
        SET completed_at = ?
        WHERE user_id = ? AND visit_id = ? AND completed_at IS NULL
        "#,
    )
    .bind(now)
    .bind(user_id)
    .bind(visit_id)
    .execute(&mut *tx)
    .await?;
    if completed.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let prize = prizes.draw(rng).clone();
    let valid_until = now + Duration::days(valid_days);

    let mut issued_code = None;
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_code(rng);
        let result = sqlx::query(
            r#"
            INSERT INTO prizes (code, title, type, valid_until, user_id, visit_id, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(&code)
        .bind(&prize.label)
        .bind(&prize.category)
        .bind(valid_until)
        .bind(user_id)
        .bind(visit_id)
        .bind(RewardStatus::Issued.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 1 {
            issued_code = Some(code);
            break;
        }
        tracing::warn!("Promo code collision on {}, retrying", code);
    }
    let code = issued_code
        .ok_or_else(|| anyhow::anyhow!("no free promo code after {CODE_ATTEMPTS} attempts"))?;

    sqlx::query("DELETE FROM survey_sessions WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Some(IssuedReward {
        code,
        prize,
        valid_until,
    }))
}

pub async fn find_reward(pool: &SqlitePool, code: &str) -> Result<Option<RewardRow>> {
    let row = sqlx::query_as::<_, RewardRow>(
        r#"
        SELECT code, title, type, valid_until, user_id, visit_id, status,
               created_at, redeemed_at, redeemed_by
        FROM prizes
        WHERE code = ?
        "#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// `issued -> redeemed`, at most once per code.
///
/// Expiry is checked before status. An unreadable stored expiry refuses the
/// redemption.
pub async fn redeem_reward(
    pool: &SqlitePool,
    code: &str,
    staff_id: i64,
    now: DateTime<Utc>,
) -> Result<RewardRow, RedeemError> {
    let row = sqlx::query_as::<_, RewardRow>(
        r#"
        SELECT code, title, type, valid_until, user_id, visit_id, status,
               created_at, redeemed_at, redeemed_by
        FROM prizes
        WHERE code = ?
        "#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await?
    .ok_or(RedeemError::NotFound)?;

    let Some(valid_until) = time_utils::parse_timestamp(&row.valid_until) else {
        tracing::warn!("Promo {} has unreadable valid_until `{}`", code, row.valid_until);
        return Err(RedeemError::InvalidExpiry(row.valid_until));
    };

    if now > valid_until {
        sqlx::query("UPDATE prizes SET status = ? WHERE code = ? AND status = ?")
            .bind(RewardStatus::Expired.as_str())
            .bind(code)
            .bind(RewardStatus::Issued.as_str())
            .execute(pool)
            .await?;
        return Err(RedeemError::Expired);
    }

    if RewardStatus::try_from(row.status.as_str()) != Ok(RewardStatus::Issued) {
        return Err(RedeemError::NotRedeemable(row.status));
    }

    let result = sqlx::query(
        r#"
        UPDATE prizes
        SET status = ?, redeemed_at = ?, redeemed_by = ?
        WHERE code = ? AND status = ?
        "#,
    )
    .bind(RewardStatus::Redeemed.as_str())
    .bind(now)
    .bind(staff_id)
    .bind(code)
    .bind(RewardStatus::Issued.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RedeemError::NotRedeemable(
            RewardStatus::Redeemed.as_str().to_string(),
        ));
    }

    Ok(RewardRow {
        status: RewardStatus::Redeemed.as_str().to_string(),
        redeemed_by: Some(staff_id),
        ..row
    })
}

// ========== Staff reporting ==========

pub async fn feedback_stats(pool: &SqlitePool, since: DateTime<Utc>) -> Result<FeedbackStats> {
    let stats = sqlx::query_as::<_, FeedbackStats>(
        r#"
        SELECT COUNT(*) AS count,
               AVG(service) AS avg_service,
               AVG(taste) AS avg_taste,
               AVG(speed) AS avg_speed,
               AVG(clean) AS avg_clean
        FROM feedback
        WHERE created_at >= ?
        "#,
    )
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(stats)
}

/// One row per feedback, joined to at most one prize, newest first.
pub async fn export_rows(pool: &SqlitePool) -> Result<Vec<ExportRow>> {
    let rows = sqlx::query_as::<_, ExportRow>(
        r#"
        SELECT f.created_at, f.user_id, f.visit_id,
               f.service, f.taste, f.speed, f.clean, f.comment,
               p.code AS prize_code, p.title AS prize_title,
               p.status AS prize_status, p.valid_until
        FROM feedback f
        LEFT JOIN prizes p ON p.code = (
            SELECT code FROM prizes
            WHERE user_id = f.user_id AND visit_id = f.visit_id
            ORDER BY created_at
            LIMIT 1
        )
        ORDER BY f.created_at DESC, f.id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Single-connection in-memory database with migrations applied.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::testing::memory_pool;
    use super::*;
    use crate::domain::prizes::CODE_PREFIX;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, 0, 0).unwrap()
    }

    async fn complete_survey(pool: &SqlitePool, user: i64, visit: &str, values: [i64; 4]) {
        for (dim, value) in RatingDimension::ALL.iter().zip(values) {
            store_rating(pool, user, visit, *dim, value, at(12)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_rating_upsert_is_idempotent_per_field() {
        let pool = memory_pool().await;
        let first = store_rating(&pool, 1, "v1", RatingDimension::Service, 2, at(12)).await.unwrap();
        let again = store_rating(&pool, 1, "v1", RatingDimension::Service, 5, at(13)).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.service, Some(5));
        assert_eq!(again.taste, None);

        let row = store_rating(&pool, 1, "v1", RatingDimension::Clean, 4, at(13)).await.unwrap();
        assert_eq!(row.ratings(), Ratings { service: Some(5), clean: Some(4), ..Ratings::default() });

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feedback")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_visit_usage() {
        let pool = memory_pool().await;
        assert_eq!(visit_usage(&pool, "v1", 1).await.unwrap(), VisitUsage::Fresh);

        store_rating(&pool, 1, "v1", RatingDimension::Service, 4, at(12)).await.unwrap();
        assert_eq!(visit_usage(&pool, "v1", 1).await.unwrap(), VisitUsage::Resumable);
        assert_eq!(visit_usage(&pool, "v1", 2).await.unwrap(), VisitUsage::Used);

        complete_survey(&pool, 1, "v1", [4, 4, 4, 4]).await;
        let mut rng = StdRng::seed_from_u64(1);
        issue_reward(&pool, &mut rng, &PrizePool::default_pool(), 1, "v1", 30, at(12))
            .await
            .unwrap();
        for user in [1, 2, 3] {
            assert_eq!(visit_usage(&pool, "v1", user).await.unwrap(), VisitUsage::Used);
        }
    }

    #[tokio::test]
    async fn test_visit_owned_before_first_answer() {
        let pool = memory_pool().await;
        assert!(record_visit(&pool, "T1", 1).await.unwrap());
        open_session(&pool, 1, "T1", 60, at(10)).await.unwrap();

        assert_eq!(visit_usage(&pool, "T1", 2).await.unwrap(), VisitUsage::Used);
        assert!(!record_visit(&pool, "T1", 2).await.unwrap());
        assert_eq!(visit_usage(&pool, "T1", 1).await.unwrap(), VisitUsage::Fresh);
        assert!(record_visit(&pool, "T1", 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let pool = memory_pool().await;
        assert_eq!(load_session(&pool, 1, at(10)).await.unwrap(), None);

        open_session(&pool, 1, "v1", 60, at(10)).await.unwrap();
        let session = load_session(&pool, 1, at(10)).await.unwrap().unwrap();
        assert_eq!(session.step, SurveyStep::FIRST);
        assert_eq!(session.visit_id, "v1");

        set_session_step(&pool, 1, SurveyStep::Comment, 60, at(10)).await.unwrap();
        let session = load_session(&pool, 1, at(10)).await.unwrap().unwrap();
        assert_eq!(session.step, SurveyStep::Comment);

        // expired sessions are invisible and purged
        assert_eq!(load_session(&pool, 1, at(12)).await.unwrap(), None);
        assert_eq!(purge_expired_sessions(&pool, at(12)).await.unwrap(), 1);

        open_session(&pool, 1, "v2", 60, at(10)).await.unwrap();
        close_session(&pool, 1).await.unwrap();
        assert_eq!(load_session(&pool, 1, at(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_step_drops_session() {
        let pool = memory_pool().await;
        open_session(&pool, 1, "v1", 60, at(10)).await.unwrap();
        sqlx::query("UPDATE survey_sessions SET step = 'bogus'")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(load_session(&pool, 1, at(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_alert_claimed_once() {
        let pool = memory_pool().await;
        let row = store_rating(&pool, 1, "v1", RatingDimension::Service, 1, at(12)).await.unwrap();
        assert!(!row.alert_sent);
        assert!(claim_alert(&pool, row.id).await.unwrap());
        assert!(!claim_alert(&pool, row.id).await.unwrap());
        assert!(find_feedback_by_id(&pool, row.id).await.unwrap().unwrap().alert_sent);

        assert!(acknowledge_alert(&pool, row.id, 99, at(13)).await.unwrap());
        assert!(!acknowledge_alert(&pool, row.id, 98, at(13)).await.unwrap());
    }

    #[tokio::test]
    async fn test_issue_reward_completes_survey() {
        let pool = memory_pool().await;
        complete_survey(&pool, 1, "v1", [5, 5, 5, 5]).await;
        open_session(&pool, 1, "v1", 60, at(12)).await.unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        let pool_cfg = PrizePool::default_pool();
        let reward = issue_reward(&pool, &mut rng, &pool_cfg, 1, "v1", 30, at(12))
            .await
            .unwrap()
            .unwrap();

        assert!(reward.code.starts_with(CODE_PREFIX));
        assert!(pool_cfg.prizes().contains(&reward.prize));
        assert_eq!(reward.valid_until, at(12) + Duration::days(30));
        assert_eq!(load_session(&pool, 1, at(12)).await.unwrap(), None);

        let stored = find_reward(&pool, &reward.code).await.unwrap().unwrap();
        assert_eq!(stored.status, "issued");
        assert_eq!(stored.title, reward.prize.label);
        assert_eq!(stored.category, reward.prize.category);
        assert!(find_feedback(&pool, 1, "v1").await.unwrap().unwrap().completed_at.is_some());
    }

    #[tokio::test]
    async fn test_issue_reward_once_per_visit() {
        let pool = memory_pool().await;
        complete_survey(&pool, 1, "v1", [5, 5, 5, 5]).await;
        let mut rng = StdRng::seed_from_u64(4);
        let prizes = PrizePool::default_pool();

        let first = issue_reward(&pool, &mut rng, &prizes, 1, "v1", 30, at(12)).await.unwrap();
        assert!(first.is_some());
        let second = issue_reward(&pool, &mut rng, &prizes, 1, "v1", 30, at(12)).await.unwrap();
        assert!(second.is_none());

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM prizes WHERE visit_id = 'v1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        // no feedback row, nothing to reward
        assert!(issue_reward(&pool, &mut rng, &prizes, 2, "v2", 30, at(12)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redeem_state_machine() {
        let pool = memory_pool().await;
        complete_survey(&pool, 1, "v1", [5, 5, 5, 5]).await;
        let mut rng = StdRng::seed_from_u64(5);
        let reward = issue_reward(&pool, &mut rng, &PrizePool::default_pool(), 1, "v1", 30, at(12))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            redeem_reward(&pool, "RB-NOPE", 42, at(13)).await,
            Err(RedeemError::NotFound)
        ));

        let redeemed = redeem_reward(&pool, &reward.code, 42, at(13)).await.unwrap();
        assert_eq!(redeemed.status, "redeemed");
        assert_eq!(redeemed.redeemed_by, Some(42));

        assert!(matches!(
            redeem_reward(&pool, &reward.code, 42, at(14)).await,
            Err(RedeemError::NotRedeemable(status)) if status == "redeemed"
        ));

        // expiry wins over status
        let late = at(12) + Duration::days(31);
        assert!(matches!(
            redeem_reward(&pool, &reward.code, 42, late).await,
            Err(RedeemError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_expired_code_is_marked() {
        let pool = memory_pool().await;
        complete_survey(&pool, 1, "v1", [5, 5, 5, 5]).await;
        let mut rng = StdRng::seed_from_u64(5);
        let reward = issue_reward(&pool, &mut rng, &PrizePool::default_pool(), 1, "v1", 1, at(12))
            .await
            .unwrap()
            .unwrap();

        let late = at(12) + Duration::days(2);
        assert!(matches!(
            redeem_reward(&pool, &reward.code, 42, late).await,
            Err(RedeemError::Expired)
        ));
        assert_eq!(find_reward(&pool, &reward.code).await.unwrap().unwrap().status, "expired");
    }

    #[tokio::test]
    async fn test_unreadable_expiry_refuses_redemption() {
        let pool = memory_pool().await;
        sqlx::query(
            r#"
            INSERT INTO prizes (code, title, type, valid_until, user_id, visit_id, status, created_at)
            VALUES ('RB-BROKEN', 'Dessert', 'gift', 'someday', 1, 'v1', 'issued', '2025-05-01T12:00:00+00:00')
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        assert!(matches!(
            redeem_reward(&pool, "RB-BROKEN", 42, at(13)).await,
            Err(RedeemError::InvalidExpiry(raw)) if raw == "someday"
        ));
        assert_eq!(find_reward(&pool, "RB-BROKEN").await.unwrap().unwrap().status, "issued");
    }

    #[tokio::test]
    async fn test_stats_window() {
        let pool = memory_pool().await;
        store_rating(&pool, 1, "old", RatingDimension::Service, 1, at(1)).await.unwrap();
        store_rating(&pool, 2, "v2", RatingDimension::Service, 4, at(12)).await.unwrap();
        store_rating(&pool, 2, "v2", RatingDimension::Taste, 5, at(12)).await.unwrap();
        store_rating(&pool, 3, "v3", RatingDimension::Service, 2, at(13)).await.unwrap();

        let stats = feedback_stats(&pool, at(10)).await.unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg_service, Some(3.0));
        assert_eq!(stats.avg_taste, Some(5.0));
        assert_eq!(stats.avg_clean, None);

        let empty = feedback_stats(&pool, at(20)).await.unwrap();
        assert_eq!(empty.count, 0);
    }

    #[tokio::test]
    async fn test_export_rows_join_one_prize() {
        let pool = memory_pool().await;
        complete_survey(&pool, 1, "v1", [5, 4, 3, 2]).await;
        store_rating(&pool, 2, "v2", RatingDimension::Service, 4, at(13)).await.unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let reward = issue_reward(&pool, &mut rng, &PrizePool::default_pool(), 1, "v1", 30, at(12))
            .await
            .unwrap()
            .unwrap();

        let rows = export_rows(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].visit_id, "v2");
        assert_eq!(rows[0].prize_code, None);
        assert_eq!(rows[1].prize_code.as_deref(), Some(reward.code.as_str()));
        assert_eq!(rows[1].prize_status.as_deref(), Some("issued"));
    }
}
