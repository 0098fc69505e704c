//! Bills imported from the till, each turned into a delayed survey invitation.
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, FromRow)]
pub struct Invitation {
    pub bill_id: String,
    pub chat_id: i64,
    pub visited_at: String,
    pub due_at: String,
    pub sent_at: Option<String>,
}

/// Re-importing a bill reschedules it unless the invitation already went out.
pub async fn upsert_invitation(
    pool: &SqlitePool,
    bill_id: &str,
    chat_id: i64,
    visited_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO invitations (bill_id, chat_id, visited_at, due_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (bill_id) DO UPDATE SET
            chat_id = excluded.chat_id,
            visited_at = excluded.visited_at,
            due_at = excluded.due_at
        WHERE invitations.sent_at IS NULL
        "#,
    )
    .bind(bill_id)
    .bind(chat_id)
    .bind(visited_at)
    .bind(due_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_invitation(pool: &SqlitePool, bill_id: &str) -> Result<Option<Invitation>> {
    let row = sqlx::query_as::<_, Invitation>(
        r#"
        SELECT bill_id, chat_id, visited_at, due_at, sent_at
        FROM invitations
        WHERE bill_id = ?
        "#,
    )
    .bind(bill_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn due_invitations(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Invitation>> {
    let rows = sqlx::query_as::<_, Invitation>(
        r#"
        SELECT bill_id, chat_id, visited_at, due_at, sent_at
        FROM invitations
        WHERE sent_at IS NULL AND due_at <= ?
        ORDER BY due_at
        LIMIT ?
        "#,
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn mark_invitation_sent(
    pool: &SqlitePool,
    bill_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE invitations SET sent_at = ? WHERE bill_id = ?")
        .bind(now)
        .bind(bill_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_pool;
    use chrono::{Duration, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_due_invitations_polling() {
        let pool = memory_pool().await;
        upsert_invitation(&pool, "B-1", 10, at(9), at(10)).await.unwrap();
        upsert_invitation(&pool, "B-2", 11, at(9), at(12)).await.unwrap();

        let due = due_invitations(&pool, at(11), 50).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].bill_id, "B-1");
        assert_eq!(due[0].chat_id, 10);

        mark_invitation_sent(&pool, "B-1", at(11)).await.unwrap();
        assert!(due_invitations(&pool, at(11), 50).await.unwrap().is_empty());

        let due = due_invitations(&pool, at(12), 50).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].bill_id, "B-2");
    }

    #[tokio::test]
    async fn test_reimport_does_not_resend() {
        let pool = memory_pool().await;
        upsert_invitation(&pool, "B-1", 10, at(9), at(10)).await.unwrap();
        mark_invitation_sent(&pool, "B-1", at(10)).await.unwrap();

        upsert_invitation(&pool, "B-1", 10, at(9), at(10) + Duration::hours(5)).await.unwrap();
        let inv = find_invitation(&pool, "B-1").await.unwrap().unwrap();
        assert!(inv.sent_at.is_some());
        assert!(due_invitations(&pool, at(23), 50).await.unwrap().is_empty());

        assert!(find_invitation(&pool, "B-404").await.unwrap().is_none());
    }
}
