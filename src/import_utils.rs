//! Import of till bills (`chat_id,bill_id,visited_at`) as survey invitations.
use crate::db::invitations;
use crate::time_utils;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ImportError {
    #[error("missing header row")]
    MissingHeader,
    #[error("header has no `{0}` column")]
    MissingColumn(&'static str),
    #[error("line {line}: invalid chat_id `{value}`")]
    InvalidChatId { line: usize, value: String },
    #[error("line {line}: empty bill_id")]
    EmptyBill { line: usize },
    #[error("line {line}: invalid visited_at `{value}`")]
    InvalidVisitTime { line: usize, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillRecord {
    pub chat_id: i64,
    pub bill_id: String,
    /// `None` when the column is empty; the importer uses the import time.
    pub visited_at: Option<DateTime<Utc>>,
}

/// Splits one CSV line. Quoted fields may hold commas and `""` stands for a
/// literal quote.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

pub fn parse_bills(raw: &str) -> Result<Vec<BillRecord>, ImportError> {
    let mut lines = raw
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim_start_matches('\u{feff}').trim()))
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines.next().ok_or(ImportError::MissingHeader)?;
    let columns: Vec<String> = split_csv_line(header)
        .into_iter()
        .map(|c| c.to_lowercase())
        .collect();
    let position = |name: &'static str| {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or(ImportError::MissingColumn(name))
    };
    let chat_col = position("chat_id")?;
    let bill_col = position("bill_id")?;
    let visited_col = columns.iter().position(|c| c == "visited_at");

    let mut records = Vec::new();
    for (line, row) in lines {
        let fields = split_csv_line(row);
        let field = |idx: usize| fields.get(idx).map(String::as_str).unwrap_or("");

        let chat_raw = field(chat_col);
        let chat_id = chat_raw.parse::<i64>().map_err(|_| ImportError::InvalidChatId {
            line,
            value: chat_raw.to_string(),
        })?;

        let bill_id = field(bill_col);
        if bill_id.is_empty() {
            return Err(ImportError::EmptyBill { line });
        }

        let visited_raw = visited_col.map(field).unwrap_or("");
        let visited_at = if visited_raw.is_empty() {
            None
        } else {
            Some(time_utils::parse_timestamp(visited_raw).ok_or_else(|| {
                ImportError::InvalidVisitTime {
                    line,
                    value: visited_raw.to_string(),
                }
            })?)
        };

        records.push(BillRecord {
            chat_id,
            bill_id: bill_id.to_string(),
            visited_at,
        });
    }
    Ok(records)
}

/// Stores every bill as an invitation due `delay_minutes` after the visit.
pub async fn import_bills(
    pool: &SqlitePool,
    records: &[BillRecord],
    delay_minutes: i64,
    now: DateTime<Utc>,
) -> Result<usize> {
    for record in records {
        let visited_at = record.visited_at.unwrap_or(now);
        let due_at = visited_at + Duration::minutes(delay_minutes);
        invitations::upsert_invitation(pool, &record.bill_id, record.chat_id, visited_at, due_at)
            .await?;
    }
    tracing::info!("Imported {} bills", records.len());
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_pool;
    use chrono::TimeZone;

    #[test]
    fn test_parse_bills() {
        let raw = "chat_id,bill_id,visited_at\n\
                   101,B-1,2025-05-01T12:00:00\n\
                   \n\
                   102, B-2 ,\n";
        let records = parse_bills(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].chat_id, 101);
        assert_eq!(
            records[0].visited_at,
            Some(Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(records[1].bill_id, "B-2");
        assert_eq!(records[1].visited_at, None);
    }

    #[test]
    fn test_split_csv_line_quotes() {
        assert_eq!(split_csv_line(r#"1,"B,7",x"#), ["1", "B,7", "x"]);
        assert_eq!(split_csv_line(r#" 1 ,"say ""hi""","#), ["1", r#"say "hi""#, ""]);
        assert_eq!(split_csv_line("a"), ["a"]);
    }

    #[test]
    fn test_parse_bills_quoted_fields() {
        let raw = "\"chat_id\",\"bill_id\",\"visited_at\"\n\"101\",\"B,12\",\"2025-05-01T12:00:00\"\n";
        let records = parse_bills(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chat_id, 101);
        assert_eq!(records[0].bill_id, "B,12");
        assert!(records[0].visited_at.is_some());
    }

    #[test]
    fn test_parse_bills_column_order_and_errors() {
        let reordered = "bill_id,chat_id\nB-9,7\n";
        assert_eq!(parse_bills(reordered).unwrap()[0].chat_id, 7);

        assert_eq!(parse_bills(""), Err(ImportError::MissingHeader));
        assert_eq!(
            parse_bills("chat,bill_id\n1,B"),
            Err(ImportError::MissingColumn("chat_id"))
        );
        assert_eq!(
            parse_bills("chat_id,bill_id\nabc,B"),
            Err(ImportError::InvalidChatId {
                line: 2,
                value: "abc".into()
            })
        );
        assert_eq!(
            parse_bills("chat_id,bill_id\n1,"),
            Err(ImportError::EmptyBill { line: 2 })
        );
        assert_eq!(
            parse_bills("chat_id,bill_id,visited_at\n1,B,yesterday"),
            Err(ImportError::InvalidVisitTime {
                line: 2,
                value: "yesterday".into()
            })
        );
    }

    #[tokio::test]
    async fn test_import_schedules_after_delay() {
        let pool = memory_pool().await;
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 18, 0, 0).unwrap();
        let records = parse_bills("chat_id,bill_id,visited_at\n1,B-1,2025-05-01T12:00:00\n2,B-2,\n").unwrap();

        assert_eq!(import_bills(&pool, &records, 60, now).await.unwrap(), 2);

        let due = invitations::due_invitations(&pool, now, 50).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].bill_id, "B-1");

        let later = invitations::due_invitations(&pool, now + Duration::minutes(60), 50)
            .await
            .unwrap();
        assert_eq!(later.len(), 2);
    }
}
