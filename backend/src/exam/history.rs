// src/exam/history.rs

use async_trait::async_trait;
use sqlx::{SqlitePool, types::Json};

use crate::{
    error::AppError,
    models::exam_record::{ExamRecord, NewExamRecord},
};

/// Append-only store of finalized exams.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn append(&self, record: &NewExamRecord) -> Result<i64, AppError>;

    /// The user's records, newest first.
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ExamRecord>, AppError>;
}

#[derive(Clone)]
pub struct SqlHistorySink {
    pool: SqlitePool,
}

impl SqlHistorySink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistorySink for SqlHistorySink {
    async fn append(&self, record: &NewExamRecord) -> Result<i64, AppError> {
        let result = &record.result;
        let id = sqlx::query_scalar(
            r#"
            INSERT INTO exam_records
            (user_id, email, session_id, score, total, percentage, passed, time_spent_seconds, per_question_results, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.email)
        .bind(&record.session_id)
        .bind(i64::from(result.score))
        .bind(i64::from(result.total))
        .bind(i64::from(result.percentage))
        .bind(result.passed())
        .bind(result.time_spent_seconds as i64)
        .bind(Json(&result.per_question_results))
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to append exam record: {:?}", e);
            AppError::from(e)
        })?;

        Ok(id)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<ExamRecord>, AppError> {
        let records = sqlx::query_as::<_, ExamRecord>(
            r#"
            SELECT
                id, user_id, email, session_id, score, total, percentage, passed,
                time_spent_seconds, per_question_results, created_at
            FROM exam_records
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::exam_record::ExamResult;
    use chrono::{Duration, Utc};

    fn new_record(user_id: &str, percentage: u32, minutes_ago: i64) -> NewExamRecord {
        NewExamRecord {
            user_id: user_id.to_string(),
            email: Some(format!("{}@example.com", user_id)),
            session_id: None,
            result: ExamResult {
                score: percentage / 10,
                total: 10,
                percentage,
                time_spent_seconds: 300,
                per_question_results: Vec::new(),
            },
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn test_append_and_list_per_user() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        let sink = SqlHistorySink::new(pool);

        sink.append(&new_record("alice", 40, 10)).await.unwrap();
        sink.append(&new_record("alice", 90, 1)).await.unwrap();
        sink.append(&new_record("bob", 70, 5)).await.unwrap();

        let alice = sink.list_for_user("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].percentage, 90);
        assert!(alice[0].passed);
        assert!(!alice[1].passed);
        assert_eq!(alice[0].email.as_deref(), Some("alice@example.com"));

        assert!(sink.list_for_user("carol").await.unwrap().is_empty());
    }
}
