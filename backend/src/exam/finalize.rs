// src/exam/finalize.rs

use std::sync::Arc;

use sqlx::types::Json;

use crate::{
    error::AppError,
    exam::{
        registry::{ExamRegistry, LiveSession},
        scorer,
    },
    models::{
        exam_record::{ExamResult, NewExamRecord},
        session::SessionStatus,
    },
};

const HISTORY_WARNING: &str = "Your result could not be saved to history";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeTrigger {
    ManualSubmit,
    TimerExpired,
}

impl FinalizeTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FinalizeTrigger::ManualSubmit => "manual submit",
            FinalizeTrigger::TimerExpired => "timer expiry",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// This call scored the session.
    Finalized {
        result: ExamResult,
        warning: Option<String>,
    },
    /// Someone else got there first; this is their result.
    AlreadyFinalized(ExamResult),
}

impl FinalizeOutcome {
    pub fn into_parts(self) -> (ExamResult, Option<String>) {
        match self {
            FinalizeOutcome::Finalized { result, warning } => (result, warning),
            FinalizeOutcome::AlreadyFinalized(result) => (result, None),
        }
    }
}

impl ExamRegistry {
    /// Scores and closes a session exactly once.
    ///
    /// Manual submit and timer expiry both land here and race on the
    /// session lock. The loser gets the stored result back.
    pub async fn finalize(
        &self,
        session: &Arc<LiveSession>,
        trigger: FinalizeTrigger,
    ) -> Result<FinalizeOutcome, AppError> {
        let mut store = session.lock().await;

        if !store.try_complete() {
            return match store.state().result.clone() {
                Some(result) => Ok(FinalizeOutcome::AlreadyFinalized(result)),
                None => Err(AppError::Conflict(
                    "Session is no longer active".to_string(),
                )),
            };
        }

        let now = self.clock.now();
        let time_spent_seconds = match trigger {
            FinalizeTrigger::TimerExpired => u64::from(store.state().duration_seconds),
            FinalizeTrigger::ManualSubmit => store.elapsed_seconds(now),
        };
        let result = scorer::score(&store.state().questions, &store.state().answers)
            .into_result(time_spent_seconds);
        store.record_result(result.clone());

        let state = store.state();
        let updated = sqlx::query(
            r#"
            UPDATE exam_sessions
            SET status = ?, answers = ?, review_flags = ?, current_index = ?, result = ?, finished_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(SessionStatus::Completed.as_str())
        .bind(Json(&state.answers))
        .bind(Json(&state.review_flags))
        .bind(state.current_index as i64)
        .bind(Json(&result))
        .bind(now)
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await;

        match updated {
            Ok(done) if done.rows_affected() == 0 => {
                // Finalized by another process.
                let stored = sqlx::query_scalar::<_, Option<Json<ExamResult>>>(
                    "SELECT result FROM exam_sessions WHERE id = ?",
                )
                .bind(session.id.to_string())
                .fetch_optional(&self.pool)
                .await?
                .flatten();
                session.finish_countdown();
                self.forget(session.id);

                return match stored {
                    Some(Json(stored)) => {
                        store.record_result(stored.clone());
                        Ok(FinalizeOutcome::AlreadyFinalized(stored))
                    }
                    None => Err(AppError::Conflict(
                        "Session is no longer active".to_string(),
                    )),
                };
            }
            Ok(_) => {}
            Err(e) => {
                // Nothing was recorded; the session stays running and the next
                // submit or expiry scores it again from scratch.
                tracing::error!("Failed to mark session {} completed: {:?}", session.id, e);
                store.reopen();
                session.clear_finished_countdown();
                return Err(AppError::from(e));
            }
        }
        drop(store);

        session.finish_countdown();

        tracing::info!(
            "Session {} finalized by {}: {}/{} ({}%)",
            session.id,
            trigger.as_str(),
            result.score,
            result.total,
            result.percentage
        );

        let record = NewExamRecord {
            user_id: session.user_id.clone(),
            email: session.email.clone(),
            session_id: Some(session.id.to_string()),
            result: result.clone(),
            created_at: now,
        };
        let warning = match self.history.append(&record).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("History append failed for session {}: {}", session.id, e);
                Some(HISTORY_WARNING.to_string())
            }
        };

        self.forget(session.id);

        Ok(FinalizeOutcome::Finalized { result, warning })
    }

    /// Appends the result of a submission that never had a server-side session.
    /// Returns a warning instead of failing when history is unavailable.
    pub async fn record_stateless(
        &self,
        user_id: &str,
        email: Option<&str>,
        result: &ExamResult,
    ) -> Option<String> {
        let record = NewExamRecord {
            user_id: user_id.to_string(),
            email: email.map(str::to_string),
            session_id: None,
            result: result.clone(),
            created_at: self.clock.now(),
        };
        match self.history.append(&record).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("History append failed for user {}: {}", user_id, e);
                Some(HISTORY_WARNING.to_string())
            }
        }
    }
}
