// src/models/session.rs

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;
use validator::Validate;

use crate::{
    exam::store::SessionState,
    models::{
        answer::{Answer, AnswerMap},
        exam_record::ExamResult,
        question::{PublicQuestion, Question},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
        }
    }
}

/// Represents the 'exam_sessions' table in the database.
#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub email: Option<String>,
    pub questions: Json<Vec<Question>>,
    pub answers: Json<AnswerMap>,
    pub review_flags: Json<BTreeSet<String>>,
    pub current_index: i64,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub status: String,
    pub result: Option<Json<ExamResult>>,
}

impl SessionRow {
    pub fn session_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.id).ok()
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running.as_str()
    }

    /// Rebuilds the in-memory state persisted in this row.
    pub fn to_state(&self) -> SessionState {
        SessionState {
            questions: self.questions.0.clone(),
            answers: self.answers.0.clone(),
            current_index: self.current_index.max(0) as usize,
            review_flags: self.review_flags.0.clone(),
            started_at: Some(self.started_at),
            duration_seconds: self.duration_seconds.clamp(0, i64::from(u32::MAX)) as u32,
            started: true,
            completed: !self.is_running(),
            result: self.result.as_ref().map(|r| r.0.clone()),
        }
    }
}

/// DTO for beginning an exam.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BeginSessionRequest {
    /// Clamped into `[1, 50]`; defaults to 15.
    pub count: Option<usize>,

    #[serde(default)]
    pub categories: Vec<String>,

    #[validate(range(min = 1, max = 14400))]
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SetAnswerRequest {
    pub selection: Answer,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub index: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFlagResponse {
    pub question_id: String,
    pub flagged: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionResponse {
    pub current_index: usize,
}

/// What a client sees of its session. Answer keys stay hidden until completion.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Uuid,
    pub questions: Vec<PublicQuestion>,
    pub answers: AnswerMap,
    pub current_index: usize,
    pub review_flags: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: u32,
    pub remaining_seconds: u64,
    pub answered_count: usize,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExamResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SessionView {
    pub fn new(
        id: Uuid,
        state: &SessionState,
        remaining_seconds: u64,
        answered_count: usize,
    ) -> Self {
        let status = if state.completed {
            SessionStatus::Completed
        } else {
            SessionStatus::Running
        };

        SessionView {
            id,
            questions: state.questions.iter().map(PublicQuestion::from).collect(),
            answers: state.answers.clone(),
            current_index: state.current_index,
            review_flags: state.review_flags.iter().cloned().collect(),
            started_at: state.started_at,
            duration_seconds: state.duration_seconds,
            remaining_seconds,
            answered_count,
            status,
            result: state.result.clone(),
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: Option<String>) -> Self {
        self.warning = warning;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{Difficulty, QuestionOption};

    fn row(status: &str) -> SessionRow {
        SessionRow {
            id: Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            email: None,
            questions: Json(vec![Question {
                id: "q1".to_string(),
                text: "Pick".to_string(),
                options: vec![QuestionOption { text: "A".to_string() }],
                correct_answer: Answer::Single(0),
                category: "General".to_string(),
                difficulty: Difficulty::Easy,
                explanation: None,
            }]),
            answers: Json([("q1".to_string(), Answer::Single(0))].into_iter().collect()),
            review_flags: Json(BTreeSet::from(["q1".to_string()])),
            current_index: 0,
            started_at: Utc::now(),
            duration_seconds: 600,
            status: status.to_string(),
            result: None,
        }
    }

    #[test]
    fn test_row_to_state() {
        let running = row("running");
        assert!(running.session_id().is_some());
        let state = running.to_state();
        assert!(state.started);
        assert!(!state.completed);
        assert_eq!(state.duration_seconds, 600);
        assert!(state.review_flags.contains("q1"));

        assert!(row("completed").to_state().completed);
    }

    #[test]
    fn test_view_hides_answer_key() {
        let state = row("running").to_state();
        let view = SessionView::new(Uuid::new_v4(), &state, 600, 1);
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["remainingSeconds"], 600);
        assert!(json["questions"][0].get("correctAnswer").is_none());
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_begin_request_validation() {
        let ok: BeginSessionRequest =
            serde_json::from_str(r#"{"count": 5, "durationSeconds": 600}"#).unwrap();
        assert!(ok.validate().is_ok());
        assert!(ok.categories.is_empty());

        let too_long: BeginSessionRequest =
            serde_json::from_str(r#"{"durationSeconds": 99999}"#).unwrap();
        assert!(too_long.validate().is_err());
    }
}
