// src/models/exam_record.rs

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

use crate::{
    config::PASSING_PERCENTAGE,
    models::{answer::Answer, question::QuestionOption},
};

/// Per-question breakdown shown on the results page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_id: String,
    pub question: String,
    pub options: Vec<QuestionOption>,
    pub correct_answer: Answer,
    /// `None` when the question was left unanswered.
    pub selected: Option<Answer>,
    pub is_correct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Outcome of one finalized exam. Created once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub score: u32,
    pub total: u32,
    /// In `[0, 100]`.
    pub percentage: u32,
    pub time_spent_seconds: u64,
    pub per_question_results: Vec<QuestionOutcome>,
}

impl ExamResult {
    pub fn passed(&self) -> bool {
        self.percentage >= PASSING_PERCENTAGE
    }
}

/// Represents the 'exam_records' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamRecord {
    pub id: i64,
    pub user_id: String,
    pub email: Option<String>,
    pub session_id: Option<String>,
    pub score: i64,
    pub total: i64,
    pub percentage: i64,
    pub passed: bool,
    pub time_spent_seconds: i64,
    pub per_question_results: Json<Vec<QuestionOutcome>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A finalized result ready to be appended to history.
#[derive(Debug, Clone)]
pub struct NewExamRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub session_id: Option<String>,
    pub result: ExamResult,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Aggregates over a user's history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    pub total_exams: usize,
    /// Rounded mean percentage.
    pub average_score: u32,
    pub best_score: u32,
    pub passed_exams: usize,
}

impl HistoryStats {
    pub fn from_records(records: &[ExamRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let percentages: Vec<u32> = records
            .iter()
            .map(|r| r.percentage.clamp(0, 100) as u32)
            .collect();
        let count = percentages.len() as u32;
        let sum: u32 = percentages.iter().sum();

        HistoryStats {
            total_exams: records.len(),
            average_score: (2 * sum + count) / (2 * count),
            best_score: percentages.iter().copied().max().unwrap_or(0),
            passed_exams: percentages.iter().filter(|p| **p >= PASSING_PERCENTAGE).count(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub exam_history: Vec<ExamRecord>,
    pub stats: HistoryStats,
}

/// One entry of a stateless submission.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: String,
    pub selection: Answer,
}

/// DTO for the stateless submission endpoint.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExamRequest {
    #[validate(length(max = 50))]
    pub answers: Vec<SubmittedAnswer>,

    /// Questions that were on the paper. Defaults to the answered ones.
    #[validate(length(min = 1, max = 50))]
    pub question_ids: Option<Vec<String>>,

    #[validate(range(max = 14400))]
    pub time_spent_seconds: u64,
}

/// Response for both the session submit and the stateless submit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    #[serde(flatten)]
    pub result: ExamResult,
    pub passed: bool,
    /// Set when the result could not be written to history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SubmissionResponse {
    pub fn new(result: ExamResult, warning: Option<String>) -> Self {
        let passed = result.passed();
        Self {
            result,
            passed,
            warning,
        }
    }
}
