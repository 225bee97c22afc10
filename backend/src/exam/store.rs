// src/exam/store.rs

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    exam::countdown::{elapsed_seconds, remaining_seconds},
    models::{
        answer::{Answer, AnswerMap},
        exam_record::ExamResult,
        question::Question,
    },
};

/// Errors raised by session lifecycle operations.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    /// `begin` was called with an empty question set.
    NoQuestions,
    /// `begin` was called on a session that has not been reset.
    AlreadyStarted,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NoQuestions => write!(f, "An exam needs at least one question"),
            SessionError::AlreadyStarted => write!(f, "Session already started; reset it first"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NoQuestions => AppError::BadRequest(err.to_string()),
            SessionError::AlreadyStarted => AppError::Conflict(err.to_string()),
        }
    }
}

/// State of one exam attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub questions: Vec<Question>,
    pub answers: AnswerMap,
    pub current_index: usize,
    pub review_flags: BTreeSet<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_seconds: u32,
    pub started: bool,
    pub completed: bool,
    /// Set exactly once, by the finalize path that flips `completed`.
    pub result: Option<ExamResult>,
}

/// Owns the state of a single attempt and enforces its lifecycle.
///
/// Mutations after completion are ignored. `try_complete` is the latch both
/// finalize paths go through.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    state: SessionState,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehydrates a store from persisted state.
    pub fn from_state(state: SessionState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn begin(
        &mut self,
        questions: Vec<Question>,
        duration_seconds: u32,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        if questions.is_empty() {
            return Err(SessionError::NoQuestions);
        }
        if self.state.started && !self.state.completed {
            return Err(SessionError::AlreadyStarted);
        }

        self.state = SessionState {
            questions,
            started_at: Some(now),
            duration_seconds,
            started: true,
            ..SessionState::default()
        };
        Ok(())
    }

    /// Upserts a selection. Returns false (and changes nothing) once completed.
    /// Option bounds are not checked here; the scorer treats them as wrong.
    pub fn set_answer(&mut self, question_id: &str, selection: Answer) -> bool {
        if self.state.completed {
            return false;
        }
        self.state.answers.insert(question_id.to_string(), selection);
        true
    }

    /// Flips the "marked for review" flag. Returns the new flag value.
    pub fn toggle_review(&mut self, question_id: &str) -> bool {
        if self.state.review_flags.remove(question_id) {
            false
        } else {
            self.state.review_flags.insert(question_id.to_string());
            true
        }
    }

    /// Moves to `index`, clamped into the question range.
    pub fn navigate(&mut self, index: usize) -> usize {
        let last = self.state.questions.len().saturating_sub(1);
        self.state.current_index = index.min(last);
        self.state.current_index
    }

    pub fn reset(&mut self) {
        self.state = SessionState::default();
    }

    /// Check-and-set of the completed flag. Only the first caller gets `true`.
    pub fn try_complete(&mut self) -> bool {
        if !self.state.started || self.state.completed {
            return false;
        }
        self.state.completed = true;
        true
    }

    /// Undoes `try_complete` when the result could not be stored.
    pub fn reopen(&mut self) {
        if self.state.started {
            self.state.completed = false;
            self.state.result = None;
        }
    }

    pub fn record_result(&mut self, result: ExamResult) {
        self.state.result = Some(result);
    }

    pub fn is_running(&self) -> bool {
        self.state.started && !self.state.completed
    }

    pub fn answered_count(&self) -> usize {
        self.state
            .questions
            .iter()
            .filter(|q| self.state.answers.contains_key(&q.id))
            .count()
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        match self.state.started_at {
            Some(started_at) if !self.state.completed => {
                remaining_seconds(started_at, self.state.duration_seconds, now)
            }
            _ => 0,
        }
    }

    /// Whole seconds since the start, capped at the session duration.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        match self.state.started_at {
            Some(started_at) => elapsed_seconds(started_at, self.state.duration_seconds, now),
            None => 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.started && self.remaining_seconds(now) == 0
    }
}
