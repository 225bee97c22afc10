// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::SqlitePool;

use crate::{
    config::Config,
    exam::{
        countdown::Clock,
        history::{HistorySink, SqlHistorySink},
        registry::ExamRegistry,
        source::{FixedQuestionSource, QuestionSource, SqlQuestionSource},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub exams: ExamRegistry,
    pub questions: Arc<dyn QuestionSource>,
    /// Practice set served when `questions` fails.
    pub fallback: Arc<FixedQuestionSource>,
    pub history: Arc<dyn HistorySink>,
}

impl AppState {
    /// Wires the SQL-backed question source and history sink to `pool`.
    pub fn new(
        pool: SqlitePool,
        config: Config,
        fallback: FixedQuestionSource,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let history: Arc<dyn HistorySink> = Arc::new(SqlHistorySink::new(pool.clone()));
        let questions: Arc<dyn QuestionSource> = Arc::new(SqlQuestionSource::new(pool.clone()));
        Self::with_parts(pool, config, questions, Arc::new(fallback), history, clock)
    }

    pub fn with_parts(
        pool: SqlitePool,
        config: Config,
        questions: Arc<dyn QuestionSource>,
        fallback: Arc<FixedQuestionSource>,
        history: Arc<dyn HistorySink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let exams = ExamRegistry::new(pool.clone(), history.clone(), clock);
        Self {
            pool,
            config,
            exams,
            questions,
            fallback,
            history,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for ExamRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.exams.clone()
    }
}
