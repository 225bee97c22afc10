// src/exam/source.rs

use async_trait::async_trait;
use rand::seq::SliceRandom;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, types::Json};
use validator::Validate;

use crate::{
    config::{DEFAULT_QUESTION_COUNT, MAX_QUESTION_COUNT},
    error::AppError,
    models::question::{Question, QuestionRow},
};

const BUILTIN_QUESTIONS: &str = include_str!("../../data/questions.json");

/// Supplies questions for new exams.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Up to `count` questions in random order, restricted to `categories` when non-empty.
    async fn fetch(&self, count: usize, categories: &[String]) -> Result<Vec<Question>, AppError>;

    /// The questions with the given ids that exist. Order is unspecified.
    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Question>, AppError>;

    async fn categories(&self) -> Result<Vec<String>, AppError>;
}

/// Question bank backed by the `questions` table.
#[derive(Clone)]
pub struct SqlQuestionSource {
    pool: SqlitePool,
}

impl SqlQuestionSource {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts `questions` if the bank is empty. Returns how many were inserted.
    pub async fn seed_if_empty(&self, questions: &[Question]) -> Result<usize, AppError> {
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
            .fetch_one(&self.pool)
            .await?;
        if existing > 0 {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for q in questions {
            sqlx::query(
                r#"
                INSERT INTO questions (id, text, options, correct_answer, category, difficulty, explanation)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&q.id)
            .bind(&q.text)
            .bind(Json(&q.options))
            .bind(Json(&q.correct_answer))
            .bind(&q.category)
            .bind(q.difficulty.as_str())
            .bind(&q.explanation)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(questions.len())
    }
}

/// Drops rows that fail validation instead of serving a broken question.
fn keep_valid(rows: Vec<QuestionRow>) -> Vec<Question> {
    rows.into_iter()
        .map(Question::from)
        .filter(|q| match q.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Skipping malformed question {}: {}", q.id, e);
                false
            }
        })
        .collect()
}

#[async_trait]
impl QuestionSource for SqlQuestionSource {
    async fn fetch(&self, count: usize, categories: &[String]) -> Result<Vec<Question>, AppError> {
        let mut query_builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, text, options, correct_answer, category, difficulty, explanation FROM questions",
        );

        if !categories.is_empty() {
            query_builder.push(" WHERE category IN (");
            let mut separated = query_builder.separated(",");
            for category in categories {
                separated.push_bind(category);
            }
            separated.push_unseparated(")");
        }

        query_builder.push(" ORDER BY RANDOM() LIMIT ");
        query_builder.push_bind(count as i64);

        let rows: Vec<QuestionRow> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to fetch questions: {:?}", e);
                AppError::from(e)
            })?;

        Ok(keep_valid(rows))
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Question>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, text, options, correct_answer, category, difficulty, explanation FROM questions WHERE id IN (",
        );
        let mut separated = query_builder.separated(",");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows: Vec<QuestionRow> = query_builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await?;

        Ok(keep_valid(rows))
    }

    async fn categories(&self) -> Result<Vec<String>, AppError> {
        let categories = sqlx::query_scalar("SELECT DISTINCT category FROM questions ORDER BY category")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }
}

/// A fixed, in-memory question set.
#[derive(Debug, Clone)]
pub struct FixedQuestionSource {
    questions: Vec<Question>,
}

impl FixedQuestionSource {
    pub fn new(questions: Vec<Question>) -> Self {
        Self { questions }
    }

    /// The practice set compiled into the binary.
    pub fn builtin() -> Result<Self, serde_json::Error> {
        let questions: Vec<Question> = serde_json::from_str(BUILTIN_QUESTIONS)?;
        Ok(Self::new(questions))
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    fn pick(&self, count: usize, categories: &[String]) -> Vec<Question> {
        let mut pool: Vec<Question> = self
            .questions
            .iter()
            .filter(|q| categories.is_empty() || categories.contains(&q.category))
            .cloned()
            .collect();
        pool.shuffle(&mut rand::rng());
        pool.truncate(count);
        pool
    }
}

#[async_trait]
impl QuestionSource for FixedQuestionSource {
    async fn fetch(&self, count: usize, categories: &[String]) -> Result<Vec<Question>, AppError> {
        Ok(self.pick(count, categories))
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Question>, AppError> {
        Ok(self
            .questions
            .iter()
            .filter(|q| ids.contains(&q.id))
            .cloned()
            .collect())
    }

    async fn categories(&self) -> Result<Vec<String>, AppError> {
        let mut categories: Vec<String> = self.questions.iter().map(|q| q.category.clone()).collect();
        categories.sort();
        categories.dedup();
        Ok(categories)
    }
}

/// Questions chosen for a new exam, plus a soft warning when the fallback set was used.
#[derive(Debug, Clone)]
pub struct QuestionSet {
    pub questions: Vec<Question>,
    pub warning: Option<String>,
}

/// Requested count -> effective count: default 15, at least 1, at most 50.
pub fn clamp_count(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_QUESTION_COUNT)
        .clamp(1, MAX_QUESTION_COUNT)
}

/// Fetches a question set, degrading to `fallback` when the source fails or comes back empty.
pub async fn load_question_set(
    source: &dyn QuestionSource,
    fallback: &FixedQuestionSource,
    count: Option<usize>,
    categories: &[String],
) -> QuestionSet {
    let count = clamp_count(count);

    let reason = match source.fetch(count, categories).await {
        Ok(questions) if !questions.is_empty() => {
            return QuestionSet {
                questions,
                warning: None,
            };
        }
        Ok(_) => "no questions available",
        Err(e) => {
            tracing::warn!("Question source unavailable, using practice set: {}", e);
            "question source unavailable"
        }
    };

    let mut questions = fallback.pick(count, categories);
    if questions.is_empty() {
        questions = fallback.pick(count, &[]);
    }

    tracing::info!("Serving {} practice questions ({})", questions.len(), reason);

    QuestionSet {
        questions,
        warning: Some(format!("Showing practice questions: {}", reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenSource;

    #[async_trait]
    impl QuestionSource for BrokenSource {
        async fn fetch(&self, _: usize, _: &[String]) -> Result<Vec<Question>, AppError> {
            Err(AppError::InternalServerError("connection refused".to_string()))
        }

        async fn find_by_ids(&self, _: &[String]) -> Result<Vec<Question>, AppError> {
            Err(AppError::InternalServerError("connection refused".to_string()))
        }

        async fn categories(&self) -> Result<Vec<String>, AppError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_builtin_set_is_valid() {
        let builtin = FixedQuestionSource::builtin().unwrap();
        assert_eq!(builtin.questions().len(), 15);
        for q in builtin.questions() {
            assert!(q.validate().is_ok(), "invalid builtin question {}", q.id);
        }
    }

    #[test]
    fn test_clamp_count() {
        assert_eq!(clamp_count(None), 15);
        assert_eq!(clamp_count(Some(0)), 1);
        assert_eq!(clamp_count(Some(10)), 10);
        assert_eq!(clamp_count(Some(500)), 50);
    }

    #[tokio::test]
    async fn test_fixed_source_filters_and_truncates() {
        let builtin = FixedQuestionSource::builtin().unwrap();
        let react = builtin.fetch(3, &["React".to_string()]).await.unwrap();
        assert_eq!(react.len(), 3);
        assert!(react.iter().all(|q| q.category == "React"));

        let all = builtin.fetch(50, &[]).await.unwrap();
        assert_eq!(all.len(), 15);

        let categories = builtin.categories().await.unwrap();
        assert_eq!(categories, vec!["JavaScript", "Python", "React"]);
    }

    #[tokio::test]
    async fn test_broken_source_falls_back_with_warning() {
        let fallback = FixedQuestionSource::builtin().unwrap();
        let set = load_question_set(&BrokenSource, &fallback, Some(5), &[]).await;
        assert_eq!(set.questions.len(), 5);
        assert!(set.warning.is_some());
    }

    #[tokio::test]
    async fn test_unknown_category_falls_back_to_everything() {
        let fallback = FixedQuestionSource::builtin().unwrap();
        let empty = FixedQuestionSource::new(Vec::new());
        let set = load_question_set(&empty, &fallback, Some(4), &["Haskell".to_string()]).await;
        assert_eq!(set.questions.len(), 4);
        assert!(set.warning.unwrap().contains("no questions available"));
    }

    #[tokio::test]
    async fn test_healthy_source_has_no_warning() {
        let fallback = FixedQuestionSource::builtin().unwrap();
        let primary = FixedQuestionSource::builtin().unwrap();
        let set = load_question_set(&primary, &fallback, Some(10), &[]).await;
        assert_eq!(set.questions.len(), 10);
        assert!(set.warning.is_none());
    }

    #[tokio::test]
    async fn test_sql_source_seeds_and_filters() {
        let pool = crate::db::connect("sqlite::memory:").await.unwrap();
        crate::db::migrate(&pool).await.unwrap();

        let source = SqlQuestionSource::new(pool);
        let builtin = FixedQuestionSource::builtin().unwrap();
        assert_eq!(source.seed_if_empty(builtin.questions()).await.unwrap(), 15);
        assert_eq!(source.seed_if_empty(builtin.questions()).await.unwrap(), 0);

        let python = source.fetch(50, &["Python".to_string()]).await.unwrap();
        assert_eq!(python.len(), 3);

        let found = source
            .find_by_ids(&["q1".to_string(), "q2".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        let q2 = found.iter().find(|q| q.id == "q2").unwrap();
        assert_eq!(q2.correct_answer, crate::models::answer::Answer::Single(2));
    }
}
