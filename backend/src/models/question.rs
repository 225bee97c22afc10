// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::{Validate, ValidationError};

use crate::models::answer::Answer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Unknown values fall back to `Medium`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "easy" => Difficulty::Easy,
            "hard" => Difficulty::Hard,
            _ => Difficulty::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub text: String,
}

/// A multiple-choice question including its answer key.
/// Never sent to a client taking an exam; see `PublicQuestion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = validate_answer_key))]
pub struct Question {
    #[validate(length(min = 1, max = 64))]
    pub id: String,

    #[validate(length(min = 1, max = 2000))]
    pub text: String,

    #[validate(length(min = 1, max = 26))]
    pub options: Vec<QuestionOption>,

    /// Index of the correct option, or the set of correct options for multi-select.
    pub correct_answer: Answer,

    #[validate(length(min = 1, max = 100))]
    pub category: String,

    #[serde(default)]
    pub difficulty: Difficulty,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

fn validate_answer_key(question: &Question) -> Result<(), ValidationError> {
    if question.correct_answer.indices().is_empty() {
        return Err(ValidationError::new("answer_key_empty"));
    }
    match question.correct_answer.max_index() {
        Some(index) if index < question.options.len() => Ok(()),
        _ => Err(ValidationError::new("answer_key_out_of_range")),
    }
}

/// Represents a row of the 'questions' table.
#[derive(Debug, FromRow)]
pub struct QuestionRow {
    pub id: String,
    pub text: String,
    pub options: Json<Vec<QuestionOption>>,
    pub correct_answer: Json<Answer>,
    pub category: String,
    pub difficulty: String,
    pub explanation: Option<String>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Question {
            id: row.id,
            text: row.text,
            options: row.options.0,
            correct_answer: row.correct_answer.0,
            category: row.category,
            difficulty: Difficulty::parse(&row.difficulty),
            explanation: row.explanation,
        }
    }
}

/// DTO for sending a question to an exam taker (excludes answer key and explanation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: String,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub category: String,
    pub difficulty: Difficulty,
    /// UI hint: render checkboxes instead of radio buttons.
    pub multi_select: bool,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        PublicQuestion {
            id: q.id.clone(),
            text: q.text.clone(),
            options: q.options.clone(),
            category: q.category.clone(),
            difficulty: q.difficulty,
            multi_select: q.correct_answer.is_multiple(),
        }
    }
}

/// Query parameters for fetching a question set.
#[derive(Debug, Default, Deserialize)]
pub struct QuestionQuery {
    pub count: Option<usize>,
    /// Comma-separated category names.
    pub categories: Option<String>,
}

impl QuestionQuery {
    pub fn category_list(&self) -> Vec<String> {
        parse_categories(self.categories.as_deref().unwrap_or_default())
    }
}

/// Splits a comma-separated category list, dropping blanks.
pub fn parse_categories(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSetResponse {
    pub questions: Vec<PublicQuestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
