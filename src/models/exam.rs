// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Scoring regime of an item. Stored as a single character in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum ScoringType {
    /// All-or-nothing: 1 only when every sub-question is correct, else 0.
    #[serde(rename = "D")]
    #[sqlx(rename = "D")]
    Dichotomous,

    /// Three-point band: 0 when none correct, 2 when all, 1 otherwise.
    #[serde(rename = "P")]
    #[sqlx(rename = "P")]
    Polytomous,
}

/// Form of a sub-question: closed ones carry options, open ones take free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
pub enum QuestionType {
    #[serde(rename = "C")]
    #[sqlx(rename = "C")]
    Closed,

    #[serde(rename = "O")]
    #[sqlx(rename = "O")]
    Open,
}

/// Represents the 'exams' table: a named exam template.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub created_at: Option<chrono::NaiveDateTime>,
    pub updated_at: Option<chrono::NaiveDateTime>,
}

/// Represents the 'items' table: a scorable unit with a per-exam unique code
/// (e.g. EA01) and a fixed scoring regime.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub exam_id: i64,
    pub code: String,
    pub order_index: i64,
    pub instruction: String,
    pub scoring_type: ScoringType,

    /// Free-text grading criteria shown to the person capturing scores.
    pub correct_criteria: String,
    pub partial_criteria: String,
    pub incorrect_criteria: String,
}

/// Represents the 'subquestions' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubQuestion {
    pub id: i64,
    pub item_id: i64,
    pub order_index: i64,
    pub question_type: QuestionType,
    pub context_text: String,
}

/// Represents the 'options' table: one answer choice of a closed sub-question.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: i64,
    pub subquestion_id: i64,
    pub label: String,
    pub text: String,
    pub is_correct: bool,
    pub order_index: i64,
}

/// DTO for creating a new exam.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
}

/// DTO for creating a new item. Order is assigned by the server.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateItemRequest {
    pub exam_id: i64,
    #[validate(length(min = 1, max = 20, message = "Code is required"))]
    pub code: String,
    #[validate(length(max = 2000))]
    pub instruction: Option<String>,
    pub scoring_type: Option<ScoringType>,
    pub correct_criteria: Option<String>,
    pub partial_criteria: Option<String>,
    pub incorrect_criteria: Option<String>,
}

/// DTO for creating a new sub-question. Order is assigned by the server.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubQuestionRequest {
    pub item_id: i64,
    #[validate(length(max = 5000))]
    pub context_text: Option<String>,
    pub question_type: Option<QuestionType>,
}

/// DTO for creating a new option. When no label is given the server assigns
/// the next letter (a-f) from the sub-question's current option count.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateOptionRequest {
    pub subquestion_id: i64,
    #[validate(length(min = 1, max = 5))]
    pub label: Option<String>,
    #[validate(length(max = 500))]
    pub text: Option<String>,
    pub is_correct: Option<bool>,
}
