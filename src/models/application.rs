// src/models/application.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'exam_applications' table: one administration session of an
/// exam, optionally scoped to a region/institution.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamApplication {
    pub id: i64,
    pub exam_id: i64,
    pub name: String,
    pub region_id: Option<i64>,
    pub institution_id: Option<i64>,
    pub created_at: Option<chrono::NaiveDateTime>,
}

/// Represents the 'response_rows' table: one anonymized respondent within an
/// application, identified by a 1-based sequential row number.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ResponseRow {
    pub id: i64,
    pub application_id: i64,
    pub row_number: i64,
    pub student_id: Option<i64>,
}

/// Represents the 'responses' table: the raw captured answer for one
/// (row, sub-question) pair. `is_correct` mirrors the selected option's flag
/// and is recomputed on every write.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Response {
    pub id: i64,
    pub row_id: i64,
    pub subquestion_id: i64,
    pub selected_option_id: Option<i64>,
    pub text_response: Option<String>,
    pub is_correct: bool,
}

/// Represents the 'item_scores' table: the canonical exportable score for one
/// (row, item) pair, either auto-computed or manually entered.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ItemScore {
    pub id: i64,
    pub row_id: i64,
    pub item_id: i64,
    pub score: i64,
}

/// DTO for creating a new application. `initial_rows` pre-populates that many
/// respondent rows through the normal append path.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateApplicationRequest {
    pub exam_id: i64,
    #[validate(length(min = 1, max = 255, message = "Name is required"))]
    pub name: String,
    pub region_id: Option<i64>,
    pub institution_id: Option<i64>,
    #[validate(range(max = 1000))]
    pub initial_rows: Option<u32>,
}

/// DTO for saving a captured answer for one sub-question.
#[derive(Debug, Deserialize)]
pub struct SaveResponseRequest {
    pub row_id: i64,
    pub subquestion_id: i64,
    pub option_id: Option<i64>,
    pub text_response: Option<String>,
}

/// DTO for saving a direct item-level score (open-form items).
#[derive(Debug, Deserialize)]
pub struct SaveItemScoreRequest {
    pub row_id: i64,
    pub item_id: i64,
    pub score: i64,
}
