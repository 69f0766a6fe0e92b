// src/handlers/capture.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::SqlitePool;

use crate::{
    error::AppError,
    models::{
        application::{SaveItemScoreRequest, SaveResponseRequest},
        exam::{AnswerOption, ScoringType, SubQuestion},
    },
    scoring::{compute_item_score, manual_score_in_range},
};

/// Saves the captured answer for one (row, sub-question) pair and recomputes
/// the owning item's score.
///
/// * Upserts the response; `is_correct` is always re-derived from the
///   selected option (false when none).
/// * Recomputes the item score from all of the item's sub-questions and
///   upserts it, overwriting any previously entered manual score. The
///   read-compute-write sequence runs in one transaction.
pub async fn save_response(
    State(pool): State<SqlitePool>,
    Path(application_id): Path<i64>,
    Json(payload): Json<SaveResponseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let _application: i64 = sqlx::query_scalar("SELECT id FROM exam_applications WHERE id = ?1")
        .bind(application_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Application not found".to_string()))?;

    let _row: i64 =
        sqlx::query_scalar("SELECT id FROM response_rows WHERE id = ?1 AND application_id = ?2")
            .bind(payload.row_id)
            .bind(application_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound(
                "Row not found in this application".to_string(),
            ))?;

    let subquestion = sqlx::query_as::<_, SubQuestion>(
        "SELECT id, item_id, order_index, question_type, context_text FROM subquestions WHERE id = ?1",
    )
    .bind(payload.subquestion_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Sub-question not found".to_string()))?;

    let option = match payload.option_id {
        Some(option_id) => Some(
            sqlx::query_as::<_, AnswerOption>(
                r#"
                SELECT id, subquestion_id, label, text, is_correct, order_index
                FROM options
                WHERE id = ?1 AND subquestion_id = ?2
                "#,
            )
            .bind(option_id)
            .bind(subquestion.id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound(
                "Option does not belong to this sub-question".to_string(),
            ))?,
        ),
        None => None,
    };

    let is_correct = option.as_ref().map(|o| o.is_correct).unwrap_or(false);
    let text_response = payload.text_response.filter(|t| !t.is_empty());

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO responses (row_id, subquestion_id, selected_option_id, text_response, is_correct)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (row_id, subquestion_id) DO UPDATE SET
            selected_option_id = excluded.selected_option_id,
            text_response = excluded.text_response,
            is_correct = excluded.is_correct
        "#,
    )
    .bind(payload.row_id)
    .bind(subquestion.id)
    .bind(payload.option_id)
    .bind(&text_response)
    .bind(is_correct)
    .execute(&mut *tx)
    .await?;

    let scoring_type: ScoringType =
        sqlx::query_scalar("SELECT scoring_type FROM items WHERE id = ?1")
            .bind(subquestion.item_id)
            .fetch_one(&mut *tx)
            .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subquestions WHERE item_id = ?1")
        .bind(subquestion.item_id)
        .fetch_one(&mut *tx)
        .await?;

    let correct: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM responses r
        JOIN subquestions sq ON r.subquestion_id = sq.id
        WHERE r.row_id = ?1 AND sq.item_id = ?2 AND r.is_correct = 1
        "#,
    )
    .bind(payload.row_id)
    .bind(subquestion.item_id)
    .fetch_one(&mut *tx)
    .await?;

    let auto_score = compute_item_score(scoring_type, total as usize, correct as usize);

    sqlx::query(
        r#"
        INSERT INTO item_scores (row_id, item_id, score)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (row_id, item_id) DO UPDATE SET score = excluded.score
        "#,
    )
    .bind(payload.row_id)
    .bind(subquestion.item_id)
    .bind(auto_score)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "is_correct": is_correct,
        "option_id": payload.option_id,
        "item_id": subquestion.item_id,
        "item_auto_score": auto_score,
    })))
}

/// Saves a direct item-level score (open-form items with no options).
/// The score is range-checked against the item's scoring mode; the entry
/// stands until the next response write to the same item recomputes it.
pub async fn save_item_score(
    State(pool): State<SqlitePool>,
    Path(application_id): Path<i64>,
    Json(payload): Json<SaveItemScoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    let exam_id: i64 = sqlx::query_scalar("SELECT exam_id FROM exam_applications WHERE id = ?1")
        .bind(application_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Application not found".to_string()))?;

    let _row: i64 =
        sqlx::query_scalar("SELECT id FROM response_rows WHERE id = ?1 AND application_id = ?2")
            .bind(payload.row_id)
            .bind(application_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound(
                "Row not found in this application".to_string(),
            ))?;

    let scoring_type: ScoringType =
        sqlx::query_scalar("SELECT scoring_type FROM items WHERE id = ?1 AND exam_id = ?2")
            .bind(payload.item_id)
            .bind(exam_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound("Item not found in this exam".to_string()))?;

    if !manual_score_in_range(scoring_type, payload.score) {
        let message = match scoring_type {
            ScoringType::Dichotomous => "Dichotomous score must be 0 or 1",
            ScoringType::Polytomous => "Polytomous score must be 0, 1 or 2",
        };
        return Err(AppError::BadRequest(message.to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO item_scores (row_id, item_id, score)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (row_id, item_id) DO UPDATE SET score = excluded.score
        "#,
    )
    .bind(payload.row_id)
    .bind(payload.item_id)
    .bind(payload.score)
    .execute(&pool)
    .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "item_id": payload.item_id,
        "score": payload.score,
    })))
}
