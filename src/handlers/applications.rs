// src/handlers/applications.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use sqlx::{Sqlite, SqlitePool, Transaction, prelude::FromRow};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::application::{
        CreateApplicationRequest, ExamApplication, ItemScore, Response, ResponseRow,
    },
};

/// Creates a new administration session for an exam. `initial_rows` rows are
/// pre-populated through the same append path used by the capture screen.
pub async fn create_application(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateApplicationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let _exam: i64 = sqlx::query_scalar("SELECT id FROM exams WHERE id = ?1")
        .bind(payload.exam_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Exam not found".to_string()))?;

    if let Some(region_id) = payload.region_id {
        sqlx::query_scalar::<_, i64>("SELECT id FROM regions WHERE id = ?1")
            .bind(region_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::BadRequest("Invalid region".to_string()))?;
    }

    if let Some(institution_id) = payload.institution_id {
        sqlx::query_scalar::<_, i64>("SELECT id FROM institutions WHERE id = ?1")
            .bind(institution_id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::BadRequest("Invalid institution".to_string()))?;
    }

    let duplicate: Option<i64> =
        sqlx::query_scalar("SELECT id FROM exam_applications WHERE exam_id = ?1 AND name = ?2")
            .bind(payload.exam_id)
            .bind(&payload.name)
            .fetch_optional(&pool)
            .await?;
    if duplicate.is_some() {
        return Err(AppError::Conflict(format!(
            "An application named '{}' already exists for this exam",
            payload.name
        )));
    }

    let mut tx = pool.begin().await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO exam_applications (exam_id, name, region_id, institution_id)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING id
        "#,
    )
    .bind(payload.exam_id)
    .bind(&payload.name)
    .bind(payload.region_id)
    .bind(payload.institution_id)
    .fetch_one(&mut *tx)
    .await?;

    let initial_rows = payload.initial_rows.unwrap_or(0);
    for _ in 0..initial_rows {
        append_row(&mut tx, id, payload.region_id, payload.institution_id).await?;
    }

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": id,
            "exam_id": payload.exam_id,
            "name": payload.name,
            "rows_created": initial_rows,
        })),
    ))
}

#[derive(Debug, FromRow, Serialize)]
struct RowSummary {
    id: i64,
    row_number: i64,
    reference_code: Option<String>,
}

/// Retrieves the capture read model: the application header plus every row
/// with its captured responses and item scores.
pub async fn get_application(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let application = sqlx::query_as::<_, ExamApplication>(
        r#"
        SELECT id, exam_id, name, region_id, institution_id, created_at
        FROM exam_applications
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Application not found".to_string()))?;

    let exam_name: String = sqlx::query_scalar("SELECT name FROM exams WHERE id = ?1")
        .bind(application.exam_id)
        .fetch_one(&pool)
        .await?;

    let rows = sqlx::query_as::<_, RowSummary>(
        r#"
        SELECT rr.id, rr.row_number, s.reference_code
        FROM response_rows rr
        LEFT JOIN students s ON rr.student_id = s.id
        WHERE rr.application_id = ?1
        ORDER BY rr.row_number
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let responses = sqlx::query_as::<_, Response>(
        r#"
        SELECT id, row_id, subquestion_id, selected_option_id, text_response, is_correct
        FROM responses
        WHERE row_id IN (SELECT id FROM response_rows WHERE application_id = ?1)
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let item_scores = sqlx::query_as::<_, ItemScore>(
        r#"
        SELECT id, row_id, item_id, score
        FROM item_scores
        WHERE row_id IN (SELECT id FROM response_rows WHERE application_id = ?1)
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let mut responses_by_row: HashMap<i64, Vec<Response>> = HashMap::new();
    for response in responses {
        responses_by_row
            .entry(response.row_id)
            .or_default()
            .push(response);
    }
    let mut scores_by_row: HashMap<i64, Vec<ItemScore>> = HashMap::new();
    for score in item_scores {
        scores_by_row.entry(score.row_id).or_default().push(score);
    }

    let rows: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "id": row.id,
                "row_number": row.row_number,
                "reference_code": row.reference_code,
                "responses": responses_by_row.remove(&row.id).unwrap_or_default(),
                "item_scores": scores_by_row.remove(&row.id).unwrap_or_default(),
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "application": application,
        "exam_name": exam_name,
        "rows": rows,
    })))
}

/// Deletes an application and, through cascades, its rows and captured data.
pub async fn delete_application(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM exam_applications WHERE id = ?1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete application: {:?}", e);
            AppError::from(e)
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Application not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Appends a new respondent row: next row number, plus an anonymized student
/// record inheriting the application's region/institution.
pub async fn add_row(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let application = sqlx::query_as::<_, ExamApplication>(
        r#"
        SELECT id, exam_id, name, region_id, institution_id, created_at
        FROM exam_applications
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Application not found".to_string()))?;

    let mut tx = pool.begin().await?;
    let (row_id, row_number, reference_code) = append_row(
        &mut tx,
        application.id,
        application.region_id,
        application.institution_id,
    )
    .await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "row_id": row_id,
        "row_number": row_number,
        "reference_code": reference_code,
    })))
}

/// Deletes the highest-numbered row of the application. Remaining rows are
/// never renumbered.
pub async fn delete_last_row(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let _application: i64 = sqlx::query_scalar("SELECT id FROM exam_applications WHERE id = ?1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Application not found".to_string()))?;

    let mut tx = pool.begin().await?;

    let last_row = sqlx::query_as::<_, ResponseRow>(
        r#"
        SELECT id, application_id, row_number, student_id
        FROM response_rows
        WHERE application_id = ?1
        ORDER BY row_number DESC
        LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::EmptyState("No rows to delete".to_string()))?;

    sqlx::query("DELETE FROM response_rows WHERE id = ?1")
        .bind(last_row.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "row_number": last_row.row_number,
    })))
}

/// Creates the student + row pair inside the caller's transaction. The
/// reference code is retried until unique; students survive row deletion
/// (SET NULL), so a code is never handed out twice.
pub(crate) async fn append_row(
    tx: &mut Transaction<'_, Sqlite>,
    application_id: i64,
    region_id: Option<i64>,
    institution_id: Option<i64>,
) -> Result<(i64, i64, String), AppError> {
    let max_row: Option<i64> =
        sqlx::query_scalar("SELECT MAX(row_number) FROM response_rows WHERE application_id = ?1")
            .bind(application_id)
            .fetch_one(&mut **tx)
            .await?;
    let row_number = max_row.unwrap_or(0) + 1;

    let reference_code = loop {
        let candidate = format!(
            "STU-{}",
            Uuid::new_v4().simple().to_string()[..6].to_uppercase()
        );
        let taken: Option<i64> =
            sqlx::query_scalar("SELECT id FROM students WHERE reference_code = ?1")
                .bind(&candidate)
                .fetch_optional(&mut **tx)
                .await?;
        if taken.is_none() {
            break candidate;
        }
    };

    let student_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO students (reference_code, region_id, institution_id)
        VALUES (?1, ?2, ?3)
        RETURNING id
        "#,
    )
    .bind(&reference_code)
    .bind(region_id)
    .bind(institution_id)
    .fetch_one(&mut **tx)
    .await?;

    let row_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO response_rows (application_id, row_number, student_id)
        VALUES (?1, ?2, ?3)
        RETURNING id
        "#,
    )
    .bind(application_id)
    .bind(row_number)
    .bind(student_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok((row_id, row_number, reference_code))
}
