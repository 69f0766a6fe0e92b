// src/handlers/export.rs

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
};
use sqlx::{Sqlite, SqlitePool, Transaction, prelude::FromRow};

use crate::{
    error::AppError,
    export::{
        ExportRow, ItemColumn, PivotCell, SubQuestionRef, export_filename, pivot_document,
        winsteps_document,
    },
    models::{application::ExamApplication, exam::ScoringType},
};

/// Everything both exports need about the application: its exam structure in
/// explicit order plus the respondent rows. Loaded inside the caller's
/// transaction so each export sees one consistent snapshot.
struct ExportStructure {
    application: ExamApplication,
    exam_name: String,
    items: Vec<ItemColumn>,
    rows: Vec<ExportRow>,
}

#[derive(FromRow)]
struct ItemHeader {
    id: i64,
    code: String,
    scoring_type: ScoringType,
}

#[derive(FromRow)]
struct SubQuestionHeader {
    id: i64,
    item_id: i64,
    order_index: i64,
}

#[derive(FromRow)]
struct RowHeader {
    id: i64,
    row_number: i64,
    reference_code: Option<String>,
}

async fn load_structure(
    tx: &mut Transaction<'_, Sqlite>,
    application_id: i64,
) -> Result<ExportStructure, AppError> {
    let application = sqlx::query_as::<_, ExamApplication>(
        r#"
        SELECT id, exam_id, name, region_id, institution_id, created_at
        FROM exam_applications
        WHERE id = ?1
        "#,
    )
    .bind(application_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("Application not found".to_string()))?;

    let exam_name: String = sqlx::query_scalar("SELECT name FROM exams WHERE id = ?1")
        .bind(application.exam_id)
        .fetch_one(&mut **tx)
        .await?;

    let item_headers = sqlx::query_as::<_, ItemHeader>(
        "SELECT id, code, scoring_type FROM items WHERE exam_id = ?1 ORDER BY order_index",
    )
    .bind(application.exam_id)
    .fetch_all(&mut **tx)
    .await?;

    let subquestion_headers = sqlx::query_as::<_, SubQuestionHeader>(
        r#"
        SELECT sq.id, sq.item_id, sq.order_index
        FROM subquestions sq
        JOIN items i ON sq.item_id = i.id
        WHERE i.exam_id = ?1
        ORDER BY sq.order_index
        "#,
    )
    .bind(application.exam_id)
    .fetch_all(&mut **tx)
    .await?;

    let mut subquestions_by_item: HashMap<i64, Vec<SubQuestionRef>> = HashMap::new();
    for sq in subquestion_headers {
        subquestions_by_item
            .entry(sq.item_id)
            .or_default()
            .push(SubQuestionRef {
                id: sq.id,
                order_index: sq.order_index,
            });
    }

    let items: Vec<ItemColumn> = item_headers
        .into_iter()
        .map(|item| {
            let subquestions = subquestions_by_item.remove(&item.id).unwrap_or_default();
            if subquestions.is_empty() {
                tracing::warn!(
                    "Item {} has no sub-questions; it contributes nothing to exports",
                    item.code
                );
            }
            ItemColumn {
                id: item.id,
                code: item.code,
                scoring_type: item.scoring_type,
                subquestions,
            }
        })
        .collect();

    let rows = sqlx::query_as::<_, RowHeader>(
        r#"
        SELECT rr.id, rr.row_number, s.reference_code
        FROM response_rows rr
        LEFT JOIN students s ON rr.student_id = s.id
        WHERE rr.application_id = ?1
        ORDER BY rr.row_number
        "#,
    )
    .bind(application_id)
    .fetch_all(&mut **tx)
    .await?
    .into_iter()
    .map(|row| ExportRow {
        id: row.id,
        row_number: row.row_number,
        reference_code: row.reference_code,
    })
    .collect();

    Ok(ExportStructure {
        application,
        exam_name,
        items,
        rows,
    })
}

#[derive(FromRow)]
struct ScoreEntry {
    row_id: i64,
    item_id: i64,
    score: i64,
}

#[derive(FromRow)]
struct CorrectEntry {
    row_id: i64,
    subquestion_id: i64,
    is_correct: bool,
}

/// Generates the Winsteps score file: one digit string per respondent, items
/// in exam order, stored scores taking priority over live derivation.
pub async fn export_winsteps(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let structure = load_structure(&mut tx, id).await?;

    let score_entries = sqlx::query_as::<_, ScoreEntry>(
        r#"
        SELECT row_id, item_id, score
        FROM item_scores
        WHERE row_id IN (SELECT id FROM response_rows WHERE application_id = ?1)
        "#,
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let correct_entries = sqlx::query_as::<_, CorrectEntry>(
        r#"
        SELECT row_id, subquestion_id, is_correct
        FROM responses
        WHERE row_id IN (SELECT id FROM response_rows WHERE application_id = ?1)
        "#,
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let item_scores: HashMap<(i64, i64), i64> = score_entries
        .into_iter()
        .map(|e| ((e.row_id, e.item_id), e.score))
        .collect();
    let correct_responses: HashMap<(i64, i64), bool> = correct_entries
        .into_iter()
        .map(|e| ((e.row_id, e.subquestion_id), e.is_correct))
        .collect();

    let body = winsteps_document(
        &structure.items,
        &structure.rows,
        &item_scores,
        &correct_responses,
    );

    let filename = export_filename(
        "winsteps",
        &structure.exam_name,
        &structure.application.name,
        "txt",
    );

    Ok((
        [
            (
                header::CONTENT_TYPE,
                "text/plain; charset=utf-8".to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    ))
}

#[derive(FromRow)]
struct CellEntry {
    row_id: i64,
    subquestion_id: i64,
    text_response: Option<String>,
    label: Option<String>,
}

/// Generates the pivot CSV: the raw captured selections/text per respondent
/// and sub-question, with no scoring applied.
pub async fn export_pivot(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut tx = pool.begin().await?;

    let structure = load_structure(&mut tx, id).await?;

    let cell_entries = sqlx::query_as::<_, CellEntry>(
        r#"
        SELECT r.row_id, r.subquestion_id, r.text_response, o.label
        FROM responses r
        LEFT JOIN options o ON r.selected_option_id = o.id
        WHERE r.row_id IN (SELECT id FROM response_rows WHERE application_id = ?1)
        "#,
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let cells: HashMap<(i64, i64), PivotCell> = cell_entries
        .into_iter()
        .map(|e| {
            (
                (e.row_id, e.subquestion_id),
                PivotCell {
                    text_response: e.text_response,
                    option_label: e.label,
                },
            )
        })
        .collect();

    let body = pivot_document(&structure.items, &structure.rows, &cells).map_err(|e| {
        tracing::error!("Failed to serialize pivot CSV: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    let filename = export_filename(
        "pivot",
        &structure.exam_name,
        &structure.application.name,
        "csv",
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    ))
}
