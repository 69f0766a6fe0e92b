// src/handlers/exams.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use validator::Validate;

use crate::{
    error::AppError,
    models::exam::{
        AnswerOption, CreateExamRequest, CreateItemRequest, CreateOptionRequest,
        CreateSubQuestionRequest, Exam, Item, QuestionType, ScoringType, SubQuestion,
    },
};

/// Labels handed out by the quick-add path when the client does not name one.
const OPTION_LABELS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

/// Query parameters for listing exams.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
}

/// Lists exams, optionally filtered by a name substring.
pub async fn list_exams(
    State(pool): State<SqlitePool>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let search_pattern = params.search.map(|s| format!("%{}%", s));

    let exams = sqlx::query_as::<_, Exam>(
        r#"
        SELECT id, name, is_active, created_at, updated_at
        FROM exams
        WHERE (?1 IS NULL OR name LIKE ?1)
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(search_pattern)
    .fetch_all(&pool)
    .await?;

    Ok(Json(exams))
}

/// Creates a new exam template.
pub async fn create_exam(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let id: i64 = sqlx::query_scalar("INSERT INTO exams (name) VALUES (?1) RETURNING id")
        .bind(&payload.name)
        .fetch_one(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to create exam: {:?}", e);
            AppError::from(e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"id": id, "name": payload.name})),
    ))
}

#[derive(Debug, Serialize)]
struct SubQuestionTree {
    #[serde(flatten)]
    subquestion: SubQuestion,
    options: Vec<AnswerOption>,
}

#[derive(Debug, Serialize)]
struct ItemTree {
    #[serde(flatten)]
    item: Item,
    subquestions: Vec<SubQuestionTree>,
}

/// Retrieves an exam with its full item / sub-question / option tree, each
/// level in explicit order.
pub async fn get_exam(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let exam = sqlx::query_as::<_, Exam>(
        "SELECT id, name, is_active, created_at, updated_at FROM exams WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Exam not found".to_string()))?;

    let items = sqlx::query_as::<_, Item>(
        r#"
        SELECT id, exam_id, code, order_index, instruction, scoring_type,
               correct_criteria, partial_criteria, incorrect_criteria
        FROM items
        WHERE exam_id = ?1
        ORDER BY order_index
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let subquestions = sqlx::query_as::<_, SubQuestion>(
        r#"
        SELECT sq.id, sq.item_id, sq.order_index, sq.question_type, sq.context_text
        FROM subquestions sq
        JOIN items i ON sq.item_id = i.id
        WHERE i.exam_id = ?1
        ORDER BY sq.order_index
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let options = sqlx::query_as::<_, AnswerOption>(
        r#"
        SELECT o.id, o.subquestion_id, o.label, o.text, o.is_correct, o.order_index
        FROM options o
        JOIN subquestions sq ON o.subquestion_id = sq.id
        JOIN items i ON sq.item_id = i.id
        WHERE i.exam_id = ?1
        ORDER BY o.order_index
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let mut options_by_subquestion: HashMap<i64, Vec<AnswerOption>> = HashMap::new();
    for option in options {
        options_by_subquestion
            .entry(option.subquestion_id)
            .or_default()
            .push(option);
    }

    let mut subquestions_by_item: HashMap<i64, Vec<SubQuestionTree>> = HashMap::new();
    for subquestion in subquestions {
        let options = options_by_subquestion
            .remove(&subquestion.id)
            .unwrap_or_default();
        subquestions_by_item
            .entry(subquestion.item_id)
            .or_default()
            .push(SubQuestionTree {
                subquestion,
                options,
            });
    }

    let items: Vec<ItemTree> = items
        .into_iter()
        .map(|item| {
            let subquestions = subquestions_by_item.remove(&item.id).unwrap_or_default();
            ItemTree { item, subquestions }
        })
        .collect();

    Ok(Json(serde_json::json!({
        "id": exam.id,
        "name": exam.name,
        "is_active": exam.is_active,
        "created_at": exam.created_at,
        "updated_at": exam.updated_at,
        "items": items,
    })))
}

/// Deletes an exam and, through cascades, its whole structure and captured data.
pub async fn delete_exam(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM exams WHERE id = ?1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete exam: {:?}", e);
            AppError::from(e)
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Exam not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Creates a new item at the end of the exam's item order.
pub async fn create_item(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let _exam: i64 = sqlx::query_scalar("SELECT id FROM exams WHERE id = ?1")
        .bind(payload.exam_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Exam not found".to_string()))?;

    let max_order: Option<i64> =
        sqlx::query_scalar("SELECT MAX(order_index) FROM items WHERE exam_id = ?1")
            .bind(payload.exam_id)
            .fetch_one(&pool)
            .await?;
    let order_index = max_order.unwrap_or(0) + 1;

    let scoring_type = payload.scoring_type.unwrap_or(ScoringType::Dichotomous);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO items
        (exam_id, code, order_index, instruction, scoring_type,
         correct_criteria, partial_criteria, incorrect_criteria)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        RETURNING id
        "#,
    )
    .bind(payload.exam_id)
    .bind(&payload.code)
    .bind(order_index)
    .bind(payload.instruction.as_deref().unwrap_or(""))
    .bind(scoring_type)
    .bind(payload.correct_criteria.as_deref().unwrap_or(""))
    .bind(payload.partial_criteria.as_deref().unwrap_or(""))
    .bind(payload.incorrect_criteria.as_deref().unwrap_or(""))
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            AppError::Conflict(format!(
                "Item code '{}' already exists in this exam",
                payload.code
            ))
        } else {
            tracing::error!("Failed to create item: {:?}", e);
            AppError::from(e)
        }
    })?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": id,
            "code": payload.code,
            "order_index": order_index,
            "scoring_type": scoring_type,
        })),
    ))
}

/// DTO for updating an item. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub code: Option<String>,
    pub instruction: Option<String>,
    pub scoring_type: Option<ScoringType>,
    pub order_index: Option<i64>,
    pub correct_criteria: Option<String>,
    pub partial_criteria: Option<String>,
    pub incorrect_criteria: Option<String>,
}

/// Updates an item by ID. Changing the scoring mode does not touch already
/// stored scores; they stay as-is until the next response write recomputes them.
pub async fn update_item(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.code.is_none()
        && payload.instruction.is_none()
        && payload.scoring_type.is_none()
        && payload.order_index.is_none()
        && payload.correct_criteria.is_none()
        && payload.partial_criteria.is_none()
        && payload.incorrect_criteria.is_none()
    {
        return Ok(StatusCode::OK);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE items SET ");
    let mut separated = builder.separated(", ");

    if let Some(code) = payload.code {
        separated.push("code = ");
        separated.push_bind_unseparated(code);
    }

    if let Some(instruction) = payload.instruction {
        separated.push("instruction = ");
        separated.push_bind_unseparated(instruction);
    }

    if let Some(scoring_type) = payload.scoring_type {
        separated.push("scoring_type = ");
        separated.push_bind_unseparated(scoring_type);
    }

    if let Some(order_index) = payload.order_index {
        separated.push("order_index = ");
        separated.push_bind_unseparated(order_index);
    }

    if let Some(correct_criteria) = payload.correct_criteria {
        separated.push("correct_criteria = ");
        separated.push_bind_unseparated(correct_criteria);
    }

    if let Some(partial_criteria) = payload.partial_criteria {
        separated.push("partial_criteria = ");
        separated.push_bind_unseparated(partial_criteria);
    }

    if let Some(incorrect_criteria) = payload.incorrect_criteria {
        separated.push("incorrect_criteria = ");
        separated.push_bind_unseparated(incorrect_criteria);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let result = builder.build().execute(&pool).await.map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            AppError::Conflict("Item code already exists in this exam".to_string())
        } else {
            tracing::error!("Failed to update item: {:?}", e);
            AppError::from(e)
        }
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Item not found".to_string()));
    }

    Ok(StatusCode::OK)
}

/// Deletes an item by ID.
pub async fn delete_item(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM items WHERE id = ?1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Item not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Creates a new sub-question at the end of the item's order.
pub async fn create_subquestion(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateSubQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let _item: i64 = sqlx::query_scalar("SELECT id FROM items WHERE id = ?1")
        .bind(payload.item_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Item not found".to_string()))?;

    let max_order: Option<i64> =
        sqlx::query_scalar("SELECT MAX(order_index) FROM subquestions WHERE item_id = ?1")
            .bind(payload.item_id)
            .fetch_one(&pool)
            .await?;
    let order_index = max_order.unwrap_or(0) + 1;

    let question_type = payload.question_type.unwrap_or(QuestionType::Closed);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO subquestions (item_id, order_index, question_type, context_text)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING id
        "#,
    )
    .bind(payload.item_id)
    .bind(order_index)
    .bind(question_type)
    .bind(payload.context_text.as_deref().unwrap_or(""))
    .fetch_one(&pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": id,
            "item_id": payload.item_id,
            "order_index": order_index,
            "question_type": question_type,
        })),
    ))
}

/// DTO for updating a sub-question. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct UpdateSubQuestionRequest {
    pub order_index: Option<i64>,
    pub context_text: Option<String>,
    pub question_type: Option<QuestionType>,
}

/// Updates a sub-question by ID. Switching to the open form removes its
/// options, since open sub-questions are answered with free text.
pub async fn update_subquestion(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateSubQuestionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.order_index.is_none()
        && payload.context_text.is_none()
        && payload.question_type.is_none()
    {
        return Ok(StatusCode::OK);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE subquestions SET ");
    let mut separated = builder.separated(", ");

    if let Some(order_index) = payload.order_index {
        separated.push("order_index = ");
        separated.push_bind_unseparated(order_index);
    }

    if let Some(context_text) = payload.context_text {
        separated.push("context_text = ");
        separated.push_bind_unseparated(context_text);
    }

    if let Some(question_type) = payload.question_type {
        separated.push("question_type = ");
        separated.push_bind_unseparated(question_type);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let result = builder.build().execute(&pool).await.map_err(|e| {
        tracing::error!("Failed to update subquestion: {:?}", e);
        AppError::from(e)
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Sub-question not found".to_string()));
    }

    if payload.question_type == Some(QuestionType::Open) {
        sqlx::query("DELETE FROM options WHERE subquestion_id = ?1")
            .bind(id)
            .execute(&pool)
            .await?;
    }

    Ok(StatusCode::OK)
}

/// Deletes a sub-question by ID.
pub async fn delete_subquestion(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM subquestions WHERE id = ?1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Sub-question not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Creates a new option on a closed sub-question. Label defaults to the next
/// letter (a-f) after the current options.
pub async fn create_option(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateOptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let subquestion = sqlx::query_as::<_, SubQuestion>(
        "SELECT id, item_id, order_index, question_type, context_text FROM subquestions WHERE id = ?1",
    )
    .bind(payload.subquestion_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Sub-question not found".to_string()))?;

    if subquestion.question_type == QuestionType::Open {
        return Err(AppError::BadRequest(
            "Open sub-questions cannot have options".to_string(),
        ));
    }

    let max_order: Option<i64> =
        sqlx::query_scalar("SELECT MAX(order_index) FROM options WHERE subquestion_id = ?1")
            .bind(payload.subquestion_id)
            .fetch_one(&pool)
            .await?;
    let max_order = max_order.unwrap_or(0);

    let label = payload
        .label
        .unwrap_or_else(|| OPTION_LABELS[(max_order as usize).min(OPTION_LABELS.len() - 1)].to_string());
    let is_correct = payload.is_correct.unwrap_or(false);

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO options (subquestion_id, label, text, is_correct, order_index)
        VALUES (?1, ?2, ?3, ?4, ?5)
        RETURNING id
        "#,
    )
    .bind(payload.subquestion_id)
    .bind(&label)
    .bind(payload.text.as_deref().unwrap_or(""))
    .bind(is_correct)
    .bind(max_order + 1)
    .fetch_one(&pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": id,
            "subquestion_id": payload.subquestion_id,
            "label": label,
            "is_correct": is_correct,
            "order_index": max_order + 1,
        })),
    ))
}

/// DTO for updating an option. Fields are optional.
#[derive(Debug, Deserialize)]
pub struct UpdateOptionRequest {
    pub label: Option<String>,
    pub text: Option<String>,
    pub is_correct: Option<bool>,
    pub order_index: Option<i64>,
}

/// Updates an option by ID. Flipping `is_correct` does not rescore captured
/// responses; their cached flag refreshes on their next write.
pub async fn update_option(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateOptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if payload.label.is_none()
        && payload.text.is_none()
        && payload.is_correct.is_none()
        && payload.order_index.is_none()
    {
        return Ok(StatusCode::OK);
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE options SET ");
    let mut separated = builder.separated(", ");

    if let Some(label) = payload.label {
        separated.push("label = ");
        separated.push_bind_unseparated(label);
    }

    if let Some(text) = payload.text {
        separated.push("text = ");
        separated.push_bind_unseparated(text);
    }

    if let Some(is_correct) = payload.is_correct {
        separated.push("is_correct = ");
        separated.push_bind_unseparated(is_correct);
    }

    if let Some(order_index) = payload.order_index {
        separated.push("order_index = ");
        separated.push_bind_unseparated(order_index);
    }

    builder.push(" WHERE id = ");
    builder.push_bind(id);

    let result = builder.build().execute(&pool).await.map_err(|e| {
        tracing::error!("Failed to update option: {:?}", e);
        AppError::from(e)
    })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Option not found".to_string()));
    }

    Ok(StatusCode::OK)
}

/// Deletes an option by ID. Responses that pointed at it keep existing with a
/// nulled selection (enforced by the schema's ON DELETE SET NULL).
pub async fn delete_option(
    State(pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = sqlx::query("DELETE FROM options WHERE id = ?1")
        .bind(id)
        .execute(&pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Option not found".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
