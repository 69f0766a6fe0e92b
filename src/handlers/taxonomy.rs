// src/handlers/taxonomy.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::SqlitePool;
use validator::Validate;

use crate::{
    error::AppError,
    models::student::{CreateInstitutionRequest, CreateRegionRequest, Institution, Region},
};

/// Creates a region.
pub async fn create_region(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateRegionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let region = sqlx::query_as::<_, Region>(
        "INSERT INTO regions (name, code) VALUES (?1, ?2) RETURNING id, name, code",
    )
    .bind(&payload.name)
    .bind(&payload.code)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            AppError::Conflict(format!("Region '{}' already exists", payload.name))
        } else {
            tracing::error!("Failed to create region: {:?}", e);
            AppError::from(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(region)))
}

/// Lists the institutions of a region, feeding the application-create flow.
pub async fn list_institutions(
    State(pool): State<SqlitePool>,
    Path(region_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let _region: i64 = sqlx::query_scalar("SELECT id FROM regions WHERE id = ?1")
        .bind(region_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Region not found".to_string()))?;

    let institutions = sqlx::query_as::<_, Institution>(
        "SELECT id, name, code, region_id FROM institutions WHERE region_id = ?1 ORDER BY name",
    )
    .bind(region_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(institutions))
}

/// Creates an institution on the fly; an existing (name, region) pair is
/// returned instead of duplicated.
pub async fn create_institution(
    State(pool): State<SqlitePool>,
    Json(payload): Json<CreateInstitutionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let _region: i64 = sqlx::query_scalar("SELECT id FROM regions WHERE id = ?1")
        .bind(payload.region_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Region not found".to_string()))?;

    let existing = sqlx::query_as::<_, Institution>(
        "SELECT id, name, code, region_id FROM institutions WHERE name = ?1 AND region_id = ?2",
    )
    .bind(&payload.name)
    .bind(payload.region_id)
    .fetch_optional(&pool)
    .await?;

    if let Some(institution) = existing {
        return Ok((
            StatusCode::OK,
            Json(serde_json::json!({"institution": institution, "created": false})),
        ));
    }

    let institution = sqlx::query_as::<_, Institution>(
        r#"
        INSERT INTO institutions (name, code, region_id)
        VALUES (?1, ?2, ?3)
        RETURNING id, name, code, region_id
        "#,
    )
    .bind(&payload.name)
    .bind(payload.code.as_deref().unwrap_or(""))
    .bind(payload.region_id)
    .fetch_one(&pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"institution": institution, "created": true})),
    ))
}
