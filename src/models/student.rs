// src/models/student.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use validator::Validate;

/// Represents the 'regions' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Region {
    pub id: i64,
    pub name: String,
    pub code: String,
}

/// Represents the 'institutions' table (schools), always tied to a region.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Institution {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub region_id: i64,
}

/// Represents the 'students' table: an anonymized respondent known only by an
/// autogenerated reference code. Created when a response row is appended.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub reference_code: String,
    pub region_id: Option<i64>,
    pub institution_id: Option<i64>,
    pub created_at: Option<chrono::NaiveDateTime>,
}

/// DTO for creating a region.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRegionRequest {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 20, message = "Code is required"))]
    pub code: String,
}

/// DTO for creating an institution (get-or-create by name within a region).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateInstitutionRequest {
    #[validate(length(min = 1, max = 300, message = "Name is required"))]
    pub name: String,
    pub region_id: i64,
    #[validate(length(max = 50))]
    pub code: Option<String>,
}
