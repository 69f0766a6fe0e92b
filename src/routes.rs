// src/routes.rs

use axum::{
    Router,
    http::Method,
    routing::{delete, get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{applications, capture, exams, export, taxonomy},
    state::AppState,
};

/// Assembles the main application router.
///
/// * Merges all sub-routers (exams, applications, capture, exports, taxonomy).
/// * Applies global middleware (Trace, CORS).
/// * Injects global state (Database Pool).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        "http://localhost:3000".parse().unwrap(),
        "http://127.0.0.1:3000".parse().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let exam_routes = Router::new()
        .route("/", get(exams::list_exams).post(exams::create_exam))
        .route("/{id}", get(exams::get_exam).delete(exams::delete_exam));

    let item_routes = Router::new()
        .route("/", post(exams::create_item))
        .route(
            "/{id}",
            put(exams::update_item).delete(exams::delete_item),
        );

    let subquestion_routes = Router::new()
        .route("/", post(exams::create_subquestion))
        .route(
            "/{id}",
            put(exams::update_subquestion).delete(exams::delete_subquestion),
        );

    let option_routes = Router::new()
        .route("/", post(exams::create_option))
        .route(
            "/{id}",
            put(exams::update_option).delete(exams::delete_option),
        );

    let application_routes = Router::new()
        .route("/", post(applications::create_application))
        .route(
            "/{id}",
            get(applications::get_application).delete(applications::delete_application),
        )
        .route("/{id}/rows", post(applications::add_row))
        .route("/{id}/rows/last", delete(applications::delete_last_row))
        .route("/{id}/responses", post(capture::save_response))
        .route("/{id}/item-scores", post(capture::save_item_score))
        .route("/{id}/export/winsteps", get(export::export_winsteps))
        .route("/{id}/export/pivot", get(export::export_pivot));

    let taxonomy_routes = Router::new()
        .route("/regions", post(taxonomy::create_region))
        .route(
            "/regions/{id}/institutions",
            get(taxonomy::list_institutions),
        )
        .route("/institutions", post(taxonomy::create_institution));

    Router::new()
        .nest("/api/exams", exam_routes)
        .nest("/api/items", item_routes)
        .nest("/api/subquestions", subquestion_routes)
        .nest("/api/options", option_routes)
        .nest("/api/applications", application_routes)
        .nest("/api", taxonomy_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
