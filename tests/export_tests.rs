// tests/export_tests.rs

use examdigit::{config::Config, routes, state::AppState};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

async fn spawn_app() -> String {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("Invalid sqlite options")
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .expect("Failed to open in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: "sqlite::memory:".to_string(),
        rust_log: "error".to_string(),
        port: 0,
    };

    let state = AppState { pool, config };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}

async fn post_id(client: &reqwest::Client, url: String, body: serde_json::Value) -> i64 {
    let response = client
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn create_exam(client: &reqwest::Client, address: &str, name: &str) -> i64 {
    post_id(
        client,
        format!("{}/api/exams", address),
        serde_json::json!({"name": name}),
    )
    .await
}

async fn create_item(
    client: &reqwest::Client,
    address: &str,
    exam_id: i64,
    code: &str,
    scoring_type: &str,
) -> i64 {
    post_id(
        client,
        format!("{}/api/items", address),
        serde_json::json!({"exam_id": exam_id, "code": code, "scoring_type": scoring_type}),
    )
    .await
}

async fn create_subquestion(client: &reqwest::Client, address: &str, item_id: i64) -> i64 {
    post_id(
        client,
        format!("{}/api/subquestions", address),
        serde_json::json!({"item_id": item_id}),
    )
    .await
}

/// Creates a correct and an incorrect option; returns (correct_id, incorrect_id).
async fn create_option_pair(
    client: &reqwest::Client,
    address: &str,
    subquestion_id: i64,
) -> (i64, i64) {
    let correct = post_id(
        client,
        format!("{}/api/options", address),
        serde_json::json!({"subquestion_id": subquestion_id, "is_correct": true}),
    )
    .await;
    let incorrect = post_id(
        client,
        format!("{}/api/options", address),
        serde_json::json!({"subquestion_id": subquestion_id, "is_correct": false}),
    )
    .await;
    (correct, incorrect)
}

async fn create_application(
    client: &reqwest::Client,
    address: &str,
    exam_id: i64,
    name: &str,
    initial_rows: u32,
) -> i64 {
    post_id(
        client,
        format!("{}/api/applications", address),
        serde_json::json!({"exam_id": exam_id, "name": name, "initial_rows": initial_rows}),
    )
    .await
}

async fn row_ids(client: &reqwest::Client, address: &str, application_id: i64) -> Vec<i64> {
    let body: serde_json::Value = client
        .get(format!("{}/api/applications/{}", address, application_id))
        .send()
        .await
        .expect("Failed to fetch application")
        .json()
        .await
        .unwrap();
    body["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_i64().unwrap())
        .collect()
}

async fn save_response(
    client: &reqwest::Client,
    address: &str,
    application_id: i64,
    row_id: i64,
    subquestion_id: i64,
    option_id: Option<i64>,
    text_response: Option<&str>,
) {
    let response = client
        .post(format!(
            "{}/api/applications/{}/responses",
            address, application_id
        ))
        .json(&serde_json::json!({
            "row_id": row_id,
            "subquestion_id": subquestion_id,
            "option_id": option_id,
            "text_response": text_response,
        }))
        .send()
        .await
        .expect("Failed to save response");
    assert_eq!(response.status().as_u16(), 200);
}

async fn save_item_score(
    client: &reqwest::Client,
    address: &str,
    application_id: i64,
    row_id: i64,
    item_id: i64,
    score: i64,
) {
    let response = client
        .post(format!(
            "{}/api/applications/{}/item-scores",
            address, application_id
        ))
        .json(&serde_json::json!({"row_id": row_id, "item_id": item_id, "score": score}))
        .send()
        .await
        .expect("Failed to save item score");
    assert_eq!(response.status().as_u16(), 200);
}

async fn winsteps_text(client: &reqwest::Client, address: &str, application_id: i64) -> String {
    client
        .get(format!(
            "{}/api/applications/{}/export/winsteps",
            address, application_id
        ))
        .send()
        .await
        .expect("Failed to export")
        .text()
        .await
        .unwrap()
}

#[tokio::test]
async fn winsteps_export_sets_filename_and_orders_rows() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let exam_id = create_exam(&client, &address, "Reading Test").await;
    let item_id = create_item(&client, &address, exam_id, "EA01", "D").await;
    let sq = create_subquestion(&client, &address, item_id).await;
    let (correct_option, incorrect_option) = create_option_pair(&client, &address, sq).await;

    let app_id = create_application(&client, &address, exam_id, "March 2026", 2).await;
    let rows = row_ids(&client, &address, app_id).await;

    save_response(&client, &address, app_id, rows[0], sq, Some(incorrect_option), None).await;
    save_response(&client, &address, app_id, rows[1], sq, Some(correct_option), None).await;

    let response = client
        .get(format!(
            "{}/api/applications/{}/export/winsteps",
            address, app_id
        ))
        .send()
        .await
        .expect("Failed to export");
    assert_eq!(response.status().as_u16(), 200);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(
        disposition,
        "attachment; filename=\"winsteps_Reading_Test_March_2026.txt\""
    );
    assert_eq!(response.text().await.unwrap(), "0\n1");

    // Re-running the export yields identical output.
    assert_eq!(winsteps_text(&client, &address, app_id).await, "0\n1");
}

#[tokio::test]
async fn unanswered_subquestions_derive_as_zero() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let exam_id = create_exam(&client, &address, "Silent").await;
    let item_id = create_item(&client, &address, exam_id, "EA03", "D").await;
    let sq = create_subquestion(&client, &address, item_id).await;
    create_option_pair(&client, &address, sq).await;

    // One row, nothing captured: no item score exists, so the digit is
    // derived live and the missing response counts as incorrect.
    let app_id = create_application(&client, &address, exam_id, "Run 1", 1).await;
    assert_eq!(winsteps_text(&client, &address, app_id).await, "0");
}

#[tokio::test]
async fn item_without_subquestions_is_skipped_unless_scored() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let exam_id = create_exam(&client, &address, "Sparse").await;
    let answered = create_item(&client, &address, exam_id, "EA01", "D").await;
    let sq = create_subquestion(&client, &address, answered).await;
    let (correct_option, _) = create_option_pair(&client, &address, sq).await;
    // EA02 never gets sub-questions.
    let bare = create_item(&client, &address, exam_id, "EA02", "P").await;

    let app_id = create_application(&client, &address, exam_id, "Run 1", 1).await;
    let rows = row_ids(&client, &address, app_id).await;

    save_response(&client, &address, app_id, rows[0], sq, Some(correct_option), None).await;

    // The bare item contributes no column at all.
    assert_eq!(winsteps_text(&client, &address, app_id).await, "1");

    // Until a direct score is stored for it.
    save_item_score(&client, &address, app_id, rows[0], bare, 2).await;
    assert_eq!(winsteps_text(&client, &address, app_id).await, "12");
}

#[tokio::test]
async fn stored_score_beats_live_derivation() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let exam_id = create_exam(&client, &address, "Override").await;
    let item_id = create_item(&client, &address, exam_id, "EA01", "D").await;
    let sq = create_subquestion(&client, &address, item_id).await;
    let (correct_option, _) = create_option_pair(&client, &address, sq).await;

    let app_id = create_application(&client, &address, exam_id, "Run 1", 1).await;
    let rows = row_ids(&client, &address, app_id).await;

    // The captured response derives to 1, but a later manual 0 is the
    // canonical score and the export must report it.
    save_response(&client, &address, app_id, rows[0], sq, Some(correct_option), None).await;
    assert_eq!(winsteps_text(&client, &address, app_id).await, "1");

    save_item_score(&client, &address, app_id, rows[0], item_id, 0).await;
    assert_eq!(winsteps_text(&client, &address, app_id).await, "0");
}

#[tokio::test]
async fn pivot_export_reports_raw_answers() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let exam_id = create_exam(&client, &address, "Survey").await;
    // EA01 has two closed sub-questions, EA02 a single open one.
    let multi_item = create_item(&client, &address, exam_id, "EA01", "D").await;
    let sq1 = create_subquestion(&client, &address, multi_item).await;
    let _sq2 = create_subquestion(&client, &address, multi_item).await;
    let (sq1_correct, _) = create_option_pair(&client, &address, sq1).await;

    let open_item = create_item(&client, &address, exam_id, "EA02", "D").await;
    let open_sq = post_id(
        &client,
        format!("{}/api/subquestions", address),
        serde_json::json!({"item_id": open_item, "question_type": "O"}),
    )
    .await;

    let app_id = create_application(&client, &address, exam_id, "Run 1", 1).await;
    let rows = row_ids(&client, &address, app_id).await;

    save_response(&client, &address, app_id, rows[0], sq1, Some(sq1_correct), None).await;
    save_response(&client, &address, app_id, rows[0], open_sq, None, Some("free answer")).await;

    let response = client
        .get(format!(
            "{}/api/applications/{}/export/pivot",
            address, app_id
        ))
        .send()
        .await
        .expect("Failed to export");
    assert_eq!(response.status().as_u16(), 200);
    let disposition = response
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(disposition, "attachment; filename=\"pivot_Survey_Run_1.csv\"");

    let bytes = response.bytes().await.unwrap();
    assert_eq!(&bytes[..3], [0xEF, 0xBB, 0xBF]);

    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let mut lines = text.trim_start_matches('\u{feff}').lines();
    assert_eq!(lines.next().unwrap(), "IDENTIFICATION;EA01_1;EA01_2;EA02");

    let data_line = lines.next().unwrap();
    let cells: Vec<&str> = data_line.split(';').collect();
    assert!(cells[0].starts_with("STU-"));
    // First option created by the quick-add path gets label 'a'.
    assert_eq!(cells[1], "a");
    assert_eq!(cells[2], "");
    assert_eq!(cells[3], "free answer");
    assert!(lines.next().is_none());
}

#[tokio::test]
async fn pivot_export_is_byte_identical_across_runs() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    let exam_id = create_exam(&client, &address, "Stable").await;
    let item_id = create_item(&client, &address, exam_id, "EA01", "D").await;
    let sq = create_subquestion(&client, &address, item_id).await;
    let (correct_option, _) = create_option_pair(&client, &address, sq).await;

    let app_id = create_application(&client, &address, exam_id, "Run 1", 2).await;
    let rows = row_ids(&client, &address, app_id).await;
    save_response(&client, &address, app_id, rows[0], sq, Some(correct_option), None).await;

    let url = format!("{}/api/applications/{}/export/pivot", address, app_id);
    let first = client.get(&url).send().await.unwrap().bytes().await.unwrap();
    let second = client.get(&url).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn exports_for_unknown_application_404() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();

    for path in ["export/winsteps", "export/pivot"] {
        let response = client
            .get(format!("{}/api/applications/999/{}", address, path))
            .send()
            .await
            .expect("Failed to execute request");
        assert_eq!(response.status().as_u16(), 404);
    }
}
