use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use ballot_measures::api::{router, AppState};
use ballot_measures::config::Config;
use ballot_measures::db;
use ballot_measures::ingestion::enrich::derive_votes;
use ballot_measures::ingestion::write::write_measures;
use ballot_measures::ingestion::{BallotMeasure, Source};
use serde_json::{json, Value};
use tower::ServiceExt;

fn measure(title: &str, source: Source, year: i32, county: &str) -> BallotMeasure {
    derive_votes(BallotMeasure {
        title: Some(title.to_string()),
        county: county.to_string(),
        yes_votes: Some(600),
        no_votes: Some(400),
        ..BallotMeasure::new(source, year)
    })
    .with_fingerprints()
}

async fn app() -> Router {
    let pool = db::open("sqlite::memory:").await.unwrap();
    write_measures(
        &pool,
        vec![
            measure("Proposition 1 Housing bond", Source::CaSos, 2024, "Statewide"),
            measure("Measure A Library parcel tax", Source::Ceda, 2020, "Alameda"),
        ],
    )
    .await
    .unwrap();

    let temp = std::env::temp_dir().join("ballot-measures-api-tests");
    router(AppState::new(pool, Config::for_data_dir(temp)))
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    post_raw(app, uri, body.to_string()).await
}

async fn post_raw(app: Router, uri: &str, body: String) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let (status, body) = get(app().await, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "California Ballot Measures API");
    assert_eq!(body["endpoints"]["search"], "/api/search");
}

#[tokio::test]
async fn test_status_and_health() {
    let (status, body) = get(app().await, "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = get(app().await, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "connected");
    assert_eq!(body["measures"], 2);
}

#[tokio::test]
async fn test_measures_listing_and_filters() {
    let (status, body) = get(app().await, "/api/measures?county=Alameda").await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["data_source"], "CEDA");
    assert_eq!(rows[0]["passed"], true);
}

#[tokio::test]
async fn test_bad_limit_is_rejected() {
    let (status, body) = get(app().await, "/api/measures?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("limit"));

    let (status, _) = get(app().await, "/api/measures?limit=1001").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_parameters_return_detail() {
    let (status, body) = get(app().await, "/api/measures?limit=abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("query string"));

    let (status, body) = get(app().await, "/api/measures/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let (status, body) = post_raw(app().await, "/api/search", "{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn test_malformed_scrape_body_is_wrapped() {
    let (status, body) = post_raw(app().await, "/scrape", "{\"level\": 5".to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["message"].is_string());
    assert!(body["request"].is_null());
}

#[tokio::test]
async fn test_missing_measure_is_404() {
    let (status, body) = get(app().await, "/api/measures/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Measure 999 not found");
}

#[tokio::test]
async fn test_search() {
    let (status, body) = post(
        app().await,
        "/api/search",
        json!({ "query": "housing", "year_min": 2000 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["query"], "housing");
    assert_eq!(body["results"][0]["year"], 2024);
    assert_eq!(body["filters"]["year_min"], 2000);

    let (status, _) = post(app().await, "/api/search", json!({ "year_min": 1800 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stats_and_counts() {
    let (status, body) = get(app().await, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_measures"], 2);
    assert_eq!(body["passed"], 2);

    let (_, years) = get(app().await, "/api/years").await;
    assert_eq!(years[0]["year"], 2024);

    let (_, counties) = get(app().await, "/api/counties").await;
    assert_eq!(counties.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_export_formats() {
    let (status, body) = get(app().await, "/api/export?format=csv").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["format"], "csv");
    assert_eq!(body["count"], 2);
    assert!(body["data"].as_str().unwrap().starts_with("id,year,"));

    let (_, body) = get(app().await, "/api/export").await;
    assert_eq!(body["format"], "json");
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, _) = get(app().await, "/api/export?format=xml").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicates_report_empty() {
    let (status, body) = get(app().await, "/api/duplicates").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_duplicates"], 0);
}

#[tokio::test]
async fn test_scrape_bad_level_is_wrapped() {
    let (status, body) = post(app().await, "/scrape", json!({ "level": "federal" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("Invalid level"));
    assert_eq!(body["request"]["level"], "federal");
    assert_eq!(body["request"]["output_format"], "json");
}

#[tokio::test]
async fn test_scrape_county_level_is_empty() {
    let (status, body) = post(app().await, "/scrape", json!({ "level": "county" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["data"]["level"], "county");
    assert_eq!(body["data"]["measures"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_gui_page() {
    let response = app()
        .await
        .oneshot(Request::builder().uri("/gui").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Run Scraper"));
    assert!(html.contains("/scrape"));
}
