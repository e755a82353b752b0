//! Route handlers

use super::{AppState, API_NAME};
use crate::db::{self, MeasureFilter, Statistics};
use crate::error::ApiError;
use crate::ingestion::export::{export_csv, ExportFormat};
use crate::ingestion::pipeline::scrape_level;
use crate::ingestion::reconcile::{duplicate_report, DuplicateReport};
use crate::ingestion::types::{BallotMeasure, Level};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1900..=2030;

pub async fn root() -> Json<Value> {
    Json(json!({
        "name": API_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "documentation": "/gui",
        "endpoints": {
            "status": "/status",
            "scrape": "/scrape",
            "gui": "/gui",
            "health": "/api/health",
            "measures": "/api/measures",
            "measure_by_id": "/api/measures/{id}",
            "search": "/api/search",
            "statistics": "/api/stats",
            "years": "/api/years",
            "topics": "/api/topics",
            "counties": "/api/counties",
            "export": "/api/export",
            "duplicates": "/api/duplicates",
        }
    }))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let last_run = db::last_run(&state.db).await.ok().flatten();
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "endpoints": ["/", "/scrape", "/status"],
        "last_run": last_run,
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

fn default_level() -> String {
    "state".to_string()
}

fn default_output_format() -> String {
    "json".to_string()
}

/// Run a live scrape; failures come back as `{"status": "error", ...}`
pub async fn scrape(
    State(state): State<AppState>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Json<Value> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            error!("Rejected scrape request: {}", rejection.body_text());
            return Json(json!({
                "status": "error",
                "message": rejection.body_text(),
                "request": Value::Null,
            }));
        }
    };
    info!("Scrape requested: level={}", request.level);

    let result = async {
        if !request.output_format.eq_ignore_ascii_case("json") {
            return Err(anyhow::anyhow!(
                "Unsupported output format '{}': only json is available",
                request.output_format
            ));
        }
        let level: Level = request.level.parse()?;
        scrape_level(&state.config, level).await
    }
    .await;

    match result {
        Ok(results) => Json(json!({
            "status": "success",
            "data": results,
            "request": request,
        })),
        Err(e) => {
            error!("Scrape failed: {:#}", e);
            Json(json!({
                "status": "error",
                "message": format!("{:#}", e),
                "request": request,
            }))
        }
    }
}

pub async fn health(State(state): State<AppState>) -> Response {
    match db::count_active(&state.db).await {
        Ok(measures) => Json(json!({
            "status": "healthy",
            "timestamp": Utc::now(),
            "database": "connected",
            "measures": measures,
        }))
        .into_response(),
        Err(e) => {
            error!("Health check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "error": format!("{:#}", e) })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MeasuresQuery {
    pub year: Option<i32>,
    pub county: Option<String>,
    pub passed: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn check_page(limit: Option<i64>, offset: Option<i64>) -> Result<(), ApiError> {
    if let Some(limit) = limit {
        if !(1..=db::MAX_LIMIT).contains(&limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {}",
                db::MAX_LIMIT
            )));
        }
    }
    if offset.map(|o| o < 0).unwrap_or(false) {
        return Err(ApiError::BadRequest("offset must not be negative".to_string()));
    }
    Ok(())
}

fn check_year(name: &str, year: Option<i32>) -> Result<(), ApiError> {
    match year {
        Some(y) if !YEAR_RANGE.contains(&y) => Err(ApiError::BadRequest(format!(
            "{} must be between {} and {}",
            name,
            YEAR_RANGE.start(),
            YEAR_RANGE.end()
        ))),
        _ => Ok(()),
    }
}

pub async fn list_measures(
    State(state): State<AppState>,
    query: Result<Query<MeasuresQuery>, QueryRejection>,
) -> Result<Json<Vec<BallotMeasure>>, ApiError> {
    let Query(query) = query?;
    check_page(query.limit, query.offset)?;
    check_year("year", query.year)?;

    let filter = MeasureFilter {
        year: query.year,
        county: query.county,
        passed: query.passed,
        limit: query.limit,
        offset: query.offset,
        ..Default::default()
    };
    Ok(Json(db::search(&state.db, &filter).await?))
}

pub async fn get_measure(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<BallotMeasure>, ApiError> {
    let Path(id) = id?;
    db::get_measure(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Measure {} not found", id)))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub county: Option<String>,
    pub passed: Option<bool>,
    pub has_summary: Option<bool>,
    pub topic: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = body?;
    check_page(request.limit, request.offset)?;
    check_year("year_min", request.year_min)?;
    check_year("year_max", request.year_max)?;

    let filter = MeasureFilter {
        query: request.query.clone(),
        year_min: request.year_min,
        year_max: request.year_max,
        county: request.county.clone(),
        passed: request.passed,
        has_summary: request.has_summary,
        topic: request.topic.clone(),
        limit: request.limit,
        offset: request.offset,
        ..Default::default()
    };
    let results = db::search(&state.db, &filter).await?;

    Ok(Json(json!({
        "count": results.len(),
        "results": results,
        "query": request.query,
        "filters": {
            "year_min": request.year_min,
            "year_max": request.year_max,
            "county": request.county,
            "passed": request.passed,
            "has_summary": request.has_summary,
            "topic": request.topic,
        },
    })))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Statistics>, ApiError> {
    Ok(Json(db::statistics(&state.db).await?))
}

pub async fn years(State(state): State<AppState>) -> Result<Json<Vec<db::YearCount>>, ApiError> {
    Ok(Json(db::years_with_counts(&state.db).await?))
}

pub async fn topics(State(state): State<AppState>) -> Result<Json<Vec<db::TopicCount>>, ApiError> {
    Ok(Json(db::topics_with_counts(&state.db).await?))
}

pub async fn counties(
    State(state): State<AppState>,
) -> Result<Json<Vec<db::CountyCount>>, ApiError> {
    Ok(Json(db::counties_with_counts(&state.db).await?))
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

/// `{format, count, data}`; CSV data is returned as one string
pub async fn export(
    State(state): State<AppState>,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let format: ExportFormat = query
        .format
        .as_deref()
        .unwrap_or("json")
        .parse()
        .map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?;

    let measures = db::active_measures(&state.db).await?;
    let data = match format {
        ExportFormat::Json => serde_json::to_value(&measures)
            .map_err(|e| ApiError::Internal(e.to_string()))?,
        ExportFormat::Csv => Value::String(export_csv(&measures)?),
    };

    Ok(Json(json!({
        "format": format,
        "count": measures.len(),
        "data": data,
    })))
}

pub async fn duplicates(State(state): State<AppState>) -> Result<Json<DuplicateReport>, ApiError> {
    Ok(Json(duplicate_report(&state.db).await?))
}
