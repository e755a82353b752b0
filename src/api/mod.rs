//! REST API and web GUI

pub mod gui;
pub mod handlers;

use crate::config::Config;
use crate::db::Db;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Db, config: Config) -> Self {
        AppState {
            db,
            config: Arc::new(config),
        }
    }
}

pub const API_NAME: &str = "California Ballot Measures API";

/// Every route served by `api-server`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/status", get(handlers::status))
        .route("/scrape", post(handlers::scrape))
        .route("/gui", get(gui::page))
        .route("/api/health", get(handlers::health))
        .route("/api/measures", get(handlers::list_measures))
        .route("/api/measures/:id", get(handlers::get_measure))
        .route("/api/search", post(handlers::search))
        .route("/api/stats", get(handlers::stats))
        .route("/api/years", get(handlers::years))
        .route("/api/topics", get(handlers::topics))
        .route("/api/counties", get(handlers::counties))
        .route("/api/export", get(handlers::export))
        .route("/api/duplicates", get(handlers::duplicates))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
