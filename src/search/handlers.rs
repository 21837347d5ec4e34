use std::path::Path;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use super::engine::{SearchEngine, SearchError, SearchPage, SearchRequest};

/// Raw query parameters. Everything is taken as text so that bad numbers
/// fall back to defaults instead of rejecting the request, and a repeated
/// key keeps its first value.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub q: Option<String>,
    pub size: Option<String>,
    pub cursor: Option<String>,
}

impl SearchParams {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "q" => &mut params.q,
                "size" => &mut params.size,
                "cursor" => &mut params.cursor,
                _ => continue,
            };
            slot.get_or_insert(value);
        }
        params
    }
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        match self {
            SearchError::MissingQuery => {
                (StatusCode::BAD_REQUEST, "missing search query in query params").into_response()
            }
            SearchError::Store(e) => {
                error!("Search query failed: {}", e);
                (StatusCode::BAD_REQUEST, "query failed").into_response()
            }
            SearchError::Internal(e) => {
                error!("Search task failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
            }
        }
    }
}

pub async fn handle_search(
    State(engine): State<SearchEngine>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<SearchPage>, SearchError> {
    let params = SearchParams::from_pairs(pairs);
    let request = SearchRequest::from_params(
        params.q.as_deref(),
        params.size.as_deref(),
        params.cursor.as_deref(),
    )?;

    let page = tokio::task::spawn_blocking(move || engine.search(&request))
        .await
        .map_err(|e| SearchError::Internal(e.to_string()))??;

    Ok(Json(page))
}

/// `/search` plus static files from `static_dir` for every other path.
pub fn router(engine: SearchEngine, static_dir: &Path) -> Router {
    Router::new()
        .route("/search", get(handle_search))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}
