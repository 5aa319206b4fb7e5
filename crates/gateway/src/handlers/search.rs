//! Search handlers

use axum::{extract::State, Json};
use serde::Deserialize;
use std::time::Instant;
use validator::Validate;

use super::validated;
use crate::AppState;
use skincare_common::{
    errors::Result,
    retrieval::{SearchHit, SearchRequest},
    CancelToken,
};

/// Search request
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// Maximum results to return
    #[validate(range(min = 1, max = 50))]
    pub top_k: Option<usize>,

    /// Restrict to these document sources
    pub source_filter: Option<Vec<String>>,
}

/// Ranked chunk lookup with document asset URLs
pub async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchBody>,
) -> Result<Json<Vec<SearchHit>>> {
    let start = Instant::now();
    let body = validated(body)?;

    let disconnect = CancelToken::new().drop_guard();
    let hits = state
        .services
        .retriever()
        .search(
            SearchRequest {
                query: body.query,
                top_k: body.top_k,
                source_filter: body.source_filter,
            },
            disconnect.token(),
        )
        .await?;

    tracing::info!(
        results = hits.len(),
        processing_time_ms = start.elapsed().as_millis() as u64,
        "Search completed"
    );

    Ok(Json(hits))
}
