//! Document ingestion handlers

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::AppState;
use skincare_common::{
    errors::{AppError, Result},
    ingest::{EmbedOptions, EmbedReport, IngestFile, IngestRequest, IngestResponse},
    CancelToken,
};

/// Request to register a document
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct IngestDocumentBody {
    #[validate(length(min = 1, max = 500))]
    pub title: String,

    #[validate(length(max = 200))]
    pub source: Option<String>,

    /// active or inactive
    pub status: Option<String>,

    pub content: Option<String>,

    #[serde(default)]
    #[validate(nested)]
    pub files: Vec<FileBody>,
}

/// A file already uploaded to the object store
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FileBody {
    #[validate(length(min = 1, max = 500))]
    pub file_name: String,

    #[validate(length(min = 1, max = 2000))]
    pub url: String,

    pub mime_type: Option<String>,

    #[validate(range(min = 0))]
    pub size_bytes: Option<i64>,

    /// Text extracted by the uploader
    pub text: Option<String>,
}

/// Chunking options; every field is optional
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmbedDocumentBody {
    #[validate(range(min = 1, max = 20_000))]
    pub chunk_size: Option<usize>,

    pub chunk_overlap: Option<usize>,

    #[validate(length(min = 1, max = 200))]
    pub embedding_model: Option<String>,
}

/// Register a document with its assets
pub async fn ingest_document(
    State(state): State<AppState>,
    Json(body): Json<IngestDocumentBody>,
) -> Result<(StatusCode, Json<IngestResponse>)> {
    let body = validated(body)?;

    let request = IngestRequest {
        title: body.title,
        source: body.source,
        status: body.status,
        content: body.content,
        files: body
            .files
            .into_iter()
            .map(|f| IngestFile {
                file_name: f.file_name,
                url: f.url,
                mime_type: f.mime_type,
                size_bytes: f.size_bytes,
                text: f.text,
            })
            .collect(),
    };

    let response = state.services.ingest().ingest(request).await?;

    tracing::info!(
        doc_id = %response.document_id,
        assets = response.asset_count,
        "Document registered"
    );

    Ok((StatusCode::CREATED, Json(response)))
}

/// Chunk and embed a document, replacing its previous chunks
pub async fn embed_document(
    State(state): State<AppState>,
    Path(doc_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<EmbedReport>> {
    let body: EmbedDocumentBody = if body.iter().all(u8::is_ascii_whitespace) {
        EmbedDocumentBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::Validation {
            message: format!("invalid embed options: {}", e),
            field: None,
        })?
    };
    let body = validated(body)?;

    let options = EmbedOptions {
        chunk_size: body.chunk_size,
        chunk_overlap: body.chunk_overlap,
        embedding_model: body.embedding_model,
    };

    let disconnect = CancelToken::new().drop_guard();
    let report = state
        .services
        .ingest()
        .embed(doc_id, options, disconnect.token())
        .await?;

    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use crate::test_support::router;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_ingest_then_embed() {
        let app = router(vec![]);

        let (status, created) = post(
            &app,
            "/v1/documents",
            json!({
                "title": "Acne basics",
                "source": "faq",
                "content": "Benzoyl peroxide reduces acne bacteria. Use it once daily.",
                "files": [{ "fileName": "acne.png", "url": "https://cdn/acne.png" }]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["assetCount"], 1);
        assert_eq!(created["ingestStatus"], "queued");

        let id = created["documentId"].as_str().unwrap();
        let (status, report) = post(&app, &format!("/v1/documents/{}/embed", id), json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["chunkCount"], 1);
        assert!(report.get("failed").is_none());
    }

    #[tokio::test]
    async fn test_ingest_requires_title() {
        let app = router(vec![]);
        let (status, body) = post(&app, "/v1/documents", json!({ "title": "" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_embed_unknown_document() {
        let app = router(vec![]);
        let uri = format!("/v1/documents/{}/embed", uuid::Uuid::new_v4());
        let (status, body) = post(&app, &uri, json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "DOCUMENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_embed_rejects_bad_chunk_params() {
        let app = router(vec![]);
        let (_, created) = post(
            &app,
            "/v1/documents",
            json!({ "title": "t", "content": "Some content here." }),
        )
        .await;
        let id = created["documentId"].as_str().unwrap();

        let (status, _) = post(
            &app,
            &format!("/v1/documents/{}/embed", id),
            json!({ "chunkSize": 300, "chunkOverlap": 300 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
