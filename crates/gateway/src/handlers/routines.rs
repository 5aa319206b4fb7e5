//! Routine generation handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use super::validated;
use crate::extract::OwnerId;
use crate::AppState;
use skincare_common::{
    db::SavedRoutine,
    errors::Result,
    routine::{GenerateFromTextRequest, GenerateRoutineRequest, GeneratedRoutine},
    CancelToken,
};

fn default_auto_save() -> bool {
    true
}

/// Request to generate a routine draft
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRoutineBody {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    pub target_skin_type: Option<String>,

    #[serde(default)]
    pub target_conditions: Vec<String>,

    pub additional_context: Option<String>,

    #[validate(range(min = 1, max = 50))]
    pub k: Option<usize>,

    #[validate(range(min = 1, max = 20))]
    pub max_steps: Option<usize>,

    /// Clamped to at least 1
    pub num_variants: Option<usize>,

    #[serde(default = "default_auto_save")]
    pub auto_save_as_draft: bool,

    pub document_ids: Option<Vec<Uuid>>,

    pub embedding_model: Option<String>,

    pub image_urls: Option<Vec<String>>,
}

/// Request to generate a routine from free text
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateFromTextBody {
    #[validate(length(max = 2000))]
    pub prompt: Option<String>,

    pub context: Option<String>,

    pub target_skin_type: Option<String>,

    #[serde(default)]
    pub target_conditions: Vec<String>,

    #[serde(default = "default_auto_save")]
    pub auto_save_as_draft: bool,
}

/// Generate a routine, grounded in the corpus when possible
pub async fn generate_routine(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Json(body): Json<GenerateRoutineBody>,
) -> Result<(StatusCode, Json<GeneratedRoutine>)> {
    let body = validated(body)?;

    let request = GenerateRoutineRequest {
        query: body.query,
        target_skin_type: body.target_skin_type,
        target_conditions: body.target_conditions,
        additional_context: body.additional_context,
        k: body.k,
        max_steps: body.max_steps,
        num_variants: body.num_variants.map(|n| n.max(1)),
        auto_save_as_draft: Some(body.auto_save_as_draft),
        document_ids: body.document_ids,
        embedding_model: body.embedding_model,
        image_urls: body.image_urls,
    };

    let disconnect = CancelToken::new().drop_guard();
    let generated = state
        .services
        .routines()
        .generate(request, owner_id, disconnect.token())
        .await?;

    Ok((StatusCode::CREATED, Json(generated)))
}

/// Generate a routine from a prompt or pasted context, without retrieval
pub async fn generate_from_text(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Json(body): Json<GenerateFromTextBody>,
) -> Result<(StatusCode, Json<GeneratedRoutine>)> {
    let body = validated(body)?;

    let request = GenerateFromTextRequest {
        prompt: body.prompt,
        context: body.context,
        target_skin_type: body.target_skin_type,
        target_conditions: body.target_conditions,
        auto_save_as_draft: Some(body.auto_save_as_draft),
    };

    let disconnect = CancelToken::new().drop_guard();
    let generated = state
        .services
        .routines()
        .generate_from_text(request, owner_id, disconnect.token())
        .await?;

    Ok((StatusCode::CREATED, Json(generated)))
}

pub async fn publish_routine(
    State(state): State<AppState>,
    Path(routine_id): Path<Uuid>,
) -> Result<Json<SavedRoutine>> {
    let saved = state.services.routines().publish(routine_id).await?;
    tracing::info!(routine_id = %routine_id, "Routine published");
    Ok(Json(saved))
}

pub async fn archive_routine(
    State(state): State<AppState>,
    Path(routine_id): Path<Uuid>,
) -> Result<Json<SavedRoutine>> {
    let saved = state.services.routines().archive(routine_id).await?;
    tracing::info!(routine_id = %routine_id, "Routine archived");
    Ok(Json(saved))
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

    const REPLY: &str = r#"{
        "description": "Simple routine. Consult a dermatologist for persistent symptoms.",
        "target_conditions": [],
        "steps": [
            {"order": 1, "instruction": "Cleanse", "time_of_day": "both", "frequency": "twice_daily"},
            {"order": 2, "instruction": "Sunscreen", "time_of_day": "morning", "frequency": "daily"}
        ]
    }"#;

    async fn post(app: &Router, uri: &str, headers: &[(&str, &str)], body: Value) -> (StatusCode, Value) {
        let mut request = Request::post(uri).header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_generate_fallback_then_publish() {
        let app = router(vec![REPLY]);
        let owner = uuid::Uuid::new_v4().to_string();

        let (status, body) = post(
            &app,
            "/v1/ai/routines/drafts",
            &[("x-user-id", owner.as_str())],
            json!({ "query": "oily skin with blackheads", "targetConditions": ["acne; blackheads"] }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["isRagBased"], false);
        assert_eq!(body["source"], "llm");
        assert_eq!(body["citations"], json!([]));
        assert_eq!(body["retries"], 0);
        assert_eq!(body["routine"]["steps"][1]["order"], 2);
        assert_eq!(body["routine"]["targetConditions"], json!(["acne", "blackheads"]));

        let id = body["routineId"].as_str().unwrap();
        let (status, saved) = post(&app, &format!("/v1/ai/routines/{}/publish", id), &[], json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(saved["status"], "published");
    }

    #[tokio::test]
    async fn test_generation_failure_maps_to_bad_gateway() {
        let app = router(vec!["garbage", "still garbage"]);
        let (status, body) = post(&app, "/v1/ai/routines/drafts", &[], json!({ "query": "dry skin" })).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "GENERATION_FAILED");
        assert_eq!(body["error"]["details"]["attempts"], 2);
    }

    #[tokio::test]
    async fn test_generate_validation() {
        let app = router(vec![]);
        let (status, _) = post(
            &app,
            "/v1/ai/routines/drafts",
            &[],
            json!({ "query": "acne", "maxSteps": 21 }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = post(
            &app,
            "/v1/ai/routines/drafts",
            &[("x-user-id", "not-a-uuid")],
            json!({ "query": "acne" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_from_text() {
        let app = router(vec![REPLY]);
        let (status, body) = post(
            &app,
            "/v1/ai/routines/drafts/text",
            &[],
            json!({ "prompt": "Routine for combination skin", "autoSaveAsDraft": false }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["source"], "llm_text");
        assert!(body.get("routineId").is_none());
    }

    /// Chat client that never answers and records the token it was handed
    #[derive(Default)]
    struct StalledLlm {
        seen: std::sync::Mutex<Option<skincare_common::CancelToken>>,
    }

    #[async_trait::async_trait]
    impl skincare_common::context::LlmClient for StalledLlm {
        async fn chat_json(
            &self,
            _system: &str,
            _user: &str,
            _schema: &Value,
            _images: &[String],
            cancel: &skincare_common::CancelToken,
        ) -> skincare_common::Result<String> {
            *self.seen.lock().unwrap() = Some(cancel.clone());
            std::future::pending().await
        }

        fn model_name(&self) -> &str {
            "stalled"
        }
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_generation() {
        let llm = std::sync::Arc::new(StalledLlm::default());
        let app = crate::test_support::router_with_llm(llm.clone());

        let request = Request::post("/v1/ai/routines/drafts/text")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "prompt": "Routine for dry skin" }).to_string()))
            .unwrap();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            app.oneshot(request),
        )
        .await;
        assert!(outcome.is_err());

        let seen = llm.seen.lock().unwrap().clone().expect("chat client was called");
        assert!(seen.is_cancelled());
    }

    #[tokio::test]
    async fn test_archive_unknown_routine() {
        let app = router(vec![]);
        let uri = format!("/v1/ai/routines/{}/archive", uuid::Uuid::new_v4());
        let (status, body) = post(&app, &uri, &[], json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "ROUTINE_NOT_FOUND");
    }
}
