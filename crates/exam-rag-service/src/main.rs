use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use exam_rag_api::{
    AppConfig, BatchOutcome, ClassificationOutcome, EmbeddingOutcome, ExamRagApi,
    HistoricalContext, MigrateResult, NotificationDraft, SummaryOutcome, API_CONTRACT_VERSION,
};
use exam_rag_core::{
    ErrorKind, ExamIntake, ExamRecord, PipelineError, RecordId, SimilarRecord, SimilarityScope,
};
use exam_rag_store_sqlite::SchemaStatus;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const DEFAULT_BATCH_LIMIT: usize = 100;

#[derive(Debug, Clone)]
struct ServiceState {
    api: ExamRagApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error_kind: &'static str,
    error_status: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BatchRequest {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SimilarQuery {
    scope: Option<SimilarityScope>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "exam-rag-service")]
#[command(about = "Local HTTP service for the exam risk-classification pipeline")]
struct Args {
    #[arg(long, default_value = "./exam_rag.sqlite3")]
    db: PathBuf,
    /// YAML file with model endpoints, template directory and retrieval settings.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4010")]
    bind: SocketAddr,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Inference => StatusCode::BAD_GATEWAY,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<PipelineError> for ServiceError {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        Self {
            status: status_for(kind),
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error_kind: kind.as_str(),
            error_status: kind.status_label(),
            error: err.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(
                status = %self.status,
                kind = self.error_kind,
                label = self.error_status,
                error = %self.error,
                "request failed"
            );
        }
        (self.status, Json(self)).into_response()
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

type ServiceResult<T> = Result<Json<ServiceEnvelope<T>>, ServiceError>;

/// Run a pipeline call off the async runtime; store and model clients are blocking.
async fn run_blocking<T, F>(state: ServiceState, operation: F) -> ServiceResult<T>
where
    T: Serialize + Send + 'static,
    F: FnOnce(&ExamRagApi) -> Result<T, PipelineError> + Send + 'static,
{
    let data = tokio::task::spawn_blocking(move || operation(&state.api))
        .await
        .map_err(|err| PipelineError::Storage(format!("pipeline worker failed: {err}")))??;
    Ok(Json(envelope(data)))
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/records", post(record_add))
        .route("/v1/records/:record_id", get(record_show))
        .route("/v1/records/:record_id/history", get(record_history))
        .route("/v1/records/:record_id/classify", post(record_classify))
        .route("/v1/records/:record_id/summarize", post(record_summarize))
        .route("/v1/records/:record_id/notification-draft", post(record_notification_draft))
        .route("/v1/records/:record_id/embedding", post(record_embed))
        .route("/v1/records/:record_id/similar", get(record_similar))
        .route("/v1/batches/classify-unscored", post(batch_classify_unscored))
        .route("/v1/batches/summarize-pending", post(batch_summarize_pending))
        .route("/v1/batches/embed-missing", post(batch_embed_missing))
        .with_state(state)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let api = match &args.config {
        Some(path) => AppConfig::load(path)?.build_api(args.db.clone())?,
        None => ExamRagApi::new(args.db.clone()),
    };
    tracing::info!(
        db = %args.db.display(),
        bind = %args.bind,
        settings = ?api.settings(),
        "starting service"
    );

    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(State(state): State<ServiceState>) -> ServiceResult<SchemaStatus> {
    run_blocking(state, ExamRagApi::schema_status).await
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> ServiceResult<MigrateResult> {
    run_blocking(state, move |api| api.migrate(request.dry_run)).await
}

async fn record_add(
    State(state): State<ServiceState>,
    Json(intake): Json<ExamIntake>,
) -> ServiceResult<ExamRecord> {
    run_blocking(state, move |api| api.add_record(&intake)).await
}

async fn record_show(
    State(state): State<ServiceState>,
    Path(record_id): Path<i64>,
) -> ServiceResult<ExamRecord> {
    run_blocking(state, move |api| api.get_record(RecordId(record_id))).await
}

async fn record_history(
    State(state): State<ServiceState>,
    Path(record_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ServiceResult<HistoricalContext> {
    run_blocking(state, move |api| api.historical_context(RecordId(record_id), query.limit)).await
}

async fn record_classify(
    State(state): State<ServiceState>,
    Path(record_id): Path<i64>,
) -> ServiceResult<ClassificationOutcome> {
    run_blocking(state, move |api| api.classify_record(RecordId(record_id))).await
}

async fn record_summarize(
    State(state): State<ServiceState>,
    Path(record_id): Path<i64>,
) -> ServiceResult<SummaryOutcome> {
    run_blocking(state, move |api| api.summarize_record(RecordId(record_id))).await
}

async fn record_notification_draft(
    State(state): State<ServiceState>,
    Path(record_id): Path<i64>,
) -> ServiceResult<NotificationDraft> {
    run_blocking(state, move |api| api.draft_notification(RecordId(record_id))).await
}

async fn record_embed(
    State(state): State<ServiceState>,
    Path(record_id): Path<i64>,
) -> ServiceResult<EmbeddingOutcome> {
    run_blocking(state, move |api| api.embed_record(RecordId(record_id))).await
}

async fn record_similar(
    State(state): State<ServiceState>,
    Path(record_id): Path<i64>,
    Query(query): Query<SimilarQuery>,
) -> ServiceResult<Vec<SimilarRecord>> {
    run_blocking(state, move |api| {
        api.similar_records(RecordId(record_id), query.scope, query.limit)
    })
    .await
}

/// A missing or empty body runs the batch with the default limit.
fn batch_limit(request: Option<Json<BatchRequest>>) -> usize {
    request.and_then(|Json(request)| request.limit).unwrap_or(DEFAULT_BATCH_LIMIT)
}

async fn batch_classify_unscored(
    State(state): State<ServiceState>,
    request: Option<Json<BatchRequest>>,
) -> ServiceResult<BatchOutcome> {
    let limit = batch_limit(request);
    run_blocking(state, move |api| api.classify_unscored(limit)).await
}

async fn batch_summarize_pending(
    State(state): State<ServiceState>,
    request: Option<Json<BatchRequest>>,
) -> ServiceResult<BatchOutcome> {
    let limit = batch_limit(request);
    run_blocking(state, move |api| api.summarize_pending(limit)).await
}

async fn batch_embed_missing(
    State(state): State<ServiceState>,
    request: Option<Json<BatchRequest>>,
) -> ServiceResult<BatchOutcome> {
    let limit = batch_limit(request);
    run_blocking(state, move |api| api.embed_missing(limit)).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::body::to_bytes;
    use exam_rag_core::{DecodingConfig, TextGenerator};
    use http::Request;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("exam-rag-service-{}.sqlite3", ulid::Ulid::new()))
    }

    /// Generator that answers every prompt with the same text.
    struct FixedGenerator(&'static str);

    impl TextGenerator for FixedGenerator {
        fn generate(
            &self,
            _prompt: &str,
            _config: DecodingConfig,
        ) -> Result<String, PipelineError> {
            Ok(self.0.to_string())
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Response {
        let builder = Request::builder().uri(uri).method(method);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string())),
            None => builder.body(axum::body::Body::empty()),
        }
        .unwrap_or_else(|err| panic!("failed to build request: {err}"));

        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    fn intake_payload(document: &str, exam_date: &str) -> serde_json::Value {
        serde_json::json!({
            "subject_name": "Luis Pardo",
            "subject_document": document,
            "exam_type": "periodic",
            "exam_date": exam_date,
            "measurements": {
                "blood_pressure": "145/95",
                "weight_kg": 91.0,
                "height_m": 1.7,
                "vision": null,
                "audiometry": "mild loss"
            },
            "observations": "Elevated blood pressure"
        })
    }

    fn data_field<'a>(value: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
        value.get("data").and_then(|data| data.get(key))
    }

    fn record_id_of(value: &serde_json::Value) -> i64 {
        value
            .get("data")
            .and_then(|data| data.get("record_id"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(|| panic!("missing data.record_id in response: {value}"))
    }

    // Test IDs: TSVC-001
    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = app(ServiceState { api: ExamRagApi::new(unique_temp_db_path()) });

        let response = send(&router, "GET", "/v1/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
    }

    // Test IDs: TSVC-002
    #[tokio::test]
    async fn openapi_endpoint_returns_versioned_artifact() {
        let router = app(ServiceState { api: ExamRagApi::new(unique_temp_db_path()) });

        let response = send(&router, "GET", "/v1/openapi", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("version: service.v1"));
        assert!(body.contains("/v1/records/{record_id}/classify"));
        assert!(body.contains("/v1/batches/classify-unscored"));
    }

    // Test IDs: TSVC-003
    #[tokio::test]
    async fn record_add_show_and_missing_record_status() {
        let db_path = unique_temp_db_path();
        let router = app(ServiceState { api: ExamRagApi::new(db_path.clone()) });

        let payload = intake_payload("CC-77", "2024-02-10");
        let added = send(&router, "POST", "/v1/records", Some(payload)).await;
        assert_eq!(added.status(), StatusCode::OK);
        let record_id = record_id_of(&response_json(added).await);

        let shown = send(&router, "GET", &format!("/v1/records/{record_id}"), None).await;
        assert_eq!(shown.status(), StatusCode::OK);
        let value = response_json(shown).await;
        assert_eq!(
            data_field(&value, "exam_date").and_then(serde_json::Value::as_str),
            Some("2024-02-10")
        );
        assert_eq!(data_field(&value, "risk_label"), Some(&serde_json::Value::Null));

        let missing = send(&router, "GET", "/v1/records/999", None).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let value = response_json(missing).await;
        assert_eq!(value.get("error_kind").and_then(serde_json::Value::as_str), Some("not_found"));
        assert_eq!(value.get("error_status").and_then(serde_json::Value::as_str), Some("missing"));

        let history_uri = format!("/v1/records/{record_id}/history?limit=2");
        let history = send(&router, "GET", &history_uri, None).await;
        assert_eq!(history.status(), StatusCode::OK);
        let value = response_json(history).await;
        assert_eq!(
            data_field(&value, "strategy").and_then(serde_json::Value::as_str),
            Some("temporal")
        );

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-004
    #[tokio::test]
    async fn classify_maps_error_categories_to_statuses() {
        let db_path = unique_temp_db_path();
        let router = app(ServiceState { api: ExamRagApi::new(db_path.clone()) });
        let payload = intake_payload("CC-78", "2024-03-10");
        let added = send(&router, "POST", "/v1/records", Some(payload)).await;
        let record_id = record_id_of(&response_json(added).await);
        let classify_uri = format!("/v1/records/{record_id}/classify");

        let unconfigured = send(&router, "POST", &classify_uri, None).await;
        assert_eq!(unconfigured.status(), StatusCode::SERVICE_UNAVAILABLE);
        let value = response_json(unconfigured).await;
        assert_eq!(
            value.get("error_status").and_then(serde_json::Value::as_str),
            Some("misconfigured")
        );

        let invalid = app(ServiceState {
            api: ExamRagApi::new(db_path.clone()).with_generator(Arc::new(FixedGenerator(
                r#"{"risk_label": "SEVERE", "justification": "Out of range"}"#,
            ))),
        });
        let rejected = send(&invalid, "POST", &classify_uri, None).await;
        assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let value = response_json(rejected).await;
        assert_eq!(value.get("error_kind").and_then(serde_json::Value::as_str), Some("validation"));
        assert_eq!(
            value.get("error_status").and_then(serde_json::Value::as_str),
            Some("bad output")
        );

        let valid = app(ServiceState {
            api: ExamRagApi::new(db_path.clone()).with_generator(Arc::new(FixedGenerator(
                r#"{"risk_label": "HIGH", "justification": "Stage 2 hypertension"}"#,
            ))),
        });
        let classified = send(&valid, "POST", &classify_uri, None).await;
        assert_eq!(classified.status(), StatusCode::OK);
        let value = response_json(classified).await;
        assert_eq!(
            data_field(&value, "classification")
                .and_then(|classification| classification.get("risk_label"))
                .and_then(serde_json::Value::as_str),
            Some("HIGH")
        );

        let batch_body = serde_json::json!({"limit": 10});
        let batch = send(&valid, "POST", "/v1/batches/classify-unscored", Some(batch_body)).await;
        assert_eq!(batch.status(), StatusCode::OK);
        let value = response_json(batch).await;
        assert_eq!(data_field(&value, "total_count").and_then(serde_json::Value::as_u64), Some(0));

        let _ = std::fs::remove_file(&db_path);
    }

    // Test IDs: TSVC-005
    #[tokio::test]
    async fn batch_without_body_uses_default_limit() {
        let db_path = unique_temp_db_path();
        let router = app(ServiceState {
            api: ExamRagApi::new(db_path.clone()).with_generator(Arc::new(FixedGenerator(
                r#"{"risk_label": "LOW", "justification": "No findings"}"#,
            ))),
        });
        for (document, exam_date) in [("CC-80", "2024-01-05"), ("CC-81", "2024-01-06")] {
            let added =
                send(&router, "POST", "/v1/records", Some(intake_payload(document, exam_date)))
                    .await;
            assert_eq!(added.status(), StatusCode::OK);
        }

        let batch = send(&router, "POST", "/v1/batches/classify-unscored", None).await;
        assert_eq!(batch.status(), StatusCode::OK);
        let value = response_json(batch).await;
        assert_eq!(data_field(&value, "total_count").and_then(serde_json::Value::as_u64), Some(2));
        assert_eq!(
            data_field(&value, "processed_count").and_then(serde_json::Value::as_u64),
            Some(2)
        );

        let empty = send(&router, "POST", "/v1/batches/embed-missing", None).await;
        assert_eq!(empty.status(), StatusCode::SERVICE_UNAVAILABLE);

        let _ = std::fs::remove_file(&db_path);
    }
}
