//! HTTP ingress.
//!
//! Three routes: multipart upload, per-document status, and a health
//! check. Per-document stage failures are embedded in a 200 upload
//! response; HTTP error statuses are reserved for request-level
//! problems (missing file, unknown document id).

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::ai::create_client;
use crate::analyze::SeparationResult;
use crate::config::Config;
use crate::db;
use crate::models::DetectedSubDocument;
use crate::pipeline::{DocumentOutcome, Pipeline, UploadRequest};
use crate::store;

/// Shared application state passed to all route handlers via Axum's
/// `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Starts the ingestion HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves until
/// the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let client = create_client(&config.ai)?;
    let pipeline = Arc::new(Pipeline::new(pool, config.clone(), client));

    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/documents/upload", post(handle_upload))
        .route("/api/documents/{id}/status", get(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("Ingestion server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    timestamp: i64,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (`bad_request`, `not_found`,
    /// `internal`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
            timestamp: chrono::Utc::now().timestamp(),
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /api/documents/upload ============

/// Multipart fields accepted by the upload endpoint.
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    output_path: Option<PathBuf>,
    upload_to_database: bool,
    community_id: Option<String>,
    organization_id: Option<String>,
    processing_level: i64,
}

impl UploadForm {
    fn empty() -> Self {
        Self {
            file: None,
            output_path: None,
            upload_to_database: true,
            community_id: None,
            organization_id: None,
            processing_level: 4,
        }
    }
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::empty();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .unwrap_or("document.pdf")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file field: {}", e)))?;
                form.file = Some((filename, bytes.to_vec()));
            }
            "output_path" => {
                let value = text_field(field, "output_path").await?;
                if !value.trim().is_empty() {
                    form.output_path = Some(PathBuf::from(value.trim()));
                }
            }
            "upload_to_database" => {
                let value = text_field(field, "upload_to_database").await?;
                form.upload_to_database = !matches!(
                    value.trim().to_lowercase().as_str(),
                    "false" | "0" | "no"
                );
            }
            "community_id" => {
                let value = text_field(field, "community_id").await?;
                if !value.trim().is_empty() {
                    form.community_id = Some(value.trim().to_string());
                }
            }
            "organization_id" => {
                let value = text_field(field, "organization_id").await?;
                if !value.trim().is_empty() {
                    form.organization_id = Some(value.trim().to_string());
                }
            }
            "processing_level" => {
                let value = text_field(field, "processing_level").await?;
                form.processing_level = value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| bad_request("processing_level must be an integer 1-4"))?;
            }
            _ => {
                // Unknown fields are ignored for forward compatibility.
            }
        }
    }

    Ok(form)
}

async fn text_field(field: axum::extract::multipart::Field<'_>, name: &str) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| bad_request(format!("failed to read {} field: {}", name, e)))
}

/// JSON response body for `POST /api/documents/upload`.
#[derive(Serialize)]
struct UploadResponse {
    is_multi_document: bool,
    detected_documents: Vec<DetectedSubDocument>,
    separation: Option<SeparationResult>,
    upload: Option<UploadSummary>,
    timestamp: i64,
}

#[derive(Serialize)]
struct UploadSummary {
    parent_id: String,
    child_ids: Vec<String>,
    results: Vec<DocumentOutcome>,
}

async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let form = read_form(multipart).await?;
    let Some((filename, bytes)) = form.file else {
        return Err(bad_request("missing required multipart field 'file'"));
    };
    if bytes.is_empty() {
        return Err(bad_request("uploaded file is empty"));
    }

    if !form.upload_to_database {
        return analyze_only(&state, &bytes, &filename, form.output_path.as_deref()).await;
    }

    let Some(organization_id) = form.organization_id else {
        return Err(bad_request(
            "organization_id is required when uploading to the database",
        ));
    };

    let request = UploadRequest {
        filename: filename.clone(),
        organization_id,
        community_id: form.community_id,
        processing_level: form.processing_level,
        storage_path: None,
    };

    let outcome = state
        .pipeline
        .process_upload(&bytes, &request)
        .await
        .map_err(|e| internal(e.to_string()))?;

    let separation = match form.output_path.as_deref() {
        Some(dir) if outcome.is_multi_document => Some(
            state
                .pipeline
                .analyzer()
                .separate(
                    &outcome.extracted_text,
                    &filename,
                    &outcome.detected_documents,
                    dir,
                )
                .map_err(|e| internal(format!("fragment separation failed: {}", e)))?,
        ),
        _ => None,
    };

    let child_ids = outcome
        .children
        .iter()
        .map(|c| c.document_id.clone())
        .collect();
    let mut results = vec![outcome.document];
    results.extend(outcome.children);

    Ok(Json(UploadResponse {
        is_multi_document: outcome.is_multi_document,
        detected_documents: outcome.detected_documents,
        separation,
        upload: Some(UploadSummary {
            parent_id: results[0].document_id.clone(),
            child_ids,
            results,
        }),
        timestamp: chrono::Utc::now().timestamp(),
    }))
}

/// Analysis without persistence: boundary detection, and optionally
/// fragment files written to `output_path`.
async fn analyze_only(
    state: &AppState,
    bytes: &[u8],
    filename: &str,
    output_path: Option<&std::path::Path>,
) -> Result<Json<UploadResponse>, AppError> {
    let analyzer = state.pipeline.analyzer();
    let report = analyzer
        .analyze(bytes, filename)
        .await
        .map_err(|e| internal(format!("extraction failed: {}", e)))?;

    let separation = match output_path {
        Some(dir) if report.is_multi_document => Some(
            analyzer
                .separate(
                    &report.extracted_text,
                    filename,
                    &report.detected_documents,
                    dir,
                )
                .map_err(|e| internal(format!("fragment separation failed: {}", e)))?,
        ),
        _ => None,
    };

    Ok(Json(UploadResponse {
        is_multi_document: report.is_multi_document,
        detected_documents: report.detected_documents,
        separation,
        upload: None,
        timestamp: chrono::Utc::now().timestamp(),
    }))
}

// ============ GET /api/documents/{id}/status ============

/// JSON response body for `GET /api/documents/{id}/status`.
#[derive(Serialize)]
struct StatusResponse {
    document_id: String,
    filename: String,
    document_type: Option<String>,
    processing_level: i64,
    parent_document_id: Option<String>,
    stages: StageStatuses,
    created_at: i64,
    updated_at: i64,
}

#[derive(Serialize)]
struct StageStatuses {
    extraction: String,
    classification: String,
    metadata: String,
    chunking: String,
}

async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let doc = store::get_document(state.pipeline.pool(), &id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("document {} not found", id)))?;

    Ok(Json(StatusResponse {
        document_id: doc.id,
        filename: doc.filename,
        document_type: doc.document_type,
        processing_level: doc.processing_level,
        parent_document_id: doc.parent_document_id,
        stages: StageStatuses {
            extraction: doc.extraction_status,
            classification: doc.classification_status,
            metadata: doc.metadata_status,
            chunking: doc.chunking_status,
        },
        created_at: doc.created_at,
        updated_at: doc.updated_at,
    }))
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
