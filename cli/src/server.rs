//! HTTP service in front of a single inference gateway.
//!
//! Every request that touches the backend runs on the blocking thread pool
//! and takes the gateway lock, so inference calls are serialized onto the one
//! backend context while the async runtime keeps answering health checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use docvl::document::{ImageDocument, ImageSet, NamedImage, DEFAULT_DPI};
use docvl::inference::{
    BackendInfo, ExtractResponse, HealthResponse, ImageSizeReport, ServiceInfo, StatusResponse,
    DEFAULT_MAX_TOKENS,
};
use docvl::normalize::DEFAULT_MAX_EDGE;
use docvl::pipeline::{
    extract_image, BatchOrchestrator, ExtractOptions, NoProgress, PageRecord, PipelineOptions,
};
use docvl::{DocumentSource, Error, InferenceGateway};

/// Largest accepted request body.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared state of the service.
#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Mutex<InferenceGateway>>,
    ready: Arc<AtomicBool>,
    info: Arc<RwLock<BackendInfo>>,
}

impl ApiState {
    /// Wrap a gateway. It may still be closed; see [`ApiState::load`].
    pub fn new(gateway: InferenceGateway) -> Self {
        let ready = gateway.is_ready();
        let info = gateway.backend_info();
        Self {
            gateway: Arc::new(Mutex::new(gateway)),
            ready: Arc::new(AtomicBool::new(ready)),
            info: Arc::new(RwLock::new(info)),
        }
    }

    /// Whether the backend is loaded.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn backend_info(&self) -> BackendInfo {
        self.info.read().map(|info| info.clone()).unwrap_or_default()
    }

    /// Open the gateway on the blocking pool.
    pub async fn load(&self) -> docvl::Result<()> {
        let state = self.clone();
        let joined = tokio::task::spawn_blocking(move || -> docvl::Result<()> {
            let info = {
                let mut gateway = state.lock_gateway()?;
                gateway.open()?;
                gateway.backend_info()
            };
            if let Ok(mut slot) = state.info.write() {
                *slot = info;
            }
            state.ready.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        joined.map_err(|e| Error::Other(format!("backend loader failed: {}", e)))?
    }

    /// Close the gateway.
    pub fn shutdown(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if let Ok(mut gateway) = self.gateway.lock() {
            gateway.close();
        }
    }

    fn lock_gateway(&self) -> docvl::Result<std::sync::MutexGuard<'_, InferenceGateway>> {
        self.gateway
            .lock()
            .map_err(|_| Error::Other("inference gateway lock poisoned".into()))
    }
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// What went wrong
    pub detail: String,
}

type ApiError = (StatusCode, Json<ErrorDetail>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorDetail {
            detail: detail.into(),
        }),
    )
}

fn not_ready() -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "Model not loaded")
}

fn bad_request(e: impl std::fmt::Display) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, e.to_string())
}

fn processing_error(e: Error) -> ApiError {
    match e {
        Error::BackendUnavailable(_) => api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        Error::InvalidConfig(_) | Error::UnknownFormat => bad_request(e),
        _ => {
            log::error!("Error processing image: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error processing image: {}", e),
            )
        }
    }
}

/// Run `work` against the gateway on the blocking pool.
async fn with_gateway<T, F>(state: &ApiState, work: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut InferenceGateway) -> docvl::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut gateway = state.lock_gateway()?;
        work(&mut gateway)
    })
    .await;

    match joined {
        Ok(result) => result.map_err(processing_error),
        Err(e) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("worker task failed: {}", e),
        )),
    }
}

/// Generation settings accepted in the query string.
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// Generation budget
    pub max_tokens: Option<u32>,
    /// Longest-edge cap
    pub resize_max: Option<u32>,
}

struct UploadForm {
    files: Vec<NamedImage>,
    max_tokens: Option<u32>,
    resize_max: Option<u32>,
}

impl UploadForm {
    fn max_tokens(&self, params: &UploadParams) -> u32 {
        self.max_tokens
            .or(params.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS)
    }

    fn resize_max(&self, params: &UploadParams) -> u32 {
        self.resize_max
            .or(params.resize_max)
            .unwrap_or(DEFAULT_MAX_EDGE)
    }
}

fn parse_number(field: &str, value: &str) -> Result<u32, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("'{}' must be a non-negative integer", field)))
}

/// Collect uploads named `file_field` and the numeric form fields.
async fn read_form(mut multipart: Multipart, file_field: &str) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        files: Vec::new(),
        max_tokens: None,
        resize_max: None,
    };

    while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field {
            let filename = field
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("upload-{}", form.files.len()));
            let data = field.bytes().await.map_err(bad_request)?;
            form.files.push(NamedImage::new(filename, data.to_vec()));
        } else if name == "max_tokens" {
            let text = field.text().await.map_err(bad_request)?;
            form.max_tokens = Some(parse_number(&name, &text)?);
        } else if name == "resize_max" {
            let text = field.text().await.map_err(bad_request)?;
            form.resize_max = Some(parse_number(&name, &text)?);
        }
    }

    Ok(form)
}

/// `GET /`
pub async fn root(State(state): State<ApiState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "docvl".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.backend_info().name,
        status: if state.is_ready() { "ready" } else { "loading" }.to_string(),
    })
}

/// `GET /health`
pub async fn health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, ApiError> {
    if !state.is_ready() {
        return Err(not_ready());
    }
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        backend: state.backend_info().name,
    }))
}

/// `GET /status`
pub async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let info = state.backend_info();
    Json(StatusResponse {
        model_loaded: state.is_ready(),
        backend: info.name,
        device: info.device,
        model: info.model,
    })
}

/// `POST /ocr/extract`
pub async fn extract(
    State(state): State<ApiState>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> Result<Json<ExtractResponse>, ApiError> {
    if !state.is_ready() {
        return Err(not_ready());
    }

    let form = read_form(multipart, "file").await?;
    let options = ExtractOptions::new()
        .with_max_tokens(form.max_tokens(&params))
        .with_max_edge(form.resize_max(&params));
    let upload = form
        .files
        .into_iter()
        .next()
        .ok_or_else(|| bad_request("missing 'file' field"))?;

    log::info!(
        "Extracting '{}' ({} bytes, max_tokens {})",
        upload.name,
        upload.data.len(),
        options.max_tokens
    );

    let extraction = with_gateway(&state, move |gateway| {
        let document = ImageDocument::from_bytes(upload.data, upload.name)?;
        let image = document.render_page(0, DEFAULT_DPI)?;
        extract_image(gateway, image, &options)
    })
    .await?;

    Ok(Json(ExtractResponse {
        extracted_text: extraction.result.extracted_text,
        processing_time: extraction.result.latency_seconds,
        image_size: ImageSizeReport {
            original: extraction.original,
            processed: extraction.processed,
        },
        tokens_generated: extraction.result.token_count,
        backend: state.backend_info().name,
    }))
}

/// One entry of a batch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    /// Position of the upload in the request
    pub file_index: usize,
    /// Uploaded file name
    pub filename: String,
    /// Transcribed text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    /// Generation time in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    /// Generated tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_generated: Option<u32>,
    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchItem {
    fn new(file_index: usize, filename: String, record: &PageRecord) -> Self {
        Self {
            file_index,
            filename,
            extracted_text: record.text().map(str::to_string),
            processing_time: record.latency_seconds(),
            tokens_generated: record.token_count(),
            error: record.error().map(str::to_string),
        }
    }
}

/// Body of `POST /ocr/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    /// One entry per upload, in request order
    pub results: Vec<BatchItem>,
    /// Number of uploads
    pub total_files: usize,
    /// Wall time for the whole batch in seconds
    pub total_time: f64,
    /// `total_time / total_files`
    pub avg_time_per_file: f64,
}

impl BatchResponse {
    /// Pair upload names with their records, in request order.
    fn new(names: Vec<String>, records: &[PageRecord], total_time: f64) -> Self {
        let results: Vec<BatchItem> = records
            .iter()
            .zip(names)
            .enumerate()
            .map(|(index, (record, name))| BatchItem::new(index, name, record))
            .collect();
        let total_files = results.len();
        let avg_time_per_file = if total_files > 0 {
            total_time / total_files as f64
        } else {
            0.0
        };

        Self {
            results,
            total_files,
            total_time,
            avg_time_per_file,
        }
    }
}

/// `POST /ocr/batch`
pub async fn batch(
    State(state): State<ApiState>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> Result<Json<BatchResponse>, ApiError> {
    if !state.is_ready() {
        return Err(not_ready());
    }

    let form = read_form(multipart, "files").await?;
    if form.files.is_empty() {
        return Err(bad_request("No files to process"));
    }

    let options = PipelineOptions::new()
        .with_max_tokens(form.max_tokens(&params))
        .with_max_edge(form.resize_max(&params));
    let names: Vec<String> = form.files.iter().map(|f| f.name.clone()).collect();
    let mut images = ImageSet::new("batch");
    for file in form.files {
        images.push(file);
    }

    log::info!("Batch of {} file(s)", names.len());
    let started = Instant::now();
    let records = with_gateway(&state, move |gateway| {
        BatchOrchestrator::new(gateway, options).run(&images, &mut NoProgress)
    })
    .await?;

    let total_time = started.elapsed().as_secs_f64();
    Ok(Json(BatchResponse::new(names, &records, total_time)))
}

/// Build the service router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/ocr/extract", post(extract))
        .route("/ocr/batch", post(batch))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serve until Ctrl-C, then close the gateway.
pub async fn start_server(addr: &str, state: ApiState) -> Result<(), std::io::Error> {
    log::info!("Starting docvl service on {}", addr);

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Shutting down");
            }
        })
        .await?;

    state.shutdown();
    Ok(())
}
