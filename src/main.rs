// main.rs - Sizecap Server

mod decode;
mod limits;
mod logger;
mod reencode;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{Html, Response},
    routing::get,
    Json, Router,
};
use md5::{Digest, Md5};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Semaphore;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::logger::Logger;
use crate::reencode::{reencode, EncodedResult, ReencodeError, SizeBudget};

/// Embedded upload form
const INDEX_HTML: &str = include_str!("../assets/index.html");

/// Application state shared across requests
#[derive(Clone)]
struct AppState {
    encode_semaphore: Arc<Semaphore>,
    logger: Logger,
    config: ServerConfig,
}

/// Server configuration
#[derive(Clone, Debug)]
struct ServerConfig {
    port: u16,
    max_upload_bytes: u64,
    strict_budget: bool,
    encode_permits: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| limits::Config::default().max_upload_bytes),
            strict_budget: std::env::var("STRICT_BUDGET")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            encode_permits: std::env::var("ENCODE_PERMITS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
}

/// Everything that can sink one upload after the form parsed
#[derive(Debug, thiserror::Error)]
enum RequestError {
    #[error(transparent)]
    Decode(#[from] decode::DecodeError),
    #[error(transparent)]
    Reencode(#[from] ReencodeError),
}

/// Cache headers for responses
fn get_cache_headers(custom: Option<HeaderMap>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert("content-encoding", HeaderValue::from_static("identity"));
    headers.insert(
        "cache-control",
        HeaderValue::from_static("private, no-store, no-cache, must-revalidate, max-age=0"),
    );
    headers.insert("pragma", HeaderValue::from_static("no-cache"));
    headers.insert("expires", HeaderValue::from_static("0"));

    if let Some(custom_headers) = custom {
        for (key, value) in custom_headers {
            if let Some(k) = key {
                headers.insert(k, value);
            }
        }
    }

    headers
}

/// Create an error response
fn create_error_response(
    status_code: StatusCode,
    message: &str,
    filename: Option<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status_code,
        Json(ErrorResponse {
            error: message.to_string(),
            filename,
        }),
    )
}

/// Create a download response for an encoded buffer
fn create_image_response(
    buffer: Vec<u8>,
    content_type: &str,
    extension: &str,
    additional_headers: Option<HeaderMap>,
) -> Response {
    let mut headers = get_cache_headers(additional_headers);

    headers.insert(
        "content-type",
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert("content-length", HeaderValue::from(buffer.len()));

    let disposition = format!("attachment; filename=\"compressed_image.{}\"", extension);
    headers.insert(
        "content-disposition",
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    let mut response = Response::new(buffer.into());
    *response.headers_mut() = headers;
    response
}

/// Generate MD5 hash of the uploaded bytes
fn generate_upload_hash(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check whether the upload should be turned away before decoding
fn should_reject_upload(
    declared_type: &str,
    size: u64,
    config: &ServerConfig,
) -> Option<&'static str> {
    let limits_config = limits::Config {
        max_upload_bytes: config.max_upload_bytes,
    };

    if size == 0 {
        return Some("empty_upload");
    }

    if size > limits_config.max_upload_bytes {
        return Some("too_large");
    }

    if !limits::should_accept(declared_type, size, &limits_config) {
        return Some("unsupported");
    }

    None
}

fn rejection_status(reason: &str) -> (StatusCode, &'static str) {
    match reason {
        "too_large" => (StatusCode::PAYLOAD_TOO_LARGE, "Uploaded file is too large"),
        "unsupported" => (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Uploaded file is not an image",
        ),
        _ => (StatusCode::BAD_REQUEST, "Missing image upload"),
    }
}

/// One parsed upload form
struct UploadForm {
    file_bytes: axum::body::Bytes,
    filename: String,
    declared_type: Option<String>,
    budget_field: Option<String>,
}

/// Parse the `max_size` form value into a budget
fn parse_budget(raw: Option<&str>) -> Option<SizeBudget> {
    raw.map(str::trim)
        .and_then(|v| v.parse::<u32>().ok())
        .and_then(SizeBudget::from_kb)
}

/// Pull the `img` and `max_size` fields out of the multipart body
async fn parse_upload_form(
    mut multipart: Multipart,
) -> Result<UploadForm, (StatusCode, Json<ErrorResponse>)> {
    let mut file_bytes = None;
    let mut filename = String::from("upload");
    let mut declared_type = None;
    let mut budget_field: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| {
        create_error_response(StatusCode::BAD_REQUEST, "Malformed multipart body", None)
    })? {
        match field.name().unwrap_or("") {
            "img" => {
                if let Some(name) = field.file_name() {
                    filename = name.to_string();
                }
                declared_type = field.content_type().map(|t| t.to_string());
                file_bytes = Some(field.bytes().await.map_err(|_| {
                    create_error_response(
                        StatusCode::BAD_REQUEST,
                        "Failed to read uploaded file",
                        None,
                    )
                })?);
            }
            "max_size" => {
                budget_field = Some(field.text().await.map_err(|_| {
                    create_error_response(StatusCode::BAD_REQUEST, "Failed to read max_size", None)
                })?);
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| {
        create_error_response(
            StatusCode::BAD_REQUEST,
            "Missing image upload",
            Some(filename.clone()),
        )
    })?;

    Ok(UploadForm {
        file_bytes,
        filename,
        declared_type,
        budget_field,
    })
}

/// Upload form handler
async fn index_page() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check handler
async fn health_check() -> &'static str {
    "sizecap"
}

/// Main compression handler
async fn compress_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let form = parse_upload_form(multipart).await?;

    let original_size = form.file_bytes.len() as u64;

    let budget = match parse_budget(form.budget_field.as_deref()) {
        Some(budget) => budget,
        None => {
            state.logger.log_reject(&form.filename, original_size, "bad_budget");
            return Err(create_error_response(
                StatusCode::BAD_REQUEST,
                "max_size must be a positive number of kilobytes",
                Some(form.filename),
            ));
        }
    };

    state.logger.log_request(
        &form.filename,
        form.declared_type.as_deref(),
        original_size,
        budget.kb(),
        headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
    );

    if let Some(reason) =
        should_reject_upload(form.declared_type.as_deref().unwrap_or(""), original_size, &state.config)
    {
        state.logger.log_reject(&form.filename, original_size, reason);
        let (status, message) = rejection_status(reason);
        return Err(create_error_response(status, message, Some(form.filename)));
    }

    let upload_hash = generate_upload_hash(&form.file_bytes);

    // Decode and re-encode are CPU-bound; keep them off the async
    // workers and cap how many run at once.
    let _permit = state.encode_semaphore.acquire().await.map_err(|_| {
        create_error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server shutting down", None)
    })?;

    let data = form.file_bytes.clone();
    let task_logger = state.logger.clone();
    let result: Result<EncodedResult, RequestError> =
        tokio::task::spawn_blocking(move || {
            let source = decode::decode_upload(&data)?;
            let (width, height) = source.dimensions();
            task_logger.debug(
                "Image decoded",
                &serde_json::json!({
                    "width": width,
                    "height": height,
                    "family": source.family.extension(),
                    "budgetKb": budget.kb(),
                }),
            );
            Ok(reencode(&source, budget)?)
        })
        .await
        .map_err(|e| {
            state.logger.error(
                "Re-encode task failed",
                &serde_json::json!({ "error": e.to_string() }),
            );
            create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Compression failed",
                Some(form.filename.clone()),
            )
        })?;

    let result = match result {
        Ok(result) => result,
        Err(RequestError::Decode(e)) => {
            state.logger.error(
                "Decode error",
                &serde_json::json!({ "filename": form.filename, "error": e.to_string() }),
            );
            return Err(create_error_response(
                StatusCode::BAD_REQUEST,
                "Could not decode uploaded image",
                Some(form.filename),
            ));
        }
        Err(RequestError::Reencode(ReencodeError::UnsupportedFormat)) => {
            state.logger.log_reject(&form.filename, original_size, "unsupported");
            return Err(create_error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Only JPEG and PNG images can be compressed",
                Some(form.filename),
            ));
        }
        Err(RequestError::Reencode(e)) => {
            state.logger.error(
                "Re-encode error",
                &serde_json::json!({ "filename": form.filename, "error": e.to_string() }),
            );
            return Err(create_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Compression failed",
                Some(form.filename),
            ));
        }
    };

    state.logger.log_reencode(
        result.family.extension(),
        original_size,
        result.len(),
        result.quality,
        result.within_budget,
    );

    if state.config.strict_budget && !result.within_budget {
        return Err(create_error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Could not compress the image under the requested size",
            Some(form.filename),
        ));
    }

    let bytes_saved = original_size as i64 - result.len() as i64;
    let family = result.family;
    let within_budget = result.within_budget;

    let mut response =
        create_image_response(result.data, family.content_type(), family.extension(), None);

    let headers = response.headers_mut();
    headers.insert("x-compressed-by", HeaderValue::from_static("sizecap"));
    headers.insert(
        "x-upload-hash",
        HeaderValue::from_str(&upload_hash)
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("x-bytes-saved", HeaderValue::from(bytes_saved));
    headers.insert(
        "x-budget-met",
        HeaderValue::from_static(if within_budget { "true" } else { "false" }),
    );

    Ok(response)
}

/// Create the application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Leave headroom above the upload cap for multipart framing
    let body_limit = state.config.max_upload_bytes as usize + 64 * 1024;

    Router::new()
        .route("/", get(index_page).post(compress_handler))
        .route("/health", get(health_check))
        .route("/health/", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logger
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
    let log_enabled = std::env::var("LOG_ENABLED").unwrap_or_else(|_| "true".to_string()) != "false";
    Logger::init(&log_level, log_enabled);

    let logger = Logger::new(&log_level, log_enabled);

    // Create server configuration
    let config = ServerConfig::default();

    // Cap concurrent encode jobs
    let encode_semaphore = Arc::new(Semaphore::new(config.encode_permits));

    // Create application state
    let state = AppState {
        encode_semaphore,
        logger: logger.clone(),
        config: config.clone(),
    };

    // Create router
    let app = create_router(state);

    // Bind address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let address = format!("0.0.0.0:{}", config.port);

    // Log startup with style
    logger.log_startup(env!("CARGO_PKG_VERSION"), &address);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
