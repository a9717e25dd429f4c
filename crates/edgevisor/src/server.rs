//! # HTTP surface
//!
//! | route                                       | purpose                              |
//! |---------------------------------------------|--------------------------------------|
//! | `GET  /.well-known/wot-thing-description`   | device identity                      |
//! | `POST /upload_module`                       | store a `.wasm` file (field `module`) |
//! | `POST /upload_params`                       | store a `.json` file (field `params`) |
//! | `POST /deploy`                              | register a deployment                |
//! | `POST /deployments/:id/:function?a=1&b=2.5` | run a function, then the chain step  |
//!
//! Function arguments come from the query string, in order, and are parsed
//! against the function's declared argument types.

use axum::extract::DefaultBodyLimit;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use edgechain::Instruction;
use edgerun::backend::CallError;
use edgerun::module;
use edgerun::runtime;
use edgerun::ArgType;
use edgerun::Value;

use crate::state::AppState;
use crate::state::DeploymentEntry;
use crate::state::OutputSpec;
use crate::store;

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    NotImplemented(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            Self::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        warn!(status = status.as_u16(), error = %message, "request failed");
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<runtime::Error> for ApiError {
    fn from(e: runtime::Error) -> Self {
        let message = e.to_string();
        match e {
            runtime::Error::FunctionNotFound(_) | runtime::Error::ModuleNotFound(_) => Self::NotFound(message),
            runtime::Error::Module(module::Error::Call(call)) => match call {
                CallError::FunctionNotFound(_) => Self::NotFound(message),
                CallError::ArgumentCount { .. } | CallError::ArgumentType { .. } => Self::BadRequest(message),
                CallError::UnsupportedType { .. } | CallError::Trap { .. } => Self::Internal(message),
            },
            _ => Self::Internal(message),
        }
    }
}

impl From<edgechain::Error> for ApiError {
    fn from(e: edgechain::Error) -> Self {
        let message = e.to_string();
        match e {
            edgechain::Error::ProgramCounterExceeded { .. } => Self::Conflict(message),
            edgechain::Error::NotImplemented(_) => Self::NotImplemented(message),
            edgechain::Error::RequestFailed { .. } | edgechain::Error::Client(_) => Self::BadGateway(message),
            edgechain::Error::Description(_) => Self::BadRequest(message),
            edgechain::Error::Runtime(_) => Self::Internal(message),
        }
    }
}

impl From<store::Error> for ApiError {
    fn from(e: store::Error) -> Self {
        match e {
            store::Error::Io { .. } => Self::Internal(e.to_string()),
            _ => Self::BadRequest(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThingDescription {
    pub status: String,
    pub name: String,
    pub addr: String,
}

#[derive(Debug, Deserialize)]
pub struct DeployRequest {
    pub id: String,
    pub instructions: Vec<Instruction>,
    pub output: OutputSpec,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/.well-known/wot-thing-description", get(thing_description))
        .route("/upload_module", post(upload_module))
        .route("/upload_params", post(upload_params))
        .route("/deploy", post(deploy))
        .route("/deployments/:id/:function", post(invoke))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

/// GET /.well-known/wot-thing-description
async fn thing_description(State(state): State<AppState>) -> Json<ThingDescription> {
    Json(ThingDescription {
        status: "ok".to_string(),
        name: state.inner.name.clone(),
        addr: state.inner.addr.clone(),
    })
}

/// POST /upload_module
async fn upload_module(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (file_name, bytes) = read_file_field(multipart, "module").await?;
    let path = state.inner.storage.save_module(&file_name, &bytes).await?;
    Ok(Json(serde_json::json!({
        "status": "saved",
        "path": path.display().to_string(),
    })))
}

/// POST /upload_params
async fn upload_params(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (file_name, bytes) = read_file_field(multipart, "params").await?;
    let path = state.inner.storage.save_params(&file_name, &bytes).await?;
    Ok(Json(serde_json::json!({
        "status": "saved",
        "path": path.display().to_string(),
    })))
}

async fn read_file_field(mut multipart: Multipart, name: &str) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some(name) {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest(format!("Field '{}' carries no file name", name)))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(ApiError::BadRequest(format!("No file in field '{}'", name)))
}

/// POST /deploy
async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> Json<serde_json::Value> {
    info!(id = %request.id, steps = request.instructions.len(), "deployment registered");
    let entry = DeploymentEntry {
        deployment: edgechain::Deployment::new(request.instructions),
        output: request.output,
    };
    state.register(request.id.clone(), entry);
    Json(serde_json::json!({ "status": "deployed", "id": request.id }))
}

/// POST /deployments/:id/:function
///
/// The function runs and the step is taken on a blocking thread, under the
/// deployment lock and then the runtime lock. Both are released before the
/// step is forwarded, so a hop that calls back into this device, even into
/// the same deployment, is never blocked by the request waiting on it.
async fn invoke(
    State(state): State<AppState>,
    Path((id, function)): Path<(String, String)>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let entry = state
        .deployment(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Deployment not found: {}", id)))?;

    let raw: Vec<String> = query.into_iter().map(|(_, value)| value).collect();
    let runtime = state.inner.runtime.clone();
    let name = function.clone();
    let step = tokio::task::spawn_blocking(move || {
        let mut entry = entry.blocking_lock();
        let mut rt = runtime.blocking_lock();
        let types = rt.arg_types(&name)?;
        let args = parse_args(&name, &types, &raw)?;
        let result = rt.run_function(&name, &args)?;
        debug!(function = %name, result = ?result, "function finished");

        let DeploymentEntry { deployment, output } = &mut *entry;
        Ok::<_, ApiError>(deployment.step(
            &mut rt,
            result,
            output.media_type.clone(),
            output.schema.as_ref(),
        )?)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    debug!(deployment = %id, %function, target = ?step.target(), "step taken");

    let response = step.finish(state.inner.client.as_ref()).await?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, response.media_type.to_string())],
        response.body.to_string(),
    )
        .into_response())
}

/// Parses positional query values against declared argument types.
pub fn parse_args(function: &str, types: &[ArgType], raw: &[String]) -> Result<Vec<Value>, ApiError> {
    if types.len() != raw.len() {
        return Err(ApiError::BadRequest(format!(
            "Function '{}' takes {} arguments, got {}",
            function,
            types.len(),
            raw.len()
        )));
    }
    types
        .iter()
        .zip(raw)
        .enumerate()
        .map(|(index, (ty, text))| {
            ty.parse(text).ok_or_else(|| {
                ApiError::BadRequest(format!(
                    "Argument {} of '{}' is not a valid {}: {:?}",
                    index, function, ty, text
                ))
            })
        })
        .collect()
}
