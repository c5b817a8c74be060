//! MCP-compatible HTTP server.
//!
//! Exposes the matching and analysis tools via a JSON HTTP API suitable
//! for integration with MCP-compatible AI agents. All tools are registered
//! in a [`ToolRegistry`] and dispatched through the same
//! `POST /tools/{name}` handler.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call any registered tool by name |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Tool failures are converted into a structured payload rather than
//! propagated, so callers always receive a well-formed response shape.
//! The original request parameters are echoed back alongside the error:
//!
//! ```json
//! {
//!   "error": { "code": "bad_request", "message": "parameter 'query' must not be empty" },
//!   "request": { "query": "" }
//! }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `embeddings_disabled` (400), `timeout` (408), `tool_error` (500).
//! An unknown identifier maps to `not_found`; collaborator failures map to
//! `tool_error` — the two are never conflated.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::store::Store;
use crate::tools::{ToolContext, ToolRegistry};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    ctx: Arc<ToolContext>,
    tools: Arc<ToolRegistry>,
}

/// Starts the MCP-compatible HTTP server.
///
/// Binds to the address configured in `[server].bind` and serves the
/// built-in tool registry until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let store = Arc::new(Store::connect(&config).await?);
    let ctx = Arc::new(ToolContext::new(config, store)?);
    let registry = ToolRegistry::with_builtins();

    println!("Registered {} tools:", registry.len());
    for tool in registry.tools() {
        println!("  POST /tools/{} — {}", tool.name(), tool.description());
    }

    let state = AppState {
        ctx,
        tools: Arc::new(registry),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("MCP server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error detail with a machine-readable code.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response, echoing
/// the original request parameters when available.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    request: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut body = serde_json::json!({
            "error": ErrorDetail {
                code: self.code,
                message: self.message,
            }
        });
        if let Some(request) = self.request {
            body["request"] = request;
        }
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        request: None,
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
        request: None,
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
        request: None,
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error".to_string(),
        message: message.into(),
        request: None,
    }
}

/// Maps tool execution errors to the most appropriate HTTP status.
/// Identifier lookups that miss are a distinct `not_found`, never
/// conflated with collaborator failures (`tool_error`).
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = err.to_string();

    if msg.contains("not found") {
        not_found(format!("{}: {}", tool_name, msg))
    } else if msg.contains("timed out") {
        timeout_error(format!("{}: {}", tool_name, msg))
    } else if msg.contains("disabled") {
        let mut e = bad_request(format!("{}: {}", tool_name, msg));
        e.code = "embeddings_disabled".to_string();
        e
    } else if msg.contains("parameter") || msg.contains("must not be empty") {
        bad_request(format!("{}: {}", tool_name, msg))
    } else {
        tool_error(format!("{}: {}", tool_name, msg))
    }
}

// ============ GET /health ============

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

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools: Vec<ToolInfo> = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();

    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let result = tool
        .execute(params.clone(), &state.ctx)
        .await
        .map_err(|e| {
            let mut app_err = classify_tool_error(&name, e);
            app_err.request = Some(params);
            app_err
        })?;

    Ok(Json(serde_json::json!({ "result": result })))
}
