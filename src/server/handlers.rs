//! Resource handlers
//!
//! Protected handlers can rely on an [`AuthorizationContext`] in the request
//! extensions; the route layer rejects the request before they run otherwise.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ForgeError;
use crate::gateway::context::{AuthorizationContext, Claim};
use crate::server::AppState;
use crate::store::{NewTodo, TodoItem};

/// Body of `GET /api/me`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub name: String,
    pub claims: Vec<Claim>,
}

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<ForgeError>() {
            Some(ForgeError::InvalidInput(msg)) => ApiError::BadRequest(msg.clone()),
            _ => ApiError::Internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %format!("{err:#}"), "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

/// `GET /api/hello`
pub async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello from API" }))
}

/// `GET /api/me`
pub async fn me(Extension(context): Extension<AuthorizationContext>) -> Json<MeResponse> {
    Json(MeResponse {
        name: context.subject().to_string(),
        claims: context.claims().to_vec(),
    })
}

/// `GET /api/todos`
pub async fn list_todos(State(state): State<AppState>) -> Result<Json<Vec<TodoItem>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

/// `POST /api/todos`
pub async fn create_todo(
    State(state): State<AppState>,
    Extension(context): Extension<AuthorizationContext>,
    payload: Result<Json<NewTodo>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(new) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    new.validate()?;

    let item = state.store.create(new).await?;
    tracing::info!(id = item.id, subject = %context.subject(), "Created todo");

    let location = format!("/api/todos/{}", item.id);
    Ok((StatusCode::CREATED, [(LOCATION, location)], Json(item)).into_response())
}

/// `GET /health`
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /alive`
pub async fn alive() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}
