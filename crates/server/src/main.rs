use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    add_child_item, add_root_item, create_transition, delete_item, indent_item, list_audit_entries,
    list_items, list_transitions, login, move_item_down, move_item_up, outdent_item,
    set_account_status, update_item, ApiContext, TreePolicy,
};
use shared::{
    domain::{ItemId, TransitionId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        AccountStatusChange, AuditEntryPayload, ItemEditsRequest, ItemPayload, NewItemRequest,
        TransitionSummary,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

#[derive(Clone)]
struct AppState {
    api: ApiContext,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
}

#[derive(Debug, serde::Serialize)]
struct LoginResponse {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    user_id: i64,
    #[serde(default)]
    cascade: bool,
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    user_id: i64,
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CreateTransitionRequest {
    user_id: i64,
    name: String,
}

const MAX_BODY_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|err| {
        error!(
            %database_url,
            %err,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        err
    })?;
    let api = ApiContext {
        storage,
        tree: TreePolicy {
            max_depth: settings.max_item_depth,
        },
    };

    let state = AppState { api };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/login", post(http_login))
        .route("/transitions", post(http_create_transition))
        .route("/transitions", get(http_list_transitions))
        .route("/transitions/:transition_id/items", post(http_add_root))
        .route("/transitions/:transition_id/items", get(http_list_items))
        .route("/items/:item_id/children", post(http_add_child))
        .route("/items/:item_id", patch(http_update_item))
        .route("/items/:item_id", delete(http_delete_item))
        .route("/items/:item_id/indent", post(http_indent))
        .route("/items/:item_id/outdent", post(http_outdent))
        .route("/items/:item_id/move_up", post(http_move_up))
        .route("/items/:item_id/move_down", post(http_move_down))
        .route("/admin/users/:user_id/status", post(http_set_account_status))
        .route("/admin/audit", get(http_list_audit))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, (StatusCode, Json<ApiError>)> {
    let user_id = login(&state.api, &req.username)
        .await
        .map_err(error_response)?;
    Ok(Json(LoginResponse { user_id: user_id.0 }))
}

async fn http_create_transition(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTransitionRequest>,
) -> Result<Json<TransitionSummary>, (StatusCode, Json<ApiError>)> {
    let summary = create_transition(&state.api, UserId(req.user_id), &req.name)
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

async fn http_list_transitions(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<TransitionSummary>>, (StatusCode, Json<ApiError>)> {
    let transitions = list_transitions(&state.api, UserId(q.user_id))
        .await
        .map_err(error_response)?;
    Ok(Json(transitions))
}

async fn http_add_root(
    State(state): State<Arc<AppState>>,
    Path(transition_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<NewItemRequest>,
) -> Result<Json<ItemPayload>, (StatusCode, Json<ApiError>)> {
    let item = add_root_item(
        &state.api,
        UserId(q.user_id),
        TransitionId(transition_id),
        req,
    )
    .await
    .map_err(error_response)?;
    Ok(Json(item))
}

async fn http_list_items(
    State(state): State<Arc<AppState>>,
    Path(transition_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<Vec<ItemPayload>>, (StatusCode, Json<ApiError>)> {
    let items = list_items(&state.api, UserId(q.user_id), TransitionId(transition_id))
        .await
        .map_err(error_response)?;
    Ok(Json(items))
}

async fn http_add_child(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<NewItemRequest>,
) -> Result<Json<ItemPayload>, (StatusCode, Json<ApiError>)> {
    let item = add_child_item(&state.api, UserId(q.user_id), ItemId(item_id), req)
        .await
        .map_err(error_response)?;
    Ok(Json(item))
}

async fn http_update_item(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<ItemEditsRequest>,
) -> Result<Json<ItemPayload>, (StatusCode, Json<ApiError>)> {
    let item = update_item(&state.api, UserId(q.user_id), ItemId(item_id), req)
        .await
        .map_err(error_response)?;
    Ok(Json(item))
}

async fn http_delete_item(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
    Query(q): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ApiError>)> {
    let removed = delete_item(&state.api, UserId(q.user_id), ItemId(item_id), q.cascade)
        .await
        .map_err(error_response)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

async fn http_indent(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<ItemPayload>, (StatusCode, Json<ApiError>)> {
    let item = indent_item(&state.api, UserId(q.user_id), ItemId(item_id))
        .await
        .map_err(error_response)?;
    Ok(Json(item))
}

async fn http_outdent(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<ItemPayload>, (StatusCode, Json<ApiError>)> {
    let item = outdent_item(&state.api, UserId(q.user_id), ItemId(item_id))
        .await
        .map_err(error_response)?;
    Ok(Json(item))
}

async fn http_move_up(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<ItemPayload>, (StatusCode, Json<ApiError>)> {
    let item = move_item_up(&state.api, UserId(q.user_id), ItemId(item_id))
        .await
        .map_err(error_response)?;
    Ok(Json(item))
}

async fn http_move_down(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> Result<Json<ItemPayload>, (StatusCode, Json<ApiError>)> {
    let item = move_item_down(&state.api, UserId(q.user_id), ItemId(item_id))
        .await
        .map_err(error_response)?;
    Ok(Json(item))
}

async fn http_set_account_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Json(req): Json<AccountStatusChange>,
) -> Result<Json<AuditEntryPayload>, (StatusCode, Json<ApiError>)> {
    let entry = set_account_status(
        &state.api,
        req.actor_user_id,
        UserId(user_id),
        req.status,
        &req.reason,
    )
    .await
    .map_err(error_response)?;
    Ok(Json(entry))
}

async fn http_list_audit(
    State(state): State<Arc<AppState>>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntryPayload>>, (StatusCode, Json<ApiError>)> {
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    let entries = list_audit_entries(&state.api, UserId(q.user_id), limit)
        .await
        .map_err(error_response)?;
    Ok(Json(entries))
}
