//! HTTP glue: task query endpoints, markdown section extraction, and the
//! stateless MCP transport, all mounted behind the bearer middleware when
//! OAuth is enabled.

mod sections;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::oauth::{self, SharedOAuthStore};
use crate::resolver;
use crate::service::TaskService;

use sections::{extract_section, list_sections};

#[derive(Clone)]
pub struct HttpState {
    pub brain_dir: PathBuf,
    pub service: Arc<Mutex<TaskService>>,
}

fn api_error(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

/// Mounts `/api/v1/*` and `/mcp`, optionally wrapping the whole surface in
/// the bearer + scope middleware when `oauth_store` is `Some`.
pub fn router(state: HttpState, oauth_store: Option<SharedOAuthStore>) -> Router {
    let api = Router::new()
        .route("/tasks", get(list_all_projects))
        .route("/tasks/{project}", get(list_project_tasks))
        .route("/tasks/{project}/{selection}", get(list_selection))
        .route("/entries/{id}/sections", get(entry_sections))
        .route("/entries/{id}/sections/{title}", get(entry_section_body))
        .with_state(state.clone());

    let mcp = Router::new().route("/mcp", post(mcp_handler).get(mcp_method_not_allowed).delete(mcp_method_not_allowed)).with_state(state);

    let router = Router::new().nest("/api/v1", api).merge(mcp);

    match oauth_store {
        Some(store) => router.layer(axum::middleware::from_fn_with_state(store, oauth::middleware::require_bearer)),
        None => router,
    }
}

async fn list_all_projects(State(state): State<HttpState>) -> Response {
    let service = state.service.lock().await;
    match service.list_projects() {
        Ok(projects) => Json(json!({ "projects": projects, "count": projects.len() })).into_response(),
        Err(e) => {
            warn!(error = %e, "http::list_all_projects: failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &e.to_string())
        }
    }
}

async fn list_project_tasks(State(state): State<HttpState>, AxumPath(project): AxumPath<String>) -> Response {
    let mut service = state.service.lock().await;
    match service.tasks(&project).await {
        Ok(tasks) => Json(json!({ "tasks": tasks })).into_response(),
        Err(e) => {
            warn!(%project, error = %e, "http::list_project_tasks: failed");
            api_error(StatusCode::NOT_FOUND, "not_found", &e.to_string())
        }
    }
}

async fn list_selection(State(state): State<HttpState>, AxumPath((project, selection)): AxumPath<(String, String)>) -> Response {
    let mut service = state.service.lock().await;
    let tasks = match service.tasks(&project).await {
        Ok(tasks) => tasks.to_vec(),
        Err(e) => {
            warn!(%project, error = %e, "http::list_selection: failed to load tasks");
            return api_error(StatusCode::NOT_FOUND, "not_found", &e.to_string());
        }
    };
    drop(service);

    let result = resolver::resolve(&tasks);
    let selected: Vec<_> = match selection.as_str() {
        "ready" => result.ready_sorted().into_iter().cloned().collect(),
        "waiting" => result
            .tasks
            .iter()
            .filter(|t| matches!(t.classification, crate::domain::Classification::Waiting | crate::domain::Classification::WaitingOnParent))
            .cloned()
            .collect(),
        "blocked" => result
            .tasks
            .iter()
            .filter(|t| matches!(t.classification, crate::domain::Classification::Blocked | crate::domain::Classification::BlockedByParent))
            .cloned()
            .collect(),
        "next" => result.ready_sorted().into_iter().take(1).cloned().collect(),
        other => {
            return api_error(StatusCode::BAD_REQUEST, "invalid_request", &format!("unknown selection \"{other}\""));
        }
    };

    Json(json!({ "tasks": selected })).into_response()
}

/// Finds the on-disk markdown file for an `id-or-path` reference by
/// scanning every project's cached tasks for a matching id or path.
async fn resolve_entry_path(state: &HttpState, id_or_path: &str) -> Option<PathBuf> {
    let (_, normalized) = TaskService::normalize_reference(id_or_path);
    let projects = {
        let service = state.service.lock().await;
        service.list_projects().ok()?
    };
    for project in projects {
        let mut service = state.service.lock().await;
        let Ok(tasks) = service.tasks(&project).await else { continue };
        if let Some(task) = tasks.iter().find(|t| t.id == normalized || t.path.ends_with(&normalized)) {
            return Some(state.brain_dir.join(&task.path));
        }
    }
    None
}

async fn entry_sections(State(state): State<HttpState>, AxumPath(id): AxumPath<String>) -> Response {
    let Some(path) = resolve_entry_path(&state, &id).await else {
        return api_error(StatusCode::NOT_FOUND, "not_found", &format!("no entry matches \"{id}\""));
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => Json(json!({ "sections": list_sections(&content) })).into_response(),
        Err(e) => {
            warn!(?path, error = %e, "http::entry_sections: read failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct SectionQuery {
    #[serde(default, rename = "includeSubsections")]
    include_subsections: bool,
}

async fn entry_section_body(
    State(state): State<HttpState>,
    AxumPath((id, title)): AxumPath<(String, String)>,
    Query(query): Query<SectionQuery>,
) -> Response {
    let Some(path) = resolve_entry_path(&state, &id).await else {
        return api_error(StatusCode::NOT_FOUND, "not_found", &format!("no entry matches \"{id}\""));
    };
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            warn!(?path, error = %e, "http::entry_section_body: read failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", &e.to_string());
        }
    };
    match extract_section(&content, &title, query.include_subsections) {
        Some(body) => Json(json!({ "title": title, "body": body })).into_response(),
        None => api_error(StatusCode::NOT_FOUND, "not_found", &format!("no section titled \"{title}\"")),
    }
}

#[derive(Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Stateless JSON-RPC dispatch: one request in, one response out, no
/// server-sent-event session. Only the handful of MCP methods the runner's
/// task surface needs to expose are implemented; anything else is a
/// standard JSON-RPC "method not found".
async fn mcp_handler(State(state): State<HttpState>, Json(req): Json<JsonRpcRequest>) -> Response {
    debug!(method = %req.method, "http::mcp_handler: dispatching");
    let result = match req.method.as_str() {
        "initialize" => Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "runner", "version": env!("CARGO_PKG_VERSION") },
        })),
        "tools/list" => Ok(json!({
            "tools": [
                { "name": "list_tasks", "description": "List tasks for a project" },
                { "name": "list_ready_tasks", "description": "List ready tasks for a project" },
                { "name": "validate_dependencies", "description": "Resolve a set of depends_on references against a project's tasks before writing them" },
            ]
        })),
        "tools/call" => mcp_tool_call(&state, &req.params).await,
        other => Err((-32601, format!("method not found: {other}"))),
    };

    match result {
        Ok(value) => Json(json!({ "jsonrpc": "2.0", "id": req.id, "result": value })).into_response(),
        Err((code, message)) => Json(json!({ "jsonrpc": "2.0", "id": req.id, "error": { "code": code, "message": message } })).into_response(),
    }
}

async fn mcp_tool_call(state: &HttpState, params: &Value) -> Result<Value, (i32, String)> {
    let name = params.get("name").and_then(Value::as_str).ok_or((-32602, "missing tool name".to_string()))?;
    let project = params
        .get("arguments")
        .and_then(|a| a.get("project"))
        .and_then(Value::as_str)
        .ok_or((-32602, "missing \"project\" argument".to_string()))?;

    let mut service = state.service.lock().await;
    let tasks = service.tasks(project).await.map_err(|e| (-32000, e.to_string()))?.to_vec();
    drop(service);

    match name {
        "list_tasks" => Ok(json!({ "tasks": tasks })),
        "list_ready_tasks" => {
            let result = resolver::resolve(&tasks);
            Ok(json!({ "tasks": result.ready_sorted() }))
        }
        "validate_dependencies" => {
            let references = params
                .get("arguments")
                .and_then(|a| a.get("references"))
                .and_then(Value::as_array)
                .ok_or((-32602, "missing \"references\" argument".to_string()))?;
            Ok(json!({ "results": validate_dependency_references(references, &tasks) }))
        }
        other => Err((-32601, format!("unknown tool: {other}"))),
    }
}

/// For each raw reference: normalize it, resolve against `tasks` by id or
/// path suffix, and report up to 3 nearest-title suggestions when it doesn't
/// resolve. Called before an agent writes a `depends_on` list to a task
/// file, so a typo'd reference is caught before it lands on disk.
fn validate_dependency_references(references: &[Value], tasks: &[crate::domain::Task]) -> Vec<Value> {
    references
        .iter()
        .filter_map(Value::as_str)
        .map(|reference| {
            let (_, normalized) = TaskService::normalize_reference(reference);
            let resolved = tasks.iter().any(|t| t.id == normalized || t.path.ends_with(&normalized));
            if resolved {
                json!({ "reference": reference, "resolved": true })
            } else {
                json!({
                    "reference": reference,
                    "resolved": false,
                    "suggestions": TaskService::suggest(&normalized, tasks),
                })
            }
        })
        .collect()
}

async fn mcp_method_not_allowed() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Priority, Task, TaskStatus};

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            path: format!("projects/demo/task/{id}.md"),
            title: title.to_string(),
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            depends_on: vec![],
            parent_id: None,
            workdir: "demo".into(),
            git_branch: None,
            target_workdir: None,
            direct_prompt: None,
            agent: None,
            model: None,
            feature_id: None,
            feature_priority: None,
            feature_depends_on: vec![],
            created_at: 0,
        }
    }

    #[test]
    fn validate_dependency_references_resolves_known_ids_and_suggests_for_unknown() {
        let tasks = vec![task("abc12345", "Add OAuth login"), task("def67890", "Fix widget layout")];
        let references = vec![json!("abc12345"), json!("projects/demo/task/oauth-typo.md")];

        let results = validate_dependency_references(&references, &tasks);

        assert_eq!(results[0]["resolved"], json!(true));
        assert_eq!(results[1]["resolved"], json!(false));
        assert_eq!(results[1]["suggestions"], json!(Vec::<String>::new()));
    }
}
