//! WebSocket server + REST endpoints for live task sync.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::model::{RecurringTemplate, TaskAction, TaskItem, TaskWsMessage};
use crate::error::{DatabaseError, Error};
use crate::planner::Planner;
use crate::recurrence::retention::retain_current;
use crate::store::{live_tasks, live_templates};

/// Shared state for the planner routes.
#[derive(Clone)]
pub struct PlannerState {
    pub planner: Arc<Planner>,
}

impl PlannerState {
    pub fn new(planner: Arc<Planner>) -> Self {
        Self { planner }
    }
}

/// Build the Axum router for `/ws/tasks` and the REST endpoints.
pub fn planner_routes(state: PlannerState) -> Router {
    Router::new()
        .route("/ws/tasks", get(ws_handler))
        .route("/health", get(health))
        .route("/api/tasks", get(list_tasks))
        .route("/api/templates", get(list_templates))
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "weekly-planner",
    }))
}

// ── REST ────────────────────────────────────────────────────────────────

fn error_response(e: &Error) -> Response {
    let status = match e {
        Error::Unauthenticated => StatusCode::UNAUTHORIZED,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
        Error::Database(DatabaseError::Duplicate { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn list_tasks(State(state): State<PlannerState>) -> Response {
    match state.planner.tasks().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn list_templates(State(state): State<PlannerState>) -> Response {
    match state.planner.templates().await {
        Ok(templates) => Json(templates).into_response(),
        Err(e) => error_response(&e),
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<PlannerState>) -> impl IntoResponse {
    info!("Task WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, msg: &TaskWsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize task WS message");
            true
        }
    }
}

fn sync_message(
    planner: &Planner,
    tasks: &[TaskItem],
    templates: &[RecurringTemplate],
) -> TaskWsMessage {
    let today = planner.today();
    TaskWsMessage::Sync {
        today,
        tasks: retain_current(tasks.to_vec(), today),
        templates: templates.to_vec(),
    }
}

async fn handle_socket(mut socket: WebSocket, state: PlannerState) {
    let planner = Arc::clone(&state.planner);

    let scope = match planner.session().require() {
        Ok(scope) => scope.clone(),
        Err(e) => {
            warn!("Task WebSocket rejected: no session");
            let _ = send_json(&mut socket, &TaskWsMessage::Error { message: e.to_string() }).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    info!(scope = %scope, "Task WebSocket client connected");

    // Both streams yield the current set first, then a fresh set per change.
    // Dropping them at the end of this function releases the subscriptions.
    let mut task_updates = live_tasks(Arc::clone(planner.tasks_store()), scope.clone());
    let mut template_updates = live_templates(Arc::clone(planner.templates_store()), scope.clone());

    let mut tasks: Vec<TaskItem> = Vec::new();
    let mut templates: Vec<RecurringTemplate> = Vec::new();

    match task_updates.next().await {
        Some(Ok(current)) => tasks = current,
        Some(Err(e)) => warn!(error = %e, "Failed to load tasks for initial sync"),
        None => return,
    }
    match template_updates.next().await {
        Some(Ok(current)) => templates = current,
        Some(Err(e)) => warn!(error = %e, "Failed to load templates for initial sync"),
        None => return,
    }
    if !send_json(&mut socket, &sync_message(&planner, &tasks, &templates)).await {
        warn!("Failed to send initial task sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            update = task_updates.next() => {
                match update {
                    Some(Ok(current)) => tasks = current,
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to reload tasks");
                        continue;
                    }
                    None => {
                        debug!("Task change feed closed");
                        break;
                    }
                }
                if !send_json(&mut socket, &sync_message(&planner, &tasks, &templates)).await {
                    debug!("Task WS client disconnected during send");
                    break;
                }
            }

            update = template_updates.next() => {
                match update {
                    Some(Ok(current)) => templates = current,
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to reload templates");
                        continue;
                    }
                    None => {
                        debug!("Template change feed closed");
                        break;
                    }
                }
                if !send_json(&mut socket, &sync_message(&planner, &tasks, &templates)).await {
                    debug!("Task WS client disconnected during send");
                    break;
                }
            }

            // Receive actions from client
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(message) = handle_client_action(&text, &planner).await
                            && !send_json(&mut socket, &TaskWsMessage::Error { message }).await
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Task WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Task WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(scope = %scope, "Task WebSocket connection closed");
}

/// Apply one client action. Successful writes reach the client through the change
/// feeds; the returned message is sent back as an `error` frame.
async fn handle_client_action(text: &str, planner: &Planner) -> Result<(), String> {
    let action = serde_json::from_str::<TaskAction>(text).map_err(|e| {
        debug!(error = %e, text = text, "Unrecognized task WS message");
        format!("Unrecognized message: {e}")
    })?;

    let result = match action {
        TaskAction::CreateTask { draft } => planner.add_task(draft).await.map(|task| {
            info!(id = %task.id, title = %task.title, "Task created via WS");
        }),
        TaskAction::UpdateTask { id, patch } => planner.edit_task(&id, patch).await.map(|_| {
            info!(id = %id, "Task updated via WS");
        }),
        TaskAction::SetDone { id, done } => planner.set_done(&id, done).await.map(|_| {
            info!(id = %id, done, "Task completion set via WS");
        }),
        TaskAction::DeleteTask { id } => match planner.delete_task(&id).await {
            Ok(true) => {
                info!(id = %id, "Task deleted via WS");
                Ok(())
            }
            Ok(false) => Err(Error::Database(DatabaseError::NotFound {
                entity: "task".into(),
                id,
            })),
            Err(e) => Err(e),
        },
        TaskAction::CreateTemplate { template } => {
            planner.add_template(template).await.map(|template| {
                info!(id = %template.id, weekday = template.weekday, "Template created via WS");
            })
        }
        TaskAction::UpdateTemplate { id, patch } => {
            planner.edit_template(&id, patch).await.map(|_| {
                info!(id = %id, "Template updated via WS");
            })
        }
        TaskAction::DeleteTemplate { id } => match planner.delete_template(&id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Database(DatabaseError::NotFound {
                entity: "template".into(),
                id,
            })),
            Err(e) => Err(e),
        },
    };

    result.map_err(|e| {
        warn!(error = %e, "Task WS action failed");
        e.to_string()
    })
}
