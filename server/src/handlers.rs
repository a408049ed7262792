// server/src/handlers.rs
//
// API HTTP de sólo lectura para mirar la cola desde afuera.

use axum::{extract::State, routing::get, Json, Router};
use common::TaskInfo;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/tasks", get(list_tasks))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Foto de la cola en orden de llegada
async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskInfo>> {
    Json(state.queue.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Mode, SchedulerConfig};
    use crate::connection::ConnectionHandle;
    use crate::queue::Task;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use common::TaskKind;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(Mode::Scheduled, SchedulerConfig::default())
    }

    #[tokio::test]
    async fn health_responde_ok() {
        let app = build_router(state());
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn lista_tareas_en_orden_de_llegada() {
        let st = state();
        let (sink, _rx) = ConnectionHandle::new(7);
        st.queue.submit(Task::batch("demo 5", 5, sink.clone()));
        st.queue.submit(Task::shell("ls -l", sink));

        let resp = build_router(st)
            .oneshot(Request::get("/api/v1/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let tasks: Vec<TaskInfo> = serde_json::from_slice(&body).unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].kind, TaskKind::Batch);
        assert_eq!(tasks[0].remaining, 5);
        assert_eq!(tasks[1].kind, TaskKind::Shell);
        assert_eq!(tasks[1].command, "ls -l");
        assert!(tasks.iter().all(|t| t.client_id == 7));
    }
}
