use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = u64;
pub type ClientId = u64;

/// `burst_total` de los comandos de shell: corren hasta terminar, sin quantum.
pub const UNBOUNDED_BURST: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Trabajo simulado `demo N`: una línea de progreso por iteración.
    Batch,
    /// Línea de shell (comando, redirecciones, pipes).
    Shell,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Batch => write!(f, "batch"),
            TaskKind::Shell => write!(f, "shell"),
        }
    }
}

/// Vista de una tarea en cola, tal como la expone la API de estado.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub client_id: ClientId,
    pub kind: TaskKind,
    pub burst_total: i64,
    pub remaining: i64,
    pub round_count: u32,
    pub current_iteration: i64,
    pub command: String,
    pub submitted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_se_serializa_en_mayusculas() {
        assert_eq!(serde_json::to_string(&TaskKind::Batch).unwrap(), "\"BATCH\"");
        let kind: TaskKind = serde_json::from_str("\"SHELL\"").unwrap();
        assert_eq!(kind, TaskKind::Shell);
    }

    #[test]
    fn task_info_ida_y_vuelta_json() {
        let info = TaskInfo {
            id: 7,
            client_id: 2,
            kind: TaskKind::Batch,
            burst_total: 5,
            remaining: 2,
            round_count: 1,
            current_iteration: 3,
            command: "demo 5".to_string(),
            submitted_at: Utc::now(),
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["kind"], "BATCH");
        assert_eq!(json["remaining"], 2);

        let back: TaskInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.command, "demo 5");
    }
}
