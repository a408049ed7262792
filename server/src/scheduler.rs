// server/src/scheduler.rs
//
// Bucle único de planificación: elegir, ejecutar fuera del lock, confirmar.

use chrono::Utc;
use common::{engine, TaskId, TaskKind, TASK_DONE_SENTINEL};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::connection::ConnectionHandle;
use crate::queue::{CommitOutcome, Task, TaskQueue};

/// Línea de progreso de un trabajo batch: `Demo i/N-1`.
pub fn batch_progress(iteration: i64, burst_total: i64) -> String {
    format!("Demo {}/{}\n", iteration, burst_total - 1)
}

pub struct Scheduler {
    queue: Arc<TaskQueue>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(queue: Arc<TaskQueue>, config: SchedulerConfig) -> Self {
        Self { queue, config }
    }

    pub async fn run(self) {
        info!(
            "[SCHEDULER] iniciado (Q1={}, Q2={}, delay={:?})",
            self.config.first_quantum, self.config.next_quantum, self.config.iteration_delay
        );
        loop {
            if !self.run_once().await {
                self.queue.wait_for_work(self.config.idle_poll).await;
            }
        }
    }

    /// Un despacho completo. Devuelve `false` si no había nada para correr.
    pub async fn run_once(&self) -> bool {
        let Some(task) = self.queue.select_next() else {
            return false;
        };

        // el cliente se desconectó antes de que remove_by_client la alcanzara
        if task.sink.is_closed() {
            if self.queue.remove_one(task.id).is_some() {
                info!(
                    "[SCHEDULER] Task ID {} descartada: cliente #{} desconectado",
                    task.id, task.client_id
                );
            }
            return true;
        }

        info!(
            "[SCHEDULER] Running Task ID {} (Client #{}, {})... Remaining: {}, Round: {}",
            task.id, task.client_id, task.kind, task.remaining, task.round_count
        );

        let iterations_run = match task.kind {
            TaskKind::Batch => self.run_batch(&task).await,
            TaskKind::Shell => {
                self.run_shell(&task).await;
                0
            }
        };

        self.commit(&task, iterations_run);
        true
    }

    async fn run_batch(&self, task: &Task) -> i64 {
        let quantum = i64::from(self.config.quantum_for(task.round_count));
        let budget = quantum
            .min(task.remaining)
            .min(task.burst_total - task.current_iteration)
            .max(0);

        for offset in 0..budget {
            let iteration = task.current_iteration + offset;
            deliver(&task.sink, task.id, batch_progress(iteration, task.burst_total));
            tokio::time::sleep(self.config.iteration_delay).await;
        }
        budget
    }

    async fn run_shell(&self, task: &Task) {
        let command = task.command.clone();
        let sink = task.sink.clone();
        let task_id = task.id;

        let result = tokio::task::spawn_blocking(move || {
            engine::execute_line(&command, |chunk| deliver(&sink, task_id, chunk))
        })
        .await;

        match result {
            Ok(Ok(report)) => debug!(
                "tarea {}: {} etapas lanzadas, {} bytes, éxito={}",
                task_id,
                report.spawned(),
                report.output_bytes,
                report.success()
            ),
            Ok(Err(e)) => warn!("[WARN] tarea {}: {}", task_id, e),
            Err(e) => error!("[ERROR] tarea {}: la ejecución falló: {}", task_id, e),
        }
    }

    fn commit(&self, task: &Task, iterations_run: i64) {
        match self.queue.commit(task.id, iterations_run) {
            CommitOutcome::Completed(done) => {
                let turnaround = Utc::now() - done.submitted_at;
                info!(
                    "[DONE] Task ID {} completed (Client #{}, rondas={}, turnaround={}ms)",
                    done.id,
                    done.client_id,
                    done.round_count,
                    turnaround.num_milliseconds()
                );
                deliver(&done.sink, done.id, TASK_DONE_SENTINEL);
            }
            CommitOutcome::Preempted { remaining } => {
                info!(
                    "[PREEMPT] Task ID {} vuelve a la cola. Remaining: {}",
                    task.id, remaining
                );
            }
            CommitOutcome::Vanished => {
                info!(
                    "[SCHEDULER] Task ID {} ya no está en la cola (cliente #{} desconectado)",
                    task.id, task.client_id
                );
            }
        }
    }
}

/// Un cliente que se fue no frena al scheduler: la salida se descarta.
fn deliver(sink: &ConnectionHandle, task_id: TaskId, bytes: impl Into<Vec<u8>>) {
    if let Err(e) = sink.send(bytes) {
        debug!("salida de la tarea {} descartada: {}", task_id, e);
    }
}
