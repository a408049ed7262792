use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use common::{ClientId, TaskId, TaskInfo, TaskKind, UNBOUNDED_BURST};
use tokio::sync::Notify;
use tracing::info;

use crate::connection::ConnectionHandle;

/// Una unidad de trabajo planificable. Sólo vive dentro de la cola.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub client_id: ClientId,
    pub kind: TaskKind,
    /// Iteraciones declaradas (batch) o `UNBOUNDED_BURST` (shell).
    pub burst_total: i64,
    /// Iteraciones pendientes; siempre >= 0 y 0 en shell.
    pub remaining: i64,
    pub round_count: u32,
    /// Próxima iteración a emitir (batch).
    pub current_iteration: i64,
    pub command: String,
    pub sink: ConnectionHandle,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    pub fn batch(command: &str, burst: u32, sink: ConnectionHandle) -> Self {
        Self::new(TaskKind::Batch, i64::from(burst), command, sink)
    }

    pub fn shell(command: &str, sink: ConnectionHandle) -> Self {
        Self::new(TaskKind::Shell, UNBOUNDED_BURST, command, sink)
    }

    fn new(kind: TaskKind, burst_total: i64, command: &str, sink: ConnectionHandle) -> Self {
        Self {
            // el id real lo asigna la cola en submit
            id: 0,
            client_id: sink.client_id(),
            kind,
            burst_total,
            remaining: burst_total.max(0),
            round_count: 0,
            current_iteration: 0,
            command: command.to_string(),
            sink,
            submitted_at: Utc::now(),
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            client_id: self.client_id,
            kind: self.kind,
            burst_total: self.burst_total,
            remaining: self.remaining,
            round_count: self.round_count,
            current_iteration: self.current_iteration,
            command: self.command.clone(),
            submitted_at: self.submitted_at,
        }
    }

    fn is_complete(&self) -> bool {
        self.kind == TaskKind::Shell || self.remaining <= 0
    }
}

/// Qué pasó al confirmar un despacho.
#[derive(Debug)]
pub enum CommitOutcome {
    /// La tarea terminó y ya salió de la cola.
    Completed(Task),
    /// Sigue en la cola con menos trabajo pendiente.
    Preempted { remaining: i64 },
    /// El cliente se desconectó mientras corría y la tarea ya no está.
    Vanished,
}

#[derive(Debug)]
struct QueueInner {
    // ordenado por id = orden de llegada; un id viejo nunca apunta a otra tarea
    tasks: BTreeMap<TaskId, Task>,
    next_id: TaskId,
}

/// Cola compartida de tareas. Todas las operaciones toman el lock sólo
/// mientras tocan el mapa: nada de I/O ni esperas con el lock tomado.
#[derive(Debug)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    wakeup: Notify,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: BTreeMap::new(),
                next_id: 1,
            }),
            wakeup: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // una tarea que entró en pánico no invalida el mapa
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Encola al final y despierta al scheduler.
    pub fn submit(&self, mut task: Task) -> TaskId {
        let (client_id, kind, burst) = (task.client_id, task.kind, task.burst_total);
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            task.id = id;
            inner.tasks.insert(id, task);
            id
        };
        self.wakeup.notify_one();

        info!(
            "[QUEUE] tarea {} agregada (cliente #{}, {}, burst={})",
            id, client_id, kind, burst
        );
        id
    }

    /// Saca todas las tareas de un cliente (se desconectó).
    pub fn remove_by_client(&self, client_id: ClientId) -> usize {
        let mut inner = self.lock();
        let before = inner.tasks.len();
        inner.tasks.retain(|_, t| t.client_id != client_id);
        before - inner.tasks.len()
    }

    pub fn remove_one(&self, id: TaskId) -> Option<Task> {
        self.lock().tasks.remove(&id)
    }

    /// Elige la próxima tarea y devuelve una copia; la original sigue en la
    /// cola hasta que `commit` la saque.
    pub fn select_next(&self) -> Option<Task> {
        let inner = self.lock();
        select_candidate(inner.tasks.values()).cloned()
    }

    /// Confirma un despacho: descuenta lo ejecutado, suma una ronda y saca la
    /// tarea si terminó. Todo bajo una sola toma del lock.
    pub fn commit(&self, id: TaskId, iterations_run: i64) -> CommitOutcome {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(&id) else {
            return CommitOutcome::Vanished;
        };

        if task.kind == TaskKind::Batch {
            task.remaining = (task.remaining - iterations_run).max(0);
            task.current_iteration += iterations_run;
        }
        task.round_count += 1;

        if task.is_complete() {
            match inner.tasks.remove(&id) {
                Some(task) => CommitOutcome::Completed(task),
                None => CommitOutcome::Vanished,
            }
        } else {
            CommitOutcome::Preempted {
                remaining: task.remaining,
            }
        }
    }

    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.lock().tasks.values().map(Task::info).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Espera a que llegue trabajo o a que pase `max_wait`, lo primero.
    pub async fn wait_for_work(&self, max_wait: Duration) {
        let notified = self.wakeup.notified();
        if !self.is_empty() {
            return;
        }
        let _ = tokio::time::timeout(max_wait, notified).await;
    }
}

/// Política de selección:
/// 1. cualquier shell le gana a cualquier batch;
/// 2. dentro de cada clase gana el menor `remaining`;
/// 3. empates: el que llegó primero (recorrido estable, gana el primero).
pub fn select_candidate<'a, I>(tasks: I) -> Option<&'a Task>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut selected: Option<&Task> = None;
    for task in tasks {
        let better = match selected {
            None => true,
            Some(current) => match (task.kind, current.kind) {
                (TaskKind::Shell, TaskKind::Batch) => true,
                (TaskKind::Batch, TaskKind::Shell) => false,
                _ => task.remaining < current.remaining,
            },
        };
        if better {
            selected = Some(task);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    fn handle(client_id: ClientId) -> ConnectionHandle {
        ConnectionHandle::new(client_id).0
    }

    #[test]
    fn submit_asigna_ids_crecientes_desde_1() {
        let q = TaskQueue::new();
        assert_eq!(q.submit(Task::batch("demo 3", 3, handle(1))), 1);
        assert_eq!(q.submit(Task::shell("ls", handle(1))), 2);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn select_vacia_devuelve_none() {
        assert!(TaskQueue::new().select_next().is_none());
    }

    #[test]
    fn shell_siempre_le_gana_a_batch() {
        let q = TaskQueue::new();
        q.submit(Task::batch("demo 1", 1, handle(1)));
        q.submit(Task::batch("demo 9", 9, handle(2)));
        let shell_id = q.submit(Task::shell("ls", handle(3)));
        q.submit(Task::batch("demo 2", 2, handle(4)));

        assert_eq!(q.select_next().unwrap().id, shell_id);
    }

    #[test]
    fn con_algun_shell_nunca_se_elige_batch() {
        // distintas mezclas: siempre que haya un shell, sale un shell
        for shell_pos in 0..5 {
            let q = TaskQueue::new();
            for i in 0..5u32 {
                if i == shell_pos {
                    q.submit(Task::shell("echo x", handle(1)));
                } else {
                    q.submit(Task::batch("demo", i + 1, handle(1)));
                }
            }
            assert_eq!(q.select_next().unwrap().kind, TaskKind::Shell);
        }
    }

    #[test]
    fn entre_batch_gana_el_menor_remaining() {
        let q = TaskQueue::new();
        q.submit(Task::batch("demo 8", 8, handle(1)));
        let corto = q.submit(Task::batch("demo 2", 2, handle(2)));
        q.submit(Task::batch("demo 5", 5, handle(3)));

        assert_eq!(q.select_next().unwrap().id, corto);
    }

    #[test]
    fn empates_por_orden_de_llegada() {
        let q = TaskQueue::new();
        let primero = q.submit(Task::batch("demo 4", 4, handle(1)));
        q.submit(Task::batch("demo 4", 4, handle(2)));
        assert_eq!(q.select_next().unwrap().id, primero);

        let q = TaskQueue::new();
        let shell1 = q.submit(Task::shell("a", handle(1)));
        q.submit(Task::shell("b", handle(2)));
        assert_eq!(q.select_next().unwrap().id, shell1);
    }

    #[test]
    fn commit_descuenta_y_preempta() {
        let q = TaskQueue::new();
        let id = q.submit(Task::batch("demo 10", 10, handle(1)));

        match q.commit(id, 3) {
            CommitOutcome::Preempted { remaining } => assert_eq!(remaining, 7),
            other => panic!("esperaba Preempted, vino {:?}", other),
        }

        let t = q.select_next().unwrap();
        assert_eq!(t.round_count, 1);
        assert_eq!(t.current_iteration, 3);
    }

    #[test]
    fn commit_completa_y_saca_de_la_cola() {
        let q = TaskQueue::new();
        let id = q.submit(Task::batch("demo 2", 2, handle(1)));

        assert!(matches!(q.commit(id, 2), CommitOutcome::Completed(t) if t.remaining == 0));
        assert!(q.is_empty());
    }

    #[test]
    fn shell_se_completa_en_un_despacho() {
        let q = TaskQueue::new();
        let id = q.submit(Task::shell("ls", handle(1)));
        match q.commit(id, 0) {
            CommitOutcome::Completed(t) => {
                assert_eq!(t.round_count, 1);
                assert_eq!(t.burst_total, UNBOUNDED_BURST);
                assert_eq!(t.remaining, 0);
            }
            other => panic!("esperaba Completed, vino {:?}", other),
        }
    }

    #[test]
    fn remaining_nunca_es_negativo() {
        let q = TaskQueue::new();
        let id = q.submit(Task::batch("demo 2", 2, handle(1)));
        assert!(matches!(q.commit(id, 5), CommitOutcome::Completed(t) if t.remaining == 0));
    }

    #[test]
    fn commit_de_tarea_borrada_es_vanished() {
        let q = TaskQueue::new();
        let id = q.submit(Task::batch("demo 5", 5, handle(1)));
        assert_eq!(q.remove_by_client(1), 1);
        assert!(matches!(q.commit(id, 3), CommitOutcome::Vanished));
    }

    #[test]
    fn remove_by_client_solo_borra_las_suyas() {
        let q = TaskQueue::new();
        q.submit(Task::batch("demo 1", 1, handle(1)));
        let ajena = q.submit(Task::shell("ls", handle(2)));
        q.submit(Task::shell("pwd", handle(1)));

        assert_eq!(q.remove_by_client(1), 2);
        let quedan: Vec<TaskId> = q.snapshot().iter().map(|t| t.id).collect();
        assert_eq!(quedan, vec![ajena]);
    }

    #[test]
    fn remove_one_saca_una_tarea() {
        let q = TaskQueue::new();
        let a = q.submit(Task::shell("a", handle(1)));
        let b = q.submit(Task::shell("b", handle(1)));

        assert_eq!(q.remove_one(a).map(|t| t.command), Some("a".to_string()));
        assert!(q.remove_one(a).is_none());
        assert_eq!(q.select_next().unwrap().id, b);
    }

    #[test]
    fn submits_concurrentes_dan_ids_contiguos_sin_perdidas() {
        let q = Arc::new(TaskQueue::new());
        let clients = 16;
        let per_client = 25;

        let joins: Vec<_> = (0..clients)
            .map(|c| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    (0..per_client)
                        .map(|_| q.submit(Task::shell("true", handle(c))))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: Vec<TaskId> = joins
            .into_iter()
            .flat_map(|j| j.join().unwrap())
            .collect();
        let unique: HashSet<TaskId> = ids.iter().copied().collect();
        let total = clients * per_client;

        assert_eq!(ids.len() as u64, total);
        assert_eq!(unique.len() as u64, total);
        assert_eq!(unique.iter().min(), Some(&1));
        assert_eq!(unique.iter().max(), Some(&total));
        assert_eq!(q.len() as u64, total);
    }

    #[tokio::test]
    async fn wait_for_work_despierta_al_encolar() {
        let q = Arc::new(TaskQueue::new());
        let q2 = Arc::clone(&q);

        let waiter = tokio::spawn(async move {
            let start = std::time::Instant::now();
            q2.wait_for_work(Duration::from_secs(10)).await;
            start.elapsed()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.submit(Task::shell("ls", handle(1)));

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5), "tardó {:?}", waited);
    }

    #[tokio::test]
    async fn wait_for_work_respeta_latencia_maxima() {
        let q = TaskQueue::new();
        let start = std::time::Instant::now();
        q.wait_for_work(Duration::from_millis(30)).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
