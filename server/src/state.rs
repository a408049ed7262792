// server/src/state.rs

use common::ClientId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::config::{Mode, SchedulerConfig};
use crate::queue::TaskQueue;

/// Estado compartido entre el accept loop, las sesiones, el scheduler y la
/// API HTTP. Clonarlo es barato: todo va detrás de `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<TaskQueue>,
    pub mode: Mode,
    pub scheduler: SchedulerConfig,
    next_client_id: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(mode: Mode, scheduler: SchedulerConfig) -> Self {
        Self {
            queue: Arc::new(TaskQueue::new()),
            mode,
            scheduler,
            next_client_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_client_id(&self) -> ClientId {
        self.next_client_id.fetch_add(1, Ordering::Relaxed)
    }
}
