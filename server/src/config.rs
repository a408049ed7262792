use clap::{Parser, ValueEnum};
use common::protocol::DEFAULT_PORT;
use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Cómo se atienden los comandos de los clientes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Todo pasa por la cola y el scheduler; las respuestas terminan con el sentinel.
    Scheduled,
    /// Cada comando se ejecuta en el momento y se responde con un único trozo.
    Direct,
}

/// Configuración del servidor. Cada opción se puede pasar por flag o por
/// variable de entorno (útil en Docker).
#[derive(Parser, Debug, Clone)]
#[command(name = "server")]
#[command(about = "Servidor de ejecución remota con scheduler de dos niveles")]
pub struct ServerConfig {
    /// Dirección TCP donde escuchan los clientes
    #[arg(
        long,
        env = "SERVER_BIND",
        default_value_t = SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
    )]
    pub bind: SocketAddr,

    #[arg(long, env = "SERVER_MODE", value_enum, default_value_t = Mode::Scheduled)]
    pub mode: Mode,

    /// Iteraciones de la primera ronda de una tarea (Q1)
    #[arg(
        long,
        env = "FIRST_ROUND_QUANTUM",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub first_quantum: u32,

    /// Iteraciones de las rondas siguientes (Q2)
    #[arg(
        long,
        env = "NEXT_ROUND_QUANTUM",
        default_value_t = 7,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub next_quantum: u32,

    /// Pausa entre iteraciones de un trabajo batch
    #[arg(long, env = "ITERATION_DELAY_MS", default_value_t = 1000)]
    pub iteration_delay_ms: u64,

    /// Espera máxima del scheduler con la cola vacía antes de volver a mirar
    #[arg(long, env = "IDLE_POLL_MS", default_value_t = 100)]
    pub idle_poll_ms: u64,

    /// Dirección de la API HTTP de estado
    #[arg(long, env = "STATUS_BIND", default_value = "0.0.0.0:8081")]
    pub http_bind: SocketAddr,

    /// No levantar la API HTTP de estado
    #[arg(long)]
    pub no_http: bool,
}

impl ServerConfig {
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            first_quantum: self.first_quantum,
            next_quantum: self.next_quantum,
            iteration_delay: Duration::from_millis(self.iteration_delay_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
        }
    }
}

/// Parámetros de la política de planificación.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub first_quantum: u32,
    pub next_quantum: u32,
    pub iteration_delay: Duration,
    /// Latencia máxima de despertar con la cola vacía.
    pub idle_poll: Duration,
}

impl SchedulerConfig {
    /// Quantum de dos niveles: corto la primera vez, largo después.
    pub fn quantum_for(&self, round_count: u32) -> u32 {
        if round_count == 0 {
            self.first_quantum
        } else {
            self.next_quantum
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            first_quantum: 3,
            next_quantum: 7,
            iteration_delay: Duration::from_secs(1),
            idle_poll: Duration::from_millis(100),
        }
    }
}
