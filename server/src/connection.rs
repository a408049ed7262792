// server/src/connection.rs
//
// Sesiones TCP: una tarea de lectura por cliente y una tarea de escritura
// que es la única dueña del socket de salida.

use common::{
    engine, protocol::split_commands, ClientId, ExecError, Request, MAX_COMMAND_LEN,
    TASK_DONE_SENTINEL,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::{mpsc, oneshot},
};
use tracing::{debug, info, warn};

use crate::config::Mode;
use crate::queue::Task;
use crate::state::AppState;

/// Extremo de escritura hacia un cliente. Lo comparten la sesión y todas las
/// tareas encoladas por ese cliente.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    client_id: ClientId,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ConnectionHandle {
    pub fn new(client_id: ClientId) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { client_id, tx }, rx)
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Encola bytes para el cliente. Falla si la conexión ya se cerró.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> Result<(), ExecError> {
        self.tx
            .send(bytes.into())
            .map_err(|_| ExecError::Connection(format!("cliente #{}", self.client_id)))
    }

    /// El cliente ya se fue: nada de lo que se mande va a llegar.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Accept loop. Un error de accept no tumba el servidor.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("[WARN] accept falló: {}", e);
                continue;
            }
        };

        let client_id = state.next_client_id();
        info!("[INFO] cliente #{} conectado desde {}", client_id, addr);

        let state = state.clone();
        tokio::spawn(async move {
            handle_client(stream, client_id, state).await;
        });
    }
}

pub async fn handle_client(stream: TcpStream, client_id: ClientId, state: AppState) {
    let (mut reader, writer) = stream.into_split();
    let (sink, rx) = ConnectionHandle::new(client_id);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let writer_task = tokio::spawn(write_loop(client_id, writer, rx, shutdown_rx));

    let mut buf = vec![0u8; MAX_COMMAND_LEN];

    'session: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                info!("[INFO] cliente #{} desconectado", client_id);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("[WARN] error leyendo del cliente #{}: {}", client_id, e);
                break;
            }
        };

        for line in split_commands(&buf[..n]) {
            info!("[RECEIVED] cliente #{}: \"{}\"", client_id, line);
            if !handle_line(&line, &sink, &state).await {
                info!("[INFO] cliente #{} cerró la sesión con exit", client_id);
                break 'session;
            }
        }
    }

    let removed = state.queue.remove_by_client(client_id);
    if removed > 0 {
        info!(
            "[QUEUE] {} tareas del cliente #{} descartadas",
            removed, client_id
        );
    }

    // lo ya encolado se escribe; lo que llegue después se descarta
    drop(sink);
    let _ = shutdown_tx.send(());
    let _ = writer_task.await;
}

/// Atiende un comando. Devuelve `false` cuando la sesión debe terminar.
async fn handle_line(line: &str, sink: &ConnectionHandle, state: &AppState) -> bool {
    match (Request::parse(line), state.mode) {
        (Ok(Request::Empty), _) => {}
        (Ok(Request::Exit), _) => return false,
        // en modo directo todo pasa por el motor, `./demo N` incluido
        (_, Mode::Direct) => {
            let reply = run_direct(line).await;
            reply_to(sink, reply);
        }
        (Ok(Request::Batch { burst }), Mode::Scheduled) => {
            state.queue.submit(Task::batch(line, burst, sink.clone()));
        }
        (Ok(Request::Shell), Mode::Scheduled) => {
            state.queue.submit(Task::shell(line, sink.clone()));
        }
        (Err(usage), Mode::Scheduled) => {
            reply_to(sink, format!("{usage}\n{TASK_DONE_SENTINEL}"));
        }
    }

    true
}

/// Modo directo: ejecuta en el momento y arma una única respuesta.
async fn run_direct(line: &str) -> Vec<u8> {
    let command = line.to_string();
    let (output, result) =
        match tokio::task::spawn_blocking(move || engine::capture_line(&command)).await {
            Ok(captured) => captured,
            Err(e) => {
                warn!("[WARN] ejecución de \"{}\" abortada: {}", line, e);
                return not_found_reply(line);
            }
        };

    if !output.is_empty() {
        return output;
    }

    match result {
        Ok(report) if report.success() => b"\n".to_vec(),
        _ => not_found_reply(line),
    }
}

fn not_found_reply(line: &str) -> Vec<u8> {
    format!("[ERROR] Command not found: \"{line}\"\n").into_bytes()
}

fn reply_to(sink: &ConnectionHandle, bytes: impl Into<Vec<u8>>) {
    if let Err(e) = sink.send(bytes) {
        debug!("respuesta descartada: {}", e);
    }
}

async fn write_loop(
    client_id: ClientId,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            chunk = rx.recv() => {
                let Some(chunk) = chunk else { break };
                if let Err(e) = writer.write_all(&chunk).await {
                    warn!("[WARN] no se pudo escribir al cliente #{}: {}", client_id, e);
                    return;
                }
            }
            _ = &mut shutdown => {
                rx.close();
                while let Ok(chunk) = rx.try_recv() {
                    if writer.write_all(&chunk).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}
