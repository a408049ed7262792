use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{engine, protocol::DEFAULT_PORT, Request, TaskInfo};
use reqwest::Client;
use std::io::{self, BufRead, Write};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::session::RemoteSession;

const PROMPT: &str = "$ ";

#[derive(Parser, Debug)]
#[command(name = "client")]
#[command(about = "Cliente de la shell remota")]
pub struct Cli {
    /// Dirección TCP del servidor
    #[arg(
        long,
        env = "SERVER_ADDR",
        default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"),
        global = true
    )]
    pub addr: String,

    /// El servidor corre en modo directo (respuestas sin sentinel)
    #[arg(long, global = true)]
    pub direct: bool,

    /// URL base de la API de estado
    #[arg(
        long,
        env = "STATUS_URL",
        default_value = "http://127.0.0.1:8081",
        global = true
    )]
    pub status_url: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Prompt interactivo contra el servidor (por defecto)
    Shell,
    /// Manda un solo comando, muestra la salida y sale
    Run {
        #[arg(value_name = "COMANDO", required = true, trailing_var_arg = true)]
        words: Vec<String>,
    },
    /// Prompt local: ejecuta los pipelines en esta máquina, sin servidor
    Local,
    /// Muestra la cola de tareas del servidor
    Tasks,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Shell) {
        Commands::Shell => interactive(&cli.addr, cli.direct).await,
        Commands::Run { words } => {
            let mut session = RemoteSession::connect(&cli.addr, cli.direct).await?;
            session.execute(&words.join(" "), &mut io::stdout()).await?;
            session.close().await
        }
        Commands::Local => tokio::task::spawn_blocking(local_repl)
            .await
            .context("el prompt local terminó de forma inesperada")?,
        Commands::Tasks => list_tasks(&cli.status_url).await,
    }
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(PROMPT.as_bytes())?;
    stdout.flush()
}

async fn interactive(addr: &str, direct: bool) -> Result<()> {
    let mut session = RemoteSession::connect(addr, direct).await?;
    println!("Conectado a {addr}. Escribí `exit` para salir.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        // el servidor ignora las líneas vacías: no hay respuesta que esperar
        match Request::parse(&line) {
            Ok(Request::Empty) => continue,
            Ok(Request::Exit) => break,
            _ => {}
        }

        session.execute(line.trim(), &mut io::stdout()).await?;
    }

    session.close().await
}

fn local_repl() -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    prompt()?;
    for line in stdin.lock().lines() {
        let line = line?;
        match Request::parse(&line) {
            Ok(Request::Empty) => {}
            Ok(Request::Exit) => break,
            _ => {
                // los errores ya salieron por la captura; el prompt sigue
                let _ = engine::execute_line(&line, |chunk| {
                    let _ = stdout.write_all(chunk);
                    let _ = stdout.flush();
                });
            }
        }
        prompt()?;
    }

    Ok(())
}

async fn list_tasks(status_url: &str) -> Result<()> {
    let url = format!("{}/api/v1/tasks", status_url.trim_end_matches('/'));
    let resp = Client::new().get(&url).send().await?;

    if !resp.status().is_success() {
        println!("Error consultando /api/v1/tasks (status {})", resp.status());
        return Ok(());
    }

    let tasks: Vec<TaskInfo> = resp.json().await?;
    if tasks.is_empty() {
        println!("No hay tareas en la cola.");
        return Ok(());
    }

    for t in tasks {
        println!("Tarea {} ({})", t.id, t.kind);
        println!("  cliente     : #{}", t.client_id);
        println!("  comando     : {}", t.command);
        if t.burst_total >= 0 {
            println!(
                "  progreso    : {}/{} (faltan {})",
                t.current_iteration, t.burst_total, t.remaining
            );
        }
        println!("  rondas      : {}", t.round_count);
        println!("  encolada    : {}", t.submitted_at);
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sin_subcomando_es_shell() {
        let cli = Cli::try_parse_from(["client"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.addr, format!("127.0.0.1:{DEFAULT_PORT}"));
        assert!(!cli.direct);
    }

    #[test]
    fn run_junta_las_palabras() {
        let cli = Cli::try_parse_from(["client", "run", "ls", "-l", "|", "wc"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Run {
                words: vec!["ls".into(), "-l".into(), "|".into(), "wc".into()]
            })
        );
    }

    #[test]
    fn flags_globales_despues_del_subcomando() {
        let cli =
            Cli::try_parse_from(["client", "tasks", "--status-url", "http://srv:9000"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Tasks));
        assert_eq!(cli.status_url, "http://srv:9000");
    }

    #[test]
    fn run_sin_comando_falla() {
        assert!(Cli::try_parse_from(["client", "run"]).is_err());
    }
}
