use std::{
    fs::{File, OpenOptions},
    io::{self, PipeReader, PipeWriter, Read, Write},
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc,
    thread,
};

use tracing::{debug, warn};

use crate::command::{Pipeline, Redirect, Stage};
use crate::error::ExecError;

const READ_CHUNK: usize = 4096;

/* =========================
   Resultado de la ejecución
   ========================= */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Exited(i32),
    /// El proceso terminó por una señal.
    Signaled,
    /// La etapa nunca llegó a ejecutar su programa (sintaxis, archivo o
    /// programa inexistente). `code` es el código estilo shell.
    Aborted { code: i32, reason: String },
}

impl StageStatus {
    pub fn code(&self) -> Option<i32> {
        match self {
            StageStatus::Exited(code) => Some(*code),
            StageStatus::Signaled => None,
            StageStatus::Aborted { code, .. } => Some(*code),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, StageStatus::Exited(0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// `None` si la etapa no pudo ni clasificarse.
    pub program: Option<String>,
    pub status: StageStatus,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub stages: Vec<StageOutcome>,
    /// Bytes que pasaron por el canal lateral hacia el llamador.
    pub output_bytes: usize,
}

impl PipelineReport {
    /// Igual que una shell: el estado del pipeline es el de la última etapa.
    pub fn success(&self) -> bool {
        self.stages
            .last()
            .map(|s| s.status.success())
            .unwrap_or(false)
    }

    /// Cantidad de procesos que llegaron a lanzarse.
    pub fn spawned(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| !matches!(s.status, StageStatus::Aborted { .. }))
            .count()
    }
}

/* =========================
   Cableado declarativo de stdio
   ========================= */

/// De dónde lee stdin una etapa.
enum Source {
    Null,
    Pipe(PipeReader),
    File(File),
}

impl From<Source> for Stdio {
    fn from(source: Source) -> Self {
        match source {
            Source::Null => Stdio::null(),
            Source::Pipe(reader) => Stdio::from(reader),
            Source::File(file) => Stdio::from(file),
        }
    }
}

/// A dónde escriben stdout/stderr de una etapa.
enum Sink {
    Pipe(PipeWriter),
    File(File),
}

impl Sink {
    fn try_clone(&self) -> io::Result<Sink> {
        match self {
            Sink::Pipe(writer) => writer.try_clone().map(Sink::Pipe),
            Sink::File(file) => file.try_clone().map(Sink::File),
        }
    }

    /// Escribe un mensaje de error de la etapa; si el destino ya no existe
    /// no hay a quién avisar.
    fn report(&mut self, message: &str) {
        if let Err(e) = writeln!(self, "{message}") {
            debug!("no se pudo reportar error de etapa: {e}");
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Pipe(writer) => writer.write(buf),
            Sink::File(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Pipe(writer) => writer.flush(),
            Sink::File(file) => file.flush(),
        }
    }
}

impl From<Sink> for Stdio {
    fn from(sink: Sink) -> Self {
        match sink {
            Sink::Pipe(writer) => Stdio::from(writer),
            Sink::File(file) => Stdio::from(file),
        }
    }
}

/// Los tres flujos estándar de una etapa.
struct Wiring {
    stdin: Source,
    stdout: Sink,
    stderr: Sink,
}

/// Una etapa que se abortó antes de ejecutar: el error y el flujo donde
/// hay que reportarlo.
struct StageFailure {
    error: ExecError,
    code: i32,
    stderr: Option<Sink>,
}

impl StageFailure {
    fn into_outcome(self, program: Option<String>) -> StageOutcome {
        let reason = self.error.to_string();
        if let Some(mut stderr) = self.stderr {
            stderr.report(&reason);
        }
        StageOutcome {
            program,
            status: StageStatus::Aborted {
                code: self.code,
                reason,
            },
        }
    }
}

/// `>` y `2>` siempre crean y truncan: nunca append.
fn create_truncate(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

/// Aplica las redirecciones de izquierda a derecha sobre el cableado por
/// defecto. Una redirección posterior sobre el mismo flujo pisa a la anterior
/// y `2>&1` se resuelve contra el stdout final de la etapa.
fn apply_redirects(redirects: &[Redirect], mut wiring: Wiring) -> Result<Wiring, StageFailure> {
    let mut merge_err = false;

    for redirect in redirects {
        let opened = match redirect {
            Redirect::Input(path) => File::open(path)
                .map(|f| wiring.stdin = Source::File(f))
                .map_err(|e| (format!("Cannot open input file '{}'", path.display()), e)),
            Redirect::Output(path) => create_truncate(path)
                .map(|f| wiring.stdout = Sink::File(f))
                .map_err(|e| (format!("Cannot open output file '{}'", path.display()), e)),
            Redirect::Error(path) => create_truncate(path)
                .map(|f| {
                    wiring.stderr = Sink::File(f);
                    merge_err = false;
                })
                .map_err(|e| (format!("Cannot open error file '{}'", path.display()), e)),
            Redirect::ErrorToOutput => {
                merge_err = true;
                Ok(())
            }
        };

        if let Err((context, source)) = opened {
            let stderr = if merge_err { wiring.stdout } else { wiring.stderr };
            return Err(StageFailure {
                error: ExecError::resource(context, source),
                code: 1,
                stderr: Some(stderr),
            });
        }
    }

    if merge_err {
        match wiring.stdout.try_clone() {
            Ok(sink) => wiring.stderr = sink,
            Err(e) => {
                return Err(StageFailure {
                    error: ExecError::resource("2>&1", e),
                    code: 1,
                    stderr: Some(wiring.stderr),
                })
            }
        }
    }

    Ok(wiring)
}

/// Lanza el programa de la etapa con su cableado ya resuelto.
fn spawn_stage(stage: &Stage, wiring: Wiring) -> Result<Child, StageFailure> {
    let wiring = apply_redirects(&stage.redirects, wiring)?;
    // copia para poder reportar "command not found" en el stderr de la etapa
    let stderr_copy = wiring.stderr.try_clone().ok();

    // el Command se suelta al salir del bloque, cerrando las copias del padre
    let spawned = {
        let mut cmd = Command::new(stage.program());
        cmd.args(stage.args())
            .stdin(Stdio::from(wiring.stdin))
            .stdout(Stdio::from(wiring.stdout))
            .stderr(Stdio::from(wiring.stderr));
        cmd.spawn()
    };

    spawned.map_err(|e| {
        let (error, code) = if e.kind() == io::ErrorKind::NotFound {
            (
                ExecError::ProgramNotFound {
                    program: stage.program().to_string(),
                },
                127,
            )
        } else {
            (ExecError::resource(stage.program(), e), 126)
        };
        StageFailure {
            error,
            code,
            stderr: stderr_copy,
        }
    })
}

fn status_from(status: ExitStatus) -> StageStatus {
    match status.code() {
        Some(code) => StageStatus::Exited(code),
        None => StageStatus::Signaled,
    }
}

enum Launched {
    Running { program: String, child: Child },
    Finished(StageOutcome),
}

/* =========================
   Orquestador
   ========================= */

/// Lee el canal lateral hasta EOF y pasa cada trozo al orquestador.
fn drain_capture(mut reader: PipeReader, chunks: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => {
                if chunks.send(buf[..read].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("error leyendo salida del pipeline: {e}");
                break;
            }
        }
    }
}

/// Ejecuta un pipeline ya clasificado.
///
/// - Crea N-1 pipes para N etapas y un canal lateral donde caen el stdout de
///   la última etapa y el stderr de todas (salvo los redirigidos).
/// - Todos los descriptores son close-on-exec: cada hijo sólo recibe los que
///   se le duplican sobre 0/1/2, así el EOF se propaga por el pipeline.
/// - El fallo de una etapa no aborta a las demás.
/// - Un hilo vacía el canal lateral desde antes del primer spawn; `on_output`
///   recibe los bytes en este hilo, en orden.
///
/// Sólo devuelve `Err` si no se pudieron crear los pipes o el hilo de captura,
/// antes de lanzar nada.
pub fn run_pipeline<F>(pipeline: &Pipeline, mut on_output: F) -> Result<PipelineReport, ExecError>
where
    F: FnMut(&[u8]),
{
    let n = pipeline.len();
    let (capture_rx, capture_tx) =
        io::pipe().map_err(|e| ExecError::resource("pipe failed", e))?;

    // stdin/stdout por defecto de cada etapa
    let mut stdins = Vec::with_capacity(n);
    let mut stdouts = Vec::with_capacity(n);
    stdins.push(Source::Null);
    for _ in 1..n {
        let (reader, writer) = io::pipe().map_err(|e| ExecError::resource("pipe failed", e))?;
        stdouts.push(Sink::Pipe(writer));
        stdins.push(Source::Pipe(reader));
    }
    stdouts.push(Sink::Pipe(
        capture_tx
            .try_clone()
            .map_err(|e| ExecError::resource("pipe failed", e))?,
    ));

    // el canal lateral se vacía antes de lanzar la primera etapa: un reporte
    // de error escrito acá nunca espera a que un hijo libere el pipe
    let (chunks_tx, chunks_rx) = mpsc::channel();
    let drain = thread::Builder::new()
        .name("pipeline-capture".into())
        .spawn(move || drain_capture(capture_rx, chunks_tx))
        .map_err(|e| ExecError::resource("capture thread failed", e))?;

    let mut launched = Vec::with_capacity(n);
    for (i, ((plan, stdin), stdout)) in pipeline
        .stages
        .iter()
        .zip(stdins)
        .zip(stdouts)
        .enumerate()
    {
        let stderr = match capture_tx.try_clone() {
            Ok(writer) => Sink::Pipe(writer),
            Err(e) => {
                let failure = StageFailure {
                    error: ExecError::resource("pipe failed", e),
                    code: 1,
                    stderr: None,
                };
                let program = plan.as_ref().ok().map(|s| s.program().to_string());
                launched.push(Launched::Finished(failure.into_outcome(program)));
                continue;
            }
        };
        let wiring = Wiring {
            stdin,
            stdout,
            stderr,
        };

        match plan {
            Err(parse_error) => {
                let failure = StageFailure {
                    error: parse_error.clone().into(),
                    code: 1,
                    stderr: Some(wiring.stderr),
                };
                launched.push(Launched::Finished(failure.into_outcome(None)));
            }
            Ok(stage) => match spawn_stage(stage, wiring) {
                Ok(child) => {
                    debug!("etapa {} lanzada: {} (pid {})", i, stage.program(), child.id());
                    launched.push(Launched::Running {
                        program: stage.program().to_string(),
                        child,
                    });
                }
                Err(failure) => {
                    warn!("etapa {} abortada: {}", i, failure.error);
                    let program = Some(stage.program().to_string());
                    launched.push(Launched::Finished(failure.into_outcome(program)));
                }
            },
        }
    }

    // sin esto el hilo de captura nunca vería EOF
    drop(capture_tx);

    let mut output_bytes = 0;
    for chunk in chunks_rx {
        output_bytes += chunk.len();
        on_output(&chunk);
    }
    if drain.join().is_err() {
        warn!("el hilo de captura del pipeline entró en pánico");
    }

    let stages = launched
        .into_iter()
        .map(|l| match l {
            Launched::Running { program, mut child } => {
                let status = match child.wait() {
                    Ok(status) => status_from(status),
                    Err(e) => StageStatus::Aborted {
                        code: 1,
                        reason: format!("wait failed: {e}"),
                    },
                };
                StageOutcome {
                    program: Some(program),
                    status,
                }
            }
            Launched::Finished(outcome) => outcome,
        })
        .collect();

    Ok(PipelineReport {
        stages,
        output_bytes,
    })
}

/// Tokeniza, clasifica y ejecuta una línea. Un error de sintaxis que rechaza
/// el pipeline completo se reporta por `on_output` antes de devolverlo.
pub fn execute_line<F>(line: &str, mut on_output: F) -> Result<PipelineReport, ExecError>
where
    F: FnMut(&[u8]),
{
    let pipeline = match Pipeline::from_line(line) {
        Ok(p) => p,
        Err(e) => {
            on_output(format!("{e}\n").as_bytes());
            return Err(e.into());
        }
    };
    debug!("ejecutando \"{}\" ({}, {} etapas)", line, pipeline.shape, pipeline.len());
    run_pipeline(&pipeline, on_output)
}

/// Igual que `execute_line` pero acumula toda la salida en memoria.
pub fn capture_line(line: &str) -> (Vec<u8>, Result<PipelineReport, ExecError>) {
    let mut output = Vec::new();
    let result = execute_line(line, |chunk| output.extend_from_slice(chunk));
    (output, result)
}
