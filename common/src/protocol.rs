//! Protocolo de línea sobre TCP entre client y server.
//!
//! - Cliente → servidor: un comando por línea. `exit` cierra la sesión.
//! - Servidor → cliente (modo scheduler): trozos de salida crudos y al final
//!   el sentinel `__TASK_DONE__`.
//! - Servidor → cliente (modo directo): un único trozo, sin sentinel.

use crate::error::RequestError;
use crate::tokenizer::tokenize;

pub const TASK_DONE_SENTINEL: &str = "__TASK_DONE__";

/// Tamaño del buffer de lectura de comandos (un recv por comando).
pub const MAX_COMMAND_LEN: usize = 1024;

pub const DEFAULT_PORT: u16 = 8080;

pub const EXIT_COMMAND: &str = "exit";

const BATCH_PROGRAMS: [&str; 2] = ["demo", "./demo"];

/// Clasificación de una línea recibida.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Empty,
    Exit,
    /// `demo N` / `./demo N`
    Batch { burst: u32 },
    Shell,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let tokens = tokenize(line);

        let Some(first) = tokens.first() else {
            return Ok(Request::Empty);
        };

        if tokens.len() == 1 && first == EXIT_COMMAND {
            return Ok(Request::Exit);
        }

        if !BATCH_PROGRAMS.contains(&first.as_str()) {
            return Ok(Request::Shell);
        }

        if tokens.len() != 2 {
            return Err(RequestError::Usage);
        }

        let total: i64 = tokens[1].parse().map_err(|_| RequestError::Usage)?;
        if total <= 0 {
            return Err(RequestError::NonPositive);
        }
        let burst = u32::try_from(total).map_err(|_| RequestError::Usage)?;

        Ok(Request::Batch { burst })
    }
}

/// Parte lo recibido en un recv en comandos. Un trozo sin salto de línea es
/// un comando completo (clientes que mandan la línea pelada).
pub fn split_commands(chunk: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(chunk)
        .split('\n')
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Detecta el sentinel de fin de tarea en un flujo de bytes, aunque llegue
/// partido entre dos lecturas TCP.
#[derive(Debug, Default)]
pub struct SentinelScanner {
    pending: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Scanned {
    /// Bytes que ya se pueden mostrar (sin el sentinel).
    pub output: Vec<u8>,
    /// Se vio el sentinel: la tarea terminó.
    pub done: bool,
}

impl SentinelScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Scanned {
        let sentinel = TASK_DONE_SENTINEL.as_bytes();
        self.pending.extend_from_slice(chunk);

        if let Some(pos) = find(&self.pending, sentinel) {
            let output = self.pending[..pos].to_vec();
            // lo que venga después pertenece a la siguiente tarea
            self.pending.drain(..pos + sentinel.len());
            return Scanned { output, done: true };
        }

        // retenemos un posible comienzo de sentinel al final del buffer
        let keep = partial_suffix(&self.pending, sentinel);
        let ready = self.pending.len() - keep;
        Scanned {
            output: self.pending.drain(..ready).collect(),
            done: false,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Largo del sufijo más largo de `buf` que es prefijo propio de `needle`.
fn partial_suffix(buf: &[u8], needle: &[u8]) -> usize {
    (1..needle.len())
        .rev()
        .find(|&k| buf.ends_with(&needle[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reconoce_demo() {
        assert_eq!(Request::parse("demo 5"), Ok(Request::Batch { burst: 5 }));
        assert_eq!(Request::parse("./demo 12"), Ok(Request::Batch { burst: 12 }));
    }

    #[test]
    fn parse_demo_invalido_es_error_de_uso() {
        assert_eq!(Request::parse("demo"), Err(RequestError::Usage));
        assert_eq!(Request::parse("demo abc"), Err(RequestError::Usage));
        assert_eq!(Request::parse("demo 1 2"), Err(RequestError::Usage));
        assert_eq!(Request::parse("demo 0"), Err(RequestError::NonPositive));
        assert_eq!(Request::parse("demo -3"), Err(RequestError::NonPositive));
    }

    #[test]
    fn parse_exit_vacio_y_shell() {
        assert_eq!(Request::parse("  exit  "), Ok(Request::Exit));
        assert_eq!(Request::parse("   "), Ok(Request::Empty));
        assert_eq!(Request::parse("ls -l | wc"), Ok(Request::Shell));
        assert_eq!(Request::parse("exit now"), Ok(Request::Shell));
        assert_eq!(Request::parse("demos 3"), Ok(Request::Shell));
    }

    #[test]
    fn split_commands_por_lineas() {
        assert_eq!(split_commands(b"ls\n\ndemo 3\r\n"), vec!["ls", "demo 3"]);
        assert_eq!(split_commands(b"echo sin salto"), vec!["echo sin salto"]);
        assert!(split_commands(b"\n  \n").is_empty());
    }

    #[test]
    fn scanner_detecta_sentinel_completo() {
        let mut s = SentinelScanner::new();
        let r = s.feed(b"Demo 0/0\n__TASK_DONE__");
        assert_eq!(r.output, b"Demo 0/0\n");
        assert!(r.done);
    }

    #[test]
    fn scanner_detecta_sentinel_partido() {
        let mut s = SentinelScanner::new();

        let r1 = s.feed(b"hola\n__TASK");
        assert_eq!(r1.output, b"hola\n");
        assert!(!r1.done);

        let r2 = s.feed(b"_DONE__");
        assert!(r2.output.is_empty());
        assert!(r2.done);
    }

    #[test]
    fn scanner_libera_falso_prefijo() {
        let mut s = SentinelScanner::new();
        let r1 = s.feed(b"a__");
        assert_eq!(r1.output, b"a");

        let r2 = s.feed(b"x\n");
        assert_eq!(r2.output, b"__x\n");
        assert!(!r2.done);
    }

    #[test]
    fn scanner_guarda_lo_que_sigue_al_sentinel() {
        let mut s = SentinelScanner::new();
        assert!(s.feed(b"__TASK_DONE__siguiente").done);

        let r = s.feed(b"");
        assert_eq!(r.output, b"siguiente");
    }
}
