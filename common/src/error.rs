use std::io;

use thiserror::Error;

/// Errores de sintaxis en pipes y redirecciones.
///
/// Los mensajes imitan los de una shell porque terminan en la salida de
/// error del comando que el cliente está viendo.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Error: Empty command.")]
    EmptyCommand,

    /// `a | | b`, `| a` o `a |`
    #[error("Error: Empty command between pipes.")]
    EmptyStage { position: usize },

    #[error("Error: Missing filename after '{operator}'")]
    MissingRedirectTarget { operator: &'static str },

    /// Etapa que sólo tiene redirecciones, p. ej. `> out.txt`
    #[error("Error: Missing command before redirection.")]
    MissingProgram,
}

/// Taxonomía de errores del motor de ejecución.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Fallo al abrir archivos o crear pipes/procesos.
    #[error("Error: {context}: {source}")]
    Resource {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("{program}: command not found")]
    ProgramNotFound { program: String },

    #[error("conexión cerrada: {0}")]
    Connection(String),
}

impl ExecError {
    pub fn resource(context: impl Into<String>, source: io::Error) -> Self {
        ExecError::Resource {
            context: context.into(),
            source,
        }
    }
}

/// Errores de la gramática `demo <N>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Usage: demo <total_iterations>")]
    Usage,

    #[error("Total iterations must be positive")]
    NonPositive,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mensajes_estilo_shell() {
        assert_eq!(
            ParseError::MissingRedirectTarget { operator: ">" }.to_string(),
            "Error: Missing filename after '>'"
        );
        assert_eq!(
            ExecError::ProgramNotFound {
                program: "nope".into()
            }
            .to_string(),
            "nope: command not found"
        );
    }

    #[test]
    fn resource_incluye_contexto_y_causa() {
        let err = ExecError::resource(
            "Cannot open output file 'x'",
            io::Error::new(io::ErrorKind::PermissionDenied, "denegado"),
        );
        assert_eq!(err.to_string(), "Error: Cannot open output file 'x': denegado");
    }
}
