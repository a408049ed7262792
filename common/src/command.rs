use std::{fmt, path::PathBuf};

use crate::error::ParseError;
use crate::tokenizer::tokenize;

pub const PIPE: &str = "|";
pub const REDIRECT_IN: &str = "<";
pub const REDIRECT_OUT: &str = ">";
pub const REDIRECT_ERR: &str = "2>";
pub const MERGE_ERR_INTO_OUT: &str = "2>&1";

/// Una redirección de una etapa, en el orden en que apareció en la línea.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// `< archivo`
    Input(PathBuf),
    /// `> archivo` (siempre crea y trunca, nunca append)
    Output(PathBuf),
    /// `2> archivo`
    Error(PathBuf),
    /// `2>&1`: stderr va al destino final de stdout
    ErrorToOutput,
}

/// Una etapa ya limpia: argv sin operadores + redirecciones ordenadas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub argv: Vec<String>,
    pub redirects: Vec<Redirect>,
}

impl Stage {
    pub fn program(&self) -> &str {
        // argv nunca está vacío: parse_stage lo rechaza con MissingProgram
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }
}

/// Resultado de clasificar una etapa. Un error aquí sólo aborta esa etapa;
/// las demás del pipeline se ejecutan igual.
pub type StagePlan = Result<Stage, ParseError>;

/// Forma del comando, calculada en una sola pasada sobre los tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandShape {
    Plain,
    Redirected,
    Piped,
    MultiPiped,
    Combined,
}

impl CommandShape {
    pub fn classify(tokens: &[String]) -> Self {
        let pipes = tokens.iter().filter(|t| t.as_str() == PIPE).count();
        let redirected = tokens.iter().any(|t| is_redirect_operator(t));

        match (pipes, redirected) {
            (0, false) => CommandShape::Plain,
            (0, true) => CommandShape::Redirected,
            (_, true) => CommandShape::Combined,
            (1, false) => CommandShape::Piped,
            (_, false) => CommandShape::MultiPiped,
        }
    }
}

impl fmt::Display for CommandShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandShape::Plain => write!(f, "plain"),
            CommandShape::Redirected => write!(f, "redirected"),
            CommandShape::Piped => write!(f, "piped"),
            CommandShape::MultiPiped => write!(f, "multi-piped"),
            CommandShape::Combined => write!(f, "combined"),
        }
    }
}

/// Pipeline clasificado, listo para el motor de ejecución.
/// Se construye por cada ejecución y nunca se guarda.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub shape: CommandShape,
    pub stages: Vec<StagePlan>,
}

impl Pipeline {
    /// Tokeniza y clasifica una línea.
    pub fn from_line(line: &str) -> Result<Self, ParseError> {
        Self::parse(&tokenize(line))
    }

    /// Errores que rechazan el pipeline completo (antes de abrir o lanzar nada):
    /// línea vacía o etapa vacía entre pipes.
    pub fn parse(tokens: &[String]) -> Result<Self, ParseError> {
        if tokens.is_empty() {
            return Err(ParseError::EmptyCommand);
        }

        let segments: Vec<&[String]> = tokens.split(|t| t.as_str() == PIPE).collect();
        if let Some(position) = segments.iter().position(|s| s.is_empty()) {
            return Err(ParseError::EmptyStage { position });
        }

        Ok(Self {
            shape: CommandShape::classify(tokens),
            stages: segments.into_iter().map(parse_stage).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

pub fn is_redirect_operator(token: &str) -> bool {
    matches!(
        token,
        REDIRECT_IN | REDIRECT_OUT | REDIRECT_ERR | MERGE_ERR_INTO_OUT
    )
}

/// Separa argv de redirecciones respetando el orden de izquierda a derecha.
fn parse_stage(tokens: &[String]) -> StagePlan {
    let mut argv = Vec::new();
    let mut redirects = Vec::new();
    let mut iter = tokens.iter();

    while let Some(token) = iter.next() {
        let operator = match token.as_str() {
            REDIRECT_IN => REDIRECT_IN,
            REDIRECT_OUT => REDIRECT_OUT,
            REDIRECT_ERR => REDIRECT_ERR,
            MERGE_ERR_INTO_OUT => {
                redirects.push(Redirect::ErrorToOutput);
                continue;
            }
            _ => {
                argv.push(token.clone());
                continue;
            }
        };

        // otro operador no cuenta como nombre de archivo
        let target = match iter.next() {
            Some(t) if !is_redirect_operator(t) => PathBuf::from(t),
            _ => return Err(ParseError::MissingRedirectTarget { operator }),
        };

        redirects.push(match operator {
            REDIRECT_IN => Redirect::Input(target),
            REDIRECT_OUT => Redirect::Output(target),
            _ => Redirect::Error(target),
        });
    }

    if argv.is_empty() {
        return Err(ParseError::MissingProgram);
    }

    Ok(Stage { argv, redirects })
}
