pub mod command;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod task;
pub mod tokenizer;

/* --------- Re-exports usados por server y client --------- */

pub use command::{CommandShape, Pipeline, Redirect, Stage, StagePlan};
pub use engine::{PipelineReport, StageOutcome, StageStatus};
pub use error::{ExecError, ParseError, RequestError};
pub use protocol::{Request, SentinelScanner, MAX_COMMAND_LEN, TASK_DONE_SENTINEL};
pub use task::{ClientId, TaskId, TaskInfo, TaskKind, UNBOUNDED_BURST};
pub use tokenizer::tokenize;
