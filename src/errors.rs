use std::backtrace::Backtrace;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Participant's info file '{path}' does not exist")]
    RosterNotFound { path: PathBuf },
    #[error("Failed to read roster {path}: {source}")]
    RosterRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Roster {path} has no '{column}' column")]
    MissingIdColumn { path: PathBuf, column: String },
    #[error("Unknown feature extractor '{name}' (available: {available:?})")]
    UnknownExtractor {
        name: String,
        available: Vec<&'static str>,
    },
}

/// Reading a subject's input table.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error reading data file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed CSV in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Input table has no '{column}' column")]
    MissingColumn { column: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Ground-truth column '{column}' missing from feature table")]
    MissingGroundTruth { column: String },
    #[error("Column '{column}' is not part of the feature table")]
    UnknownColumn { column: String },
}

/// Raised by a feature extractor.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Input column '{column}' required by the extractor is missing")]
    MissingColumn { column: String },
    #[error("Column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("Extraction interrupted")]
    Interrupted,
    #[error("Extraction failed: {0}")]
    Failed(String),
    #[error("Extractor panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error writing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// What went wrong while processing one subject.
#[derive(Error, Debug)]
pub enum TaskErrorKind {
    #[error("Loading input failed: {0}")]
    Load(#[from] LoadError),
    #[error("Schema contract violated: {0}")]
    Schema(#[from] SchemaError),
    #[error("Feature extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("Writing features failed: {0}")]
    Write(#[from] WriteError),
}

/// Any per-subject error. Converted to a `TaskOutcome` at the task boundary.
///
/// The stack is recorded when the stage error is converted, so it points at
/// the failing step rather than at the scheduler.
#[derive(Debug)]
pub struct TaskError {
    kind: TaskErrorKind,
    backtrace: Backtrace,
}

impl TaskError {
    pub fn kind(&self) -> &TaskErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self.kind, TaskErrorKind::Extract(ExtractError::Interrupted))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

macro_rules! task_error_from {
    ($($source:ty),+) => {
        $(
            impl From<$source> for TaskError {
                fn from(err: $source) -> Self {
                    TaskError {
                        kind: TaskErrorKind::from(err),
                        backtrace: Backtrace::force_capture(),
                    }
                }
            }
        )+
    };
}

task_error_from!(LoadError, SchemaError, ExtractError, WriteError);

/// Errors allowed to stop a whole batch.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to prepare output directory {path}: {source}")]
    OutputSpace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Interrupted after {completed}/{total} subjects")]
    Cancelled { completed: usize, total: usize },
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled { .. })
    }
}

/// Renders an error with its full `source()` chain, one cause per line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        message.push_str(&format!("\n  caused by: {}", cause));
        current = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::backtrace::BacktraceStatus;

    #[test]
    fn test_error_chain_includes_sources() {
        let err = TaskError::from(LoadError::Io {
            path: PathBuf::from("u001.csv"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        });
        let chain = error_chain(&err);
        assert!(chain.starts_with("Loading input failed"));
        assert!(chain.contains("caused by: IO error reading data file u001.csv"));
        assert!(chain.contains("caused by: no such file"));
    }

    #[test]
    fn test_interrupt_is_distinguished() {
        assert!(TaskError::from(ExtractError::Interrupted).is_interrupt());
        assert!(!TaskError::from(ExtractError::Failed("boom".into())).is_interrupt());
        let cancelled = PipelineError::Cancelled { completed: 1, total: 5 };
        assert!(cancelled.is_cancelled());
    }

    #[test]
    fn test_task_error_records_backtrace_on_conversion() {
        let err = TaskError::from(SchemaError::MissingGroundTruth {
            column: "Esm_TiredAwake".into(),
        });
        assert_eq!(err.backtrace().status(), BacktraceStatus::Captured);
        assert!(matches!(err.kind(), TaskErrorKind::Schema(_)));
        assert!(err.to_string().starts_with("Schema contract violated"));
    }
}
