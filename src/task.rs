use crate::config::DatasetLayout;
use crate::data_models::{FeatureFrame, Table};
use crate::errors::{error_chain, ExtractError, TaskError};
use crate::extractor::FeatureExtractor;
use crate::io;
use crate::parallel::CancellationToken;
use crate::registry::SubjectRecord;
use crate::schema::normalize_columns;
use log::{debug, error};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of processing one subject.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success {
        subject: String,
        rows: usize,
        elapsed: Duration,
    },
    Failure {
        subject: String,
        message: String,
        elapsed: Duration,
    },
    /// The run was interrupted while this subject was pending or in flight.
    Cancelled { subject: String },
}

impl TaskOutcome {
    pub fn subject(&self) -> &str {
        match self {
            TaskOutcome::Success { subject, .. }
            | TaskOutcome::Failure { subject, .. }
            | TaskOutcome::Cancelled { subject } => subject,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failure { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled { .. })
    }
}

pub fn input_path(input_root: &Path, subject_id: &str) -> PathBuf {
    input_root.join(format!("{}.csv", subject_id))
}

pub fn output_path(output_root: &Path, subject_id: &str) -> PathBuf {
    output_root.join(format!("{}.csv", subject_id))
}

/// Turns one subject's event log into its feature table on disk.
///
/// `run` never returns an error: every per-subject problem, including a
/// panicking extractor, becomes a `TaskOutcome`.
pub struct SubjectTask {
    extractor: Arc<dyn FeatureExtractor>,
    layout: DatasetLayout,
    cancel: CancellationToken,
}

impl SubjectTask {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        layout: DatasetLayout,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            extractor,
            layout,
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn run(
        &self,
        subject: &SubjectRecord,
        input_root: &Path,
        output_root: &Path,
    ) -> TaskOutcome {
        let start = Instant::now();
        if self.cancel.is_cancelled() {
            return TaskOutcome::Cancelled {
                subject: subject.id.clone(),
            };
        }

        match self.process(subject, input_root, output_root) {
            Ok(rows) => {
                debug!(
                    "Wrote {} feature rows for {} in {:.2?}",
                    rows,
                    subject.id,
                    start.elapsed()
                );
                TaskOutcome::Success {
                    subject: subject.id.clone(),
                    rows,
                    elapsed: start.elapsed(),
                }
            }
            Err(e) if e.is_interrupt() => {
                debug!("Subject {} interrupted", subject.id);
                TaskOutcome::Cancelled {
                    subject: subject.id.clone(),
                }
            }
            Err(e) => {
                let message = error_chain(&e);
                error!("exception while processing {}: {}", subject.id, message);
                error!("stack trace:\n{}", e.backtrace());
                TaskOutcome::Failure {
                    subject: subject.id.clone(),
                    message,
                    elapsed: start.elapsed(),
                }
            }
        }
    }

    fn process(
        &self,
        subject: &SubjectRecord,
        input_root: &Path,
        output_root: &Path,
    ) -> Result<usize, TaskError> {
        let layout = &self.layout;
        let input = io::read_table(&input_path(input_root, &subject.id), &layout.null_markers)?;

        let mut features = FeatureFrame::from_ground_truth(
            &input,
            &layout.discriminator_column,
            &layout.ground_truth_event,
            &layout.ground_truth_column,
        )?;

        self.extract(subject, &input, &mut features)?;
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Interrupted.into());
        }

        let order = normalize_columns(&features.column_names(), &layout.ground_truth_column)?;
        let table = features.select(&order)?;
        io::write_table(&table, &output_path(output_root, &subject.id))?;
        Ok(table.height())
    }

    fn extract(
        &self,
        subject: &SubjectRecord,
        input: &Table,
        features: &mut FeatureFrame,
    ) -> Result<(), ExtractError> {
        panic::catch_unwind(AssertUnwindSafe(|| {
            self.extractor.extract(subject, input, features)
        }))
        .unwrap_or_else(|payload| {
            Err(ExtractError::Panicked(panic_message(payload.as_ref())))
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
