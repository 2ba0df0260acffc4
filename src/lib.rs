//! Per-subject feature extraction for sensor event logs.
//!
//! A roster lists the subjects; each subject has one CSV event log. For every
//! subject the pipeline keeps the labelled ground-truth events, lets a
//! [`FeatureExtractor`] add feature columns aligned to them, and writes one
//! feature table with the ground-truth column last. Subjects are independent
//! and run on a bounded worker pool; one bad file never stops the batch, an
//! interrupt always does.

pub mod config;
pub mod data_models;
pub mod errors;
pub mod extractor;
pub mod io;
pub mod output;
pub mod parallel;
pub mod registry;
pub mod schema;
pub mod task;

pub use config::{DatasetLayout, RunConfig};
pub use errors::PipelineError;
pub use extractor::FeatureExtractor;
pub use parallel::{BatchReport, BatchScheduler, CancellationToken};
pub use registry::SubjectRecord;
pub use task::{SubjectTask, TaskOutcome};

use log::info;
use std::sync::Arc;

/// Loads the roster, prepares the output tree and processes every selected
/// subject.
///
/// The roster is read before the output tree is touched, so a missing roster
/// aborts without deleting previous results.
pub fn run_pipeline(
    layout: &DatasetLayout,
    run: &RunConfig,
    extractor: Arc<dyn FeatureExtractor>,
    cancel: CancellationToken,
    show_progress: bool,
) -> Result<BatchReport, PipelineError> {
    let roster_path = layout.roster_path();
    info!("Reading roster {}", roster_path.display());
    let subjects = registry::load_roster(&roster_path, &layout.id_column)?;
    let subjects =
        registry::filter_subjects(subjects, run.subset.as_deref(), &layout.default_subject);
    if run.subset.is_some() {
        info!("Sudden death: processing {} subject(s)", subjects.len());
    }

    output::prepare_output(&run.output_root, run.clean_output)?;

    let task = SubjectTask::new(extractor, layout.clone(), cancel);
    BatchScheduler::new(task)
        .with_progress(show_progress)
        .with_max_parallelism(run.max_parallelism)
        .run_all(subjects, &run.input_root, &run.output_root, run.workers)
}
