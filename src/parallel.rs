use crate::config::available_parallelism;
use crate::errors::PipelineError;
use crate::registry::SubjectRecord;
use crate::task::{SubjectTask, TaskOutcome};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::ThreadPoolBuilder;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the collector looks at the cancellation flag while no
/// outcome arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} User ({eta})";

/// Shared stop flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a completed batch did.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub total: usize,
    /// In completion order.
    pub outcomes: Vec<TaskOutcome>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn feature_rows(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                TaskOutcome::Success { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    pub fn print_summary(&self) {
        println!("\n========== Feature Extraction Summary ==========");
        println!("Total Duration: {:.2?}", self.elapsed);
        println!("Subjects Attempted: {}/{}", self.attempted(), self.total);
        println!("Subjects Successful: {}", self.succeeded());
        println!("Subjects Failed: {}", self.failed());
        println!("Feature Rows Written: {}", self.feature_rows());

        let failures: Vec<&TaskOutcome> =
            self.outcomes.iter().filter(|o| o.is_failure()).collect();
        if !failures.is_empty() {
            println!("\nFailed Subjects:");
            for outcome in failures {
                println!("  {}", outcome.subject());
            }
        }
        println!("================================================\n");
    }
}

/// Fans subjects out over a bounded worker pool.
///
/// One worker is the sequential mode: jobs are queued first-in first-out, so
/// subjects run in roster order, and the calling thread still watches the
/// cancellation token while a subject is in flight.
pub struct BatchScheduler {
    task: Arc<SubjectTask>,
    cancel: CancellationToken,
    show_progress: bool,
    max_parallelism: usize,
}

impl BatchScheduler {
    pub fn new(task: SubjectTask) -> Self {
        let cancel = task.cancellation_token().clone();
        Self {
            task: Arc::new(task),
            cancel,
            show_progress: true,
            max_parallelism: available_parallelism(),
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Caps the worker count passed to `run_all`. Defaults to the number of
    /// available CPUs.
    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max.max(1);
        self
    }

    /// Processes every subject and reports the outcomes.
    ///
    /// Returns `PipelineError::Cancelled` as soon as any task reports a
    /// cancellation or the token is tripped from outside. Outputs already
    /// written stay on disk.
    pub fn run_all(
        &self,
        subjects: Vec<SubjectRecord>,
        input_root: &Path,
        output_root: &Path,
        workers: usize,
    ) -> Result<BatchReport, PipelineError> {
        let start = Instant::now();
        let total = subjects.len();
        let workers = workers.clamp(1, self.max_parallelism);
        let progress = self.progress_bar(total);

        if workers == 1 {
            info!("Processing {} subjects sequentially", total);
        } else {
            info!("Processing {} subjects on {} workers", total, workers);
        }
        let outcomes = self.run_pooled(subjects, input_root, output_root, workers, &progress)?;

        progress.finish_with_message("Feature extraction completed");
        Ok(BatchReport {
            total,
            outcomes,
            elapsed: start.elapsed(),
        })
    }

    fn run_pooled(
        &self,
        subjects: Vec<SubjectRecord>,
        input_root: &Path,
        output_root: &Path,
        workers: usize,
        progress: &ProgressBar,
    ) -> Result<Vec<TaskOutcome>, PipelineError> {
        let total = subjects.len();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("feature-worker-{}", i))
            .build()?;

        let (sender, receiver) = unbounded::<TaskOutcome>();
        let input_root: Arc<PathBuf> = Arc::new(input_root.to_path_buf());
        let output_root: Arc<PathBuf> = Arc::new(output_root.to_path_buf());

        for subject in subjects {
            let sender = sender.clone();
            let task = Arc::clone(&self.task);
            let cancel = self.cancel.clone();
            let input_root = Arc::clone(&input_root);
            let output_root = Arc::clone(&output_root);
            pool.spawn_fifo(move || {
                // queued work is dropped once the batch is aborting
                if cancel.is_cancelled() {
                    return;
                }
                let outcome = task.run(&subject, &input_root, &output_root);
                if outcome.is_cancelled() {
                    cancel.cancel();
                }
                let _ = sender.send(outcome);
            });
        }
        drop(sender);

        let mut outcomes = Vec::with_capacity(total);
        loop {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(outcome) => {
                    progress.inc(1);
                    if outcome.is_cancelled() {
                        return Err(self.abort(progress, outcomes.len(), total));
                    }
                    self.report(progress, &outcome);
                    outcomes.push(outcome);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        return Err(self.abort(progress, outcomes.len(), total));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if self.cancel.is_cancelled() {
            return Err(self.abort(progress, outcomes.len(), total));
        }
        // Dropping the pool here does not wait for stragglers; on abort the
        // early returns above leave in-flight workers to the process exit.
        Ok(outcomes)
    }

    fn report(&self, progress: &ProgressBar, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Failure { subject, message, .. } => {
                progress.println(format!("exception: {} '{}'", subject, message));
            }
            TaskOutcome::Success { subject, rows, elapsed } => {
                debug!("{} done: {} rows in {:.2?}", subject, rows, elapsed);
            }
            TaskOutcome::Cancelled { .. } => {}
        }
    }

    fn abort(&self, progress: &ProgressBar, completed: usize, total: usize) -> PipelineError {
        self.cancel.cancel();
        progress.abandon_with_message("interrupted");
        warn!("Batch interrupted after {}/{} subjects", completed, total);
        PipelineError::Cancelled { completed, total }
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template(PROGRESS_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        progress.set_style(style);
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetLayout;
    use crate::data_models::{FeatureFrame, Table};
    use crate::errors::ExtractError;
    use crate::extractor::{FeatureExtractor, LastAccelerationExtractor};
    use std::fs;
    use std::sync::atomic::AtomicUsize;

    const EVENTS: &str = "sensor_id,Acc_Avg,Esm_TiredAwake\nAcc,0.3,\nEsm,,1\n";

    fn setup(ids: &[&str]) -> (tempfile::TempDir, PathBuf, PathBuf, Vec<SubjectRecord>) {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("data");
        let output = tmp.path().join("features");
        fs::create_dir_all(&input).unwrap();
        fs::create_dir_all(&output).unwrap();
        for id in ids {
            fs::write(input.join(format!("{}.csv", id)), EVENTS).unwrap();
        }
        let subjects = ids.iter().map(|id| SubjectRecord::new(*id)).collect();
        (tmp, input, output, subjects)
    }

    fn scheduler(extractor: Arc<dyn FeatureExtractor>) -> BatchScheduler {
        let task = SubjectTask::new(extractor, DatasetLayout::default(), CancellationToken::new());
        BatchScheduler::new(task)
            .with_progress(false)
            .with_max_parallelism(4)
    }

    /// Interrupts on one subject and counts how many extractions started.
    struct InterruptOn {
        subject: &'static str,
        started: AtomicUsize,
    }

    impl FeatureExtractor for InterruptOn {
        fn name(&self) -> &str {
            "interrupt-on"
        }

        fn extract(
            &self,
            subject: &SubjectRecord,
            input: &Table,
            features: &mut FeatureFrame,
        ) -> Result<(), ExtractError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if subject.id == self.subject {
                return Err(ExtractError::Interrupted);
            }
            LastAccelerationExtractor::default().extract(subject, input, features)
        }
    }

    /// Blocks in the extractor long enough to outlast any prompt abort.
    struct Slow(Duration);

    impl FeatureExtractor for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn extract(
            &self,
            subject: &SubjectRecord,
            input: &Table,
            features: &mut FeatureFrame,
        ) -> Result<(), ExtractError> {
            std::thread::sleep(self.0);
            LastAccelerationExtractor::default().extract(subject, input, features)
        }
    }

    #[test]
    fn test_token_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_sequential_keeps_roster_order() {
        let (_tmp, input, output, subjects) = setup(&["u003", "u001", "u002", "u005", "u004"]);
        let report = scheduler(Arc::new(LastAccelerationExtractor::default()))
            .run_all(subjects, &input, &output, 1)
            .unwrap();

        let order: Vec<&str> = report.outcomes.iter().map(|o| o.subject()).collect();
        assert_eq!(order, vec!["u003", "u001", "u002", "u005", "u004"]);
        assert_eq!(report.succeeded(), 5);
        assert_eq!(report.feature_rows(), 5);
    }

    #[test]
    fn test_pooled_yields_one_outcome_per_subject() {
        let ids: Vec<String> = (0..20).map(|i| format!("u{:03}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let (_tmp, input, output, subjects) = setup(&id_refs);

        let report = scheduler(Arc::new(LastAccelerationExtractor::default()))
            .run_all(subjects, &input, &output, 4)
            .unwrap();

        let mut seen: Vec<&str> = report.outcomes.iter().map(|o| o.subject()).collect();
        seen.sort();
        assert_eq!(seen, id_refs);
        assert_eq!(report.succeeded(), 20);
        assert_eq!(fs::read_dir(&output).unwrap().count(), 20);
    }

    #[test]
    fn test_sequential_cancellation_stops_dispatch() {
        let (_tmp, input, output, subjects) = setup(&["u001", "u002", "u003", "u004", "u005"]);
        let extractor = Arc::new(InterruptOn {
            subject: "u002",
            started: AtomicUsize::new(0),
        });

        let err = scheduler(extractor.clone())
            .run_all(subjects, &input, &output, 1)
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled { completed: 1, total: 5 }));
        assert_eq!(extractor.started.load(Ordering::SeqCst), 2);
        assert!(output.join("u001.csv").exists());
        assert!(!output.join("u003.csv").exists());
    }

    #[test]
    fn test_pooled_cancellation_aborts_batch() {
        let (_tmp, input, output, subjects) = setup(&["u001", "u002", "u003", "u004", "u005"]);
        let extractor = Arc::new(InterruptOn {
            subject: "u002",
            started: AtomicUsize::new(0),
        });

        let err = scheduler(extractor)
            .run_all(subjects, &input, &output, 4)
            .unwrap_err();

        match err {
            PipelineError::Cancelled { completed, total } => {
                assert_eq!(total, 5);
                assert!(completed < 5);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert!(!output.join("u002.csv").exists());
    }

    #[test]
    fn test_external_cancel_before_start() {
        let (_tmp, input, output, subjects) = setup(&["u001", "u002"]);
        let scheduler = scheduler(Arc::new(LastAccelerationExtractor::default()));
        scheduler.cancel.cancel();

        for workers in [1, 2] {
            let err = scheduler
                .run_all(subjects.clone(), &input, &output, workers)
                .unwrap_err();
            assert!(err.is_cancelled());
        }
        assert_eq!(fs::read_dir(&output).unwrap().count(), 0);
    }

    #[test]
    fn test_external_cancel_during_slow_subject_returns_promptly() {
        for workers in [1, 2] {
            let (_tmp, input, output, subjects) = setup(&["u001", "u002", "u003"]);
            let scheduler = scheduler(Arc::new(Slow(Duration::from_secs(3))));
            let token = scheduler.cancel.clone();
            let tripper = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                token.cancel();
            });

            let start = Instant::now();
            let err = scheduler
                .run_all(subjects, &input, &output, workers)
                .unwrap_err();
            let waited = start.elapsed();
            tripper.join().unwrap();

            assert!(matches!(err, PipelineError::Cancelled { completed: 0, total: 3 }));
            assert!(
                waited < Duration::from_secs(1),
                "{} worker(s) took {:?} to abort",
                workers,
                waited
            );
        }
    }

    #[test]
    fn test_max_parallelism_allows_requested_pool() {
        let (_tmp, input, output, subjects) = setup(&["u001", "u002", "u003", "u004"]);
        let task = SubjectTask::new(
            Arc::new(Slow(Duration::from_millis(300))),
            DatasetLayout::default(),
            CancellationToken::new(),
        );
        let scheduler = BatchScheduler::new(task)
            .with_progress(false)
            .with_max_parallelism(4);

        let start = Instant::now();
        let report = scheduler.run_all(subjects, &input, &output, 4).unwrap();
        assert_eq!(report.succeeded(), 4);
        // four 300 ms subjects only overlap when the pool really has four threads
        assert!(start.elapsed() < Duration::from_millis(1000));
    }

    #[test]
    fn test_empty_roster() {
        let (_tmp, input, output, _) = setup(&[]);
        let report = scheduler(Arc::new(LastAccelerationExtractor::default()))
            .run_all(Vec::new(), &input, &output, 4)
            .unwrap();
        assert_eq!(report.attempted(), 0);
        assert_eq!(report.total, 0);
    }
}
