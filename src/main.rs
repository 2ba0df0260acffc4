use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use subject_features::config::{load_config, DatasetLayout, RunConfig};
use subject_features::extractor::extractor_by_name;
use subject_features::{run_pipeline, CancellationToken, PipelineError};

/// Extract features per subject (columns are prefixed 'ft_' unless the layout says otherwise).
#[derive(Parser, Debug)]
#[command(name = "extract_features", version, about, long_about = None)]
struct Cli {
    /// Execute in parallel, nproc = number of workers to use (0 or less picks ~80% of the CPUs)
    #[arg(
        short = 'p',
        long = "parallel",
        value_name = "NPROC",
        default_value_t = 0,
        allow_negative_numbers = true
    )]
    parallel: i64,

    /// Sudden death: only process the given uuids, or the default one when none are given
    #[arg(long = "sudden-death", value_name = "UUID", num_args = 0..)]
    sudden_death: Option<Vec<String>>,

    /// Folder holding the dataset and the feature output
    #[arg(long, env = "FEATURES_ROOT")]
    root: Option<PathBuf>,

    /// JSON file overriding the dataset layout
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feature extractor to apply
    #[arg(long, default_value = "last-acc")]
    extractor: String,

    /// Keep existing files in the output folder instead of wiping it
    #[arg(long)]
    keep_existing: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    println!("Started at: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    let start = Instant::now();

    match run(cli) {
        Ok(()) => {
            let secs = start.elapsed().as_secs();
            println!(
                "\nSuccess! Duration: {}:{:02}:{:02}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60
            );
            ExitCode::SUCCESS
        }
        Err(e) if is_interrupt(&e) => {
            eprintln!("Interrupted: Exiting on request.");
            // Workers still running are killed with the process.
            std::process::exit(130);
        }
        Err(e) => {
            error!("exception: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn is_interrupt(err: &anyhow::Error) -> bool {
    err.downcast_ref::<PipelineError>()
        .map_or(false, PipelineError::is_cancelled)
}

fn run(cli: Cli) -> Result<()> {
    let mut layout = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load layout {}", path.display()))?,
        None => DatasetLayout::default(),
    };
    if let Some(root) = cli.root {
        layout = layout.with_root(root);
    }

    let extractor = extractor_by_name(&cli.extractor, &layout)?;

    let mut run_config = RunConfig::new(&layout, cli.parallel, cli.sudden_death);
    run_config.clean_output = !cli.keep_existing;
    println!("using {} workers", run_config.workers);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            eprintln!("Interrupted: Exiting on request.");
            std::process::exit(130);
        }
        eprintln!("\nInterrupt received, stopping workers...");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    info!(
        "Extracting '{}' features into {}",
        extractor.name(),
        run_config.output_root.display()
    );
    let report = run_pipeline(&layout, &run_config, extractor, cancel, true)?;
    report.print_summary();
    Ok(())
}
