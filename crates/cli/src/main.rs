#![deny(warnings)]

use anyhow::Context;
use clap::Parser;
use soundcheck_core::config::{
    resolve_path, resolve_path_with_default, validate_label_column, AppConfig, Concurrency, Env,
    FeatureCatalog, FileExtension, StdEnv, VarianceSource, DEFAULT_EXTENSION, DEFAULT_JOBS,
    DEFAULT_LABEL_COLUMN, DEFAULT_OUTPUT_FILE, DEFAULT_PITCH_MAX_HZ, DEFAULT_PITCH_MIN_HZ,
    ENV_EMOTION_TABLE, ENV_OUTPUT, ENV_SAMPLES_DIR,
};
use soundcheck_core::emotion::DescriptorTable;
use soundcheck_core::features::{AcousticExtractor, AnalysisParams};
use soundcheck_core::pipeline::{Pipeline, PipelineConfig, PipelineError};
use soundcheck_core::report;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "soundcheck")]
#[command(about = "Score speech recordings against a table of emotion descriptors")]
struct Args {
    /// Directory of audio samples.
    #[arg(long)]
    samples_dir: Option<PathBuf>,

    /// CSV of emotions and their per-dimension descriptors.
    #[arg(long)]
    emotion_table: Option<PathBuf>,

    /// Where to write the raw feature table.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long)]
    normalized_output: Option<PathBuf>,

    #[arg(long)]
    scores_output: Option<PathBuf>,

    /// CSV of per-recording feature instability used by "variable" descriptors.
    #[arg(long, conflicts_with = "with_variance")]
    variance_file: Option<PathBuf>,

    /// Estimate feature instability from the audio itself.
    #[arg(long)]
    with_variance: bool,

    #[arg(long, default_value = DEFAULT_EXTENSION)]
    extension: String,

    #[arg(long)]
    recursive: bool,

    #[arg(long, default_value_t = DEFAULT_JOBS)]
    jobs: usize,

    /// Lowest fundamental frequency counted as voiced.
    #[arg(long, default_value_t = DEFAULT_PITCH_MIN_HZ)]
    pitch_min_hz: u32,

    #[arg(long, default_value_t = DEFAULT_PITCH_MAX_HZ)]
    pitch_max_hz: u32,

    #[arg(long, default_value = DEFAULT_LABEL_COLUMN)]
    label_column: String,

    /// JSON feature catalog; defaults to the built-in eGeMAPS selection.
    #[arg(long)]
    catalog: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        samples_dir = %cfg.samples_dir.display(),
        emotion_table = %cfg.emotion_table.display(),
        features = cfg.catalog.selected().len(),
        jobs = cfg.jobs.jobs,
        "config loaded"
    );

    run_batch(cfg).await
}

async fn run_batch(cfg: AppConfig) -> anyhow::Result<()> {
    let table = DescriptorTable::load(&cfg.emotion_table, &cfg.label_column)
        .with_context(|| format!("loading emotion table {}", cfg.emotion_table.display()))?;

    let variance = match &cfg.variance {
        VarianceSource::File(path) => Some(
            report::load_variance_table(path)
                .with_context(|| format!("loading variance table {}", path.display()))?,
        ),
        VarianceSource::Disabled | VarianceSource::Estimated => None,
    };

    let extractor = AcousticExtractor::new(cfg.catalog.selected().to_vec())
        .with_params(cfg.analysis)
        .with_variance(cfg.variance == VarianceSource::Estimated);
    let pipeline = Pipeline::new(extractor, PipelineConfig::from_app(&cfg));

    let outcome = match pipeline.run(&table, variance).await {
        Ok(outcome) => outcome,
        Err(PipelineError::EmptyBatch) => {
            anyhow::bail!(
                "no results were generated: no {} file in {} produced features",
                cfg.extension.as_str(),
                cfg.samples_dir.display()
            )
        }
        Err(e) => return Err(e.into()),
    };

    report::save_feature_set(&cfg.output, &outcome.raw, cfg.catalog.selected())?;
    tracing::info!(path = %cfg.output.display(), rows = outcome.raw.len(), "feature table written");

    if let Some(path) = &cfg.normalized_output {
        report::save_feature_set(path, outcome.normalized.as_feature_set(), cfg.catalog.selected())?;
        tracing::info!(path = %path.display(), "normalized feature table written");
    }
    if let Some(path) = &cfg.scores_output {
        report::save_score_matrix(path, &outcome.scores)?;
        tracing::info!(path = %path.display(), "score matrix written");
    }
    if !outcome.failures.is_empty() {
        tracing::warn!(failed = outcome.failures.len(), "some samples were skipped");
    }

    print!("{}", outcome.scores.render_table());
    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let samples_dir = resolve_path(args.samples_dir, ENV_SAMPLES_DIR, env)?;
    let emotion_table = resolve_path(args.emotion_table, ENV_EMOTION_TABLE, env)?;
    let output = resolve_path_with_default(args.output, ENV_OUTPUT, env, DEFAULT_OUTPUT_FILE);

    let catalog = match args.catalog {
        Some(path) => FeatureCatalog::load(&path)?,
        None => FeatureCatalog::egemaps(),
    };
    let analysis =
        AnalysisParams::default().with_pitch_range(args.pitch_min_hz, args.pitch_max_hz)?;
    let variance = match (args.variance_file, args.with_variance) {
        (Some(path), _) => VarianceSource::File(path),
        (None, true) => VarianceSource::Estimated,
        (None, false) => VarianceSource::Disabled,
    };

    Ok(AppConfig {
        samples_dir,
        emotion_table,
        label_column: validate_label_column(&args.label_column)?,
        output,
        normalized_output: args.normalized_output,
        scores_output: args.scores_output,
        extension: FileExtension::new(args.extension)?,
        recursive: args.recursive,
        jobs: Concurrency::new(args.jobs)?,
        variance,
        catalog,
        analysis,
    })
}
