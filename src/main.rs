use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use reid::{
    checkpoint::CheckpointMeta,
    config::{self, EvalConfig},
    dataset::{self, DatasetSummary},
    Evaluator, LogSink, MatchRule, ReportSink,
};
use reid_vision::{model::OnnxModel, ImageLoader, OutputFeature, Transform};

#[derive(Parser)]
#[command(name = "reid")]
#[command(version, about = "Person/vehicle re-identification evaluation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a model on a query/gallery split
    Eval {
        /// ONNX model to extract features with
        #[arg(short, long)]
        model: PathBuf,
        #[arg(long)]
        query_dir: PathBuf,
        #[arg(long)]
        gallery_dir: PathBuf,
        /// Config file (defaults to the built-in path)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Network output used as embedding: fc or pool5
        #[arg(long)]
        output_feature: Option<OutputFeature>,
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Matching rule: market1501, cuhk03 or allshots
        #[arg(long)]
        rule: Option<String>,
        /// Write the score report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
        /// Best-model bookkeeping file to update with the rank-1 score
        #[arg(long, requires = "epoch")]
        checkpoint: Option<PathBuf>,
        #[arg(long)]
        epoch: Option<usize>,
    },
    /// Parse a split directory and print its summary
    Scan {
        #[arg(short, long)]
        dir: PathBuf,
        /// Map identities to 0..n
        #[arg(long)]
        relabel: bool,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Eval {
            model,
            query_dir,
            gallery_dir,
            config,
            output_feature,
            batch_size,
            rule,
            report,
            checkpoint,
            epoch,
        } => {
            let mut cfg = config::load_config(config.as_deref())?;
            if let Some(feature) = output_feature {
                cfg.output_feature = feature;
            }
            if let Some(batch_size) = batch_size {
                cfg.batch_size = batch_size;
            }
            if let Some(name) = rule {
                cfg.rule = MatchRule::by_name(&name)
                    .with_context(|| format!("unknown matching rule '{}'", name))?;
            }
            let top1 = eval(&cfg, &model, &query_dir, &gallery_dir, report.as_deref())?;
            if let (Some(path), Some(epoch)) = (checkpoint, epoch) {
                track_best(&path, epoch, top1, &model)?;
            }
            Ok(())
        }
        Commands::Scan { dir, relabel } => scan(&dir, relabel),
        Commands::Config => open_config(),
    }
}

fn eval(
    cfg: &EvalConfig,
    model_path: &Path,
    query_dir: &Path,
    gallery_dir: &Path,
    report_path: Option<&Path>,
) -> Result<f32> {
    cfg.validate()?;

    let (query, num_query_ids) = dataset::scan_split(query_dir, false)?;
    let (gallery, num_gallery_ids) = dataset::scan_split(gallery_dir, false)?;
    let query = dataset::subsample(&query, cfg.query_fraction, cfg.seed);

    let mut summary = DatasetSummary::default();
    summary
        .add("query", num_query_ids, query.len())
        .add("gallery", num_gallery_ids, gallery.len());
    summary.log("Evaluation");

    let transform = Transform::new(cfg.height, cfg.width);
    let query_loader = ImageLoader::new(query_dir, query.clone(), cfg.batch_size, transform.clone())?;
    let gallery_loader = ImageLoader::new(gallery_dir, gallery.clone(), cfg.batch_size, transform)?;

    let model = OnnxModel::from_file(model_path, cfg.output_feature)
        .context("Failed to initialize feature extractor")?;
    let mut evaluator = Evaluator::new(model, cfg.clone());

    info!("Test:");
    let report = evaluator.evaluate_report(&query_loader, &gallery_loader, &query, &gallery)?;
    LogSink.report(&report);
    info!(
        "Scored queries: {} (CMC), {} (mAP)",
        report.num_valid_queries, report.map_valid_queries
    );

    if let Some(path) = report_path {
        std::fs::write(path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(report.top1)
}

fn track_best(path: &Path, epoch: usize, top1: f32, model: &Path) -> Result<()> {
    let mut meta = CheckpointMeta::load(path)?;
    let is_best = meta.record(epoch, top1, Some(model));
    meta.save(path)?;
    info!(
        " * Finished epoch {:3}  top1: {:5.1}%  best: {:5.1}%{}",
        epoch,
        top1 * 100.0,
        meta.best_top1 * 100.0,
        if is_best { " *" } else { "" }
    );
    Ok(())
}

fn scan(dir: &Path, relabel: bool) -> Result<()> {
    let (samples, num_ids) = dataset::scan_split(dir, relabel)?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string());
    let mut summary = DatasetSummary::default();
    summary.add(&name, num_ids, samples.len());
    summary.log("Split");
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path: &Path = &config::CONFIG_PATH;
    if !config_path.exists() {
        config::save_config(&EvalConfig::default(), Some(config_path))?;
        info!("Wrote default config to {}", config_path.display());
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
