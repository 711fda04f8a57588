use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use nwbsync::{dataset_to_nwb, BatchConfig, SafetensorsContainer, SessionStatus};

#[derive(Parser)]
#[command(name = "convert_all", about = "Convert every session listed in a dataset table")]
struct Args {
    /// Dataset table (CSV, one row per fiber per session)
    #[arg(long)]
    table: PathBuf,

    /// Batch settings (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Sessions converted in parallel
    #[arg(long)]
    max_workers: Option<usize>,

    /// Replace existing outputs instead of skipping them
    #[arg(long)]
    overwrite: bool,

    /// Metadata templates, merged in order (repeatable)
    #[arg(long = "template")]
    templates: Vec<PathBuf>,

    /// Fiber-photometry metadata template
    #[arg(long)]
    fiber_template: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(p) => BatchConfig::load(p)?,
        None => BatchConfig::default(),
    };
    if let Some(dir) = args.output_dir {
        cfg.output_dir = dir;
    }
    if let Some(n) = args.max_workers {
        cfg.max_workers = n;
    }
    cfg.overwrite |= args.overwrite;
    if !args.templates.is_empty() {
        cfg.metadata_templates = args.templates;
    }
    if args.fiber_template.is_some() {
        cfg.fiber_template = args.fiber_template;
    }

    let report = dataset_to_nwb(&args.table, &cfg, &SafetensorsContainer)?;
    for s in &report.sessions {
        match &s.status {
            SessionStatus::Failed { error_file, .. } => {
                println!("FAILED  {} (see {})", s.output_path.display(), error_file.display())
            }
            status => println!("{:<7} {}", format!("{status:?}"), s.output_path.display()),
        }
    }
    println!("{} sessions, {} failed", report.sessions.len(), report.failed());
    Ok(())
}
