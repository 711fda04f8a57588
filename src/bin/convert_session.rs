use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use nwbsync::{convert_session, AlignConfig, ConversionRequest, Diagnostics, SafetensorsContainer, Templates};

#[derive(Parser)]
#[command(name = "convert_session", about = "Align and convert one recording session")]
struct Args {
    /// Behavior-controller log (JSON), e.g. J069_RWTautowait2_20230809_131216.json
    #[arg(long)]
    behavior: PathBuf,

    /// Secondary recording: Doric CSV export or safetensors trace bundle
    #[arg(long)]
    secondary: PathBuf,

    /// Behavior video; frame times are read from <stem>.timestamps.csv
    #[arg(long)]
    video: Option<PathBuf>,

    /// Pose-estimation CSV, one row per video frame
    #[arg(long)]
    pose: Option<PathBuf>,

    /// Processed behavior file (JSON per-trial table with center-port times)
    #[arg(long)]
    processed_behavior: Option<PathBuf>,

    /// Output directory
    #[arg(long, default_value = "nwbfiles")]
    output_dir: PathBuf,

    /// Metadata templates, merged in order (repeatable)
    #[arg(long = "template")]
    templates: Vec<PathBuf>,

    /// Alignment settings (JSON); missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subject id (default: parsed from the behavior file name)
    #[arg(long, requires = "session_id")]
    subject_id: Option<String>,

    /// Session id as YYYYMMDD (default: parsed from the behavior file name)
    #[arg(long, requires = "subject_id")]
    session_id: Option<String>,

    /// Replace an existing output
    #[arg(long)]
    overwrite: bool,

    /// Keep only the first samples of each stream
    #[arg(long)]
    stub_test: bool,
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
        Some(p) => AlignConfig::load(p)?,
        None => AlignConfig::default(),
    };
    cfg.stub_test |= args.stub_test;

    let mut request = ConversionRequest::new(&args.behavior, &args.secondary);
    request.video_path = args.video;
    request.pose_path = args.pose;
    request.processed_behavior_path = args.processed_behavior;
    request.subject_id = args.subject_id;
    request.session_id = args.session_id;

    let templates = Templates { layers: args.templates, fiber: None };
    let mut diagnostics = Diagnostics::new();
    let report = convert_session(
        &request,
        &args.output_dir,
        args.overwrite,
        &cfg,
        &templates,
        &SafetensorsContainer,
        &mut diagnostics,
    )?;

    println!("{:?} → {}", report.outcome, report.output_path.display());
    if let Some(a) = &report.alignment {
        println!("plan {:?}, session start {}", a.plan, a.session_start_time);
    }
    if !diagnostics.is_empty() {
        print!("diagnostics:\n{}", diagnostics.render());
    }
    Ok(())
}
