//! Portrait shorts worker binary.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shorts_media::{check_ffmpeg, check_ffprobe, check_ytdlp};
use shorts_models::timestamp::parse_timestamp;
use shorts_models::{FitPolicy, JobState, OutputFormat, PadBackground};
use shorts_worker::{sweep_stale, JobController, SourceReference, WorkerConfig};

/// Cut a video into portrait 9:16 clips.
#[derive(Debug, Parser)]
#[command(name = "shorts-worker", version)]
struct Args {
    /// Video URL or path to an uploaded file
    reference: String,

    /// Directory that receives `<job-id>/<name>_partNN.mp4`
    #[arg(short, long, env = "SHORTS_OUTPUT_DIR", default_value = "./shorts")]
    output_dir: PathBuf,

    /// Maximum clip length (`SS`, `MM:SS` or `HH:MM:SS`)
    #[arg(long)]
    max_clip_duration: Option<String>,

    /// crop-fill, pad-letterbox or adaptive
    #[arg(long)]
    fit: Option<FitPolicy>,

    /// Pad fill: a color, `blur` or `blur:<sigma>`
    #[arg(long)]
    background: Option<PadBackground>,

    /// Output frame, e.g. 1080x1920
    #[arg(long)]
    resolution: Option<OutputFormat>,

    /// Scratch directory root
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Print the report as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing()?;

    info!("Starting shorts-worker");

    let mut config = WorkerConfig::from_env();
    if let Some(max) = &args.max_clip_duration {
        config.max_clip_duration =
            parse_timestamp(max).with_context(|| format!("invalid --max-clip-duration '{}'", max))?;
    }
    if let Some(fit) = args.fit {
        config.fit_policy = fit;
    }
    if let Some(background) = args.background.clone() {
        config.pad_background = background;
    }
    if let Some(resolution) = args.resolution {
        config.output_format = resolution;
    }
    if let Some(work_dir) = args.work_dir.clone() {
        config.work_dir = work_dir;
    }
    info!("Worker config: {:?}", config);

    let reference = SourceReference::parse(&args.reference)?;

    check_ffmpeg()?;
    check_ffprobe()?;
    if reference.is_remote() {
        check_ytdlp()?;
    }

    match sweep_stale(&config.work_dir, config.stale_after).await {
        Ok(0) => {}
        Ok(n) => info!("Removed {} stale scratch director(ies)", n),
        Err(e) => warn!("Stale scratch sweep failed: {}", e),
    }

    let controller = JobController::from_config(config, &args.output_dir)?;
    let handle = controller.submit(reference);
    info!(job_id = %handle.job_id(), "Job submitted");

    // Setup signal handler
    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling job");
            canceller.cancel();
        }
    });

    let report = handle.wait().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary_message());
        for path in report.ready_paths() {
            println!("  {}", path.display());
        }
        info!(job_id = %report.job_id, elapsed_secs = report.elapsed_secs(), "Job finished");
    }

    if report.state == JobState::Failed {
        error!(job_id = %report.job_id, "Job failed");
        bail!(report.error.unwrap_or_else(|| "no clip could be produced".to_string()));
    }
    Ok(())
}

/// Colored output by default, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("shorts=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}
