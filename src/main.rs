use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use danmaku_overlay::config::{load_config, OverlayConfig};
use danmaku_overlay::preview::{build_glyphs, parse_size, run_preview, PreviewOptions};
use danmaku_overlay::script::parse_script;

#[derive(Debug, Parser)]
#[command(name = "danmaku")]
#[command(about = "Danmaku comment overlay renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate an overlay config file.
    Check { config: PathBuf },
    /// Replay a comment script and write the overlay frames.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// JSON-lines comment script.
    script: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    /// TTF/OTF font. Without one, comments are drawn as monospace cell boxes.
    #[arg(long)]
    font: Option<PathBuf>,
    #[arg(long, default_value = "1280x720")]
    size: String,
    /// Seconds to render. Defaults to the last comment's crossing.
    #[arg(long)]
    duration: Option<f32>,
    #[arg(long, default_value_t = 60)]
    fps: u32,
    #[arg(long = "frames-dir")]
    frames_dir: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    every: u32,
    /// Encode through ffmpeg. `.mov` keeps alpha.
    #[arg(long)]
    video: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { config } => run_check(&config),
        Commands::Render(args) => run_render(args),
    }
}

fn run_check(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    println!(
        "OK: {} (font {}px, {:?} lanes, {} ms/frame, cap {})",
        config_path.display(),
        config.font_size,
        config.lane_policy,
        config.frame_interval_ms,
        config.max_comments
    );
    Ok(())
}

fn run_render(args: RenderArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => OverlayConfig::default(),
    };
    let (width, height) = parse_size(&args.size)?;
    let raw = fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read script {}", args.script.display()))?;
    let script = parse_script(&raw)
        .with_context(|| format!("invalid script {}", args.script.display()))?;
    let glyphs = build_glyphs(&config, args.font.as_deref())?;

    let duration_ms = match args.duration {
        Some(seconds) if !seconds.is_finite() || seconds <= 0.0 => {
            anyhow::bail!("--duration must be > 0, got {seconds}")
        }
        Some(seconds) => Some((seconds * 1000.0).round() as u64),
        None => None,
    };
    let options = PreviewOptions {
        width,
        height,
        fps: args.fps,
        duration_ms,
        frames_dir: args.frames_dir.clone(),
        every: args.every,
        video: args.video.clone(),
    };

    let summary = run_preview(&config, glyphs, &script, &options)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Rendered {} frames ({}x{} @ {} fps)",
            summary.frame_count, summary.width, summary.height, summary.fps
        );
        println!(
            "Comments: {} submitted, {} dropped, peak {} live",
            summary.comments_submitted, summary.comments_dropped, summary.peak_live
        );
        println!("Last frame sha256: {}", summary.frame_hash);
        if let Some(dir) = &args.frames_dir {
            println!("Wrote {} frames to {}", summary.frames_written, dir.display());
        }
        if let Some(video) = &args.video {
            println!("Wrote {}", video.display());
        }
    }
    Ok(())
}
