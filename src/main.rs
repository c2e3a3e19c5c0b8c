use std::{
    cell::Cell,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;

use ent_export::{
    ExportConfig, Exporter, Overrides, RenderOptions,
    codec::{open_entry_backend, open_mp4_backend},
    project::RandomIds,
    project::descriptor::{ANSWER_VARIABLE, TIMER_VARIABLE},
    scene::{Silence, SpinningSquare},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Target {
    /// Project archive: PNG frames, MP3 sound, project.json.
    Entry,
    /// Single MP4 file.
    Mp4,
}

#[derive(Parser, Debug)]
#[command(name = "ent-export", version)]
struct Cli {
    /// What to produce.
    #[arg(value_enum)]
    target: Target,

    /// Export configuration JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output path.
    #[arg(short, long)]
    out: PathBuf,

    /// Take the duration from this audio file.
    #[arg(long)]
    audio: Option<PathBuf>,

    #[arg(long)]
    name: Option<String>,

    /// Seconds.
    #[arg(long)]
    duration: Option<f64>,

    #[arg(long)]
    fps: Option<f64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Emit the generic operator blocks instead of the legacy ones.
    #[arg(long, default_value_t = false)]
    generic_blocks: bool,
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_export", log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    ffmpeg_export::init()?;
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ExportConfig::load(path)?,
        None => ExportConfig::default(),
    };
    config.apply(&Overrides {
        name: cli.name.clone(),
        duration: cli.duration,
        framerate: cli.fps,
        width: cli.width,
        height: cli.height,
        use_dummy_code: cli.generic_blocks.then_some(false),
    });
    if let Some(audio) = &cli.audio {
        config.duration_from_audio(audio)?;
    }
    config.validate()?;

    let cancel = CancellationToken::new();
    let export = run(&cli, &config, cancel.clone());
    tokio::pin!(export);
    let bytes = loop {
        tokio::select! {
            result = &mut export => break result?,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                log::warn!("interrupted, cancelling export");
                cancel.cancel();
            },
        }
    };

    write_output(&cli.out, &bytes)?;
    log::info!("wrote {} ({} bytes)", cli.out.display(), bytes.len());
    Ok(())
}

async fn run(cli: &Cli, config: &ExportConfig, cancel: CancellationToken) -> anyhow::Result<Vec<u8>> {
    let options = &config.render;
    let mut frames = SpinningSquare::new(options.video.width, options.video.height);
    let mut audio = Silence::new(options.audio.sample_rate, options.audio.channels)
        .with_format(options.audio.format);
    let exporter = Exporter::new(options, cancel).on_progress(progress_logger());

    match cli.target {
        Target::Entry => {
            let (encoder, muxer) = open_entry_backend(options, &config.project_audio_codec)?;
            let mut ids = RandomIds::new().reserve([TIMER_VARIABLE.0, ANSWER_VARIABLE.0]);
            let export = exporter
                .entry(&mut frames, &mut audio, encoder, muxer, &mut ids)
                .await?;
            log_summary(options, export.stats.frame_count);
            Ok(export.archive)
        }
        Target::Mp4 => {
            let (video, sound, muxer) = open_mp4_backend(
                options,
                &config.video_codec,
                &config.audio_codec,
                &config.container,
            )?;
            let export = exporter
                .mp4(&mut frames, &mut audio, video, sound, muxer)
                .await?;
            log_summary(options, export.stats.frame_count);
            Ok(export.container.to_vec())
        }
    }
}

/// Logs every crossed 10% step once.
fn progress_logger() -> impl Fn(f64) {
    let last = Cell::new(0u32);
    move |fraction| {
        let step = (fraction * 10.0).floor() as u32;
        if step > last.get() {
            last.set(step);
            log::info!("progress {}%", step * 10);
        }
    }
}

fn log_summary(options: &RenderOptions, frames: u64) {
    log::info!(
        "{}: {} frames at {} fps, {:.3}s",
        options.name,
        frames,
        options.video.framerate,
        options.duration
    );
}

fn write_output(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write '{}'", path.display()))
}
