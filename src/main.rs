use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use uspace::error::ViewerError;
use uspace::render_graph::SoftwareBackend;
use uspace::scenes::{self, SceneKind};
use uspace::{Input, Viewer, ViewerConfig};

/// Interactive viewer for the uspace demo scenes.
///
/// Keys: `E` toggles the post-processing effects, `R` resets the camera.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Scene to mount at startup.
    #[arg(short, long, value_enum, default_value_t = SceneKind::Showcase)]
    scene: SceneKind,

    /// JSON viewer config. Unlisted fields keep their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory that scene asset paths are resolved against.
    #[arg(long)]
    assets: Option<PathBuf>,

    /// Render on the CPU reference backend and write a PNG instead of
    /// opening a window.
    #[arg(long, value_name = "PNG")]
    headless: Option<PathBuf>,

    /// Frames to render in headless mode.
    #[arg(long, default_value_t = 8)]
    frames: u64,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("uspace=info")),
        )
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "uspace exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), ViewerError> {
    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path)?,
        None => ViewerConfig::default(),
    };
    if let Some(dir) = args.assets {
        config = config.assets_dir(dir);
    }
    let width = args.width.unwrap_or(config.width);
    let height = args.height.unwrap_or(config.height);
    config = config.size(width, height);

    tracing::info!(scene = args.scene.name(), width, height, "starting");
    match args.headless {
        Some(output) => render_headless(config, args.scene, args.frames, output),
        None => uspace::run(config, args.scene),
    }
}

fn render_headless(
    config: ViewerConfig,
    scene: SceneKind,
    frames: u64,
    output: PathBuf,
) -> Result<(), ViewerError> {
    let backend = SoftwareBackend::new(config.width, config.height);
    let mut viewer = Viewer::new(backend, config);
    scenes::mount(&mut viewer, scene)?;

    let loads = viewer.wait_for_assets(Duration::from_secs(60));
    tracing::info!(applied = loads.applied, failed = loads.failed, "assets ready");

    let input = Input::new();
    let start = Instant::now();
    for i in 0..frames.max(1) {
        viewer.frame(start + Duration::from_millis(16 * i), &input)?;
    }

    if let Some(image) = viewer.backend().display() {
        image
            .to_rgba8()
            .save(&output)
            .map_err(|source| ViewerError::Output {
                path: output.clone(),
                source,
            })?;
        tracing::info!(path = %output.display(), "wrote frame");
    }
    viewer.dispose();
    Ok(())
}
