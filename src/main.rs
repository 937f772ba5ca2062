//! Oxidized-Runahead - run-ahead frontend for libretro cores
//!
//! Main entry point for the frontend application.

use anyhow::Context;
use clap::Parser;
use oc_core::{Config, CoreSource, GameInfo};
use oc_integration::FrontendRunner;
use oc_loader::{LibretroCore, LibretroLoader};
use std::path::PathBuf;

/// Run a libretro core with run-ahead latency reduction
#[derive(Debug, Parser)]
#[command(name = "oxidized-runahead", version)]
struct Args {
    /// Path to the core's shared library
    core: PathBuf,

    /// Content to load, omitted for cores that start without content
    content: Option<PathBuf>,

    /// Frames to run ahead, 0 turns run-ahead off
    #[arg(long)]
    frames: Option<u32>,

    /// Roll the primary instance back instead of using a second instance
    #[arg(long)]
    single: bool,

    /// Stop after this many frames
    #[arg(long)]
    run: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (mut config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e.to_string())),
    };
    oc_core::logging::init(&config.debug);
    if let Some(e) = load_error {
        tracing::warn!("Failed to load config, using defaults: {}", e);
    }

    tracing::info!("Starting Oxidized-Runahead");

    if let Some(frames) = args.frames {
        config.runahead.enabled = frames > 0;
        config.runahead.frames = frames;
    }
    if args.single {
        config.runahead.secondary_instance = false;
    }

    let core = LibretroCore::open(&args.core)
        .with_context(|| format!("failed to open core {}", args.core.display()))?;
    let info = core.system_info();
    tracing::info!("Loaded {} {}", info.library_name, info.library_version);

    let game = match &args.content {
        Some(path) if info.need_fullpath => Some(GameInfo::from_path(path)),
        Some(path) => Some(
            GameInfo::from_file(path)
                .with_context(|| format!("failed to read content {}", path.display()))?,
        ),
        None => None,
    };
    let source = CoreSource {
        library_path: args.core.clone(),
        game,
    };

    let mut runner = FrontendRunner::new(config, Box::new(core), source, Box::new(LibretroLoader))?;
    runner.start()?;

    while !runner.is_stopped() {
        runner.run_frame()?;
        if args.run.is_some_and(|limit| runner.frame_count() >= limit) {
            runner.stop()?;
        }
    }

    let stats = runner.runahead_stats();
    tracing::info!(
        "Ran {} frames ({} speculative, {} resyncs, {} saves, {} loads)",
        stats.frames,
        stats.speculative_frames,
        stats.resyncs,
        stats.saves,
        stats.loads
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_args_parse_flags() {
        let args = Args::try_parse_from([
            "oxidized-runahead",
            "cores/sim_libretro.so",
            "roms/game.bin",
            "--frames",
            "2",
            "--single",
            "--run",
            "600",
        ])
        .unwrap();

        assert_eq!(args.core, PathBuf::from("cores/sim_libretro.so"));
        assert_eq!(args.content, Some(PathBuf::from("roms/game.bin")));
        assert_eq!(args.frames, Some(2));
        assert!(args.single);
        assert_eq!(args.run, Some(600));
    }

    #[test]
    fn test_args_content_optional() {
        let args = Args::try_parse_from(["oxidized-runahead", "core.so"]).unwrap();
        assert_eq!(args.content, None);
        assert_eq!(args.frames, None);
        assert!(!args.single);
    }

    #[test]
    fn test_help_is_not_a_core_path() {
        let err = Args::try_parse_from(["oxidized-runahead", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_core_is_required() {
        let err = Args::try_parse_from(["oxidized-runahead"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
