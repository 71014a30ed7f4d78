//! Command line front end: one-shot point cloud capture and interactive matcher tuning.

use std::error::Error;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;

use cv_stereo_cloud::frame::{FrameSource, PairFolder};
use cv_stereo_cloud::frontend::{spawn_command_reader, Frontend, HeadlessFrontend};
use cv_stereo_cloud::pipeline::{capture_once, ExportConfig, StereoPipeline};
use cv_stereo_cloud::ply::PlyFormat;
use cv_stereo_cloud::settings::MatcherSettings;
use cv_stereo_cloud::tuner::{Tuner, TunerConfig, DEFAULT_ACCEPTED_DEVIATION};
use cv_stereo_cloud::{calibration::StereoCalibration, MatcherKind};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Stereo disparity maps, point clouds and matcher tuning.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Capture one stereo pair and export its point cloud and/or rectified images.
    Capture(CaptureArgs),
    /// Tune the matcher parameters interactively.
    Tune(TuneArgs)
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MatcherArg {
    Bm,
    Sgbm
}

#[derive(Debug, clap::Args)]
struct SessionArgs {
    /// Calibration TOML file.
    #[arg(long)]
    calibration: PathBuf,

    /// Folder of `left*` / `right*` image files to read pairs from.
    #[arg(long)]
    pairs: PathBuf,

    /// Start over from the first pair when the folder is exhausted. Tuning always loops.
    #[arg(long = "loop")]
    looping: bool,

    #[arg(long, value_enum, default_value = "sgbm")]
    matcher: MatcherArg,

    /// Matcher settings file to start from.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Expected frame size, e.g. `640x480`.
    #[arg(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>
}

#[derive(Debug, clap::Args)]
struct OutputArgs {
    /// PLY file to write the point cloud to.
    #[arg(long)]
    point_cloud: Option<PathBuf>,

    /// Write the point cloud as binary little endian PLY.
    #[arg(long)]
    binary: bool,

    /// Folder to write the rectified pair to.
    #[arg(long)]
    image_pair: Option<PathBuf>,

    /// Drop points further away than this.
    #[arg(long)]
    max_depth: Option<f32>
}

#[derive(Debug, clap::Args)]
struct CaptureArgs {
    #[command(flatten)]
    session: SessionArgs,

    #[command(flatten)]
    output: OutputArgs
}

#[derive(Debug, clap::Args)]
struct TuneArgs {
    #[command(flatten)]
    session: SessionArgs,

    #[command(flatten)]
    output: OutputArgs,

    /// Save the final parameters here.
    #[arg(long)]
    settings_out: Option<PathBuf>,

    /// Show the rectified images beside the disparity.
    #[arg(long)]
    show_sources: bool,

    /// Average this many disparity maps into a second, smoothed view.
    #[arg(long, default_value_t = 1)]
    smoothing_window: usize,

    #[arg(long, default_value_t = DEFAULT_ACCEPTED_DEVIATION)]
    accepted_deviation: f32,

    /// Number of cycles averaged into the frame rate estimate.
    #[arg(long, default_value_t = 1)]
    latency_window: usize,

    /// Without a window, write each displayed image to this file.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Show the display in a window and tune with the keyboard.
    #[cfg(feature = "window")]
    #[arg(long)]
    window: bool,

    /// Plot the render latency to this PNG when the session ends.
    #[cfg(feature = "statistics")]
    #[arg(long)]
    latency_plot: Option<PathBuf>
}

impl MatcherArg {
    fn kind(self) -> MatcherKind {
        match self {
            MatcherArg::Bm => MatcherKind::BlockMatching,
            MatcherArg::Sgbm => MatcherKind::SemiGlobal
        }
    }
}

impl OutputArgs {
    fn export_config(&self) -> ExportConfig {
        ExportConfig {
            point_cloud: self.point_cloud.clone(),
            ply_format: if self.binary { PlyFormat::BinaryLittleEndian } else { PlyFormat::Ascii },
            image_pair_dir: self.image_pair.clone(),
            max_depth: self.max_depth
        }
    }
}

fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
    let w = w.trim().parse().map_err(|e| format!("bad width {:?}: {}", w, e))?;
    let h = h.trim().parse().map_err(|e| format!("bad height {:?}: {}", h, e))?;
    Ok((w, h))
}

fn build_pipeline(args: &SessionArgs) -> Result<StereoPipeline, Box<dyn Error>> {
    let mut calibration = StereoCalibration::load(&args.calibration)?;
    if let Some((width, height)) = args.resolution {
        calibration = calibration.with_image_size(width, height);
    }

    let mut matcher = args.matcher.kind().build();
    if let Some(path) = &args.settings {
        MatcherSettings::load(path)?.apply_to(matcher.as_mut())?;
    }

    Ok(StereoPipeline::new(calibration, matcher)?)
}

/// A tuning session keeps pulling pairs until the user ends it, so the folder never runs dry.
fn tuning_source(args: &SessionArgs) -> Result<PairFolder, Box<dyn Error>> {
    Ok(PairFolder::open(&args.pairs)?.looping(true))
}

fn capture(args: CaptureArgs) -> Result<(), Box<dyn Error>> {
    let mut pipeline = build_pipeline(&args.session)?;
    let mut source = PairFolder::open(&args.session.pairs)?.looping(args.session.looping);

    let result = capture_once(&mut source, &mut pipeline, &args.output.export_config(), POLL_INTERVAL);
    source.release();

    let summary = result?;
    println!("Exported {} points from {} pixels", summary.points, summary.pixels);
    Ok(())
}

fn tune(args: TuneArgs) -> Result<(), Box<dyn Error>> {
    let pipeline = build_pipeline(&args.session)?;
    let source = tuning_source(&args.session)?;

    let mut config = TunerConfig::default()
        .with_latency_window(args.latency_window)
        .with_smoothing(args.smoothing_window, args.accepted_deviation)
        .with_show_sources(args.show_sources)
        .with_export(args.output.export_config());
    if let Some(path) = &args.settings_out {
        config = config.with_settings_out(path);
    }
    #[cfg(feature = "statistics")]
    {
        if let Some(path) = &args.latency_plot {
            config = config.with_latency_plot(path);
        }
    }

    let tuner = Tuner::new(pipeline, Box::new(source), frontend(&args), config)?;
    let report = tuner.run()?;
    print!("{}", report);

    match report.export {
        Some(Err(e)) => Err(e.into()),
        Some(Ok(summary)) => {
            println!("Exported {} points from {} pixels", summary.points, summary.pixels);
            Ok(())
        }
        None => Ok(())
    }
}

fn frontend(args: &TuneArgs) -> Box<dyn Frontend> {
    #[cfg(feature = "window")]
    {
        if args.window {
            return Box::new(cv_stereo_cloud::window::WindowFrontend::new("Disparity tuner"));
        }
    }

    log::info!("Commands: set <name> <value> | next | up | down | capture | quit");
    let mut headless = HeadlessFrontend::new(spawn_command_reader(BufReader::new(std::io::stdin())));
    if let Some(path) = &args.preview {
        headless = headless.with_preview(path);
    }
    Box::new(headless)
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if let Err(err) = try_main() {
        log::error!("{}", describe(&*err));
        let mut cause = err.source();
        while let Some(e) = cause {
            log::error!("  caused by: {e}");
            cause = e.source();
        }
        std::process::exit(1);
    }
}

/// Prefix pipeline failures with the stage they came from.
fn describe(err: &(dyn Error + 'static)) -> String {
    match err.downcast_ref::<cv_stereo_cloud::Error>() {
        Some(e) => format!("{} stage failed: {}", e.stage(), e),
        None => err.to_string()
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    match Args::parse().command {
        Command::Capture(args) => capture(args),
        Command::Tune(args) => tune(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_parses_width_and_height() {
        assert_eq!(parse_resolution("640x480"), Ok((640, 480)));
        assert_eq!(parse_resolution("1280X720"), Ok((1280, 720)));
        assert!(parse_resolution("640").is_err());
        assert!(parse_resolution("axb").is_err());
    }

    fn session(pairs: PathBuf, looping: bool) -> SessionArgs {
        SessionArgs {
            calibration: PathBuf::from("calibration.toml"),
            pairs,
            looping,
            matcher: MatcherArg::Bm,
            settings: None,
            resolution: None
        }
    }

    #[test]
    fn tuning_reads_a_single_pair_forever() {
        let dir = tempfile::tempdir().unwrap();
        let frame = cv_stereo_cloud::test_utils::shifted_frame(32, 8, 2);
        frame.left.save(dir.path().join("left_000.png")).unwrap();
        frame.right.save(dir.path().join("right_000.png")).unwrap();

        let mut source = tuning_source(&session(dir.path().to_path_buf(), false)).unwrap();
        for _ in 0..5 {
            assert!(source.get_frame_pair().unwrap().is_some());
        }
    }

    #[test]
    fn failures_name_their_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = session(dir.path().to_path_buf(), false);
        args.calibration = dir.path().join("missing.toml");
        let err = match build_pipeline(&args) {
            Err(err) => err,
            Ok(_) => panic!("missing calibration file was accepted")
        };
        let message = describe(&*err);
        assert!(message.starts_with("calibration stage failed: "), "{}", message);

        let plain: Box<dyn Error> = "bad input".into();
        assert_eq!(describe(&*plain), "bad input");
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
