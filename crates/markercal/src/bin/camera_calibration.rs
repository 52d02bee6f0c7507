//! camera-calibration: run a calibration session described by a settings file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use markercal::calib::{CameraCalibration, FrameSink, Mode, NullSink, PngSequenceSink, Settings};
use markercal::cli::{init_logging, CliError};

#[derive(Parser, Debug)]
#[command(name = "camera-calibration")]
#[command(about = "Calibrate a camera from chessboard or circle-grid views")]
#[command(version)]
struct Cli {
    /// Settings file (YAML or JSON).
    #[arg(default_value = "default.yml")]
    settings: PathBuf,

    /// Existing calibration result, read when undistorting without calibrating.
    #[arg(long, default_value = "out_camera_data.yml")]
    calibration: PathBuf,

    /// Write annotated frames as a PNG sequence into this directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the validated settings as YAML and exit.
    #[arg(long)]
    print_settings: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Emit tracing spans (requires the `tracing` feature).
    #[arg(long)]
    tracing: bool,

    /// Emit tracing output as JSON.
    #[arg(long)]
    json_logs: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("FAILURE: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), CliError> {
    init_logging(cli.verbose, cli.tracing, cli.json_logs)?;

    if cli.print_settings {
        let settings = Settings::load(&cli.settings)?;
        print!("{}", settings.to_yaml()?);
        return Ok(());
    }

    let mut sink: Box<dyn FrameSink> = match &cli.output {
        Some(dir) => Box::new(PngSequenceSink::new(dir)?),
        None => Box::new(NullSink),
    };
    let mut session = CameraCalibration::new(&cli.settings, &cli.calibration);
    let summary = session.init(sink.as_mut())?;

    match (summary.mode, summary.avg_reprojection_error) {
        (Mode::Calibrated, Some(err)) => log::info!(
            "calibrated from {} views, avg re projection error = {err:.4}",
            summary.views_captured
        ),
        (mode, _) => log::warn!(
            "finished in {mode:?} mode after {} frames without a calibration",
            summary.frames
        ),
    }
    Ok(())
}
