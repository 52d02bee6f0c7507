//! aruco-demo: detect markers frame by frame and emit the rectified table.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser};
use markercal::aruco::{
    create_dictionary, draw_markers_on_frame, load_parameters_from_file, ArucoDetector,
    DetectorParameters,
};
use markercal::calib::{
    CameraCalibration, FrameSink, InputSource, NullSink, PngSequenceSink, Settings,
};
use markercal::cli::{init_logging, CliError};
use markercal::core::GrayImage;
use markercal::Table;

const MARKER_SIZE: usize = 5;

#[derive(Parser, Debug)]
#[command(name = "aruco-demo")]
#[command(about = "Detect ArUco markers and rectify the table spanned by markers 0..3")]
#[command(version, disable_help_flag = true)]
struct Cli {
    /// Display help.
    #[arg(short = 'h', long)]
    help: bool,

    /// Input video: a directory of frames, an animated GIF or a still image.
    #[arg(short = 'i', long = "input_path")]
    input_path: Option<PathBuf>,

    /// Path to the ArUco dictionary.
    #[arg(short = 'd', long = "aruco_path")]
    aruco_path: Option<PathBuf>,

    /// Detector parameters; built-in defaults are used when the file is absent.
    #[arg(short = 'c', long, default_value = "data/config-aruco.yaml")]
    config: PathBuf,

    /// Calibration settings, used with `--undistort` to check the camera model.
    #[arg(long, default_value = "data/default.yml")]
    settings: PathBuf,

    /// Calibration result, used with `--undistort`.
    #[arg(long, default_value = "data/out_camera_data.yml")]
    calibration: PathBuf,

    /// Undistort every frame before detection.
    #[arg(long)]
    undistort: bool,

    #[arg(long, default_value_t = 1200)]
    table_width: u32,

    #[arg(long, default_value_t = 600)]
    table_height: u32,

    /// Write output frames as a PNG sequence into this directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Outline detected markers before rectification.
    #[arg(long)]
    draw_markers: bool,

    /// Outline the table before rectification.
    #[arg(long)]
    draw_table: bool,

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

#[derive(Debug, Default)]
struct RunSummary {
    frames: usize,
    markers: usize,
    table_frames: usize,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.kind() == ErrorKind::DisplayVersion => err.exit(),
        Err(err) => {
            eprintln!("FAILURE: Error while parsing options ({})", err.kind());
            return ExitCode::FAILURE;
        }
    };
    let (Some(input), Some(dictionary), false) =
        (cli.input_path.clone(), cli.aruco_path.clone(), cli.help)
    else {
        eprintln!("{}", Cli::command().render_help());
        return ExitCode::FAILURE;
    };

    match run(&cli, input, dictionary) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("FAILURE: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, input: PathBuf, dictionary: PathBuf) -> Result<(), CliError> {
    init_logging(cli.verbose, cli.tracing, cli.json_logs)?;

    if !input.exists() {
        return Err(CliError::MissingInput(input));
    }

    let mut source = InputSource::video(&input, 1)?;
    let dict = create_dictionary(&dictionary, MARKER_SIZE)?;
    let params = if cli.config.is_file() {
        load_parameters_from_file(&cli.config)?
    } else {
        log::info!(
            "detector config {} not found, using defaults",
            cli.config.display()
        );
        DetectorParameters::default()
    };
    let detector = ArucoDetector::new(dict, params)?;

    let camera = if cli.undistort {
        let settings = Settings::load(&cli.settings)?;
        let mut camera = CameraCalibration::new(&cli.settings, &cli.calibration);
        camera.load_calibration_file()?;
        let fisheye = camera.distortion().is_fisheye();
        if fisheye != settings.use_fisheye {
            log::warn!(
                "{} holds a {} calibration but {} asks for the {} model",
                cli.calibration.display(),
                model_name(fisheye),
                cli.settings.display(),
                model_name(settings.use_fisheye)
            );
        }
        log::info!(
            "undistorting with the {} model from {}",
            model_name(fisheye),
            cli.calibration.display()
        );
        Some(camera)
    } else {
        None
    };

    let mut table = Table::new(cli.table_width, cli.table_height)?;
    let mut sink: Box<dyn FrameSink> = match &cli.output {
        Some(dir) => Box::new(PngSequenceSink::new(dir)?),
        None => Box::new(NullSink),
    };

    let mut summary = RunSummary::default();
    while let Some(frame) = source.next_image()? {
        let mut frame = match &camera {
            Some(camera) => camera.get_undistorted_image(&frame),
            None => frame,
        };
        let gray = GrayImage::from_rgb(
            frame.width() as usize,
            frame.height() as usize,
            frame.as_raw(),
        );
        let detections = detector.detect(&gray.view());
        log::debug!(
            "frame {}: {} markers, {} rejected",
            summary.frames,
            detections.found.len(),
            detections.rejected.len()
        );

        table.update_table_on_frame(&detections.found);
        if cli.draw_markers {
            draw_markers_on_frame(&mut frame, &detections.found);
        }
        if cli.draw_table {
            table.draw_table_on_frame(&mut frame);
        }
        let view = table.get_table_from_frame(&frame);
        sink.push(&view)?;

        summary.frames += 1;
        summary.markers += detections.found.len();
        if table.is_valid() {
            summary.table_frames += 1;
        }
    }

    log::info!(
        "processed {} frames, {} markers, table rectified in {} frames",
        summary.frames,
        summary.markers,
        summary.table_frames
    );
    if let Some(dir) = &cli.output {
        log::info!("frames written to {}", dir.display());
    }
    Ok(())
}

fn model_name(fisheye: bool) -> &'static str {
    if fisheye {
        "fisheye"
    } else {
        "pinhole"
    }
}
