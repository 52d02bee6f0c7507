//! Shared plumbing for the `aruco-demo` and `camera-calibration` binaries.

use std::path::PathBuf;

use markercal_aruco::{DictionaryError, ParamsError};
use markercal_calib::{InputError, SessionError, SettingsError};

use crate::TableError;

#[derive(thiserror::Error, Debug)]
pub enum CliError {
    #[error("Input file \"{}\" does not exist.", .0.display())]
    MissingInput(PathBuf),
    #[error("failed to install logger: {0}")]
    Logger(#[from] log::SetLoggerError),
    #[error(transparent)]
    Dictionary(#[from] DictionaryError),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("failed to write frame: {0}")]
    Frame(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Install the stderr logger at the level selected by `-v`, and the tracing
/// subscriber when requested.
pub fn init_logging(verbose: u8, tracing: bool, json: bool) -> Result<(), CliError> {
    markercal_core::init_from_verbosity(verbose)?;
    #[cfg(feature = "tracing")]
    if tracing {
        markercal_core::init_tracing(verbose, json);
    }
    #[cfg(not(feature = "tracing"))]
    if tracing || json {
        log::warn!("built without the `tracing` feature; span output is disabled");
    }
    Ok(())
}
