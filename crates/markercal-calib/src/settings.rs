//! Calibration settings file: loading, validation and input inference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::flags::{fisheye as fe, pinhole as ph};
use crate::input::{read_string_list, InputSource};
use crate::pattern::{BoardSize, Pattern};

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("Could not open the configuration file: \"{}\"", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid settings json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings file has no top-level `Settings` node")]
    MissingNode,
    #[error("Invalid Board size: {width} {height}")]
    InvalidBoardSize { width: i32, height: i32 },
    #[error("Invalid square size: {0}")]
    InvalidSquareSize(f32),
    #[error("Invalid number of frames: {0}")]
    InvalidFrameCount(i32),
    #[error("failed to write settings {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How frames are acquired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InputType {
    #[default]
    Invalid,
    Camera,
    VideoFile,
    ImageList,
}

/// Calibration run configuration, stored under a top-level `Settings` node.
///
/// Booleans accept `true`/`false` as well as the `0`/`1` integers written
/// by OpenCV's file storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Features per board row.
    #[serde(rename = "BoardSize_Width")]
    pub board_width: i32,
    #[serde(rename = "BoardSize_Height")]
    pub board_height: i32,
    /// Square (or circle spacing) size in user units.
    #[serde(rename = "Square_Size")]
    pub square_size: f32,
    #[serde(rename = "Calibrate_Pattern", deserialize_with = "flex_string")]
    pub pattern_to_use: String,
    #[serde(rename = "Calibrate_NrOfFrameToUse")]
    pub nr_frames: i32,
    /// Fixed `fx/fy`; 0 leaves the aspect ratio free.
    #[serde(rename = "Calibrate_FixAspectRatio")]
    pub aspect_ratio: f32,
    #[serde(
        rename = "Calibrate_AssumeZeroTangentialDistortion",
        deserialize_with = "flex_bool"
    )]
    pub calib_zero_tangent_dist: bool,
    #[serde(
        rename = "Calibrate_FixPrincipalPointAtTheCenter",
        deserialize_with = "flex_bool"
    )]
    pub calib_fix_principal_point: bool,
    #[serde(rename = "Calibrate_UseFisheyeModel", deserialize_with = "flex_bool")]
    pub use_fisheye: bool,
    #[serde(rename = "Write_DetectedFeaturePoints", deserialize_with = "flex_bool")]
    pub write_points: bool,
    #[serde(rename = "Write_extrinsicParameters", deserialize_with = "flex_bool")]
    pub write_extrinsics: bool,
    #[serde(rename = "Write_outputFileName", deserialize_with = "flex_string")]
    pub output_file_name: String,
    #[serde(rename = "Show_UndistortedImage", deserialize_with = "flex_bool")]
    pub show_undistorted: bool,
    #[serde(
        rename = "Input_FlipAroundHorizontalAxis",
        deserialize_with = "flex_bool"
    )]
    pub flip_vertical: bool,
    /// Minimum time between captured frames, in milliseconds.
    #[serde(rename = "Input_Delay")]
    pub delay: i32,
    #[serde(rename = "Input_Skip")]
    pub skip: i32,
    /// Camera id, video path or image list file.
    #[serde(rename = "Input", deserialize_with = "flex_string")]
    pub input: String,
    #[serde(rename = "Fix_K1", deserialize_with = "flex_bool")]
    pub fix_k1: bool,
    #[serde(rename = "Fix_K2", deserialize_with = "flex_bool")]
    pub fix_k2: bool,
    #[serde(rename = "Fix_K3", deserialize_with = "flex_bool")]
    pub fix_k3: bool,
    #[serde(rename = "Fix_K4", deserialize_with = "flex_bool")]
    pub fix_k4: bool,
    #[serde(rename = "Fix_K5", deserialize_with = "flex_bool")]
    pub fix_k5: bool,

    #[serde(skip)]
    pub input_type: InputType,
    #[serde(skip)]
    pub camera_id: i32,
    #[serde(skip)]
    pub image_list: Vec<PathBuf>,
    #[serde(skip)]
    pub pattern: Option<Pattern>,
    #[serde(skip)]
    pub flags: i32,
    #[serde(skip)]
    pub good_input: bool,
    /// Directory relative inputs are also looked up in.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            board_width: 0,
            board_height: 0,
            square_size: 0.0,
            pattern_to_use: String::new(),
            nr_frames: 0,
            aspect_ratio: 0.0,
            calib_zero_tangent_dist: false,
            calib_fix_principal_point: false,
            use_fisheye: false,
            write_points: false,
            write_extrinsics: false,
            output_file_name: "out_camera_data.yml".to_string(),
            show_undistorted: false,
            flip_vertical: false,
            delay: 0,
            skip: 1,
            input: String::new(),
            fix_k1: false,
            fix_k2: false,
            fix_k3: false,
            fix_k4: false,
            fix_k5: false,
            input_type: InputType::Invalid,
            camera_id: 0,
            image_list: Vec::new(),
            pattern: None,
            flags: 0,
            good_input: false,
            base_dir: None,
        }
    }
}

#[derive(Deserialize)]
struct SettingsDocument {
    #[serde(rename = "Settings")]
    settings: Option<Settings>,
}

#[derive(Serialize)]
struct SettingsDocumentRef<'a> {
    #[serde(rename = "Settings")]
    settings: &'a Settings,
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Drop `%YAML:1.0`-style directive lines, which `serde_yaml` rejects.
pub(crate) fn strip_yaml_directives(text: &str) -> String {
    text.lines()
        .filter(|l| !l.trim_start().starts_with('%'))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Settings {
    /// Read the `Settings` node of a YAML or JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut settings = Self::parse(&text, is_json(path))?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        settings.validate()?;
        Ok(settings)
    }

    /// Parse without validating.
    pub fn parse(text: &str, json: bool) -> Result<Self, SettingsError> {
        let doc: SettingsDocument = if json {
            serde_json::from_str(text)?
        } else {
            serde_yaml::from_str(&strip_yaml_directives(text))?
        };
        doc.settings.ok_or(SettingsError::MissingNode)
    }

    /// Check the values and derive the input type, image list, pattern and
    /// calibration flags.
    ///
    /// Board, square and frame-count problems are errors. A missing input,
    /// a non-positive skip or an unknown pattern only clear
    /// [`Settings::good_input`].
    pub fn validate(&mut self) -> Result<(), SettingsError> {
        self.good_input = true;
        if self.board_width <= 0 || self.board_height <= 0 {
            self.good_input = false;
            return Err(SettingsError::InvalidBoardSize {
                width: self.board_width,
                height: self.board_height,
            });
        }
        if self.square_size <= 10e-6 {
            self.good_input = false;
            return Err(SettingsError::InvalidSquareSize(self.square_size));
        }
        if self.nr_frames <= 0 {
            self.good_input = false;
            return Err(SettingsError::InvalidFrameCount(self.nr_frames));
        }

        self.infer_input();
        if self.input_type == InputType::Invalid {
            log::error!("Input does not exist: {}", self.input);
            self.good_input = false;
        }
        if self.skip <= 0 {
            log::error!("Skip value must be greater than 0");
            self.good_input = false;
        }

        self.flags = self.build_flags();

        self.pattern = self.pattern_to_use.trim().parse().ok();
        if self.pattern.is_none() {
            log::error!(
                "Camera calibration mode does not exist: {}",
                self.pattern_to_use
            );
            self.good_input = false;
        }
        Ok(())
    }

    fn infer_input(&mut self) {
        self.image_list.clear();
        let input = self.input.trim().to_string();
        if input.is_empty() {
            self.input_type = InputType::Invalid;
            return;
        }
        if input.starts_with(|c: char| c.is_ascii_digit()) {
            let digits: String = input.chars().take_while(char::is_ascii_digit).collect();
            self.camera_id = digits.parse().unwrap_or(0);
            self.input_type = InputType::Camera;
        } else {
            let path = self.resolve(&input);
            match is_list_of_images(&path)
                .then(|| read_string_list(&path).ok().flatten())
                .flatten()
            {
                Some(entries) => {
                    let dir = path.parent().map(Path::to_path_buf);
                    self.image_list = entries
                        .iter()
                        .map(|e| resolve_against(e, dir.as_deref()))
                        .collect();
                    self.nr_frames = self.nr_frames.min(self.image_list.len() as i32);
                    self.input_type = InputType::ImageList;
                }
                None => self.input_type = InputType::VideoFile,
            }
        }

        let opened = match self.input_type {
            InputType::Camera => InputSource::camera(self.camera_id).is_opened(),
            InputType::VideoFile => match InputSource::check_video(self.resolve(&input)) {
                Ok(()) => true,
                Err(err) => {
                    log::debug!("input {input} is not a readable video: {err}");
                    false
                }
            },
            _ => true,
        };
        if !opened {
            self.input_type = InputType::Invalid;
        }
    }

    fn build_flags(&self) -> i32 {
        if self.use_fisheye {
            let mut flag = fe::FIX_SKEW | fe::RECOMPUTE_EXTRINSIC;
            for (on, bit) in [
                (self.fix_k1, fe::FIX_K1),
                (self.fix_k2, fe::FIX_K2),
                (self.fix_k3, fe::FIX_K3),
                (self.fix_k4, fe::FIX_K4),
                (self.calib_fix_principal_point, fe::FIX_PRINCIPAL_POINT),
            ] {
                if on {
                    flag |= bit;
                }
            }
            return flag;
        }
        let mut flag = 0;
        for (on, bit) in [
            (self.calib_fix_principal_point, ph::FIX_PRINCIPAL_POINT),
            (self.calib_zero_tangent_dist, ph::ZERO_TANGENT_DIST),
            (self.aspect_ratio != 0.0, ph::FIX_ASPECT_RATIO),
            (self.fix_k1, ph::FIX_K1),
            (self.fix_k2, ph::FIX_K2),
            (self.fix_k3, ph::FIX_K3),
            (self.fix_k4, ph::FIX_K4),
            (self.fix_k5, ph::FIX_K5),
        ] {
            if on {
                flag |= bit;
            }
        }
        flag
    }

    /// Path of `input`, preferring the settings file's directory when the
    /// entry exists there.
    pub fn resolve(&self, input: &str) -> PathBuf {
        resolve_against(input, self.base_dir.as_deref())
    }

    pub fn board_size(&self) -> BoardSize {
        BoardSize::new(
            self.board_width.max(0) as usize,
            self.board_height.max(0) as usize,
        )
    }

    /// Human readable list of the active flags, as written next to `flags`
    /// in calibration files. `None` when no flag is set.
    pub fn flags_comment(&self) -> Option<String> {
        if self.flags == 0 {
            return None;
        }
        let f = self.flags;
        let mut s = String::from("flags:");
        let names: &[(i32, &str)] = if self.use_fisheye {
            &[
                (fe::FIX_SKEW, " +fix_skew"),
                (fe::FIX_K1, " +fix_k1"),
                (fe::FIX_K2, " +fix_k2"),
                (fe::FIX_K3, " +fix_k3"),
                (fe::FIX_K4, " +fix_k4"),
                (fe::RECOMPUTE_EXTRINSIC, " +recompute_extrinsic"),
            ]
        } else {
            &[
                (ph::USE_INTRINSIC_GUESS, " +use_intrinsic_guess"),
                (ph::FIX_ASPECT_RATIO, " +fix_aspectRatio"),
                (ph::FIX_PRINCIPAL_POINT, " +fix_principal_point"),
                (ph::ZERO_TANGENT_DIST, " +zero_tangent_dist"),
                (ph::FIX_K1, " +fix_k1"),
                (ph::FIX_K2, " +fix_k2"),
                (ph::FIX_K3, " +fix_k3"),
                (ph::FIX_K4, " +fix_k4"),
                (ph::FIX_K5, " +fix_k5"),
            ]
        };
        for (bit, name) in names {
            if f & bit != 0 {
                s.push_str(name);
            }
        }
        Some(s)
    }

    /// Serialize as YAML under a `Settings` node.
    pub fn to_yaml(&self) -> Result<String, SettingsError> {
        let body = serde_yaml::to_string(&SettingsDocumentRef { settings: self })?;
        Ok(format!("%YAML:1.0\n---\n{body}"))
    }

    /// Write the settings back, YAML or JSON by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let text = if is_json(path) {
            serde_json::to_string_pretty(&SettingsDocumentRef { settings: self })?
        } else {
            self.to_yaml()?
        };
        std::fs::write(path, text).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn is_list_of_images(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref(),
        Some("xml" | "yaml" | "yml" | "json")
    )
}

fn resolve_against(entry: &str, dir: Option<&Path>) -> PathBuf {
    let p = Path::new(entry);
    if p.is_relative() {
        if let Some(dir) = dir {
            let joined = dir.join(p);
            if joined.exists() {
                return joined;
            }
        }
    }
    p.to_path_buf()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

fn flex_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Scalar::deserialize(d)? {
        Scalar::Bool(b) => b,
        Scalar::Int(i) => i != 0,
        Scalar::Float(f) => f != 0.0,
        Scalar::Str(s) => matches!(s.trim(), "1" | "true" | "True" | "TRUE"),
    })
}

fn flex_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Scalar::deserialize(d)? {
        Scalar::Bool(b) => b.to_string(),
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Str(s) => s,
    })
}
