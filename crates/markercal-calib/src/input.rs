//! Frame sources: image lists, frame sequences and (unsupported) cameras.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, ImageFormat, RgbImage};
use serde_yaml::Value;

use crate::settings::strip_yaml_directives;

#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid list yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid list json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} is neither an image directory, an animated GIF nor an image")]
    NotAVideo(PathBuf),
    #[error("live camera {0} is not supported")]
    CameraUnavailable(i32),
}

/// Frames of a video-like source.
#[derive(Debug)]
pub enum FrameStore {
    /// Image files read on demand.
    Files(Vec<PathBuf>),
    /// Frames decoded up front.
    Decoded(Vec<RgbImage>),
}

impl FrameStore {
    pub fn len(&self) -> usize {
        match self {
            FrameStore::Files(f) => f.len(),
            FrameStore::Decoded(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A source of color frames.
#[derive(Debug)]
pub enum InputSource {
    /// Still images listed in a file, read in order every `skip` entries.
    ImageList {
        paths: Vec<PathBuf>,
        at: usize,
        skip: usize,
    },
    /// Video-like sequence: a directory of images, an animated GIF or a
    /// single image.
    Frames {
        store: FrameStore,
        at: usize,
        skip: usize,
    },
    Camera(i32),
}

impl InputSource {
    pub fn image_list(paths: Vec<PathBuf>, skip: usize) -> Self {
        InputSource::ImageList {
            paths,
            at: 0,
            skip: skip.max(1),
        }
    }

    pub fn camera(id: i32) -> Self {
        InputSource::Camera(id)
    }

    /// Open a video-like path. Directories yield their images sorted by file
    /// name, GIFs all of their frames, other images a single frame.
    pub fn video(path: impl AsRef<Path>, skip: usize) -> Result<Self, InputError> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = if meta.is_dir() {
            FrameStore::Files(list_image_files(path)?)
        } else {
            match ImageFormat::from_path(path) {
                Ok(ImageFormat::Gif) => FrameStore::Decoded(decode_gif(path)?),
                Ok(_) => FrameStore::Decoded(vec![read_rgb(path)?]),
                Err(_) => return Err(InputError::NotAVideo(path.to_path_buf())),
            }
        };
        if store.is_empty() {
            return Err(InputError::NotAVideo(path.to_path_buf()));
        }
        log::debug!("opened {} with {} frames", path.display(), store.len());
        Ok(InputSource::Frames {
            store,
            at: 0,
            skip: skip.max(1),
        })
    }

    /// Check that [`Self::video`] would open `path` without decoding any
    /// frame: directories must hold at least one image, files must carry a
    /// known image extension and a matching header.
    pub fn check_video(path: impl AsRef<Path>) -> Result<(), InputError> {
        let path = path.as_ref();
        let io_err = |source| InputError::Io {
            path: path.to_path_buf(),
            source,
        };
        if std::fs::metadata(path).map_err(io_err)?.is_dir() {
            if list_image_files(path)?.is_empty() {
                return Err(InputError::NotAVideo(path.to_path_buf()));
            }
            return Ok(());
        }
        ImageFormat::from_path(path).map_err(|_| InputError::NotAVideo(path.to_path_buf()))?;
        let mut head = Vec::with_capacity(64);
        File::open(path)
            .map_err(io_err)?
            .take(64)
            .read_to_end(&mut head)
            .map_err(io_err)?;
        image::guess_format(&head).map_err(|_| InputError::NotAVideo(path.to_path_buf()))?;
        Ok(())
    }

    /// Whether frames can be read. Cameras never open.
    pub fn is_opened(&self) -> bool {
        !matches!(self, InputSource::Camera(_))
    }

    /// True for capture-like sources (frame sequences and cameras).
    pub fn is_capture(&self) -> bool {
        !matches!(self, InputSource::ImageList { .. })
    }

    /// Next frame, or `None` once the source is exhausted.
    pub fn next_image(&mut self) -> Result<Option<RgbImage>, InputError> {
        match self {
            InputSource::ImageList { paths, at, skip } => {
                let Some(path) = paths.get(*at) else {
                    return Ok(None);
                };
                *at += *skip;
                read_rgb(path).map(Some)
            }
            InputSource::Frames { store, at, skip } => {
                let index = *at;
                if index >= store.len() {
                    return Ok(None);
                }
                *at += *skip;
                match store {
                    FrameStore::Files(files) => read_rgb(&files[index]).map(Some),
                    FrameStore::Decoded(frames) => Ok(Some(frames[index].clone())),
                }
            }
            InputSource::Camera(id) => Err(InputError::CameraUnavailable(*id)),
        }
    }
}

fn read_rgb(path: &Path) -> Result<RgbImage, InputError> {
    image::open(path)
        .map(|img| img.to_rgb8())
        .map_err(|source| InputError::Image {
            path: path.to_path_buf(),
            source,
        })
}

fn decode_gif(path: &Path) -> Result<Vec<RgbImage>, InputError> {
    let io_err = |source| InputError::Io {
        path: path.to_path_buf(),
        source,
    };
    let img_err = |source| InputError::Image {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(img_err)?;
    let frames = decoder.into_frames().collect_frames().map_err(img_err)?;
    Ok(frames
        .into_iter()
        .map(|f| DynamicImage::ImageRgba8(f.into_buffer()).to_rgb8())
        .collect())
}

fn list_image_files(dir: &Path) -> Result<Vec<PathBuf>, InputError> {
    let io_err = |source| InputError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && ImageFormat::from_path(&path).is_ok() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Entries of the first top-level sequence in a YAML or JSON file.
///
/// The sequence may be the document itself or the value of the first key of
/// a top-level mapping. Returns `Ok(None)` when there is no such sequence.
pub fn read_string_list(path: impl AsRef<Path>) -> Result<Option<Vec<String>>, InputError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let root: Value = if json {
        serde_json::from_str(&text)?
    } else {
        serde_yaml::from_str(&strip_yaml_directives(&text))?
    };
    let first = match &root {
        Value::Mapping(m) => m.iter().next().map(|(_, v)| v),
        other => Some(other),
    };
    let Some(Value::Sequence(items)) = first else {
        return Ok(None);
    };
    Ok(Some(
        items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
    ))
}
