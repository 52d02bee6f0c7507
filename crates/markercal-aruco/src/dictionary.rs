//! Marker dictionaries loaded from files.
//!
//! Two on-disk formats are understood:
//!
//! - OpenCV-style YAML (`.yml`/`.yaml`) with `nmarkers`, `markersize`,
//!   optional `maxCorrectionBits` and one `marker_<i>` bit string per marker;
//! - plain text, one bit string per line, `#` comments and blank lines ignored.
//!
//! Bit strings are row-major, `1` = white cell.

use std::path::{Path, PathBuf};

use markercal_core::GrayImage;
use serde_yaml::Value;

use crate::matcher::rotate_code_u64;

/// Largest supported marker side: codes are packed into a `u64`.
pub const MAX_MARKER_SIZE: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum DictionaryError {
    #[error("failed to read dictionary {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid dictionary yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("marker size {0} is not supported (1..={MAX_MARKER_SIZE})")]
    UnsupportedMarkerSize(usize),
    #[error("marker {index} has {found} bits, expected {expected}")]
    BitCount {
        index: usize,
        found: usize,
        expected: usize,
    },
    #[error("marker {index}: invalid bit character {ch:?}")]
    InvalidBit { index: usize, ch: char },
    #[error("dictionary declares marker size {declared}, requested {requested}")]
    MarkerSizeMismatch { declared: usize, requested: usize },
    #[error("missing key `{0}`")]
    MissingKey(String),
    #[error("dictionary contains no markers")]
    Empty,
}

/// A set of square binary markers with `marker_size × marker_size` inner bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dictionary {
    /// Human-readable name, usually the file stem.
    pub name: String,
    pub marker_size: usize,
    /// Number of bit errors the dictionary can correct unambiguously.
    pub max_correction_bits: u8,
    /// One code per marker id, bit `y * marker_size + x` set for white cells.
    pub codes: Vec<u64>,
}

impl Dictionary {
    /// Build a dictionary and derive `max_correction_bits` from the codes.
    pub fn new(
        name: impl Into<String>,
        marker_size: usize,
        codes: Vec<u64>,
    ) -> Result<Self, DictionaryError> {
        if marker_size == 0 || marker_size > MAX_MARKER_SIZE {
            return Err(DictionaryError::UnsupportedMarkerSize(marker_size));
        }
        if codes.is_empty() {
            return Err(DictionaryError::Empty);
        }
        let min_distance = min_inter_marker_distance(&codes, marker_size);
        Ok(Self {
            name: name.into(),
            marker_size,
            max_correction_bits: (min_distance.saturating_sub(1) / 2) as u8,
            codes,
        })
    }

    #[inline]
    pub fn bit_count(&self) -> usize {
        self.marker_size * self.marker_size
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Parse the plain-text format.
    pub fn parse_text(
        name: &str,
        text: &str,
        marker_size: usize,
    ) -> Result<Self, DictionaryError> {
        let mut codes = Vec::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            codes.push(parse_bits(line, codes.len(), marker_size)?);
        }
        Self::new(name, marker_size, codes)
    }

    /// Parse the OpenCV-style YAML format.
    pub fn parse_yaml(
        name: &str,
        text: &str,
        marker_size: usize,
    ) -> Result<Self, DictionaryError> {
        let body = strip_yaml_directives(text);
        let root: Value = serde_yaml::from_str(&body)?;

        if let Some(declared) = root.get("markersize").and_then(Value::as_u64) {
            if declared as usize != marker_size {
                return Err(DictionaryError::MarkerSizeMismatch {
                    declared: declared as usize,
                    requested: marker_size,
                });
            }
        }
        let count = root
            .get("nmarkers")
            .and_then(Value::as_u64)
            .ok_or_else(|| DictionaryError::MissingKey("nmarkers".into()))?
            as usize;

        let mut codes = Vec::with_capacity(count);
        for i in 0..count {
            let key = format!("marker_{i}");
            let bits = match root.get(key.as_str()) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => return Err(DictionaryError::MissingKey(key)),
            };
            codes.push(parse_bits(bits.trim(), i, marker_size)?);
        }

        let mut dict = Self::new(name, marker_size, codes)?;
        if let Some(bits) = root.get("maxCorrectionBits").and_then(Value::as_u64) {
            dict.max_correction_bits = bits.min(u8::MAX as u64) as u8;
        }
        Ok(dict)
    }

    /// Render marker `id` as a gray image with a black border of
    /// `border_bits` cells, `cell_px` pixels per cell.
    pub fn marker_image(&self, id: usize, cell_px: usize, border_bits: usize) -> Option<GrayImage> {
        let code = *self.codes.get(id)?;
        let n = self.marker_size;
        let cells = n + 2 * border_bits;
        let side = cells * cell_px;
        let mut img = GrayImage::new(side, side);
        for cy in 0..cells {
            for cx in 0..cells {
                let inner = cx >= border_bits
                    && cy >= border_bits
                    && cx < border_bits + n
                    && cy < border_bits + n;
                let white = inner && {
                    let idx = (cy - border_bits) * n + (cx - border_bits);
                    (code >> idx) & 1 == 1
                };
                if !white {
                    continue;
                }
                for y in cy * cell_px..(cy + 1) * cell_px {
                    for x in cx * cell_px..(cx + 1) * cell_px {
                        img.set(x, y, 255);
                    }
                }
            }
        }
        Some(img)
    }
}

/// Load a dictionary file whose markers have `marker_size × marker_size` bits.
pub fn create_dictionary(
    path: impl AsRef<Path>,
    marker_size: usize,
) -> Result<Dictionary, DictionaryError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| DictionaryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dictionary".to_string());

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );
    let dict = if is_yaml {
        Dictionary::parse_yaml(&name, &text, marker_size)?
    } else {
        Dictionary::parse_text(&name, &text, marker_size)?
    };
    log::debug!(
        "loaded dictionary {} with {} markers ({}x{}, corrects {} bits)",
        dict.name,
        dict.len(),
        marker_size,
        marker_size,
        dict.max_correction_bits
    );
    Ok(dict)
}

/// Remove `%YAML:1.0` style directive lines emitted by OpenCV.
pub(crate) fn strip_yaml_directives(text: &str) -> String {
    text.lines()
        .filter(|l| !l.trim_start().starts_with('%'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_bits(s: &str, index: usize, marker_size: usize) -> Result<u64, DictionaryError> {
    let expected = marker_size * marker_size;
    let bits: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    if bits.len() != expected {
        return Err(DictionaryError::BitCount {
            index,
            found: bits.len(),
            expected,
        });
    }
    let mut code = 0u64;
    for (i, ch) in bits.into_iter().enumerate() {
        match ch {
            '1' => code |= 1 << i,
            '0' => {}
            ch => return Err(DictionaryError::InvalidBit { index, ch }),
        }
    }
    Ok(code)
}

/// Smallest Hamming distance between any two markers (under rotation) and
/// between each marker and its own non-trivial rotations.
fn min_inter_marker_distance(codes: &[u64], n: usize) -> u32 {
    let mut best = (n * n) as u32;
    for (i, &a) in codes.iter().enumerate() {
        for rot in 1..4u8 {
            best = best.min((a ^ rotate_code_u64(a, n, rot)).count_ones());
        }
        for &b in &codes[i + 1..] {
            for rot in 0..4u8 {
                best = best.min((a ^ rotate_code_u64(b, n, rot)).count_ones());
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "\
# two 3x3 markers
101 010 111

000 111 001   # second marker
";

    #[test]
    fn parses_text_format_with_comments() {
        let dict = Dictionary::parse_text("t", TEXT, 3).expect("parse");
        assert_eq!(dict.len(), 2);
        // bit 0 = first char
        assert_eq!(dict.codes[0] & 1, 1);
        assert_eq!((dict.codes[0] >> 1) & 1, 0);
        assert_eq!(dict.codes[1], 0b100_111_000);
    }

    #[test]
    fn rejects_wrong_bit_count() {
        let err = Dictionary::parse_text("t", "1010", 3).unwrap_err();
        assert!(matches!(
            err,
            DictionaryError::BitCount {
                index: 0,
                found: 4,
                expected: 9
            }
        ));
    }

    #[test]
    fn rejects_invalid_characters_and_empty_input() {
        assert!(matches!(
            Dictionary::parse_text("t", "10x010111", 3),
            Err(DictionaryError::InvalidBit { ch: 'x', .. })
        ));
        assert!(matches!(
            Dictionary::parse_text("t", "# nothing\n", 3),
            Err(DictionaryError::Empty)
        ));
    }

    #[test]
    fn parses_opencv_yaml() {
        let yaml = "%YAML:1.0\n---\nnmarkers: 2\nmarkersize: 3\nmaxCorrectionBits: 1\n\
                    marker_0: \"101010111\"\nmarker_1: \"000111001\"\n";
        let dict = Dictionary::parse_yaml("y", yaml, 3).expect("yaml");
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.max_correction_bits, 1);
        let plain = Dictionary::parse_text("t", TEXT, 3).expect("text");
        assert_eq!(dict.codes, plain.codes);
    }

    #[test]
    fn yaml_marker_size_must_match() {
        let yaml = "nmarkers: 1\nmarkersize: 4\nmarker_0: \"1111000011110000\"\n";
        assert!(matches!(
            Dictionary::parse_yaml("y", yaml, 5),
            Err(DictionaryError::MarkerSizeMismatch {
                declared: 4,
                requested: 5
            })
        ));
    }

    #[test]
    fn correction_bits_follow_min_distance() {
        // Two 2x2 markers far apart; rotations of 0b0001 differ from itself by 2 bits.
        let dict = Dictionary::new("d", 2, vec![0b0001, 0b1110]).expect("dict");
        assert_eq!(dict.max_correction_bits, 0);
        // Two adjacent white cells sit 4 bits away from each of their rotations.
        let single = Dictionary::new("d", 3, vec![0b11]).expect("dict");
        assert_eq!(single.max_correction_bits, 1);
    }

    #[test]
    fn loads_from_file_by_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let txt = dir.path().join("dict.txt");
        std::fs::write(&txt, TEXT).expect("write");
        let dict = create_dictionary(&txt, 3).expect("load");
        assert_eq!(dict.name, "dict");
        assert!(matches!(
            create_dictionary(dir.path().join("missing.txt"), 3),
            Err(DictionaryError::Io { .. })
        ));
    }

    #[test]
    fn marker_image_has_black_border() {
        let dict = Dictionary::new("d", 2, vec![0b1111]).expect("dict");
        let img = dict.marker_image(0, 2, 1).expect("image");
        assert_eq!(img.width, 8);
        assert_eq!(img.get(0, 0), 0);
        assert_eq!(img.get(3, 3), 255);
        assert!(dict.marker_image(1, 2, 1).is_none());
    }
}
