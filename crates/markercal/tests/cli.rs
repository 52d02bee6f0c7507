use std::path::{Path, PathBuf};

use assert_cmd::Command;
use markercal::aruco::create_dictionary;
use markercal::core::GrayImage;
use predicates::prelude::*;

fn data(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../data")
        .join(name)
}

/// A light frame with markers 0..3 in its corners, 10 px per cell.
fn write_marker_frame(dir: &Path) -> PathBuf {
    let dict = create_dictionary(data("aruco-dict.yml"), 5).expect("dictionary");
    let mut canvas = GrayImage::filled(400, 300, 230);
    for (id, (x0, y0)) in [(20, 20), (310, 20), (310, 210), (20, 210)]
        .into_iter()
        .enumerate()
    {
        let marker = dict.marker_image(id, 10, 1).expect("marker");
        for y in 0..marker.height {
            for x in 0..marker.width {
                canvas.set(x0 + x, y0 + y, marker.get(x, y));
            }
        }
    }
    let frames = dir.join("frames");
    std::fs::create_dir_all(&frames).expect("mkdir");
    let rgb = image::RgbImage::from_fn(400, 300, |x, y| {
        let v = canvas.get(x as usize, y as usize);
        image::Rgb([v, v, v])
    });
    rgb.save(frames.join("0000.png")).expect("save frame");
    rgb.save(frames.join("0001.png")).expect("save frame");
    frames
}

#[test]
fn aruco_demo_without_input_prints_help_and_fails() {
    Command::cargo_bin("aruco-demo")
        .expect("binary")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--input_path"));
}

#[test]
fn aruco_demo_reports_missing_input() {
    Command::cargo_bin("aruco-demo")
        .expect("binary")
        .args(["-i", "does/not/exist.gif", "-d"])
        .arg(data("aruco-dict.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "FAILURE: Input file \"does/not/exist.gif\" does not exist.",
        ));
}

#[test]
fn aruco_demo_rejects_unknown_options() {
    Command::cargo_bin("aruco-demo")
        .expect("binary")
        .arg("--no-such-flag")
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("FAILURE: Error while parsing options"));
}

#[test]
fn aruco_demo_writes_rectified_tables() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames = write_marker_frame(dir.path());
    let out = dir.path().join("out");

    Command::cargo_bin("aruco-demo")
        .expect("binary")
        .arg("-i")
        .arg(&frames)
        .arg("-d")
        .arg(data("aruco-dict.yml"))
        .arg("-c")
        .arg(data("config-aruco.yaml"))
        .args(["--table-width", "120", "--table-height", "60", "--draw-table"])
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    for name in ["frame_00000.png", "frame_00001.png"] {
        let img = image::open(out.join(name)).expect("output frame");
        assert_eq!((img.width(), img.height()), (120, 60));
    }
}

#[test]
fn shipped_calibration_sample_loads() {
    let (k, d) = markercal::calib::load_calibration_file(data("out_camera_data.yml"))
        .expect("sample calibration");
    assert!(!d.is_fisheye());
    assert!(d.is_finite());
    assert!(k.fx > 0.0 && k.fy > 0.0);
}

#[test]
fn aruco_demo_undistorts_with_default_data() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames = write_marker_frame(dir.path());
    let out = dir.path().join("out");

    Command::cargo_bin("aruco-demo")
        .expect("binary")
        .current_dir(Path::new(env!("CARGO_MANIFEST_DIR")).join("../.."))
        .arg("-i")
        .arg(&frames)
        .args(["-d", "data/aruco-dict.yml", "--undistort"])
        .arg("-o")
        .arg(&out)
        .assert()
        .success();

    assert!(out.join("frame_00000.png").is_file());
    assert!(out.join("frame_00001.png").is_file());
}

#[test]
fn aruco_demo_undistort_needs_readable_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let frames = write_marker_frame(dir.path());

    Command::cargo_bin("aruco-demo")
        .expect("binary")
        .arg("-i")
        .arg(&frames)
        .arg("-d")
        .arg(data("aruco-dict.yml"))
        .arg("--undistort")
        .arg("--settings")
        .arg(dir.path().join("missing.yml"))
        .arg("--calibration")
        .arg(data("out_camera_data.yml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "FAILURE: Could not open the configuration file",
        ));
}

#[test]
fn camera_calibration_reports_unreadable_settings() {
    let dir = tempfile::tempdir().expect("tempdir");
    Command::cargo_bin("camera-calibration")
        .expect("binary")
        .current_dir(dir.path())
        .arg("missing.yml")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "FAILURE: Could not open the configuration file: \"missing.yml\"",
        ));
}

#[test]
fn camera_calibration_prints_settings() {
    Command::cargo_bin("camera-calibration")
        .expect("binary")
        .arg(data("default.yml"))
        .arg("--print-settings")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("%YAML:1.0"))
        .stdout(predicate::str::contains("BoardSize_Width: 9"));
}

#[test]
fn camera_calibration_stops_on_invalid_input() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = dir.path().join("default.yml");
    std::fs::copy(data("default.yml"), &settings).expect("copy settings");
    Command::cargo_bin("camera-calibration")
        .expect("binary")
        .current_dir(dir.path())
        .arg(&settings)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Invalid input detected. Application stopping.",
        ));
}
