mod common;

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn cli() -> Command {
    Command::cargo_bin("charuco-calib").unwrap()
}

#[test]
fn help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("calibrate"))
        .stdout(predicate::str::contains("undistort"))
        .stdout(predicate::str::contains("detect"))
        .stdout(predicate::str::contains("print-board"));
}

#[test]
fn print_board_writes_page_sized_png() {
    let dir = tempfile::tempdir().unwrap();
    let board = dir.path().join("board.csv");
    fs::write(&board, common::BOARD_TABLE).unwrap();
    let out = dir.path().join("board.png");

    cli()
        .args(["print-board", "--pixels-per-mm", "2", "--board"])
        .arg(&board)
        .arg("--out")
        .arg(&out)
        .assert()
        .success();

    let img = image::open(&out).unwrap();
    assert_eq!((img.width(), img.height()), (594, 420));
}

#[test]
fn calibrate_then_undistort() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    common::write_views(&images, &common::views(6));
    let board = dir.path().join("board.csv");
    fs::write(&board, common::BOARD_TABLE).unwrap();
    let result_dir = dir.path().join("result");

    cli()
        .arg("calibrate")
        .arg("--board")
        .arg(&board)
        .arg("--image-dir")
        .arg(&images)
        .arg("--result-dir")
        .arg(&result_dir)
        .args(["--result-format", "json", "--decimation", "1", "--show-result"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Used 6 images"))
        .stdout(predicate::str::contains("Camera matrix"));

    let params = result_dir.join("camera_param.json");
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&params).unwrap()).unwrap();
    assert_eq!(json["rvecs"].as_array().unwrap().len(), 6);

    cli()
        .arg("undistort")
        .arg("--params")
        .arg(&params)
        .arg("--image-dir")
        .arg(&images)
        .assert()
        .success();
    for i in 1..=6 {
        assert!(images.join("undistort_result").join(format!("undistorted{i}.png")).is_file());
    }
}

#[test]
fn config_file_interval_applies_without_flag() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    common::write_views(&images, &common::views(6));
    let board = dir.path().join("board.csv");
    fs::write(&board, common::BOARD_TABLE).unwrap();
    let config = dir.path().join("pipeline.json");
    fs::write(&config, r#"{"decimation": {"interval": 1}}"#).unwrap();

    cli()
        .arg("calibrate")
        .arg("--board")
        .arg(&board)
        .arg("--image-dir")
        .arg(&images)
        .arg("--result-dir")
        .arg(dir.path().join("result"))
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Used 6 images"));

    // an explicit flag still wins over the file
    cli()
        .arg("calibrate")
        .arg("--board")
        .arg(&board)
        .arg("--image-dir")
        .arg(&images)
        .arg("--result-dir")
        .arg(dir.path().join("result3"))
        .arg("--config")
        .arg(&config)
        .args(["--decimation", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Used 3 images"));
}

#[test]
fn detect_writes_annotated_copies() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    common::write_views(&images, &common::views(2));
    image::GrayImage::from_pixel(320, 240, image::Luma([255]))
        .save(images.join("blank.png"))
        .unwrap();
    let board = dir.path().join("board.csv");
    fs::write(&board, common::BOARD_TABLE).unwrap();

    cli()
        .arg("detect")
        .arg("--board")
        .arg(&board)
        .arg("--image-dir")
        .arg(&images)
        .assert()
        .success()
        .stdout(predicate::str::contains("17 markers"))
        .stdout(predicate::str::contains("Annotated 2 images"));

    let out = images.join("detection_result");
    assert!(out.join("view_00.png").is_file());
    assert!(out.join("view_01.png").is_file());
    assert!(!out.join("blank.png").exists());
}

#[test]
fn failed_calibration_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let images = dir.path().join("images");
    fs::create_dir(&images).unwrap();
    image::GrayImage::from_pixel(64, 48, image::Luma([255]))
        .save(images.join("blank.png"))
        .unwrap();
    let board = dir.path().join("board.csv");
    fs::write(&board, common::BOARD_TABLE).unwrap();
    let result_dir = dir.path().join("result");

    cli()
        .arg("calibrate")
        .arg("--board")
        .arg(&board)
        .arg("--image-dir")
        .arg(&images)
        .arg("--result-dir")
        .arg(&result_dir)
        .assert()
        .failure()
        .stderr(predicate::str::contains("calibration failed"));
    assert!(!result_dir.exists());
}

#[test]
fn missing_board_key_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let board = dir.path().join("board.csv");
    fs::write(&board, common::BOARD_TABLE.replace("marker_length,22\n", "")).unwrap();

    cli()
        .arg("print-board")
        .arg("--board")
        .arg(&board)
        .arg("--out")
        .arg(dir.path().join("x.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("marker_length"));
}

#[test]
fn bundled_board_table_prints() {
    let dir = tempfile::tempdir().unwrap();
    let board = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("data/charuco_board.csv");
    let out = dir.path().join("a4.png");

    cli()
        .args(["print-board", "--pixels-per-mm", "1"])
        .arg("--board")
        .arg(&board)
        .arg("--out")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("297x210"));
}
