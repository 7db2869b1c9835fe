use std::path::{Path, PathBuf};

use facecheck_cli::{Dispatcher, ErrorKind, Operation, Request, Response};
use facecheck_core::{
    BoundingBox, DetectedFace, Embedding, EmbeddingExtractor, EmbeddingOracle, ImageNormalizer,
    OracleError, Raster,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::Value;
use tempfile::TempDir;

/// Deterministic oracle: one face covering the whole frame, embedded as the
/// mean RGB color in [0, 1]. Near-black frames contain no face.
struct MeanColorOracle;

impl EmbeddingOracle for MeanColorOracle {
    fn name(&self) -> &str {
        "mean-color"
    }

    fn dimension(&self) -> usize {
        3
    }

    fn detect_faces(&self, raster: &Raster) -> Result<Vec<DetectedFace>, OracleError> {
        let mut sums = [0u64; 3];
        for pixel in raster.pixels().chunks_exact(raster.channels()) {
            for (sum, value) in sums.iter_mut().zip(pixel) {
                *sum += u64::from(*value);
            }
        }
        let count = u64::from(raster.width()) * u64::from(raster.height());
        let values: Vec<f32> = sums
            .iter()
            .map(|s| (*s as f64 / count as f64 / 255.0) as f32)
            .collect();
        if values.iter().all(|v| *v < 0.02) {
            return Ok(vec![]);
        }

        Ok(vec![DetectedFace {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: raster.width() as f32,
                height: raster.height() as f32,
                confidence: 0.99,
                landmarks: None,
            },
            embedding: Embedding::new(values),
        }])
    }
}

fn dispatcher() -> Dispatcher {
    Dispatcher::new(ImageNormalizer::default())
        .with_extractor(EmbeddingExtractor::new(Box::new(MeanColorOracle)))
}

fn write_image(dir: &Path, name: &str, image: DynamicImage) -> String {
    let path: PathBuf = dir.join(name);
    image.save_with_format(&path, ImageFormat::Png).unwrap();
    path.to_string_lossy().into_owned()
}

fn solid(dir: &Path, name: &str, color: [u8; 3]) -> String {
    write_image(
        dir,
        name,
        DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb(color))),
    )
}

fn run(dispatcher: &Dispatcher, op: Operation, operands: &[String]) -> Response {
    match Request::from_operands(op, operands) {
        Ok(request) => dispatcher.handle(request),
        Err(err) => Response::error(&err),
    }
}

fn save(dispatcher: &Dispatcher, image: &str) -> String {
    let response = run(dispatcher, Operation::SaveFace, &[image.to_string()]);
    assert!(response.is_success(), "save failed: {response:?}");
    response.to_json().unwrap()
}

fn error_kind(response: &Response) -> ErrorKind {
    match response {
        Response::Error { kind, .. } => *kind,
        other => panic!("expected an error response, got {other:?}"),
    }
}

#[test]
fn save_then_verify_same_image_matches() {
    let tmp = TempDir::new().unwrap();
    let red = solid(tmp.path(), "red.png", [255, 0, 0]);
    let dispatcher = dispatcher();

    let stored = save(&dispatcher, &red);
    let value: Value = serde_json::from_str(&stored).unwrap();
    assert_eq!(value["status"], "success");
    assert_eq!(value["encoding"].as_array().unwrap().len(), 3);

    let response = run(&dispatcher, Operation::VerifyImage, &[red, stored]);
    match response {
        Response::Verified { matched, distance, .. } => {
            assert_eq!(distance, 0.0);
            assert!(matched);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn different_face_does_not_match() {
    let tmp = TempDir::new().unwrap();
    let red = solid(tmp.path(), "red.png", [255, 0, 0]);
    let blue = solid(tmp.path(), "blue.png", [0, 0, 255]);
    let dispatcher = dispatcher();

    let stored = save(&dispatcher, &red);
    let response = run(&dispatcher, Operation::VerifyImage, &[blue, stored]);
    let (json, _) = response.render();
    let value: Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["status"], "success");
    assert_eq!(value["match"], false);
    assert!(value["distance"].as_f64().unwrap() > 0.6);
    assert_eq!(value.as_object().unwrap().len(), 3);
}

#[test]
fn verify_face_compares_two_stored_encodings() {
    let tmp = TempDir::new().unwrap();
    let dispatcher = dispatcher();
    let a = save(&dispatcher, &solid(tmp.path(), "a.png", [200, 100, 50]));
    let b = save(&dispatcher, &solid(tmp.path(), "b.png", [200, 100, 60]));

    let response = run(&Dispatcher::default(), Operation::VerifyFace, &[a, b]);
    match response {
        Response::Verified { matched, distance, .. } => {
            assert!(matched);
            assert!(distance > 0.0 && distance < 0.1);
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn embedding_operand_can_come_from_a_file() {
    let tmp = TempDir::new().unwrap();
    let red = solid(tmp.path(), "red.png", [255, 0, 0]);
    let dispatcher = dispatcher();

    let stored_path = tmp.path().join("red.json");
    std::fs::write(&stored_path, save(&dispatcher, &red)).unwrap();
    let operand = format!("@{}", stored_path.display());

    let response = run(&dispatcher, Operation::VerifyImage, &[red, operand]);
    assert!(matches!(response, Response::Verified { matched: true, .. }));
}

#[test]
fn compare_faces_returns_one_boolean_per_known_face() {
    let tmp = TempDir::new().unwrap();
    let dispatcher = dispatcher();
    let red = solid(tmp.path(), "red.png", [255, 0, 0]);
    let known_red = save(&dispatcher, &red);
    let known_blue = save(&dispatcher, &solid(tmp.path(), "blue.png", [0, 0, 255]));

    let response = run(
        &dispatcher,
        Operation::CompareFaces,
        &[red.clone(), known_blue.clone(), known_red.clone()],
    );
    assert_eq!(response, Response::compared(vec![false, true]));

    let strict = Request::from_operands(Operation::CompareFaces, &[red, known_blue, known_red])
        .unwrap()
        .with_tolerance(Some(0.0))
        .unwrap();
    assert_eq!(dispatcher.handle(strict), Response::compared(vec![false, true]));
}

#[test]
fn every_source_layout_yields_an_embedding() {
    let tmp = TempDir::new().unwrap();
    let dispatcher = dispatcher();
    let gray = write_image(
        tmp.path(),
        "gray.png",
        DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([128]))),
    );
    let rgba = write_image(
        tmp.path(),
        "rgba.png",
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([128, 128, 128, 40]))),
    );

    let from_gray = save(&dispatcher, &gray);
    let from_rgba = save(&dispatcher, &rgba);
    let response = run(&dispatcher, Operation::VerifyFace, &[from_gray, from_rgba]);
    assert!(matches!(response, Response::Verified { matched: true, .. }));
}

#[test]
fn concurrent_saves_keep_images_apart() {
    let tmp = TempDir::new().unwrap();
    let red = solid(tmp.path(), "red.png", [255, 0, 0]);
    let blue = solid(tmp.path(), "blue.png", [0, 0, 255]);
    let dispatcher = dispatcher();

    let results: Vec<(bool, String)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let is_red = i % 2 == 0;
                let image = if is_red { red.clone() } else { blue.clone() };
                let dispatcher = &dispatcher;
                scope.spawn(move || (is_red, save(dispatcher, &image)))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let reds: Vec<&String> = results.iter().filter(|(r, _)| *r).map(|(_, j)| j).collect();
    let blues: Vec<&String> = results.iter().filter(|(r, _)| !*r).map(|(_, j)| j).collect();
    assert!(reds.iter().all(|j| *j == reds[0]));
    assert!(blues.iter().all(|j| *j == blues[0]));
    assert_ne!(reds[0], blues[0]);
}

#[test]
fn blank_image_has_no_face() {
    let tmp = TempDir::new().unwrap();
    let black = solid(tmp.path(), "black.png", [0, 0, 0]);

    let response = run(&dispatcher(), Operation::SaveFace, &[black]);
    assert_eq!(error_kind(&response), ErrorKind::NoFaceDetected);
    assert_eq!(response.code(), 3);
}

#[test]
fn non_image_file_is_invalid_image() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("notes.jpg");
    std::fs::write(&path, "this is not an image").unwrap();

    let response = run(
        &dispatcher(),
        Operation::SaveFace,
        &[path.to_string_lossy().into_owned()],
    );
    assert_eq!(error_kind(&response), ErrorKind::InvalidImage);
    assert_eq!(response.code(), 2);

    let (json, _) = response.render();
    let value: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["status"], "error");
    assert_eq!(value["kind"], "InvalidImage");
    assert!(value["message"].is_string());
}

#[test]
fn stored_encoding_of_wrong_length_is_a_mismatch() {
    let tmp = TempDir::new().unwrap();
    let red = solid(tmp.path(), "red.png", [255, 0, 0]);

    let response = run(
        &dispatcher(),
        Operation::VerifyImage,
        &[red, "[1.0, 0.0]".to_string()],
    );
    assert_eq!(error_kind(&response), ErrorKind::EncodingDimensionMismatch);
    assert_eq!(response.code(), 4);
}

#[test]
fn unsupported_operation_is_reported() {
    let err = "delete_face".parse::<Operation>().unwrap_err();
    let response = Response::error(&err);
    assert_eq!(error_kind(&response), ErrorKind::UnsupportedOperation);
    assert_eq!(response.code(), 5);
}
