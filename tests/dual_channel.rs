//! Dual-channel recognition: fake local detector plus scripted remote model.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{config, png, rect, reply, status, FakeDetector, ScriptedTransport};
use ocrbridge::config::{Config, RecognitionMode};
use ocrbridge::detector::TextDetector;
use ocrbridge::ocr::{CODE_ERROR, CODE_SUCCESS};
use ocrbridge::pipeline::DispatchMode;
use ocrbridge::{OcrEngine, OcrError, OcrResult};

fn dual_config() -> Config {
    let mut config = config(RecognitionMode::Dual);
    config.dual_channel.workers = 1;
    config
}

fn three_lines() -> FakeDetector {
    FakeDetector::boxes(vec![
        ("helo", rect(10, 10, 110, 30), 0.8),
        ("wrld", rect(10, 50, 110, 70), 0.7),
        ("thrid", rect(10, 90, 110, 110), 0.6),
    ])
}

fn engine(config: Config, transport: Arc<ScriptedTransport>, detector: FakeDetector) -> OcrEngine {
    let detector: Arc<dyn TextDetector> = Arc::new(detector);
    OcrEngine::with_parts(config, transport, Some(detector)).unwrap()
}

fn texts(result: &OcrResult) -> Vec<&str> {
    result.regions().iter().map(|r| r.text.as_str()).collect()
}

#[tokio::test]
async fn test_batch_correction_replaces_text_keeps_geometry() {
    let transport = Arc::new(ScriptedTransport::new(vec![reply("hello\nworld\nthird")]));
    let engine = engine(dual_config(), transport.clone(), three_lines());

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(result.code(), CODE_SUCCESS);
    assert_eq!(texts(&result), ["hello", "world", "third"]);
    assert_eq!(result.regions()[0].bbox.0, [[10, 10], [110, 10], [110, 30], [10, 30]]);
    assert_eq!(result.regions()[2].bbox.0, [[10, 90], [110, 90], [110, 110], [10, 110]]);

    let prompts = transport.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("detected 3 text lines"));
    assert!(prompts[0].contains("2. [10,50,110,70] wrld"));
}

#[tokio::test]
async fn test_zero_corrected_lines_keep_local_text() {
    // Every remote call comes back empty: correction, both whole-image
    // strategies and every crop.
    let transport = Arc::new(ScriptedTransport::new(vec![]).with_fallback(""));
    let engine = engine(dual_config(), transport.clone(), three_lines());

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(texts(&result), ["helo", "wrld", "thrid"]);
    assert_eq!(result.regions()[1].bbox.0, [[10, 50], [110, 50], [110, 70], [10, 70]]);
    assert_eq!(transport.requests().len(), 1 + 2 + 3);
}

#[tokio::test]
async fn test_crops_supply_text_when_whole_image_strategies_are_empty() {
    // Correction, whole-image coordinates and whole-image text are empty;
    // the two crops answer.
    let transport = Arc::new(ScriptedTransport::new(vec![
        reply(""),
        reply(""),
        reply(""),
        reply("HELLO"),
        reply("WORLD"),
    ]));
    let detector = FakeDetector::boxes(vec![
        ("helo", rect(10, 10, 110, 30), 0.8),
        ("wrld", rect(10, 50, 110, 70), 0.7),
    ]);
    let engine = engine(dual_config(), transport.clone(), detector);

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(result.code(), CODE_SUCCESS);
    assert_eq!(texts(&result), ["HELLO", "WORLD"]);
    assert_eq!(result.regions()[1].bbox.0, [[10, 50], [110, 50], [110, 70], [10, 70]]);
    assert_eq!(transport.requests().len(), 5);
}

#[tokio::test]
async fn test_mismatched_count_uses_whole_image_coordinates() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        reply("only\ntwo"),
        reply(
            r#"{"texts": [
                {"text": "THIRD", "box": [12, 92, 108, 108]},
                {"text": "HELLO", "box": [12, 12, 108, 28]},
                {"text": "WORLD", "box": [12, 52, 108, 68]}
            ]}"#,
        ),
    ]));
    let engine = engine(dual_config(), transport.clone(), three_lines());

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(texts(&result), ["HELLO", "WORLD", "THIRD"]);
    // Geometry is still the detector's.
    assert_eq!(result.regions()[0].bbox.0, [[10, 10], [110, 10], [110, 30], [10, 30]]);
    assert!(transport.prompts()[1].contains("return its coordinates"));
}

#[tokio::test]
async fn test_failed_correction_falls_through_to_text_lines() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        status(500, "boom"),
        reply("No text detected in the image."),
        reply("one\ntwo\nthree"),
    ]));
    let engine = engine(dual_config(), transport.clone(), three_lines());

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(texts(&result), ["one", "two", "three"]);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test]
async fn test_per_box_partial_failure_keeps_every_box() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        reply("hello"),
        status(500, "crop failed"),
        reply("third"),
    ]));
    let mut config = dual_config();
    config.dual_channel.dispatch = DispatchMode::PerBox;
    let engine = engine(config, transport.clone(), three_lines());

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(result.code(), CODE_SUCCESS);
    assert_eq!(texts(&result), ["hello", "wrld", "third"]);
    assert!(transport.prompts().iter().all(|p| p.contains("single line of text")));
}

#[tokio::test]
async fn test_per_box_accepts_confident_local_text() {
    let transport = Arc::new(ScriptedTransport::new(vec![reply("world")]));
    let mut config = dual_config();
    config.dual_channel.dispatch = DispatchMode::PerBox;
    let detector = FakeDetector::boxes(vec![
        ("sure", rect(10, 10, 110, 30), 0.99),
        ("wrld", rect(10, 50, 110, 70), 0.5),
    ]);
    let engine = engine(config, transport.clone(), detector);

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(texts(&result), ["sure", "world"]);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_filter_drops_tiny_boxes_and_appends_overflow() {
    let transport = Arc::new(ScriptedTransport::new(vec![reply("A\nB")]));
    let mut config = dual_config();
    config.dual_channel.max_boxes = 2;
    let detector = FakeDetector::boxes(vec![
        ("c", rect(10, 90, 110, 110), 0.5),
        ("dot", rect(200, 5, 202, 7), 0.5),
        ("a", rect(10, 10, 110, 30), 0.5),
        ("b", rect(10, 50, 110, 70), 0.5),
    ]);
    let engine = engine(config, transport, detector);

    let result = engine.recognize_bytes(png(400, 200)).await;

    // Sorted top to bottom; the box past max_boxes keeps its local text.
    assert_eq!(texts(&result), ["A", "B", "c"]);
}

#[tokio::test]
async fn test_correction_prompt_uses_processed_pixels() {
    let transport = Arc::new(ScriptedTransport::new(vec![reply("line")]));
    let mut config = dual_config();
    config.recognition.max_image_size = 1000;
    let detector = FakeDetector::boxes(vec![("lne", rect(100, 100, 300, 140), 0.5)]);
    let engine = engine(config, transport.clone(), detector);

    let result = engine.recognize_bytes(png(2000, 1000)).await;

    assert!(transport.prompts()[0].contains("1. [50,50,150,70] lne"));
    assert_eq!(result.regions()[0].text, "line");
    assert_eq!(result.regions()[0].bbox.0, [[100, 100], [300, 100], [300, 140], [100, 140]]);
}

#[tokio::test]
async fn test_detector_timeout_falls_back_to_remote() {
    let transport = Arc::new(ScriptedTransport::new(vec![reply(
        r#"{"texts": [{"text": "remote", "box": [[0,0],[50,0],[50,20],[0,20]]}]}"#,
    )]));
    let mut config = dual_config();
    config.dual_channel.detect_timeout_secs = 1;
    let detector = three_lines().with_delay(Duration::from_secs(60));
    let engine = engine(config, transport.clone(), detector);

    let started = std::time::Instant::now();
    let result = tokio::time::timeout(Duration::from_secs(10), engine.recognize_bytes(png(400, 200)))
        .await
        .expect("pipeline must not block on a hung detector");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(texts(&result), ["remote"]);
    assert!(transport.prompts()[0].contains("return its coordinates"));
}

#[tokio::test]
async fn test_unavailable_detector_uses_text_when_coordinates_are_empty() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        reply("No text detected in the image."),
        reply("plain text"),
    ]));
    let detector = FakeDetector::failing(OcrError::DetectionUnavailable("missing".into()));
    let engine = engine(dual_config(), transport.clone(), detector);

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(texts(&result), ["plain text"]);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn test_remote_only_fallback_errors_surface_as_102() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        status(500, "down"),
        status(500, "still down"),
    ]));
    let detector = FakeDetector::boxes(vec![]);
    let engine = engine(dual_config(), transport, detector);

    let result = engine.recognize_bytes(png(400, 200)).await;

    assert_eq!(result.code(), CODE_ERROR);
}

#[tokio::test]
async fn test_stop_discards_partial_results() {
    let transport = Arc::new(
        ScriptedTransport::new(vec![])
            .with_fallback("late")
            .with_delay(Duration::from_secs(30)),
    );
    let engine = engine(dual_config(), transport, three_lines());

    let (result, _) = tokio::join!(engine.recognize_bytes(png(400, 200)), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop();
    });

    assert_eq!(result.code(), CODE_ERROR);
    assert!(result.regions().is_empty());
}

#[test]
fn test_dual_mode_requires_detector() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let result = OcrEngine::with_parts(dual_config(), transport, None);
    assert!(matches!(result, Err(OcrError::Configuration(_))));
}
