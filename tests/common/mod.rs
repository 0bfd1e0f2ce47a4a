//! In-process fakes for the transport and detector seams.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};

use ocrbridge::config::{Config, RecognitionMode};
use ocrbridge::detector::TextDetector;
use ocrbridge::http_client::{HttpResponse, Transport};
use ocrbridge::ocr::DetectionItem;
use ocrbridge::OcrError;

/// Ollama-shaped reply carrying `content` as the model output.
pub fn reply(content: &str) -> Result<HttpResponse, OcrError> {
    Ok(HttpResponse::new(200, json!({ "response": content }).to_string()))
}

pub fn status(code: u16, body: &str) -> Result<HttpResponse, OcrError> {
    Ok(HttpResponse::new(code, body.to_string()))
}

/// Replays canned replies in call order and records each request body.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Result<HttpResponse, OcrError>>>,
    fallback: Option<String>,
    delay: Duration,
    requests: Mutex<Vec<Value>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Result<HttpResponse, OcrError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            fallback: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer `content` once the script runs out.
    pub fn with_fallback(mut self, content: &str) -> Self {
        self.fallback = Some(content.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r["prompt"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post(
        &self,
        _url: &str,
        _headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, OcrError> {
        let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        self.requests.lock().unwrap().push(body);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(content)) => self::reply(content),
            (None, None) => status(500, "script exhausted"),
        }
    }
}

/// Detector returning fixed items, optionally after a delay.
pub struct FakeDetector {
    pub outcome: Mutex<Option<Result<Vec<DetectionItem>, OcrError>>>,
    pub delay: Duration,
}

impl FakeDetector {
    pub fn boxes(items: Vec<(&str, Value, f64)>) -> Self {
        let items = items
            .into_iter()
            .map(|(text, raw_box, score)| DetectionItem {
                text: text.to_string(),
                raw_box,
                score,
            })
            .collect();
        Self {
            outcome: Mutex::new(Some(Ok(items))),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(err: OcrError) -> Self {
        Self {
            outcome: Mutex::new(Some(Err(err))),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TextDetector for FakeDetector {
    fn name(&self) -> &str {
        "fake-detector"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn detect(&self, _image: &[u8]) -> Result<Vec<DetectionItem>, OcrError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// White PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Keyless Ollama config with no retries.
pub fn config(mode: RecognitionMode) -> Config {
    let mut config = Config::default();
    config.provider.name = "ollama".into();
    config.provider.model = Some("llava".into());
    config.provider.max_retries = 0;
    config.provider.retry_delay_ms = 0;
    config.recognition.mode = mode;
    config
}

/// Axis-aligned polygon.
pub fn rect(x1: i32, y1: i32, x2: i32, y2: i32) -> Value {
    json!([[x1, y1], [x2, y1], [x2, y2], [x1, y2]])
}
