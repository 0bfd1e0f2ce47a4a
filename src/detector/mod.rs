//! Local text-geometry detector, consumed as a black box.
//!
//! The detector is any executable that takes an image path and prints
//! `{"code": 100|101|..., "data": [{"text", "box", "score"}]}` on stdout
//! (the same contract the engine itself returns). PaddleOCR-json and
//! RapidOCR-json style wrappers fit directly.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::ocr::content::text_of;
use crate::ocr::{DetectionItem, OcrError, CODE_EMPTY, CODE_SUCCESS};

/// Placeholder replaced by the temporary image path in detector args.
pub const IMAGE_PLACEHOLDER: &str = "{image}";

/// Geometry detector collaborator.
#[async_trait]
pub trait TextDetector: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    /// Detect text boxes in an encoded image, in original-image pixels.
    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectionItem>, OcrError>;
}

/// Runs an external detector command per image.
#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DetectorReply {
    code: i64,
    #[serde(default)]
    data: Value,
}

impl CommandDetector {
    /// `args` may contain [`IMAGE_PLACEHOLDER`]; if none does, the path is appended.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn build_args(&self, image_path: &Path) -> Vec<String> {
        let path = image_path.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(IMAGE_PLACEHOLDER, &path))
            .collect();
        if !self.args.iter().any(|a| a.contains(IMAGE_PLACEHOLDER)) {
            args.push(path.into_owned());
        }
        args
    }
}

#[async_trait]
impl TextDetector for CommandDetector {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_available(&self) -> bool {
        if self.program.contains(std::path::MAIN_SEPARATOR) {
            return Path::new(&self.program).is_file();
        }
        check_binary(&self.program)
    }

    async fn detect(&self, image: &[u8]) -> Result<Vec<DetectionItem>, OcrError> {
        let dir = tempfile::tempdir()?;
        let image_path = dir.path().join(format!("input.{}", image_extension(image)));
        tokio::fs::write(&image_path, image).await?;

        let args = self.build_args(&image_path);
        debug!("Running detector {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::DetectionUnavailable(format!(
                    "{} not found",
                    self.program
                )))
            }
            Err(e) => {
                return Err(OcrError::DetectionUnavailable(format!(
                    "failed to start {}: {}",
                    self.program, e
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::DetectionFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_reply(&String::from_utf8_lossy(&output.stdout))
    }
}

/// File extension for the temporary image; some wrappers pick the decoder
/// by extension.
fn image_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("img")
}

/// Parse detector stdout. Some wrappers print banner lines first, so the
/// last line that parses as JSON wins.
pub fn parse_reply(stdout: &str) -> Result<Vec<DetectionItem>, OcrError> {
    let value = serde_json::from_str::<Value>(stdout.trim())
        .ok()
        .or_else(|| {
            stdout
                .lines()
                .rev()
                .find_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
        })
        .ok_or_else(|| OcrError::DetectionFailed("detector printed no JSON".to_string()))?;

    if value.is_array() {
        return items_from(value);
    }

    let reply: DetectorReply = serde_json::from_value(value)
        .map_err(|e| OcrError::DetectionFailed(format!("unexpected detector output: {}", e)))?;
    match reply.code {
        c if c == CODE_SUCCESS as i64 => items_from(reply.data),
        c if c == CODE_EMPTY as i64 => Ok(Vec::new()),
        c => Err(OcrError::DetectionFailed(format!(
            "detector returned code {}: {}",
            c,
            text_of(&reply.data)
        ))),
    }
}

fn items_from(data: Value) -> Result<Vec<DetectionItem>, OcrError> {
    serde_json::from_value(data)
        .map_err(|e| OcrError::DetectionFailed(format!("malformed detection items: {}", e)))
}

/// Check if a binary is on PATH.
fn check_binary(name: &str) -> bool {
    std::process::Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_extension_follows_format() {
        let mut png = std::io::Cursor::new(Vec::new());
        image::RgbImage::new(2, 2)
            .write_to(&mut png, image::ImageFormat::Png)
            .unwrap();
        assert_eq!(image_extension(png.get_ref()), "png");

        let mut jpeg = std::io::Cursor::new(Vec::new());
        image::RgbImage::new(2, 2)
            .write_to(&mut jpeg, image::ImageFormat::Jpeg)
            .unwrap();
        assert_eq!(image_extension(jpeg.get_ref()), "jpg");

        assert_eq!(image_extension(b"not an image"), "img");
    }

    #[test]
    fn test_parse_success_reply() {
        let items = parse_reply(
            r#"{"code": 100, "data": [{"text": "a", "box": [[0,0],[9,0],[9,5],[0,5]], "score": 0.91}]}"#,
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "a");
        assert!((items[0].score - 0.91).abs() < 1e-9);
    }

    #[test]
    fn test_parse_empty_reply() {
        assert!(parse_reply(r#"{"code": 101, "data": ""}"#).unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_reply() {
        let err = parse_reply(r#"{"code": 902, "data": "model missing"}"#).unwrap_err();
        assert!(matches!(err, OcrError::DetectionFailed(_)));
        assert!(err.to_string().contains("model missing"));
    }

    #[test]
    fn test_parse_after_banner() {
        let out = "OCR init completed.\n{\"code\": 101, \"data\": \"\"}\n";
        assert!(parse_reply(out).unwrap().is_empty());
    }

    #[test]
    fn test_parse_bare_array() {
        let items = parse_reply(r#"[{"text": "x", "bbox": [1, 2, 3, 4]}]"#).unwrap();
        assert_eq!(items[0].raw_box, json!([1, 2, 3, 4]));
        assert_eq!(items[0].score, 1.0);
    }

    #[test]
    fn test_image_placeholder() {
        let d = CommandDetector::new("det", vec!["--image_path={image}".into(), "--json".into()]);
        assert_eq!(
            d.build_args(Path::new("/tmp/x.img")),
            vec!["--image_path=/tmp/x.img".to_string(), "--json".to_string()]
        );
        let d = CommandDetector::new("det", vec!["--json".into()]);
        assert_eq!(
            d.build_args(Path::new("/tmp/x.img")),
            vec!["--json".to_string(), "/tmp/x.img".to_string()]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let d = CommandDetector::new("ocrbridge-no-such-detector-binary", vec![]);
        assert!(!d.is_available());
        let err = d.detect(b"img").await.unwrap_err();
        assert!(matches!(err, OcrError::DetectionUnavailable(_)));
    }
}
