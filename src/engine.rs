//! Recognition session.
//!
//! An [`OcrEngine`] is built once from a validated [`Config`] and holds only
//! read-only collaborators. Each call creates its own [`ImageFrame`], so
//! concurrent calls share no scale state.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::stream::{self, StreamExt};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{Config, RecognitionMode};
use crate::detector::{CommandDetector, TextDetector};
use crate::dispatch::RequestDispatcher;
use crate::http_client::{HttpClient, Transport};
use crate::ocr::prompt::recognition_prompt;
use crate::ocr::{
    prepare_frame, ImageFrame, OcrError, OcrResult, OutputFormat, PreprocessOptions,
    ResponseNormalizer,
};
use crate::pipeline::{wait_cancelled, DualChannelPipeline};
use crate::provider::ProviderSpec;

/// Size of the probe image sent by [`OcrEngine::test_connection`].
const PROBE_SIZE: (u32, u32) = (100, 50);

pub struct OcrEngine {
    config: Config,
    spec: Arc<ProviderSpec>,
    dispatcher: RequestDispatcher,
    normalizer: ResponseNormalizer,
    preprocess: PreprocessOptions,
    pipeline: Option<DualChannelPipeline>,
    shutdown: watch::Sender<bool>,
}

impl OcrEngine {
    /// Validate `config` and build the HTTP transport and, in dual mode, the
    /// detector command. Fails fast on configuration errors.
    pub fn start(config: Config) -> Result<Self, OcrError> {
        config.validate()?;

        let transport = HttpClient::builder(config.timeout())
            .proxy(config.provider.proxy.as_deref())
            .build()?;

        let detector: Option<Arc<dyn TextDetector>> = match (&config.recognition.mode, &config.detector) {
            (RecognitionMode::Dual, Some(d)) => {
                let detector = CommandDetector::new(d.command.clone(), d.args.clone());
                if !detector.is_available() {
                    warn!(
                        "Detector {} not found; recognition will fall back to remote only",
                        d.command
                    );
                }
                Some(Arc::new(detector) as Arc<dyn TextDetector>)
            }
            _ => None,
        };

        Self::with_parts(config, Arc::new(transport), detector)
    }

    /// Build a session around caller-supplied collaborators.
    ///
    /// The detector is used only in dual mode, where it is required.
    pub fn with_parts(
        config: Config,
        transport: Arc<dyn Transport>,
        detector: Option<Arc<dyn TextDetector>>,
    ) -> Result<Self, OcrError> {
        config.validate_provider()?;

        let spec = Arc::new(ProviderSpec::new(
            config.provider_kind()?,
            config.provider.model.clone(),
            config.provider.api_key.clone(),
            config.provider.endpoint.clone(),
        )?);
        let dispatcher = RequestDispatcher::new(spec.clone(), transport, config.retry_policy());

        let pipeline = match config.recognition.mode {
            RecognitionMode::Remote => None,
            RecognitionMode::Dual => {
                let detector = detector.ok_or_else(|| {
                    OcrError::Configuration("dual mode requires a [detector] command".to_string())
                })?;
                Some(DualChannelPipeline::new(
                    detector,
                    dispatcher.clone(),
                    config.dual_channel_options(),
                ))
            }
        };

        let normalizer = ResponseNormalizer::new(
            config.recognition.output_format,
            config.recognition.text_layout,
        );
        let preprocess = config.preprocess_options();
        let (shutdown, _) = watch::channel(false);

        info!(
            "OCR session started: {} ({}), mode {}",
            spec.name(),
            spec.model(),
            config.recognition.mode.as_str()
        );

        Ok(Self {
            config,
            spec,
            dispatcher,
            normalizer,
            preprocess,
            pipeline,
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &ProviderSpec {
        &self.spec
    }

    /// Cancel outstanding calls. Calls made afterwards return an error result.
    pub fn stop(&self) {
        if !self.is_stopped() {
            info!("Stopping OCR session");
        }
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Recognize an encoded image.
    pub async fn recognize_bytes(&self, bytes: Vec<u8>) -> OcrResult {
        match self.run(bytes).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Recognition failed: {}", e);
                OcrResult::from_error(&e)
            }
        }
    }

    pub async fn recognize_path(&self, path: impl AsRef<Path>) -> OcrResult {
        let path = path.as_ref();
        match tokio::fs::read(path).await {
            Ok(bytes) => self.recognize_bytes(bytes).await,
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                OcrResult::from_error(&OcrError::Io(e))
            }
        }
    }

    /// Recognize a base64 image; a `data:<mime>;base64,` prefix is accepted.
    pub async fn recognize_base64(&self, encoded: &str) -> OcrResult {
        match decode_base64_image(encoded) {
            Ok(bytes) => self.recognize_bytes(bytes).await,
            Err(e) => OcrResult::from_error(&e),
        }
    }

    /// Recognize many files, at most `max_concurrency` at a time. Results
    /// come back in input order.
    pub async fn recognize_batch(&self, paths: &[PathBuf]) -> Vec<OcrResult> {
        let limit = self.config.provider.max_concurrency.max(1);
        debug!("Recognizing {} images, {} at a time", paths.len(), limit);
        stream::iter(paths)
            .map(|path| self.recognize_path(path))
            .buffered(limit)
            .collect()
            .await
    }

    /// Send a small blank image in text-only mode; a success or empty result
    /// means the vendor is reachable and accepts the credentials.
    pub async fn test_connection(&self) -> Result<OcrResult, OcrError> {
        let probe = probe_image()?;
        let prompt = recognition_prompt(&self.config.recognition.language, OutputFormat::TextOnly);

        let mut cancel = self.shutdown.subscribe();
        let content = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => return Err(OcrError::Cancelled),
            content = self.dispatcher.recognize(&probe, "image/jpeg", &prompt) => content?,
        };

        let normalizer = ResponseNormalizer::new(OutputFormat::TextOnly, self.config.recognition.text_layout);
        let geometry = crate::ocr::FrameGeometry::identity(PROBE_SIZE);
        match normalizer.normalize(&content, &geometry) {
            OcrResult::Error(message) => Err(OcrError::Parse {
                provider: self.spec.name().to_string(),
                message,
            }),
            result => {
                info!("Connection to {} OK (code {})", self.spec.name(), result.code());
                Ok(result)
            }
        }
    }

    async fn run(&self, bytes: Vec<u8>) -> Result<OcrResult, OcrError> {
        let mut cancel = self.shutdown.subscribe();
        if *cancel.borrow() {
            return Err(OcrError::Cancelled);
        }

        let frame = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => return Err(OcrError::Cancelled),
            frame = self.prepare(bytes) => frame?,
        };

        if let Some(pipeline) = &self.pipeline {
            return pipeline.run(&frame, &mut cancel).await;
        }

        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancel) => {
                warn!("Recognition cancelled");
                Err(OcrError::Cancelled)
            }
            result = self.recognize_remote(&frame) => result,
        }
    }

    /// Decode, resize and re-encode on the blocking pool.
    async fn prepare(&self, bytes: Vec<u8>) -> Result<ImageFrame, OcrError> {
        let options = self.preprocess;
        tokio::task::spawn_blocking(move || prepare_frame(bytes, &options))
            .await
            .map_err(|e| OcrError::Image(format!("preprocessing task failed: {}", e)))
    }

    async fn recognize_remote(&self, frame: &ImageFrame) -> Result<OcrResult, OcrError> {
        let prompt = recognition_prompt(&self.config.recognition.language, self.normalizer.format());
        let content = self
            .dispatcher
            .recognize(frame.processed_bytes(), frame.mime_type, &prompt)
            .await?;
        Ok(self.normalizer.normalize(&content, &frame.geometry))
    }
}

impl Drop for OcrEngine {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn decode_base64_image(encoded: &str) -> Result<Vec<u8>, OcrError> {
    let encoded = encoded.trim();
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(payload.as_bytes())
        .map_err(|e| OcrError::Image(format!("invalid base64 image: {}", e)))
}

fn probe_image() -> Result<Vec<u8>, OcrError> {
    let image = RgbImage::from_pixel(PROBE_SIZE.0, PROBE_SIZE.1, Rgb([255, 255, 255]));
    let mut buffer = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buffer, 85).encode_image(&image)?;
    Ok(buffer.into_inner())
}
