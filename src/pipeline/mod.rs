//! Dual-channel recognition: geometry from a local detector, text from a
//! remote vision model.
//!
//! Stages run `DETECT -> FILTER -> DISPATCH -> MERGE`. A failed or timed-out
//! detection drops to whole-image remote recognition. A batch correction
//! that comes back empty or with the wrong line count walks
//! [`FALLBACK_CHAIN`] until a strategy produces regions.

mod crop;
mod strategy;

pub use crop::crop_region;
pub use strategy::{
    match_by_index, match_by_vertical_order, parse_correction_lines, FallbackStrategy,
    FALLBACK_CHAIN,
};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::detector::TextDetector;
use crate::dispatch::RequestDispatcher;
use crate::ocr::content::text_of;
use crate::ocr::normalize::is_no_text;
use crate::ocr::prompt::{correction_prompt, crop_prompt, recognition_prompt};
use crate::ocr::{
    CoordinateMapper, DetectionItem, FrameGeometry, ImageFrame, MappedBox, OcrError, OcrResult,
    OutputFormat, Quad, RecognizedRegion, ResponseNormalizer, TextLayout,
};

/// How surviving boxes are sent to the remote recognizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// One call with the full image and every local candidate.
    #[default]
    BatchCorrection,
    /// One call per low-confidence box, on a crop.
    PerBox,
}

impl DispatchMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "batch_correction" | "batch" => Some(DispatchMode::BatchCorrection),
            "per_box" | "crop" => Some(DispatchMode::PerBox),
            _ => None,
        }
    }
}

/// Dual-channel tuning.
#[derive(Debug, Clone)]
pub struct DualChannelOptions {
    pub dispatch: DispatchMode,
    pub max_boxes: usize,
    /// Minimum polygon area in original pixels.
    pub min_box_area: f64,
    /// Concurrent per-box remote calls.
    pub workers: usize,
    /// Boxes at or above this local score keep their local text in per-box mode.
    pub local_accept_score: f64,
    pub crop_padding: u32,
    pub detect_timeout: Duration,
    pub language: String,
    pub text_layout: TextLayout,
}

impl Default for DualChannelOptions {
    fn default() -> Self {
        Self {
            dispatch: DispatchMode::BatchCorrection,
            max_boxes: 64,
            min_box_area: 16.0,
            workers: 4,
            local_accept_score: 0.95,
            crop_padding: 4,
            detect_timeout: Duration::from_secs(15),
            language: "auto".to_string(),
            text_layout: TextLayout::Lines,
        }
    }
}

/// A detected line in original-image pixels.
#[derive(Debug, Clone)]
struct LocalBox {
    text: String,
    quad: Quad,
    score: f64,
}

/// Remote text per box; `None` keeps the local text.
type BoxTexts = Vec<Option<String>>;

pub struct DualChannelPipeline {
    detector: Arc<dyn TextDetector>,
    dispatcher: RequestDispatcher,
    options: DualChannelOptions,
}

impl DualChannelPipeline {
    pub fn new(
        detector: Arc<dyn TextDetector>,
        dispatcher: RequestDispatcher,
        options: DualChannelOptions,
    ) -> Self {
        Self {
            detector,
            dispatcher,
            options,
        }
    }

    pub fn options(&self) -> &DualChannelOptions {
        &self.options
    }

    /// Run the pipeline for one frame. A shutdown signal on `cancel` aborts
    /// outstanding calls and discards partial results.
    pub async fn run(
        &self,
        frame: &ImageFrame,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<OcrResult, OcrError> {
        if *cancel.borrow() {
            return Err(OcrError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = wait_cancelled(cancel) => {
                warn!("Recognition cancelled, discarding partial results");
                Err(OcrError::Cancelled)
            }
            result = self.recognize(frame) => Ok(result),
        }
    }

    async fn recognize(&self, frame: &ImageFrame) -> OcrResult {
        let items = match self.detect(frame).await {
            Some(items) if !items.is_empty() => items,
            Some(_) => {
                info!("Local detector found no text, using whole-image recognition");
                return self.remote_only(frame).await;
            }
            None => return self.remote_only(frame).await,
        };

        let (active, overflow) = self.filter(items, frame);
        if active.is_empty() && overflow.is_empty() {
            info!("No detected box survived filtering, using whole-image recognition");
            return self.remote_only(frame).await;
        }

        let mut regions = if active.is_empty() {
            Vec::new()
        } else {
            match self.options.dispatch {
                DispatchMode::PerBox => {
                    let (texts, _) = self.per_box(frame, &active, true).await;
                    merge(&active, texts)
                }
                DispatchMode::BatchCorrection => self.batch_correct(frame, &active).await,
            }
        };

        if !overflow.is_empty() {
            debug!("Appending {} boxes beyond max_boxes with local text", overflow.len());
            regions.extend(merge(&overflow, Vec::new()));
        }
        OcrResult::from_regions(regions)
    }

    // DETECT

    async fn detect(&self, frame: &ImageFrame) -> Option<Vec<DetectionItem>> {
        let name = self.detector.name();
        match tokio::time::timeout(self.options.detect_timeout, self.detector.detect(&frame.original)).await {
            Ok(Ok(items)) => {
                debug!("{} detected {} boxes", name, items.len());
                Some(items)
            }
            Ok(Err(e)) => {
                warn!("Local detector {} failed, using remote only: {}", name, e);
                None
            }
            Err(_) => {
                warn!(
                    "Local detector {} timed out after {:?}, using remote only",
                    name, self.options.detect_timeout
                );
                None
            }
        }
    }

    // FILTER

    /// Canonicalize, drop tiny boxes, sort top to bottom, split at `max_boxes`.
    fn filter(&self, items: Vec<DetectionItem>, frame: &ImageFrame) -> (Vec<LocalBox>, Vec<LocalBox>) {
        // Detector boxes are already in original pixels.
        let geometry = frame
            .geometry
            .original_size
            .map(FrameGeometry::identity)
            .unwrap_or_else(FrameGeometry::unknown);
        let mapper = CoordinateMapper::new(geometry);

        let mut boxes: Vec<LocalBox> = Vec::with_capacity(items.len());
        for item in items {
            let quad = match mapper.map(&item.raw_box) {
                MappedBox::Mapped(quad) => quad,
                MappedBox::Unrecognized(_) => continue,
            };
            if quad.area() < self.options.min_box_area {
                debug!("Dropping box {:?} below minimum area", quad.0);
                continue;
            }
            boxes.push(LocalBox {
                text: item.text.trim().to_string(),
                quad,
                score: item.score,
            });
        }

        boxes.sort_by(|a, b| {
            a.quad
                .center_y()
                .total_cmp(&b.quad.center_y())
                .then(a.quad.center_x().total_cmp(&b.quad.center_x()))
        });

        let overflow = if boxes.len() > self.options.max_boxes {
            boxes.split_off(self.options.max_boxes)
        } else {
            Vec::new()
        };
        (boxes, overflow)
    }

    // DISPATCH

    async fn batch_correct(&self, frame: &ImageFrame, boxes: &[LocalBox]) -> Vec<RecognizedRegion> {
        match self.request_correction(frame, boxes).await {
            Ok(lines) if lines.len() == boxes.len() => {
                return merge(boxes, lines.into_iter().map(Some).collect());
            }
            Ok(lines) => warn!(
                "Batch correction returned {} lines for {} boxes, entering fallback chain",
                lines.len(),
                boxes.len()
            ),
            Err(e) => warn!("Batch correction failed, entering fallback chain: {}", e),
        }

        for strategy in FALLBACK_CHAIN {
            match self.apply(strategy, frame, boxes).await {
                Some(regions) if !regions.is_empty() => {
                    info!("Fallback strategy '{}' produced {} regions", strategy, regions.len());
                    return regions;
                }
                _ => debug!("Fallback strategy '{}' produced nothing", strategy),
            }
        }
        Vec::new()
    }

    async fn request_correction(&self, frame: &ImageFrame, boxes: &[LocalBox]) -> Result<Vec<String>, OcrError> {
        let candidates: Vec<(String, Quad)> = boxes
            .iter()
            .map(|b| (b.text.clone(), to_processed(&b.quad, &frame.geometry)))
            .collect();
        let prompt = correction_prompt(&self.options.language, &candidates);
        let content = self
            .dispatcher
            .recognize(frame.processed_bytes(), frame.mime_type, &prompt)
            .await?;
        Ok(parse_correction_lines(&text_of(&content)))
    }

    /// Run one fallback strategy; `None` when it produced nothing usable.
    async fn apply(
        &self,
        strategy: FallbackStrategy,
        frame: &ImageFrame,
        boxes: &[LocalBox],
    ) -> Option<Vec<RecognizedRegion>> {
        match strategy {
            FallbackStrategy::WholeImageCoordinates => {
                let result = self
                    .whole_image(frame, OutputFormat::WithCoordinates, TextLayout::Lines)
                    .await
                    .ok()?;
                let remote = result.regions();
                if remote.is_empty() {
                    return None;
                }
                let centers: Vec<f64> = boxes.iter().map(|b| b.quad.center_y()).collect();
                Some(merge(boxes, match_by_vertical_order(&centers, remote)))
            }
            FallbackStrategy::WholeImageText => {
                // Line layout: results are matched per box.
                let result = self
                    .whole_image(frame, OutputFormat::TextOnly, TextLayout::Lines)
                    .await
                    .ok()?;
                let lines: Vec<String> = result.regions().iter().map(|r| r.text.clone()).collect();
                if lines.is_empty() {
                    return None;
                }
                Some(merge(boxes, match_by_index(boxes.len(), lines)))
            }
            FallbackStrategy::PerBoxCrop => {
                let (texts, succeeded) = self.per_box(frame, boxes, false).await;
                (succeeded > 0).then(|| merge(boxes, texts))
            }
            FallbackStrategy::RawLocal => Some(merge(boxes, Vec::new())),
        }
    }

    async fn whole_image(
        &self,
        frame: &ImageFrame,
        format: OutputFormat,
        layout: TextLayout,
    ) -> Result<OcrResult, OcrError> {
        let prompt = recognition_prompt(&self.options.language, format);
        let content = self
            .dispatcher
            .recognize(frame.processed_bytes(), frame.mime_type, &prompt)
            .await?;
        Ok(ResponseNormalizer::new(format, layout).normalize(&content, &frame.geometry))
    }

    /// Crop-and-recognize each box through a bounded pool. Returns per-box
    /// texts and the number of successful remote calls.
    async fn per_box(&self, frame: &ImageFrame, boxes: &[LocalBox], accept_local: bool) -> (BoxTexts, usize) {
        let bytes = frame.original.clone();
        let decoded = tokio::task::spawn_blocking(move || {
            image::load_from_memory(&bytes).map(|img| Arc::new(img.to_rgb8()))
        })
        .await;
        let original = match decoded {
            Ok(Ok(img)) => Some(img),
            Ok(Err(e)) => {
                warn!("Cannot decode original image for cropping: {}", e);
                None
            }
            Err(e) => {
                warn!("Crop source decode task failed: {}", e);
                None
            }
        };
        let semaphore = Semaphore::new(self.options.workers.max(1));
        let prompt = crop_prompt(&self.options.language);

        let tasks = boxes.iter().enumerate().map(|(index, b)| {
            let semaphore = &semaphore;
            let original = original.clone();
            let prompt = prompt.as_str();
            async move {
                if accept_local && b.score >= self.options.local_accept_score {
                    return None;
                }
                let _permit = semaphore.acquire().await.ok()?;
                match self.recognize_crop(original, b, prompt).await {
                    Ok(text) => Some(text),
                    Err(e) => {
                        let err = OcrError::PartialRecognition {
                            index,
                            reason: e.to_string(),
                        };
                        warn!("{}; keeping local text", err);
                        None
                    }
                }
            }
        });

        let texts: BoxTexts = join_all(tasks).await;
        let succeeded = texts
            .iter()
            .filter(|t| t.as_deref().is_some_and(|t| !t.is_empty()))
            .count();
        (texts, succeeded)
    }

    async fn recognize_crop(&self, original: Option<Arc<RgbImage>>, b: &LocalBox, prompt: &str) -> Result<String, OcrError> {
        let image = original.ok_or_else(|| OcrError::Image("original image not decodable".to_string()))?;
        let (quad, padding) = (b.quad, self.options.crop_padding);
        let crop = tokio::task::spawn_blocking(move || crop_region(&image, &quad, padding))
            .await
            .map_err(|e| OcrError::Image(format!("crop task failed: {}", e)))??;
        let content = self.dispatcher.recognize(&crop, "image/jpeg", prompt).await?;
        Ok(single_line(&text_of(&content)))
    }

    // Whole-image path when local detection is unavailable.

    async fn remote_only(&self, frame: &ImageFrame) -> OcrResult {
        let mut last_error = None;
        let mut answered = false;

        for format in [OutputFormat::WithCoordinates, OutputFormat::TextOnly] {
            match self.whole_image(frame, format, self.options.text_layout).await {
                Ok(result) if result.is_success() => return result,
                Ok(_) => answered = true,
                Err(e) => {
                    warn!("Whole-image {} recognition failed: {}", format, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => OcrResult::from_error(&e),
            _ => OcrResult::Empty,
        }
    }
}

/// Geometry from the local box, text from the remote when it has any.
fn merge(boxes: &[LocalBox], texts: BoxTexts) -> Vec<RecognizedRegion> {
    let mut texts = texts.into_iter();
    boxes
        .iter()
        .map(|b| {
            let text = texts
                .next()
                .flatten()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| b.text.clone());
            RecognizedRegion::new(text, b.quad, b.score)
        })
        .collect()
}

fn to_processed(quad: &Quad, geometry: &FrameGeometry) -> Quad {
    let mut points = quad.0;
    for p in points.iter_mut() {
        p[0] = geometry.to_processed(p[0] as f64).round() as i32;
        p[1] = geometry.to_processed(p[1] as f64).round() as i32;
    }
    Quad(points)
}

/// Collapse a crop reply to one line; the sentinel means nothing was read.
fn single_line(reply: &str) -> String {
    let reply = reply.trim();
    if is_no_text(reply) {
        return String::new();
    }
    reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("```"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolves once a shutdown is signalled; never resolves if the sender is gone.
pub(crate) async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
