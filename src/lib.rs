//! ocrbridge - OCR result orchestration.
//!
//! Drives a remote vision-language model, optionally together with a local
//! text detector, and reduces every reply to one contract:
//! `{code: 100|101|102, data: [{text, box, score}] | "" | "[Error] ..."}`
//! with boxes in original-image pixels.

pub mod config;
pub mod detector;
pub mod dispatch;
pub mod engine;
pub mod http_client;
pub mod ocr;
pub mod pipeline;
pub mod provider;

pub use config::Config;
pub use engine::OcrEngine;
pub use ocr::{OcrError, OcrResult, RecognizedRegion};
