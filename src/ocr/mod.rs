//! Recognition data model and the stateless stages around it.
//!
//! - `preprocess`: fit the input into a vendor's size/quality envelope
//! - `coords`: project any backend box shape into original-image pixels
//! - `normalize`: turn a reply (JSON, Markdown, prose) into an [`OcrResult`]
//! - `prompt`: instructions sent with the image
//!
//! Per-call scale state lives in [`ImageFrame`] / [`FrameGeometry`], created
//! for each request and passed through every stage.

pub mod content;
pub mod coords;
mod error;
pub mod layout;
pub mod normalize;
pub mod preprocess;
pub mod prompt;
mod types;

pub use coords::{CoordinateMapper, MappedBox};
pub use error::OcrError;
pub use layout::TextLayout;
pub use normalize::ResponseNormalizer;
pub use preprocess::{prepare_frame, PreprocessOptions, QualityMode};
pub use prompt::OutputFormat;
pub use types::{
    clamp_score, DetectionItem, FrameGeometry, ImageFrame, OcrResult, Quad, RecognizedRegion,
    CODE_EMPTY, CODE_ERROR, CODE_SUCCESS, DEFAULT_FRAME_SIZE,
};
