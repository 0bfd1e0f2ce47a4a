//! Prompts sent alongside the image.

use serde::{Deserialize, Serialize};

use super::types::Quad;

/// Reply literal some vision models use for "nothing here".
pub const NO_TEXT_SENTINEL: &str = "No text detected in the image.";

/// What the remote recognizer is asked to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    TextOnly,
    WithCoordinates,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::TextOnly => "text_only",
            OutputFormat::WithCoordinates => "with_coordinates",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "text_only" | "text" => Some(OutputFormat::TextOnly),
            "with_coordinates" | "coordinates" | "coords" => Some(OutputFormat::WithCoordinates),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Human-readable language instruction for a language code.
pub fn language_instruction(code: &str) -> &'static str {
    match code.to_lowercase().as_str() {
        "zh" => "Chinese",
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "ar" => "Arabic",
        _ => "detect the language automatically",
    }
}

/// Whole-image prompt for the given output format.
pub fn recognition_prompt(language: &str, format: OutputFormat) -> String {
    let lang = language_instruction(language);
    match format {
        OutputFormat::WithCoordinates => format!(
            "Recognize all text in the image and return its coordinates. Language: {lang}.\n\
             Output JSON in this format: {{\"texts\": [{{\"text\": \"content\", \"box\": [[x1,y1],[x2,y2],[x3,y3],[x4,y4]]}}]}}\n\
             Coordinates are pixel positions with the origin at the top-left corner. \
             Return only the JSON, nothing else. If there is no text, reply exactly: {NO_TEXT_SENTINEL}"
        ),
        OutputFormat::TextOnly => format!(
            "Recognize the text in the image. Language: {lang}. \
             Preserve the original layout and return only the text content. \
             If there is no text, reply exactly: {NO_TEXT_SENTINEL}"
        ),
    }
}

/// Prompt for a single cropped text line.
pub fn crop_prompt(language: &str) -> String {
    format!(
        "The image is a crop containing a single line of text. Language: {}. \
         Return only the exact text of that line, with no explanation. \
         If there is no text, reply with an empty message.",
        language_instruction(language)
    )
}

/// Batch-correction prompt: the full image plus local candidates, in processed pixels.
pub fn correction_prompt(language: &str, candidates: &[(String, Quad)]) -> String {
    let mut listing = String::new();
    for (i, (text, quad)) in candidates.iter().enumerate() {
        let (x1, y1, x2, y2) = quad.bounds();
        listing.push_str(&format!("{}. [{},{},{},{}] {}\n", i + 1, x1, y1, x2, y2, text));
    }
    format!(
        "A local OCR engine detected {n} text lines in this image. Language: {lang}.\n\
         Each line below is `index. [x1,y1,x2,y2] text` with pixel coordinates in this image:\n\
         {listing}\
         Correct the recognized text of every line using the image. \
         Return exactly {n} lines, in the same order, one corrected text per line, \
         without indices, coordinates or any other commentary.",
        n = candidates.len(),
        lang = language_instruction(language),
    )
}
