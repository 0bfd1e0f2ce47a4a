//! Recognize command.

use std::path::PathBuf;

use anyhow::{bail, Context};
use serde_json::json;

use ocrbridge::config::{Config, RecognitionMode};
use ocrbridge::ocr::OutputFormat;
use ocrbridge::{OcrEngine, OcrResult};

use crate::cli::icons;

/// Command-line values that take precedence over the config file.
pub struct Overrides {
    pub format: Option<String>,
    pub mode: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(provider) = self.provider {
            config.switch_provider(&provider);
        }
        if let Some(model) = self.model {
            config.provider.model = Some(model);
        }
        if let Some(format) = self.format {
            config.recognition.output_format = OutputFormat::from_str(&format)
                .with_context(|| format!("unknown output format '{}'", format))?;
        }
        if let Some(mode) = self.mode {
            config.recognition.mode = RecognitionMode::from_str(&mode)
                .with_context(|| format!("unknown recognition mode '{}'", mode))?;
        }
        if let Some(language) = self.language {
            config.recognition.language = language;
        }
        Ok(())
    }
}

/// Recognize each file and print `{code, data}` JSON. Several files print a
/// JSON array of `{file, code, data}` in input order.
pub async fn cmd_recognize(
    mut config: Config,
    overrides: Overrides,
    files: &[PathBuf],
    pretty: bool,
) -> anyhow::Result<()> {
    overrides.apply(&mut config)?;
    let engine = OcrEngine::start(config)?;

    let results = if files.len() == 1 {
        vec![engine.recognize_path(&files[0]).await]
    } else {
        engine.recognize_batch(files).await
    };
    engine.stop();

    let output = if files.len() == 1 {
        serde_json::to_value(&results[0])?
    } else {
        let items: Vec<_> = files
            .iter()
            .zip(&results)
            .map(|(file, result)| {
                let mut value = serde_json::to_value(result).unwrap_or_else(|_| json!({}));
                value["file"] = json!(file.display().to_string());
                value
            })
            .collect();
        json!(items)
    };

    if pretty {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }

    let failed = results
        .iter()
        .filter(|r| matches!(r, OcrResult::Error(_)))
        .count();
    if failed == results.len() {
        bail!("recognition failed for every input");
    }
    if failed > 0 {
        eprintln!(
            "{} {} of {} images failed",
            icons::warn(),
            failed,
            results.len()
        );
    }
    Ok(())
}
