//! Connection test command.

use console::style;

use ocrbridge::config::Config;
use ocrbridge::OcrEngine;

use crate::cli::icons;

/// Send a blank probe image to the configured provider.
pub async fn cmd_test_connection(
    mut config: Config,
    provider: Option<String>,
    model: Option<String>,
) -> anyhow::Result<()> {
    if let Some(provider) = provider {
        config.switch_provider(&provider);
    }
    if let Some(model) = model {
        config.provider.model = Some(model);
    }

    let engine = OcrEngine::start(config)?;
    let spec = engine.provider();
    println!(
        "{} Testing {} ({}) at {}",
        icons::info(),
        style(spec.name()).bold(),
        spec.model(),
        style(spec.display_url()).dim()
    );

    match engine.test_connection().await {
        Ok(result) => {
            println!(
                "{} Connection OK (code {})",
                icons::success(),
                result.code()
            );
            Ok(())
        }
        Err(e) => {
            println!("{} Connection failed: {}", icons::error(), e);
            Err(e.into())
        }
    }
}
