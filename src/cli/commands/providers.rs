//! Providers command.

use console::style;

use ocrbridge::provider::ProviderKind;

use crate::cli::icons;

/// Print the vendor table.
pub fn cmd_providers() -> anyhow::Result<()> {
    println!("\n{}", style("Providers").bold());
    println!("{}", "-".repeat(72));

    for kind in ProviderKind::ALL {
        let profile = kind.profile();
        let key = if kind.requires_credential() {
            style(kind.key_env_var()).dim().to_string()
        } else {
            style("no key").green().to_string()
        };
        println!(
            "  {} {:<12} {:<22} {}",
            icons::bullet(),
            kind.as_str(),
            profile.display_name,
            key
        );
        println!("      {}", style(profile.default_base).dim());
        if let Some(model) = profile.default_model {
            println!("      default model: {}", model);
        }
    }

    println!();
    Ok(())
}
