use anyhow::Result;
use console::style;

use super::Config;

/// Print the effective configuration to stderr; the API key is never shown
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("OpenAI Settings:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.openai.base_url).cyan());
    eprintln!(
        "  Embedding Model: {} ({} dimensions)",
        style(&config.openai.embedding_model).cyan(),
        style(config.openai.embedding_dimension).cyan()
    );
    eprintln!("  Chat Model: {}", style(&config.openai.chat_model).cyan());
    let key_state = if config.openai.api_key.is_some() {
        style("set").green()
    } else {
        style("missing (set OPENAI_API_KEY)").red()
    };
    eprintln!("  API Key: {}", key_state);

    eprintln!();
    eprintln!("{}", style("Index Settings:").bold().yellow());
    eprintln!("  Collection: {}", style(&config.index.collection).cyan());
    eprintln!("  Top K: {}", style(config.index.top_k).cyan());
    eprintln!(
        "  Chunk Size: {} words",
        style(config.chunking.max_words).cyan()
    );
    eprintln!(
        "  Vector Data: {}",
        style(config.vector_database_path().display()).dim()
    );

    eprintln!();
    eprintln!("{}", style("Source Settings:").bold().yellow());
    match &config.source.locator {
        Some(locator) => eprintln!("  Locator: {}", style(locator).cyan()),
        None => eprintln!(
            "  Locator: {}",
            style("not set (CONTEXT_FILE_URL / CONTEXT_FILE_PATH)").red()
        ),
    }
    eprintln!("  S3 Region: {}", style(&config.source.s3_region).cyan());

    eprintln!();
    eprintln!("{}", style("Persona:").bold().yellow());
    eprintln!(
        "  Name: {}",
        style(config.persona.name.as_deref().unwrap_or("(none)")).cyan()
    );
    eprintln!(
        "  Contact: {}",
        style(config.persona.contact.as_deref().unwrap_or("(none)")).cyan()
    );
    if config.persona.instructions.is_some() {
        eprintln!("  Instructions: {}", style("custom").cyan());
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}
