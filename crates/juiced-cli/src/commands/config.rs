//! Configuration commands.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Dump the current configuration to stdout.
pub fn dump(config: &ClientConfig) -> ClientResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| ClientError::Config(format!("failed to serialize config: {e}")))?;
    println!("# config.toml ({})", ClientConfig::default_path().display());
    println!("{toml_str}");
    Ok(())
}

/// Validate the configuration, including secret references and the proxy.
pub fn validate(config: &ClientConfig) -> ClientResult<()> {
    juiced_core::parse_level(&config.log_level)
        .map_err(|e| ClientError::Config(format!("log_level: {e}")))?;
    let bot = config.to_bot_config()?;
    if let Some(proxy) = &bot.transport.proxy {
        println!("Proxy: {}", proxy.url());
    }
    if bot.user.is_none() {
        println!("No user configured; the bot will join anonymously.");
    }
    println!("Configuration is valid.");
    Ok(())
}

/// Show the configuration file path.
pub fn path() -> ClientResult<()> {
    println!("config: {}", ClientConfig::default_path().display());
    println!("data:   {}", ClientConfig::default_data_dir().display());
    Ok(())
}
