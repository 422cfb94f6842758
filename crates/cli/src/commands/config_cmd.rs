//! `toolwright config`: Configuration management commands.

use std::path::{Path, PathBuf};
use toolwright_config::AppConfig;

fn config_path() -> PathBuf {
    AppConfig::config_dir().join("config.toml")
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path().display());
    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    match AppConfig::load() {
        Ok(config) => {
            println!("Config OK");
            println!("   Max iterations:  {}", config.orchestrator.max_iterations);
            println!(
                "   Cache:           {} (max {}, ttl {}s)",
                if config.cache.enabled { "on" } else { "off" },
                config.cache.max_size,
                config.cache.default_ttl_secs
            );
            println!(
                "   Rate limit:      {} calls / {}s ({} overrides)",
                config.rate_limit.default.max_calls,
                config.rate_limit.default.window_secs,
                config.rate_limit.overrides.len()
            );
            println!("   Retry attempts:  {}", config.retry.max_attempts);
            Ok(())
        }
        Err(e) => {
            println!("Config error: {e}");
            Err(e.into())
        }
    }
}

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    write_default(&path, force)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub(crate) fn write_default(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    Ok(())
}
