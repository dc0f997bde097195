// Reads the leveling config from disk.

use crate::core::leveling::LevelingConfig;
use anyhow::Context;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "data/leveling_config.json";

/// Load, migrate and validate the config at `path`.
/// A missing file is not an error: the defaults apply.
pub async fn load_config(path: impl AsRef<Path>) -> anyhow::Result<LevelingConfig> {
    let path = path.as_ref();
    let config = match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_config(&content)
            .with_context(|| format!("Invalid leveling config in {}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No leveling config found, using defaults");
            LevelingConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    config.validate()?;
    Ok(config)
}

pub fn parse_config(json: &str) -> anyhow::Result<LevelingConfig> {
    let config: LevelingConfig = serde_json::from_str(json)?;
    Ok(config.migrate()?)
}
