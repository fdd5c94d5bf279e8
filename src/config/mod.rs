pub mod types;

pub use types::Config;

use anyhow::{Context, Result};

/// 从文件加载配置。按扩展名区分 JSON / YAML，加载后立即做结构校验。
pub fn load_config(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path))?;

    let config: Config = if path.ends_with(".json") {
        serde_json::from_str(&content).with_context(|| format!("invalid JSON config '{}'", path))?
    } else {
        serde_yml::from_str(&content).with_context(|| format!("invalid YAML config '{}'", path))?
    };

    config.validate()?;
    Ok(config)
}
