use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,
    pub inbounds: Vec<InboundConfig>,
    pub outbounds: Vec<OutboundConfig>,
    #[serde(default)]
    pub router: RouterConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.inbounds.is_empty() {
            anyhow::bail!("at least one inbound is required");
        }
        if self.outbounds.is_empty() {
            anyhow::bail!("at least one outbound is required");
        }

        let mut seen = HashSet::new();
        for outbound in &self.outbounds {
            if outbound.tag.is_empty() {
                anyhow::bail!("outbound tag must not be empty");
            }
            if !seen.insert(outbound.tag.as_str()) {
                anyhow::bail!("duplicate outbound tag '{}'", outbound.tag);
            }
        }

        for inbound in &self.inbounds {
            if inbound.tag.is_empty() {
                anyhow::bail!("inbound tag must not be empty");
            }
        }

        for rule in &self.router.rules {
            // 只认识 field 规则
            if rule.rule_type != "field" {
                anyhow::bail!("unknown router rule type: {}", rule.rule_type);
            }
            if rule.outbound_tag.is_empty() {
                anyhow::bail!("no outboundTag is specified in routing rule");
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub access: Option<AccessLogSettings>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            access: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessLogSettings {
    pub format: String,
    pub file: Option<PathBuf>,
}

impl Default for AccessLogSettings {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InboundConfig {
    pub tag: String,
    pub protocol: String,
    pub listen: String,
    pub port: u16,
    #[serde(default)]
    pub settings: InboundSettings,
    #[serde(default)]
    pub sniffing: SniffingConfig,
}

/// forward 入站的固定目标
#[derive(Debug, Default, Deserialize)]
pub struct InboundSettings {
    pub address: Option<String>,
    pub port: Option<u16>,
}

/// 嗅探开关；destOverride 列出允许用嗅探结果改写目标的协议
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SniffingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "destOverride", alias = "destinationOverride")]
    pub destination_override: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct OutboundConfig {
    pub tag: String,
    pub protocol: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RouterConfig {
    #[serde(default, rename = "domainStrategy")]
    pub domain_strategy: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// 路由规则的配置面。字段缺省即不施加约束。
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default, rename = "outboundTag")]
    pub outbound_tag: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default, rename = "inboundTag")]
    pub inbound_tag: Vec<String>,
    #[serde(default)]
    pub domain: Vec<String>,
    #[serde(default)]
    pub ip: Vec<String>,
    #[serde(default)]
    pub port: Option<PortValue>,
    #[serde(default)]
    pub source: Vec<String>,
    #[serde(default)]
    pub user: Vec<String>,
    #[serde(default)]
    pub protocol: Vec<String>,
}

/// 端口既可以是数字也可以是 "80,443,1000-2000" 形式的字符串
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Number(u16),
    Ranges(String),
}
