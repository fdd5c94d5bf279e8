use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use tracing::info;

use crate::common::Error;
use crate::config::types::OutboundConfig;
use crate::proxy::outbound::{DirectOutbound, RejectOutbound};
use crate::proxy::OutboundHandler;

/// 出站注册表：tag → handler，外加一个指定的默认出站。
/// 读多写少；get 只在读锁内克隆 Arc，handler 的 dispatch 从不持锁。
pub struct OutboundManager {
    handlers: RwLock<HashMap<String, Arc<dyn OutboundHandler>>>,
    default_tag: RwLock<Option<String>>,
}

impl OutboundManager {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default_tag: RwLock::new(None),
        }
    }

    /// 按配置构建具体出站；列表中的第一个作为默认出站
    pub fn from_configs(configs: &[OutboundConfig]) -> Result<Self> {
        let manager = Self::new();
        for (index, config) in configs.iter().enumerate() {
            let handler: Arc<dyn OutboundHandler> = match config.protocol.as_str() {
                "direct" | "freedom" => Arc::new(DirectOutbound::new(config.tag.clone())),
                "reject" | "blackhole" => Arc::new(RejectOutbound::new(config.tag.clone())),
                other => anyhow::bail!("unsupported outbound protocol: {}", other),
            };
            manager.add(handler)?;
            if index == 0 {
                manager.set_default(&config.tag);
            }
            info!(tag = config.tag, protocol = config.protocol, "outbound registered");
        }
        Ok(manager)
    }

    pub fn add(&self, handler: Arc<dyn OutboundHandler>) -> std::result::Result<(), Error> {
        let tag = handler.tag().to_string();
        if tag.is_empty() {
            return Err(Error::Config("outbound tag must not be empty".to_string()));
        }
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(&tag) {
            return Err(Error::DuplicateTag(tag));
        }
        handlers.insert(tag, handler);
        Ok(())
    }

    /// 幂等移除；tag 不存在时静默成功
    pub fn remove(&self, tag: &str) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tag);
    }

    pub fn get(&self, tag: &str) -> Option<Arc<dyn OutboundHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tag)
            .cloned()
    }

    pub fn set_default(&self, tag: &str) {
        *self.default_tag.write().unwrap_or_else(|e| e.into_inner()) = Some(tag.to_string());
    }

    /// 默认出站。未指定默认 tag 或该 tag 未注册时视为没有默认。
    pub fn default_handler(&self) -> Option<Arc<dyn OutboundHandler>> {
        let tag = self
            .default_tag
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()?;
        self.get(&tag)
    }
}

impl Default for OutboundManager {
    fn default() -> Self {
        Self::new()
    }
}
