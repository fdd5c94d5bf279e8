pub mod access_log;
pub mod dispatcher;
pub mod inbound_manager;
pub mod outbound_manager;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::router::Router;

use access_log::{AccessLogFormat, AccessLogger};
use dispatcher::Dispatcher;
use inbound_manager::InboundManager;
use outbound_manager::OutboundManager;

/// 应用装配。启动时显式构造注入各组件，没有进程级注册表：
/// 出站注册表 → 路由器 → 调度器 → 入站管理器。
pub struct App {
    inbounds: InboundManager,
    cancel: CancellationToken,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let outbounds = Arc::new(OutboundManager::from_configs(&config.outbounds)?);

        let router = if config.router.rules.is_empty() {
            None
        } else {
            let router = Router::new(&config.router)?;
            info!(rules = router.rule_count(), "router ready");
            Some(Arc::new(router))
        };

        let mut dispatcher = Dispatcher::new(router, outbounds);
        if let Some(settings) = &config.log.access {
            dispatcher = dispatcher.with_access_log(Arc::new(AccessLogger::new(
                AccessLogFormat::from_str(&settings.format),
                settings.file.clone(),
            )));
        }

        let cancel = CancellationToken::new();
        let inbounds = InboundManager::new(&config.inbounds, Arc::new(dispatcher), cancel.clone())?;

        Ok(Self { inbounds, cancel })
    }

    pub async fn run(self) -> Result<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                cancel.cancel();
            }
        });

        self.inbounds.run().await
    }
}
