use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::types::InboundConfig;
use crate::proxy::inbound::ForwardInbound;
use crate::proxy::InboundHandler;

use super::dispatcher::Dispatcher;

struct InboundEntry {
    handler: Arc<dyn InboundHandler>,
    bind_addr: String,
}

/// 入站管理器：为每个入站起一条接受循环，把接受的连接
/// 交给各自的入站处理器驱动调度。
pub struct InboundManager {
    entries: Vec<InboundEntry>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl InboundManager {
    pub fn new(
        configs: &[InboundConfig],
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut entries = Vec::new();
        for config in configs {
            let handler: Arc<dyn InboundHandler> = match config.protocol.as_str() {
                "forward" => Arc::new(ForwardInbound::new(config)?),
                other => anyhow::bail!("unsupported inbound protocol: {}", other),
            };
            entries.push(InboundEntry {
                handler,
                bind_addr: format!("{}:{}", config.listen, config.port),
            });
        }
        Ok(Self {
            entries,
            dispatcher,
            cancel,
        })
    }

    pub async fn run(self) -> Result<()> {
        let mut handles = Vec::new();

        for entry in self.entries {
            let InboundEntry { handler, bind_addr } = entry;
            let dispatcher = self.dispatcher.clone();
            let cancel = self.cancel.clone();

            let handle = tokio::spawn(async move {
                let listener = match TcpListener::bind(&bind_addr).await {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!(addr = bind_addr, error = %e, "failed to bind");
                        return;
                    }
                };

                info!(tag = handler.tag(), addr = bind_addr, "inbound listening");

                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            let (stream, source) = match result {
                                Ok(accepted) => accepted,
                                Err(e) => {
                                    error!(error = %e, "accept failed");
                                    continue;
                                }
                            };

                            let handler = handler.clone();
                            let dispatcher = dispatcher.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handler.handle(stream, source, &dispatcher).await {
                                    error!(
                                        tag = handler.tag(),
                                        source = %source,
                                        error = %e,
                                        "inbound handle failed"
                                    );
                                }
                            });
                        }
                        _ = cancel.cancelled() => {
                            info!(tag = handler.tag(), "inbound shutting down");
                            break;
                        }
                    }
                }
            });

            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}
