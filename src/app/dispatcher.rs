use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app::access_log::AccessLogger;
use crate::app::outbound_manager::OutboundManager;
use crate::common::{Address, Error};
use crate::pipe::{self, CachedReader, PipeReader, PipeWriter, StreamReader};
use crate::proxy::sniff;
use crate::proxy::{Content, Link, OutboundHandler, OutboundInfo, Session};
use crate::router::Router;

/// 连接调度器：为每条入站连接建立上行/下行两条管道，
/// 把入站侧链路交还调用方，并发地完成路由评估与出站派发。
#[derive(Clone)]
pub struct Dispatcher {
    router: Option<Arc<Router>>,
    outbounds: Arc<OutboundManager>,
    access_log: Option<Arc<AccessLogger>>,
}

impl Dispatcher {
    pub fn new(router: Option<Arc<Router>>, outbounds: Arc<OutboundManager>) -> Self {
        Self {
            router,
            outbounds,
            access_log: None,
        }
    }

    pub fn with_access_log(mut self, logger: Arc<AccessLogger>) -> Self {
        self.access_log = Some(logger);
        self
    }

    /// 调度一条连接，返回入站侧链路。出站任务在链路返回之后才会
    /// 开始执行；其生命周期归出站任务所有。
    pub fn dispatch(
        &self,
        mut session: Session,
        destination: Address,
    ) -> std::result::Result<Link, Error> {
        if !destination.is_valid() {
            return Err(Error::InvalidDestination(destination.to_string()));
        }

        session.outbound = Some(OutboundInfo {
            target: destination.clone(),
            resolved_ips: Vec::new(),
        });

        let options = session.pipe_options.clone().unwrap_or_default();
        let (uplink_reader, uplink_writer) = pipe::new(options.clone());
        let (downlink_reader, downlink_writer) = pipe::new(options);

        let inbound_link = Link {
            reader: Box::new(downlink_reader),
            writer: uplink_writer,
        };

        if session.content.is_none() {
            session.content = Some(Content::default());
        }

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher
                .routed_dispatch(session, uplink_reader, downlink_writer, destination)
                .await;
        });

        Ok(inbound_link)
    }

    /// 出站侧：可选嗅探、路由评估、出站查找与派发。
    /// 链路在这里组装，嗅探启用时读端换成缓存包装。
    async fn routed_dispatch(
        &self,
        mut session: Session,
        uplink_reader: PipeReader,
        downlink_writer: PipeWriter,
        destination: Address,
    ) {
        let reader: Box<dyn StreamReader> = if session.sniffing.enabled {
            let cached = CachedReader::new(uplink_reader);
            if let Some(result) = sniff::sniff_stream(&cached).await {
                debug!(
                    id = session.id,
                    protocol = result.protocol,
                    domain = ?result.domain,
                    "sniffed"
                );
                if let Some(content) = session.content.as_mut() {
                    content.protocol = Some(result.protocol.to_string());
                }
                if let Some(domain) = result.domain {
                    let allowed = session
                        .sniffing
                        .destination_override
                        .iter()
                        .any(|p| p == result.protocol);
                    if allowed {
                        let overridden = destination.with_domain(domain);
                        info!(
                            id = session.id,
                            from = %destination,
                            to = %overridden,
                            "destination overridden by sniffer"
                        );
                        if let Some(outbound) = session.outbound.as_mut() {
                            outbound.target = overridden;
                        }
                    }
                }
            }
            Box::new(cached)
        } else {
            Box::new(uplink_reader)
        };

        let link = Link {
            reader,
            writer: downlink_writer,
        };

        let mut handler: Option<Arc<dyn OutboundHandler>> = None;
        if let Some(router) = &self.router {
            match router.pick_route(&session) {
                Ok(tag) => {
                    if let Some(found) = self.outbounds.get(tag) {
                        info!(id = session.id, tag = tag, target = %destination, "taking detour");
                        handler = Some(found);
                    } else {
                        warn!(id = session.id, tag = tag, "non existing outbound tag");
                    }
                }
                Err(_) => {
                    debug!(id = session.id, target = %destination, "default route");
                }
            }
        }

        let handler = match handler.or_else(|| self.outbounds.default_handler()) {
            Some(handler) => handler,
            None => {
                warn!(id = session.id, target = %destination, "no outbound handler available");
                link.abort();
                return;
            }
        };

        if let Some(mut record) = session.access.take() {
            record.detour = handler.tag().to_string();
            record.protocol = session.sniffed_protocol().map(|p| p.to_string());
            if let Some(target) = session.target() {
                record.target = target.to_string();
            }
            match &self.access_log {
                Some(logger) => logger.emit(&record).await,
                None => info!(target: "access", "{}", record.to_text()),
            }
        }

        handler.dispatch(&session, link).await;
    }
}
