use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::proxy::relay::relay_link;
use crate::proxy::{Link, OutboundHandler, Session};

/// 直连出站：解析目标后建立 TCP 连接，在链路与套接字之间搬运
pub struct DirectOutbound {
    tag: String,
}

impl DirectOutbound {
    pub fn new(tag: String) -> Self {
        Self { tag }
    }
}

#[async_trait]
impl OutboundHandler for DirectOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn dispatch(&self, session: &Session, link: Link) {
        let Some(target) = session.target() else {
            warn!(id = session.id, "direct outbound without target");
            link.abort();
            return;
        };

        let addr = match target.resolve().await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(id = session.id, target = %target, error = %e, "resolve failed");
                link.abort();
                return;
            }
        };

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(id = session.id, target = %target, error = %e, "connect failed");
                link.abort();
                return;
            }
        };

        debug!(id = session.id, target = %target, resolved = %addr, "direct connected");
        let (up, down) = relay_link(stream, link).await;
        debug!(id = session.id, up = up, down = down, "direct session finished");
    }
}
