use async_trait::async_trait;
use tracing::debug;

use crate::pipe::StreamReader;
use crate::proxy::{Link, OutboundHandler, Session};

/// 拒绝出站：立即终止链路，入站侧观察到连接关闭
pub struct RejectOutbound {
    tag: String,
}

impl RejectOutbound {
    pub fn new(tag: String) -> Self {
        Self { tag }
    }
}

#[async_trait]
impl OutboundHandler for RejectOutbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn dispatch(&self, session: &Session, link: Link) {
        debug!(id = session.id, target = ?session.target(), "connection rejected");
        link.writer.close();
        link.reader.interrupt();
    }
}
