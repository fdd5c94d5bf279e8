pub mod inbound;
pub mod outbound;
pub mod relay;
pub mod sniff;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;

use crate::app::access_log::AccessRecord;
use crate::common::Address;
use crate::config::types::SniffingConfig;
use crate::pipe::{PipeOptions, PipeWriter, StreamReader};

/// 网络类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    Udp,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
        }
    }

    pub fn parse(s: &str) -> Option<Network> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Some(Network::Tcp),
            "udp" => Some(Network::Udp),
            _ => None,
        }
    }
}

/// 入站侧元数据，会话创建后不再修改
#[derive(Debug, Clone)]
pub struct InboundInfo {
    pub tag: String,
    pub source: Option<SocketAddr>,
    pub gateway: Option<SocketAddr>,
    pub user: Option<String>,
}

/// 出站目标，仅由调度器在路由评估前写入
#[derive(Debug, Clone)]
pub struct OutboundInfo {
    pub target: Address,
    pub resolved_ips: Vec<IpAddr>,
}

/// 嗅探得到的内容信息
#[derive(Debug, Clone, Default)]
pub struct Content {
    pub protocol: Option<String>,
    pub attributes: HashMap<String, String>,
}

/// 连接会话元数据。不可变基底（id、inbound）加上各方在并发读取
/// 开始前挂接的扩展字段。
#[derive(Debug, Clone)]
pub struct Session {
    /// 日志关联用的不透明标识
    pub id: u64,
    pub network: Network,
    pub inbound: Option<InboundInfo>,
    pub outbound: Option<OutboundInfo>,
    pub content: Option<Content>,
    pub pipe_options: Option<PipeOptions>,
    pub sniffing: SniffingConfig,
    pub access: Option<AccessRecord>,
}

impl Session {
    pub fn new(network: Network) -> Self {
        Self {
            id: rand::random(),
            network,
            inbound: None,
            outbound: None,
            content: None,
            pipe_options: None,
            sniffing: SniffingConfig::default(),
            access: None,
        }
    }

    pub fn inbound_tag(&self) -> &str {
        self.inbound.as_ref().map(|i| i.tag.as_str()).unwrap_or("")
    }

    pub fn target(&self) -> Option<&Address> {
        self.outbound.as_ref().map(|o| &o.target)
    }

    /// 嗅探到的协议名
    pub fn sniffed_protocol(&self) -> Option<&str> {
        self.content
            .as_ref()
            .and_then(|c| c.protocol.as_deref())
    }
}

/// 双向管道的一侧：读对端写入的数据，写给对端读取的数据
pub struct Link {
    pub reader: Box<dyn StreamReader>,
    pub writer: PipeWriter,
}

impl Link {
    /// 放弃这条链路：两端一起中断，对端读写立即观察到 PipeInterrupted
    pub fn abort(&self) {
        self.writer.interrupt();
        self.reader.interrupt();
    }
}

/// 出站处理器。dispatch 接管链路所有权，完成出站协议交换，
/// 结束时负责关闭或中断两端。
#[async_trait]
pub trait OutboundHandler: Send + Sync {
    fn tag(&self) -> &str;
    async fn dispatch(&self, session: &Session, link: Link);
}

/// 入站处理器：从接受的连接构造会话，调用调度器，
/// 在套接字与返回的链路之间搬运字节直到任一侧终止。
#[async_trait]
pub trait InboundHandler: Send + Sync {
    fn tag(&self) -> &str;
    async fn handle(
        &self,
        stream: tokio::net::TcpStream,
        source: SocketAddr,
        dispatcher: &crate::app::dispatcher::Dispatcher,
    ) -> anyhow::Result<()>;
}
