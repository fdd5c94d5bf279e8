use std::net::SocketAddr;

use anyhow::Result;
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

use crate::app::access_log::AccessRecord;
use crate::app::dispatcher::Dispatcher;
use crate::common::Address;
use crate::config::types::{InboundConfig, SniffingConfig};
use crate::proxy::relay::relay_link;
use crate::proxy::{InboundHandler, InboundInfo, Network, Session};

/// 固定目标转发入站：接受的每条 TCP 连接都调度到配置的目标。
/// 不解析任何入站协议，是调度路径最小的完整入口。
pub struct ForwardInbound {
    tag: String,
    destination: Address,
    sniffing: SniffingConfig,
}

impl ForwardInbound {
    pub fn new(config: &InboundConfig) -> Result<Self> {
        let address = config.settings.address.clone().ok_or_else(|| {
            anyhow::anyhow!("forward inbound '{}' requires settings.address", config.tag)
        })?;
        let port = config.settings.port.ok_or_else(|| {
            anyhow::anyhow!("forward inbound '{}' requires settings.port", config.tag)
        })?;

        let destination = match address.parse::<std::net::IpAddr>() {
            Ok(ip) => Address::Ip(SocketAddr::new(ip, port)),
            Err(_) => Address::Domain(address, port),
        };
        if !destination.is_valid() {
            anyhow::bail!("forward inbound '{}' has invalid destination", config.tag);
        }

        Ok(Self {
            tag: config.tag.clone(),
            destination,
            sniffing: config.sniffing.clone(),
        })
    }
}

#[async_trait]
impl InboundHandler for ForwardInbound {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn handle(
        &self,
        stream: TcpStream,
        source: SocketAddr,
        dispatcher: &Dispatcher,
    ) -> Result<()> {
        let gateway = stream.local_addr().ok();

        let mut session = Session::new(Network::Tcp);
        session.inbound = Some(InboundInfo {
            tag: self.tag.clone(),
            source: Some(source),
            gateway,
            user: None,
        });
        session.sniffing = self.sniffing.clone();
        session.access = Some(AccessRecord::new(
            session.id,
            source.to_string(),
            self.destination.to_string(),
            Network::Tcp.as_str(),
            self.tag.clone(),
        ));

        let id = session.id;
        let link = dispatcher.dispatch(session, self.destination.clone())?;
        let (up, down) = relay_link(stream, link).await;
        debug!(id = id, up = up, down = down, "inbound connection finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::InboundSettings;

    fn config(address: Option<&str>, port: Option<u16>) -> InboundConfig {
        InboundConfig {
            tag: "forward-in".to_string(),
            protocol: "forward".to_string(),
            listen: "127.0.0.1".to_string(),
            port: 2080,
            settings: InboundSettings {
                address: address.map(|s| s.to_string()),
                port,
            },
            sniffing: SniffingConfig::default(),
        }
    }

    #[test]
    fn builds_domain_destination() {
        let inbound = ForwardInbound::new(&config(Some("upstream.local"), Some(8080))).unwrap();
        assert_eq!(
            inbound.destination,
            Address::Domain("upstream.local".to_string(), 8080)
        );
    }

    #[test]
    fn builds_ip_destination() {
        let inbound = ForwardInbound::new(&config(Some("10.0.0.1"), Some(8080))).unwrap();
        assert_eq!(inbound.destination, Address::Ip("10.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn missing_target_rejected() {
        assert!(ForwardInbound::new(&config(None, Some(8080))).is_err());
        assert!(ForwardInbound::new(&config(Some("host"), None)).is_err());
        assert!(ForwardInbound::new(&config(Some("host"), Some(0))).is_err());
    }
}
