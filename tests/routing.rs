//! Routing behavior through the public dispatch surface: rule order,
//! detour selection, unknown tags, sniffed-protocol rules.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use windrose::app::dispatcher::Dispatcher;
use windrose::app::outbound_manager::OutboundManager;
use windrose::common::Address;
use windrose::config::types::{RouterConfig, RuleConfig};
use windrose::proxy::{Link, Network, OutboundHandler, Session};
use windrose::router::Router;

struct CapturingHandler {
    tag: String,
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl OutboundHandler for CapturingHandler {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn dispatch(&self, _session: &Session, link: Link) {
        let _ = self.tx.send(self.tag.clone());
        link.abort();
    }
}

fn capturing(manager: &OutboundManager, tag: &str) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager
        .add(Arc::new(CapturingHandler {
            tag: tag.to_string(),
            tx,
        }))
        .unwrap();
    rx
}

fn rule(outbound: &str) -> RuleConfig {
    serde_json::from_str(&format!(
        r#"{{"type": "field", "outboundTag": "{}"}}"#,
        outbound
    ))
    .unwrap()
}

fn rule_with(outbound: &str, extra: &str) -> RuleConfig {
    serde_json::from_str(&format!(
        r#"{{"type": "field", "outboundTag": "{}", {}}}"#,
        outbound, extra
    ))
    .unwrap()
}

async fn expect_tag(rx: &mut mpsc::UnboundedReceiver<String>, tag: &str) {
    let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("a handler should be invoked")
        .expect("channel open");
    assert_eq!(got, tag);
}

fn dispatch_to(dispatcher: &Dispatcher, domain: &str, port: u16) -> Link {
    dispatcher
        .dispatch(
            Session::new(Network::Tcp),
            Address::Domain(domain.to_string(), port),
        )
        .unwrap()
}

#[tokio::test]
async fn domain_rule_takes_detour_over_default() {
    let manager = Arc::new(OutboundManager::new());
    let mut proxy_rx = capturing(&manager, "proxy-a");
    let mut direct_rx = capturing(&manager, "direct");
    manager.set_default("direct");

    let router = Router::new(&RouterConfig {
        domain_strategy: None,
        rules: vec![rule_with("proxy-a", r#""domain": ["domain:example.com"]"#)],
    })
    .unwrap();
    let dispatcher = Dispatcher::new(Some(Arc::new(router)), manager);

    let _a = dispatch_to(&dispatcher, "www.example.com", 443);
    expect_tag(&mut proxy_rx, "proxy-a").await;

    let _b = dispatch_to(&dispatcher, "unrelated.org", 443);
    expect_tag(&mut direct_rx, "direct").await;
}

#[tokio::test]
async fn first_matching_rule_wins() {
    let manager = Arc::new(OutboundManager::new());
    let mut first_rx = capturing(&manager, "first");
    let _second_rx = capturing(&manager, "second");

    let router = Router::new(&RouterConfig {
        domain_strategy: None,
        rules: vec![
            rule_with("first", r#""domain": ["example"]"#),
            rule_with("second", r#""domain": ["domain:example.com"]"#),
        ],
    })
    .unwrap();
    let dispatcher = Dispatcher::new(Some(Arc::new(router)), manager);

    let _link = dispatch_to(&dispatcher, "www.example.com", 443);
    expect_tag(&mut first_rx, "first").await;
}

#[tokio::test]
async fn unknown_tag_warns_and_uses_default() {
    let manager = Arc::new(OutboundManager::new());
    let mut direct_rx = capturing(&manager, "direct");
    manager.set_default("direct");

    let router = Router::new(&RouterConfig {
        domain_strategy: None,
        rules: vec![rule("ghost")],
    })
    .unwrap();
    let dispatcher = Dispatcher::new(Some(Arc::new(router)), manager);

    let _link = dispatch_to(&dispatcher, "anything.example", 80);
    expect_tag(&mut direct_rx, "direct").await;
}

#[tokio::test]
async fn port_and_network_rules_compose() {
    let manager = Arc::new(OutboundManager::new());
    let mut tls_rx = capturing(&manager, "tls-out");
    let mut direct_rx = capturing(&manager, "direct");
    manager.set_default("direct");

    let router = Router::new(&RouterConfig {
        domain_strategy: None,
        rules: vec![rule_with(
            "tls-out",
            r#""port": "443,8443", "network": "tcp""#,
        )],
    })
    .unwrap();
    let dispatcher = Dispatcher::new(Some(Arc::new(router)), manager);

    let _a = dispatch_to(&dispatcher, "site.example", 443);
    expect_tag(&mut tls_rx, "tls-out").await;

    let _b = dispatch_to(&dispatcher, "site.example", 80);
    expect_tag(&mut direct_rx, "direct").await;
}
