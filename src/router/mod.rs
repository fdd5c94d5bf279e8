pub mod rules;

use anyhow::Result;
use tracing::debug;

use crate::common::Error;
use crate::config::types::RouterConfig;
use crate::proxy::Session;
use rules::Rule;

/// 域名处理策略。目前只有 AsIs（按原样评估）；
/// 解析类策略（IfNonMatch、IPOnDemand）保留待实现。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainStrategy {
    #[default]
    AsIs,
}

impl DomainStrategy {
    /// 目前任何取值都回落到 AsIs
    pub fn parse(_s: Option<&str>) -> Self {
        DomainStrategy::AsIs
    }
}

/// 规则路由器。规则表构造后不可变，评估无锁且不挂起。
pub struct Router {
    #[allow(dead_code)]
    domain_strategy: DomainStrategy,
    rules: Vec<Rule>,
}

impl Router {
    pub fn new(config: &RouterConfig) -> Result<Self> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule_config in &config.rules {
            rules.push(Rule::from_config(rule_config)?);
        }
        Ok(Self {
            domain_strategy: DomainStrategy::parse(config.domain_strategy.as_deref()),
            rules,
        })
    }

    /// 顺序评估规则，返回首条命中规则的出站 tag；
    /// 无规则命中返回 NoMatch，由调度器决定回退。
    pub fn pick_route(&self, session: &Session) -> Result<&str, Error> {
        for rule in &self.rules {
            if rule.apply(session) {
                debug!(
                    id = session.id,
                    target = ?session.target().map(|t| t.to_string()),
                    rule = %rule,
                    "route matched"
                );
                return Ok(&rule.tag);
            }
        }
        Err(Error::NoMatch)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Address;
    use crate::config::types::RuleConfig;
    use crate::proxy::{Network, OutboundInfo};

    fn field_rule(outbound: &str, domain: Vec<&str>) -> RuleConfig {
        RuleConfig {
            rule_type: "field".to_string(),
            outbound_tag: outbound.to_string(),
            network: None,
            inbound_tag: vec![],
            domain: domain.into_iter().map(|s| s.to_string()).collect(),
            ip: vec![],
            port: None,
            source: vec![],
            user: vec![],
            protocol: vec![],
        }
    }

    fn session_to(domain: &str, port: u16) -> Session {
        let mut session = Session::new(Network::Tcp);
        session.outbound = Some(OutboundInfo {
            target: Address::Domain(domain.to_string(), port),
            resolved_ips: vec![],
        });
        session
    }

    #[test]
    fn first_match_wins() {
        let config = RouterConfig {
            domain_strategy: None,
            rules: vec![
                field_rule("proxy-a", vec!["domain:example.com"]),
                field_rule("proxy-b", vec!["example"]),
            ],
        };
        let router = Router::new(&config).unwrap();

        // 两条规则都命中，次序靠前的胜出
        assert_eq!(
            router.pick_route(&session_to("www.example.com", 443)).unwrap(),
            "proxy-a"
        );
    }

    #[test]
    fn no_match_is_deterministic() {
        let config = RouterConfig {
            domain_strategy: None,
            rules: vec![field_rule("proxy-a", vec!["domain:example.com"])],
        };
        let router = Router::new(&config).unwrap();
        let session = session_to("unrelated.org", 80);

        for _ in 0..3 {
            assert!(matches!(router.pick_route(&session), Err(Error::NoMatch)));
        }
    }

    #[test]
    fn empty_rule_list_never_matches() {
        let router = Router::new(&RouterConfig::default()).unwrap();
        assert!(matches!(
            router.pick_route(&session_to("x.com", 80)),
            Err(Error::NoMatch)
        ));
    }

    #[test]
    fn bad_rule_fails_construction() {
        let config = RouterConfig {
            domain_strategy: None,
            rules: vec![field_rule("", vec![])],
        };
        assert!(Router::new(&config).is_err());
    }

    #[test]
    fn domain_strategy_defaults_to_as_is() {
        assert_eq!(DomainStrategy::parse(None), DomainStrategy::AsIs);
        assert_eq!(DomainStrategy::parse(Some("AsIs")), DomainStrategy::AsIs);
        // 原实现里未知取值一律按 AsIs 处理
        assert_eq!(DomainStrategy::parse(Some("IPOnDemand")), DomainStrategy::AsIs);
    }
}
