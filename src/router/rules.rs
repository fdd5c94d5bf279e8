use std::fmt;
use std::net::IpAddr;

use anyhow::Result;
use ipnet::IpNet;
use regex::Regex;

use crate::config::types::{PortValue, RuleConfig};
use crate::proxy::{Network, Session};

/// 域名匹配方式。配置面沿用前缀语法：
/// `full:` 完全匹配、`domain:` 点对齐后缀、`regexp:` 正则、无前缀为子串。
pub enum DomainMatcher {
    Full(String),
    Suffix(String),
    Regex(Regex),
    Keyword(String),
}

impl DomainMatcher {
    pub fn parse(pattern: &str) -> Result<Self> {
        if let Some(rest) = pattern.strip_prefix("full:") {
            Ok(DomainMatcher::Full(rest.to_lowercase()))
        } else if let Some(rest) = pattern.strip_prefix("domain:") {
            Ok(DomainMatcher::Suffix(rest.to_lowercase()))
        } else if let Some(rest) = pattern.strip_prefix("regexp:") {
            Ok(DomainMatcher::Regex(Regex::new(rest)?))
        } else {
            Ok(DomainMatcher::Keyword(pattern.to_lowercase()))
        }
    }

    fn matches(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        match self {
            DomainMatcher::Full(d) => domain == *d,
            DomainMatcher::Suffix(suffix) => {
                domain == *suffix || domain.ends_with(&format!(".{}", suffix))
            }
            DomainMatcher::Regex(re) => re.is_match(&domain),
            DomainMatcher::Keyword(kw) => domain.contains(kw.as_str()),
        }
    }
}

/// 闭区间端口范围
#[derive(Debug, Clone, Copy)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    fn contains(&self, port: u16) -> bool {
        self.from <= port && port <= self.to
    }

    /// 解析 "80" / "1000-2000" / "80,443,1000-2000" 或数字字面量
    pub fn parse_list(value: &PortValue) -> Result<Vec<PortRange>> {
        match value {
            PortValue::Number(n) => {
                if *n == 0 {
                    anyhow::bail!("port 0 is not routable");
                }
                Ok(vec![PortRange { from: *n, to: *n }])
            }
            PortValue::Ranges(s) => {
                let mut ranges = Vec::new();
                for part in s.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        continue;
                    }
                    let range = match part.split_once('-') {
                        Some((from, to)) => PortRange {
                            from: from.trim().parse()?,
                            to: to.trim().parse()?,
                        },
                        None => {
                            let port: u16 = part.parse()?;
                            PortRange {
                                from: port,
                                to: port,
                            }
                        }
                    };
                    if range.from == 0 || range.from > range.to {
                        anyhow::bail!("invalid port range '{}'", part);
                    }
                    ranges.push(range);
                }
                if ranges.is_empty() {
                    anyhow::bail!("empty port list");
                }
                Ok(ranges)
            }
        }
    }
}

/// 解析 CIDR；裸 IP 视为 /32 或 /128
fn parse_cidr(s: &str) -> Result<IpNet> {
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net);
    }
    let ip: IpAddr = s
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid CIDR or IP '{}'", s))?;
    Ok(IpNet::from(ip))
}

/// 路由规则：启用的字段匹配器取合取。规则提到的字段在会话里
/// 缺失时按不匹配处理；未提到的字段不施加约束。
pub struct Rule {
    pub tag: String,
    inbound_tags: Vec<String>,
    networks: Vec<Network>,
    ports: Vec<PortRange>,
    dst_cidrs: Vec<IpNet>,
    domains: Vec<DomainMatcher>,
    protocols: Vec<String>,
    src_cidrs: Vec<IpNet>,
    users: Vec<String>,
}

impl Rule {
    pub fn from_config(config: &RuleConfig) -> Result<Self> {
        if config.outbound_tag.is_empty() {
            anyhow::bail!("no outboundTag is specified in routing rule");
        }

        let mut networks = Vec::new();
        if let Some(list) = &config.network {
            for part in list.split(',') {
                let network = Network::parse(part)
                    .ok_or_else(|| anyhow::anyhow!("unknown network '{}'", part))?;
                networks.push(network);
            }
        }

        let ports = match &config.port {
            Some(value) => PortRange::parse_list(value)?,
            None => Vec::new(),
        };

        let dst_cidrs = config
            .ip
            .iter()
            .map(|s| parse_cidr(s))
            .collect::<Result<Vec<_>>>()?;
        let src_cidrs = config
            .source
            .iter()
            .map(|s| parse_cidr(s))
            .collect::<Result<Vec<_>>>()?;

        let domains = config
            .domain
            .iter()
            .map(|s| DomainMatcher::parse(s))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            tag: config.outbound_tag.clone(),
            inbound_tags: config.inbound_tag.clone(),
            networks,
            ports,
            dst_cidrs,
            domains,
            protocols: config.protocol.clone(),
            src_cidrs,
            users: config.user.clone(),
        })
    }

    pub fn apply(&self, session: &Session) -> bool {
        if !self.inbound_tags.is_empty() {
            match &session.inbound {
                Some(info) if self.inbound_tags.iter().any(|t| *t == info.tag) => {}
                _ => return false,
            }
        }

        if !self.networks.is_empty() && !self.networks.contains(&session.network) {
            return false;
        }

        if !self.ports.is_empty() {
            match session.target() {
                Some(target) if self.ports.iter().any(|r| r.contains(target.port())) => {}
                _ => return false,
            }
        }

        if !self.dst_cidrs.is_empty() {
            let ips = target_ips(session);
            let hit = ips
                .iter()
                .any(|ip| self.dst_cidrs.iter().any(|net| net.contains(ip)));
            if !hit {
                return false;
            }
        }

        if !self.domains.is_empty() {
            match session.target().and_then(|t| t.domain()) {
                Some(domain) if self.domains.iter().any(|m| m.matches(domain)) => {}
                _ => return false,
            }
        }

        if !self.protocols.is_empty() {
            match session.sniffed_protocol() {
                Some(protocol) if self.protocols.iter().any(|p| p == protocol) => {}
                _ => return false,
            }
        }

        if !self.src_cidrs.is_empty() {
            let source_ip = session
                .inbound
                .as_ref()
                .and_then(|info| info.source)
                .map(|addr| addr.ip());
            match source_ip {
                Some(ip) if self.src_cidrs.iter().any(|net| net.contains(&ip)) => {}
                _ => return false,
            }
        }

        if !self.users.is_empty() {
            match session.inbound.as_ref().and_then(|info| info.user.as_deref()) {
                Some(user) if self.users.iter().any(|u| u == user) => {}
                _ => return false,
            }
        }

        true
    }
}

/// 目标的候选 IP：字面 IP 直接用，域名目标用已解析地址
fn target_ips(session: &Session) -> Vec<IpAddr> {
    let Some(outbound) = &session.outbound else {
        return Vec::new();
    };
    if let Some(ip) = outbound.target.ip() {
        return vec![ip];
    }
    outbound.resolved_ips.clone()
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule(-> {})", self.tag)
    }
}
