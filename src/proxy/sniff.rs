//! 协议嗅探：检查流的起始字节识别应用层协议，并在可能时
//! 提取目标域名（TLS ClientHello SNI、HTTP Host）。
//!
//! 嗅探通过 CachedReader 窥视前缀，不消费流中任何字节。

use crate::buf::Buffer;
use crate::pipe::CachedReader;

/// 嗅探结果
#[derive(Debug, Clone)]
pub struct SniffResult {
    pub protocol: &'static str,
    pub domain: Option<String>,
}

/// 对流前缀做至多两轮窥视（每轮底层读取限时 100ms），
/// 返回识别出的协议与域名。识别不出返回 None，流保持原样。
pub async fn sniff_stream(reader: &CachedReader) -> Option<SniffResult> {
    let mut scratch = Buffer::new();
    for attempt in 0..2 {
        reader.cache(&mut scratch).await;
        let data = scratch.bytes();
        if data.is_empty() {
            continue;
        }
        if let Some(protocol) = detect_protocol(data) {
            let domain = match protocol {
                "tls" => parse_tls_sni(data),
                "http" => parse_http_host(data),
                _ => None,
            };
            // TLS 记录可能还没到齐，第一轮没拿到 SNI 再等一轮
            if protocol == "tls" && domain.is_none() && attempt == 0 {
                continue;
            }
            return Some(SniffResult { protocol, domain });
        }
    }
    None
}

/// 识别协议种类，识别不出返回 None
pub fn detect_protocol(data: &[u8]) -> Option<&'static str> {
    if is_tls_client_hello(data) {
        return Some("tls");
    }
    if is_http_request(data) {
        return Some("http");
    }
    if is_ssh(data) {
        return Some("ssh");
    }
    if is_bittorrent(data) {
        return Some("bittorrent");
    }
    None
}

/// TLS record: ContentType=0x16 (Handshake)，版本 0x0300..=0x0303
fn is_tls_client_hello(data: &[u8]) -> bool {
    if data.len() < 5 || data[0] != 0x16 {
        return false;
    }
    let version = u16::from_be_bytes([data[1], data[2]]);
    (0x0300..=0x0303).contains(&version)
}

/// SSH 握手以 "SSH-" 开头 (RFC 4253)
fn is_ssh(data: &[u8]) -> bool {
    data.len() >= 4 && data.starts_with(b"SSH-")
}

/// BT 握手: 0x13 + "BitTorrent protocol"
fn is_bittorrent(data: &[u8]) -> bool {
    data.len() >= 20 && data[0] == 19 && &data[1..20] == b"BitTorrent protocol"
}

fn is_http_request(data: &[u8]) -> bool {
    // 请求行以方法名加空格开头；8 字节足够容纳最长的方法
    let head = &data[..data.len().min(8)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    match text.split_once(' ') {
        Some((method, _)) => matches!(
            method,
            "GET" | "POST" | "PUT" | "HEAD" | "DELETE" | "OPTIONS" | "PATCH" | "CONNECT"
        ),
        None => false,
    }
}

/// 大端顺序读取的字节游标。任何越界读取都返回 None，
/// 省去逐字段的边界检查。
struct ByteCursor<'a> {
    rest: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    fn new(rest: &'a [u8]) -> Self {
        Self { rest }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.rest.len() < n {
            return None;
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Some(head)
    }

    fn read_u8(&mut self) -> Option<u8> {
        Some(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        let bytes = self.take(2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u24(&mut self) -> Option<usize> {
        let bytes = self.take(3)?;
        Some(((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize)
    }

    /// 跳过一个 u8 长度前缀的向量
    fn skip_vec8(&mut self) -> Option<()> {
        let len = self.read_u8()? as usize;
        self.take(len).map(|_| ())
    }

    /// 跳过一个 u16 长度前缀的向量
    fn skip_vec16(&mut self) -> Option<()> {
        let len = self.read_u16()? as usize;
        self.take(len).map(|_| ())
    }
}

/// 从 TLS ClientHello 提取 SNI。记录不完整或无 SNI 扩展返回 None。
fn parse_tls_sni(data: &[u8]) -> Option<String> {
    if !is_tls_client_hello(data) {
        return None;
    }
    let mut record = ByteCursor::new(data);
    record.take(3)?; // ContentType + 记录层版本
    let fragment_len = record.read_u16()? as usize;
    let mut handshake = ByteCursor::new(record.take(fragment_len)?);

    // 握手类型必须是 ClientHello (0x01)
    if handshake.read_u8()? != 0x01 {
        return None;
    }
    let body_len = handshake.read_u24()?;
    let mut hello = ByteCursor::new(handshake.take(body_len)?);

    hello.take(2 + 32)?; // client_version + random
    hello.skip_vec8()?; // session_id
    hello.skip_vec16()?; // cipher_suites
    hello.skip_vec8()?; // compression_methods

    let extensions_len = hello.read_u16()? as usize;
    let mut extensions = ByteCursor::new(hello.take(extensions_len)?);
    loop {
        let kind = extensions.read_u16()?;
        let payload_len = extensions.read_u16()? as usize;
        let payload = extensions.take(payload_len)?;
        // server_name 扩展为 0x0000
        if kind == 0x0000 {
            return host_name_from_server_name_list(payload);
        }
    }
}

/// ServerNameList: [总长 u16] 后跟 [类型 u8][长度 u16][名字] 条目
fn host_name_from_server_name_list(payload: &[u8]) -> Option<String> {
    let mut outer = ByteCursor::new(payload);
    let total = outer.read_u16()? as usize;
    let mut entries = ByteCursor::new(outer.take(total)?);
    loop {
        let kind = entries.read_u8()?;
        let len = entries.read_u16()? as usize;
        let name = entries.take(len)?;
        if kind == 0 {
            return String::from_utf8(name.to_vec()).ok();
        }
    }
}

/// 从 HTTP 请求头提取 Host（去掉端口）
fn parse_http_host(data: &[u8]) -> Option<String> {
    if !is_http_request(data) {
        return None;
    }
    let text = std::str::from_utf8(data).ok()?;
    // 跳过请求行，只在头部区域找 Host
    let (_, headers) = text.split_once('\n')?;
    let host = headers
        .lines()
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("host"))
        .map(|(_, value)| strip_port(value.trim()))?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_string())
}

/// "host:8080" 形式去掉数字端口；其余原样返回
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
