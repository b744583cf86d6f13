//! 订阅格式识别与解码

mod clash;
pub mod fetch;
mod singbox;
mod sip008;

pub use fetch::fetch_subscription;

use crate::error::FormatError;
use crate::link::{self, encoding};
use crate::proxy::ProxyNode;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 订阅格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Clash,
    Singbox,
    Sip008,
    /// 节点链接列表（原文或 Base64 编码）
    Base64,
    Unknown,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Clash => "clash",
            Format::Singbox => "singbox",
            Format::Sip008 => "sip008",
            Format::Base64 => "base64",
            Format::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clash 配置常见的顶层键
const CLASH_TOP_LEVEL_KEYS: [&str; 13] = [
    "port:",
    "mixed-port:",
    "socks-port:",
    "redir-port:",
    "tproxy-port:",
    "allow-lan:",
    "mode:",
    "log-level:",
    "external-controller:",
    "proxy-groups:",
    "proxy-providers:",
    "rules:",
    "dns:",
];

fn looks_like_clash(trimmed: &str) -> bool {
    trimmed.contains("proxies:") || CLASH_TOP_LEVEL_KEYS.iter().any(|key| trimmed.starts_with(key))
}

fn detect_json(trimmed: &str) -> Option<Format> {
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;
    if obj.contains_key("outbounds") || obj.contains_key("inbounds") {
        return Some(Format::Singbox);
    }
    if obj.get("servers").is_some_and(|s| s.is_array()) {
        return Some(Format::Sip008);
    }
    None
}

/// 识别订阅格式
///
/// 检查顺序即优先级：Clash 标记 → JSON（sing-box / SIP008）→ 明文链接 → Base64 解码后的链接。
/// 纯函数，不会失败；Base64 解码失败只当作不匹配。
pub fn detect(payload: &str) -> Format {
    let trimmed = payload.trim();

    let format = if looks_like_clash(trimmed) {
        Format::Clash
    } else if let Some(format) = detect_json(trimmed) {
        format
    } else if link::contains_link_scheme(trimmed) {
        Format::Base64
    } else if encoding::decode(trimmed).is_ok_and(|decoded| link::contains_link_scheme(&decoded)) {
        Format::Base64
    } else {
        Format::Unknown
    };

    debug!("订阅格式识别结果: {}", format);
    format
}

/// 链接列表：已含协议头则直接切分，否则先整体 Base64 解码
fn decode_link_list(trimmed: &str) -> Result<Vec<ProxyNode>, FormatError> {
    if trimmed.contains("://") {
        return Ok(link::parse_links(trimmed));
    }
    let decoded = encoding::decode(trimmed)
        .map_err(|e| FormatError::new(format!("无法解码订阅内容: {}", e)))?;
    Ok(link::parse_links(&decoded))
}

/// 按指定格式解码订阅
///
/// `Format::Unknown` 直接拒绝，不做猜测。
pub fn decode(payload: &str, format: Format) -> Result<Vec<ProxyNode>, FormatError> {
    let trimmed = payload.trim();
    match format {
        Format::Clash => clash::decode(trimmed),
        Format::Singbox => singbox::decode(trimmed),
        Format::Sip008 => sip008::decode(trimmed),
        Format::Base64 => decode_link_list(trimmed),
        Format::Unknown => Err(FormatError::new("无法识别的订阅格式")),
    }
}

/// 识别并解码订阅
pub fn decode_subscription(payload: &str) -> Result<Vec<ProxyNode>, FormatError> {
    let format = detect(payload);
    let nodes = decode(payload, format)?;
    debug!("{} 订阅解码得到 {} 个节点", format, nodes.len());
    Ok(nodes)
}
