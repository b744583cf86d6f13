mod extra;

pub use extra::{
    BasicParams, Hysteria2Params, HysteriaParams, NodeExtra, ProtocolParams, ShadowsocksParams,
    ShadowsocksRParams, TrojanParams, TuicParams, VlessParams, VmessParams,
};

use crate::check::ProbeResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_serial() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// 节点唯一标识，进程内单调递增，不会复用
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// 生成新的标识，`source` 标明节点来源（link / clash / singbox / sip008）
    pub fn next(source: &str) -> Self {
        Self::with_serial(source, next_serial())
    }

    fn with_serial(source: &str, serial: u64) -> Self {
        NodeId(format!("{}-{:x}", source, serial))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 协议类型
///
/// `Other` 只由结构化订阅（Clash / Sing-box）产生，保存无法归类的原始 `type`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Ss,
    Ssr,
    Hysteria,
    Hysteria2,
    Hy2,
    Tuic,
    Http,
    Socks5,
    Unknown,
    Other(String),
}

impl Protocol {
    pub fn as_str(&self) -> &str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Ss => "ss",
            Protocol::Ssr => "ssr",
            Protocol::Hysteria => "hysteria",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Hy2 => "hy2",
            Protocol::Tuic => "tuic",
            Protocol::Http => "http",
            Protocol::Socks5 => "socks5",
            Protocol::Unknown => "unknown",
            Protocol::Other(name) => name,
        }
    }

    /// 从配置中的 `type` 字段识别协议，别名归一，未知类型原样保留
    pub fn from_type_name(name: &str) -> Self {
        let lower = name.trim().to_lowercase();
        match lower.as_str() {
            "vmess" => Protocol::Vmess,
            "vless" => Protocol::Vless,
            "trojan" => Protocol::Trojan,
            "ss" | "shadowsocks" => Protocol::Ss,
            "ssr" | "shadowsocksr" => Protocol::Ssr,
            "hysteria" => Protocol::Hysteria,
            "hysteria2" => Protocol::Hysteria2,
            "hy2" => Protocol::Hy2,
            "tuic" => Protocol::Tuic,
            "http" | "https" => Protocol::Http,
            "socks5" | "socks" => Protocol::Socks5,
            "" | "unknown" => Protocol::Unknown,
            _ => Protocol::Other(lower),
        }
    }

    /// 名称占位前缀，例如 `VMess-1.2.3.4`
    pub fn display_prefix(&self) -> String {
        match self {
            Protocol::Vmess => "VMess".to_string(),
            Protocol::Vless => "VLESS".to_string(),
            Protocol::Trojan => "Trojan".to_string(),
            Protocol::Ss => "SS".to_string(),
            Protocol::Ssr => "SSR".to_string(),
            Protocol::Hysteria => "Hysteria".to_string(),
            Protocol::Hysteria2 | Protocol::Hy2 => "HY2".to_string(),
            Protocol::Tuic => "TUIC".to_string(),
            Protocol::Http => "HTTP".to_string(),
            Protocol::Socks5 => "SOCKS5".to_string(),
            Protocol::Unknown => "Unknown".to_string(),
            Protocol::Other(name) => name.to_uppercase(),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Protocol {
    fn from(value: String) -> Self {
        Protocol::from_type_name(&value)
    }
}

impl From<Protocol> for String {
    fn from(value: Protocol) -> Self {
        value.as_str().to_string()
    }
}

/// 代理节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyNode {
    pub id: NodeId,
    pub name: String,
    pub protocol: Protocol,
    pub server: String,
    pub port: u16,
    /// 单节点链接（原始或重建）
    pub raw: String,
    pub checked: bool,
    pub visible: bool,
    pub extra: NodeExtra,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_result: Option<ProbeResult>,
}

impl ProxyNode {
    pub fn new(
        id: NodeId,
        name: String,
        protocol: Protocol,
        server: String,
        port: u16,
        raw: String,
    ) -> Self {
        Self {
            id,
            name,
            protocol,
            server,
            port,
            raw,
            checked: true,
            visible: true,
            extra: NodeExtra::default(),
            probe_result: None,
        }
    }

    /// 无法解析的输入：协议为 unknown，地址为空，原文保留
    pub fn unknown(raw: &str) -> Self {
        let serial = next_serial();
        Self::new(
            NodeId::with_serial("link", serial),
            format!("Unknown-{:04x}", serial),
            Protocol::Unknown,
            String::new(),
            0,
            raw.to_string(),
        )
    }

    pub fn with_extra(mut self, extra: NodeExtra) -> Self {
        self.extra = extra;
        self
    }

    /// 是否具备可探测的地址
    pub fn is_probeable(&self) -> bool {
        !self.server.is_empty() && self.port != 0
    }

    pub fn get_address(&self) -> String {
        if self.server.contains(':') {
            format!("[{}]:{}", self.server, self.port)
        } else {
            format!("{}:{}", self.server, self.port)
        }
    }
}
