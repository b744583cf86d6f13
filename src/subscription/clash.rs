//! Clash YAML 订阅
//!
//! 每个代理条目先映射成对应协议的参数，重建单节点链接作为 `raw`，
//! 再走一遍链接解析；名称、协议、地址、端口以条目本身为准。
//! 没有被协议参数用到的键原样放进 `extra.unknown`，不写进 `raw`。

use crate::error::FormatError;
use crate::link;
use crate::proxy::{
    BasicParams, Hysteria2Params, HysteriaParams, NodeExtra, NodeId, Protocol, ProtocolParams,
    ProxyNode, ShadowsocksParams, ShadowsocksRParams, TrojanParams, TuicParams, VlessParams,
    VmessParams,
};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// 节点本身的字段
const NODE_KEYS: [&str; 4] = ["name", "type", "server", "port"];

pub(super) fn decode(payload: &str) -> Result<Vec<ProxyNode>, FormatError> {
    let yaml: Value = serde_yaml::from_str(payload)
        .map_err(|e| FormatError::new(format!("Clash 配置格式错误: {}", e)))?;
    if !yaml.is_mapping() {
        return Err(FormatError::new("Clash 配置顶层不是映射"));
    }

    let proxies = match yaml.get("proxies") {
        None => return Err(FormatError::new("Clash 配置缺少 proxies 字段")),
        Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Sequence(list)) => list,
        Some(_) => return Err(FormatError::new("Clash 配置的 proxies 不是列表")),
    };

    proxies
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            if !entry.is_mapping() {
                return Err(FormatError::new(format!("第 {} 个代理条目不是映射", index + 1)));
            }
            Ok(entry_to_node(entry, index))
        })
        .collect()
}

/// 标量统一读成字符串，空串视为缺失
fn text(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flag(entry: &Value, key: &str) -> bool {
    match entry.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        Some(Value::Number(n)) => n.as_u64() == Some(1),
        _ => false,
    }
}

fn port(entry: &Value) -> u16 {
    text(entry, "port")
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(0)
}

/// `ws-opts.path` / `ws-opts.headers.Host`
fn ws_opts(entry: &Value) -> (Option<String>, Option<String>) {
    match entry.get("ws-opts") {
        Some(opts) => {
            let path = text(opts, "path");
            let host = opts.get("headers").and_then(|h| text(h, "Host"));
            (path, host)
        }
        None => (None, None),
    }
}

fn sni(entry: &Value) -> Option<String> {
    text(entry, "servername").or_else(|| text(entry, "sni"))
}

/// 插件名加上 `plugin-opts` 中的标量，拼成 SIP002 的 plugin 参数
fn ss_plugin(entry: &Value) -> Option<String> {
    let mut plugin = text(entry, "plugin")?;
    if let Some(Value::Mapping(opts)) = entry.get("plugin-opts") {
        for (key, value) in opts {
            let (Some(key), Some(value)) = (key.as_str(), scalar(value)) else {
                continue;
            };
            plugin.push_str(&format!(";{}={}", key, value));
        }
    }
    Some(plugin)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn alpn(entry: &Value) -> Option<String> {
    match entry.get("alpn")? {
        Value::Sequence(list) => {
            let joined: Vec<String> = list.iter().filter_map(scalar).collect();
            Some(joined.join(",")).filter(|s| !s.is_empty())
        }
        _ => text(entry, "alpn"),
    }
}

/// 各协议在 [`params_for`] 里读取过的键
fn consumed_keys(protocol: &Protocol) -> &'static [&'static str] {
    match protocol {
        Protocol::Vmess => &[
            "uuid",
            "alterId",
            "cipher",
            "network",
            "tls",
            "ws-opts",
            "servername",
            "sni",
        ],
        Protocol::Vless => &[
            "uuid",
            "flow",
            "network",
            "tls",
            "ws-opts",
            "servername",
            "sni",
            "client-fingerprint",
            "reality-opts",
        ],
        Protocol::Trojan => &[
            "password",
            "servername",
            "sni",
            "skip-cert-verify",
            "network",
            "ws-opts",
        ],
        Protocol::Ss => &["cipher", "password", "plugin", "plugin-opts"],
        Protocol::Ssr => &[
            "cipher",
            "password",
            "protocol",
            "obfs",
            "protocol-param",
            "obfs-param",
        ],
        Protocol::Hysteria2 | Protocol::Hy2 => &[
            "password",
            "auth",
            "servername",
            "sni",
            "skip-cert-verify",
            "obfs",
            "obfs-password",
        ],
        Protocol::Hysteria => &[
            "auth-str",
            "auth",
            "servername",
            "sni",
            "skip-cert-verify",
            "up",
            "down",
            "obfs",
        ],
        Protocol::Tuic => &[
            "uuid",
            "password",
            "congestion-controller",
            "alpn",
            "servername",
            "sni",
            "udp-relay-mode",
        ],
        Protocol::Http | Protocol::Socks5 => &["username", "password", "tls"],
        Protocol::Unknown | Protocol::Other(_) => &[],
    }
}

/// 标量原样保留，映射和列表转成紧凑 JSON（键不是字符串时退回 YAML）
fn leftover_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => serde_json::to_string(other)
            .ok()
            .or_else(|| serde_yaml::to_string(other).ok().map(|s| s.trim_end().to_string())),
    }
}

fn leftovers(protocol: &Protocol, entry: &Value) -> BTreeMap<String, String> {
    let Some(map) = entry.as_mapping() else {
        return BTreeMap::new();
    };
    let consumed = consumed_keys(protocol);
    map.iter()
        .filter_map(|(key, value)| {
            let key = key.as_str()?;
            if NODE_KEYS.contains(&key) || consumed.contains(&key) {
                return None;
            }
            Some((key.to_string(), leftover_text(value)?))
        })
        .collect()
}

/// grpc 的服务名在链接里写作 `serviceName`
fn link_params(protocol: &Protocol, entry: &Value) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    if matches!(protocol, Protocol::Vless | Protocol::Trojan) {
        if let Some(service) = entry
            .get("grpc-opts")
            .and_then(|opts| text(opts, "grpc-service-name"))
        {
            params.insert("serviceName".to_string(), service);
        }
    }
    params
}

fn params_for(protocol: &Protocol, entry: &Value, server: &str) -> ProtocolParams {
    match protocol {
        Protocol::Vmess => {
            let (path, host) = ws_opts(entry);
            ProtocolParams::Vmess(VmessParams {
                uuid: text(entry, "uuid").unwrap_or_default(),
                alter_id: text(entry, "alterId")
                    .and_then(|a| a.parse().ok())
                    .unwrap_or(0),
                cipher: text(entry, "cipher").unwrap_or_else(|| "auto".to_string()),
                network: text(entry, "network").unwrap_or_else(|| "tcp".to_string()),
                tls: flag(entry, "tls"),
                host,
                path,
                sni: sni(entry),
            })
        }
        Protocol::Vless => {
            let (path, host) = ws_opts(entry);
            let reality = entry.get("reality-opts");
            let security = if reality.is_some() {
                "reality"
            } else if flag(entry, "tls") {
                "tls"
            } else {
                "none"
            };
            ProtocolParams::Vless(VlessParams {
                uuid: text(entry, "uuid").unwrap_or_default(),
                encryption: "none".to_string(),
                flow: text(entry, "flow"),
                security: security.to_string(),
                network: text(entry, "network").unwrap_or_else(|| "tcp".to_string()),
                host,
                path,
                sni: sni(entry),
                fingerprint: text(entry, "client-fingerprint"),
                public_key: reality.and_then(|r| text(r, "public-key")),
                short_id: reality.and_then(|r| text(r, "short-id")),
            })
        }
        Protocol::Trojan => {
            let (path, host) = ws_opts(entry);
            ProtocolParams::Trojan(TrojanParams {
                password: text(entry, "password").unwrap_or_default(),
                sni: sni(entry).unwrap_or_else(|| server.to_string()),
                allow_insecure: flag(entry, "skip-cert-verify"),
                network: text(entry, "network").unwrap_or_else(|| "tcp".to_string()),
                host,
                path,
            })
        }
        Protocol::Ss => ProtocolParams::Shadowsocks(ShadowsocksParams {
            method: text(entry, "cipher").unwrap_or_default(),
            password: text(entry, "password").unwrap_or_default(),
            plugin: ss_plugin(entry),
        }),
        Protocol::Ssr => ProtocolParams::ShadowsocksR(ShadowsocksRParams {
            method: text(entry, "cipher").unwrap_or_default(),
            password: text(entry, "password").unwrap_or_default(),
            protocol: text(entry, "protocol").unwrap_or_else(|| "origin".to_string()),
            obfs: text(entry, "obfs").unwrap_or_else(|| "plain".to_string()),
            protocol_param: text(entry, "protocol-param"),
            obfs_param: text(entry, "obfs-param"),
            group: None,
        }),
        Protocol::Hysteria2 | Protocol::Hy2 => ProtocolParams::Hysteria2(Hysteria2Params {
            auth: text(entry, "password")
                .or_else(|| text(entry, "auth"))
                .unwrap_or_default(),
            sni: sni(entry),
            insecure: flag(entry, "skip-cert-verify"),
            obfs: text(entry, "obfs"),
            obfs_password: text(entry, "obfs-password"),
        }),
        Protocol::Hysteria => ProtocolParams::Hysteria(HysteriaParams {
            auth: text(entry, "auth-str").or_else(|| text(entry, "auth")),
            peer: sni(entry),
            insecure: flag(entry, "skip-cert-verify"),
            up_mbps: text(entry, "up"),
            down_mbps: text(entry, "down"),
            obfs: text(entry, "obfs"),
        }),
        Protocol::Tuic => ProtocolParams::Tuic(TuicParams {
            uuid: text(entry, "uuid").unwrap_or_default(),
            password: text(entry, "password").unwrap_or_default(),
            congestion_control: text(entry, "congestion-controller")
                .unwrap_or_else(|| "bbr".to_string()),
            alpn: alpn(entry),
            sni: sni(entry),
            udp_relay_mode: text(entry, "udp-relay-mode"),
        }),
        Protocol::Http | Protocol::Socks5 => ProtocolParams::Basic(BasicParams {
            username: text(entry, "username"),
            password: text(entry, "password"),
            tls: flag(entry, "tls"),
        }),
        Protocol::Unknown | Protocol::Other(_) => ProtocolParams::None,
    }
}

fn entry_to_node(entry: &Value, index: usize) -> ProxyNode {
    let name = text(entry, "name").unwrap_or_else(|| format!("Proxy-{}", index));
    let protocol = Protocol::from_type_name(&text(entry, "type").unwrap_or_default());
    let server = text(entry, "server").unwrap_or_default();
    let port = port(entry);

    let id = NodeId::next("clash");
    let params = params_for(&protocol, entry, &server);
    let mut draft = ProxyNode::new(
        id.clone(),
        name.clone(),
        protocol.clone(),
        server.clone(),
        port,
        String::new(),
    )
    .with_extra(NodeExtra::new(params).with_unknown(link_params(&protocol, entry)));

    // 没有链接语法的协议只能保留一个占位链接
    let raw = match draft.extra.params {
        ProtocolParams::None => format!(
            "{}://{}:{}#{}",
            protocol,
            server,
            port,
            urlencoding::encode(&name)
        ),
        _ => link::to_link(&draft),
    };
    draft.raw = raw.clone();

    let mut node = match link::parse_link(&raw) {
        Some(parsed) if parsed.protocol != Protocol::Unknown => parsed,
        _ => draft,
    };
    node.id = id;
    node.name = name;
    node.protocol = protocol;
    node.server = server;
    node.port = port;
    node.raw = raw;
    for (key, value) in leftovers(&node.protocol, entry) {
        node.extra.unknown.entry(key).or_insert(value);
    }
    node
}
