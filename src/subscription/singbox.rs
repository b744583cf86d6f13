//! sing-box JSON 订阅
//!
//! sing-box 没有单节点链接形式，`raw` 直接保存出站条目的 JSON 文本。

use crate::error::FormatError;
use crate::proxy::{NodeExtra, NodeId, Protocol, ProtocolParams, ProxyNode};
use serde_json::Value;
use std::collections::BTreeMap;

/// 路由用的内置出站类型，不是代理节点
const EXCLUDED_TYPES: [&str; 5] = ["direct", "block", "dns", "selector", "urltest"];

/// 已经映射到节点字段的键
const NODE_KEYS: [&str; 4] = ["type", "tag", "server", "server_port"];

pub(super) fn decode(payload: &str) -> Result<Vec<ProxyNode>, FormatError> {
    let config: Value = serde_json::from_str(payload)
        .map_err(|e| FormatError::new(format!("Sing-box 配置格式错误: {}", e)))?;
    let outbounds = config
        .get("outbounds")
        .and_then(Value::as_array)
        .ok_or_else(|| FormatError::new("Sing-box 配置缺少 outbounds 列表"))?;

    let mut nodes = Vec::new();
    for (position, outbound) in outbounds.iter().enumerate() {
        let Some(obj) = outbound.as_object() else {
            return Err(FormatError::new(format!(
                "第 {} 个出站条目不是对象",
                position + 1
            )));
        };
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or_default();
        if EXCLUDED_TYPES.contains(&kind) {
            continue;
        }

        let index = nodes.len();
        let name = obj
            .get("tag")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Proxy-{}", index));
        let server = obj
            .get("server")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let port = obj
            .get("server_port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(0);

        let unknown: BTreeMap<String, String> = obj
            .iter()
            .filter(|(key, _)| !NODE_KEYS.contains(&key.as_str()))
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect();

        nodes.push(
            ProxyNode::new(
                NodeId::next("singbox"),
                name,
                Protocol::from_type_name(kind),
                server,
                port,
                outbound.to_string(),
            )
            .with_extra(NodeExtra::new(ProtocolParams::None).with_unknown(unknown)),
        );
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link;
    use serde_json::json;

    #[test]
    fn test_filters_routing_outbounds() {
        let config = json!({
            "outbounds": [
                { "type": "selector", "tag": "select", "outbounds": ["a"] },
                { "type": "vless", "tag": "a", "server": "1.2.3.4", "server_port": 443, "uuid": "u",
                  "tls": { "enabled": true } },
                { "type": "direct", "tag": "direct" },
                { "type": "shadowsocks", "server": "5.6.7.8", "server_port": 8388,
                  "method": "aes-128-gcm" },
                { "type": "dns", "tag": "dns-out" },
                { "type": "urltest", "tag": "auto" },
                { "type": "block", "tag": "block" }
            ]
        });
        let nodes = decode(&config.to_string()).unwrap();
        assert_eq!(nodes.len(), 2);

        assert_eq!(nodes[0].name, "a");
        assert_eq!(nodes[0].protocol, Protocol::Vless);
        assert_eq!(nodes[0].port, 443);
        assert_eq!(nodes[0].extra.get("uuid").as_deref(), Some("u"));
        assert_eq!(
            nodes[0].extra.get("tls").as_deref(),
            Some(r#"{"enabled":true}"#)
        );

        assert_eq!(nodes[1].name, "Proxy-1");
        assert_eq!(nodes[1].protocol, Protocol::Ss);
        assert_eq!(nodes[1].extra.get("method").as_deref(), Some("aes-128-gcm"));
    }

    #[test]
    fn test_raw_is_the_entry_json() {
        let entry = json!({
            "type": "trojan",
            "tag": "t",
            "server": "t.example.com",
            "server_port": 443
        });
        let nodes = decode(&json!({ "outbounds": [entry.clone()] }).to_string()).unwrap();
        let raw: Value = serde_json::from_str(&nodes[0].raw).unwrap();
        assert_eq!(raw, entry);
        // 没有链接形式，导出时原样返回
        assert_eq!(link::to_link(&nodes[0]), nodes[0].raw);
    }

    #[test]
    fn test_shape_errors() {
        assert!(decode(r#"{"inbounds": []}"#).is_err());
        assert!(decode(r#"{"outbounds": {}}"#).is_err());
        assert!(decode(r#"{"outbounds": [1]}"#).is_err());
        assert!(decode("{").is_err());
        assert!(decode(r#"{"outbounds": []}"#).unwrap().is_empty());
    }
}
