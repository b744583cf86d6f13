//! VMess 链接：`vmess://` + Base64(JSON)

use super::encoding;
use crate::error::{Error, Result};
use crate::proxy::{NodeExtra, NodeId, Protocol, ProtocolParams, ProxyNode, VmessParams};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// JSON 中已被 `VmessParams` 或节点字段消费的键
const KNOWN_KEYS: [&str; 13] = [
    "v", "ps", "remarks", "add", "port", "id", "aid", "scy", "net", "tls", "host", "path", "sni",
];

/// 字符串、数字、布尔统一读成字符串，空串视为缺失
fn field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn parse(link: &str) -> Result<ProxyNode> {
    let payload = link
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let payload = payload.split(['#', '?']).next().unwrap_or_default();

    let json = encoding::decode(payload)?;
    let value: Value = serde_json::from_str(&json)
        .map_err(|e| Error::Link(format!("VMess 配置不是合法 JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Error::Link("VMess 配置不是 JSON 对象".to_string()))?;

    let server = field(obj, "add").unwrap_or_default();
    let port = field(obj, "port")
        .and_then(|p| p.parse::<u16>().ok())
        .filter(|p| *p != 0)
        .unwrap_or(443);
    let name = field(obj, "ps")
        .or_else(|| field(obj, "remarks"))
        .unwrap_or_else(|| format!("VMess-{}", server));

    let params = VmessParams {
        uuid: field(obj, "id").unwrap_or_default(),
        alter_id: field(obj, "aid")
            .and_then(|a| a.parse::<u32>().ok())
            .unwrap_or(0),
        cipher: field(obj, "scy").unwrap_or_else(|| "auto".to_string()),
        network: field(obj, "net").unwrap_or_else(|| "tcp".to_string()),
        tls: field(obj, "tls").as_deref() == Some("tls"),
        host: field(obj, "host"),
        path: field(obj, "path"),
        sni: field(obj, "sni"),
    };

    let unknown: BTreeMap<String, String> = obj
        .keys()
        .filter(|k| !KNOWN_KEYS.contains(&k.as_str()))
        .filter_map(|k| field(obj, k).map(|v| (k.clone(), v)))
        .collect();

    Ok(ProxyNode::new(
        NodeId::next("link"),
        name,
        Protocol::Vmess,
        server,
        port,
        link.to_string(),
    )
    .with_extra(NodeExtra::new(ProtocolParams::Vmess(params)).with_unknown(unknown)))
}

pub(crate) fn to_link(node: &ProxyNode, p: &VmessParams) -> String {
    let mut obj = Map::new();
    obj.insert("v".to_string(), Value::from("2"));
    obj.insert("ps".to_string(), Value::from(node.name.clone()));
    obj.insert("add".to_string(), Value::from(node.server.clone()));
    obj.insert("port".to_string(), Value::from(node.port));
    obj.insert("id".to_string(), Value::from(p.uuid.clone()));
    obj.insert("aid".to_string(), Value::from(p.alter_id));
    obj.insert("scy".to_string(), Value::from(p.cipher.clone()));
    obj.insert("net".to_string(), Value::from(p.network.clone()));
    obj.insert(
        "tls".to_string(),
        Value::from(if p.tls { "tls" } else { "" }),
    );
    obj.insert(
        "host".to_string(),
        Value::from(p.host.clone().unwrap_or_default()),
    );
    obj.insert(
        "path".to_string(),
        Value::from(p.path.clone().unwrap_or_default()),
    );
    if let Some(sni) = &p.sni {
        obj.insert("sni".to_string(), Value::from(sni.clone()));
    }
    for (key, value) in &node.extra.unknown {
        obj.insert(key.clone(), Value::from(value.clone()));
    }

    format!("vmess://{}", encoding::encode(&Value::Object(obj).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vmess_link(config: Value) -> String {
        format!("vmess://{}", encoding::encode(&config.to_string()))
    }

    #[test]
    fn test_parse_full_config() {
        let link = vmess_link(json!({
            "v": "2",
            "ps": "香港 01",
            "add": "hk.example.com",
            "port": "8443",
            "id": "12345678-1234-1234-1234-123456789012",
            "aid": "2",
            "scy": "aes-128-gcm",
            "net": "ws",
            "type": "none",
            "host": "cdn.example.com",
            "path": "/ray",
            "tls": "tls"
        }));

        let node = parse(&link).unwrap();
        assert_eq!(node.name, "香港 01");
        assert_eq!(node.server, "hk.example.com");
        assert_eq!(node.port, 8443);
        assert_eq!(node.raw, link);
        assert_eq!(node.extra.get("alterId").as_deref(), Some("2"));
        assert_eq!(node.extra.get("network").as_deref(), Some("ws"));
        assert_eq!(node.extra.get("tls").as_deref(), Some("true"));
        assert_eq!(node.extra.get("path").as_deref(), Some("/ray"));
        assert_eq!(node.extra.unknown.get("type").map(String::as_str), Some("none"));
    }

    #[test]
    fn test_missing_fields_default() {
        let link = vmess_link(json!({ "add": "1.1.1.1", "id": "abc" }));
        let node = parse(&link).unwrap();
        assert_eq!(node.port, 443);
        assert_eq!(node.name, "VMess-1.1.1.1");
        assert_eq!(node.extra.get("alterId").as_deref(), Some("0"));
        assert_eq!(node.extra.get("cipher").as_deref(), Some("auto"));
        assert_eq!(node.extra.get("tls").as_deref(), Some("false"));
    }

    #[test]
    fn test_numeric_port_and_remarks_fallback() {
        let link = vmess_link(json!({ "add": "a.example.com", "port": 2053, "remarks": "R" }));
        let node = parse(&link).unwrap();
        assert_eq!(node.port, 2053);
        assert_eq!(node.name, "R");
    }

    #[test]
    fn test_invalid_payload_is_error() {
        assert!(parse("vmess://not-json-at-all").is_err());
        assert!(parse(&format!("vmess://{}", encoding::encode("[1,2]"))).is_err());
    }

    #[test]
    fn test_to_link_is_stable() {
        let link = vmess_link(json!({
            "ps": "n", "add": "a.example.com", "port": 443, "id": "u", "net": "grpc", "fp": "chrome"
        }));
        let node = parse(&link).unwrap();
        let rebuilt = to_link(&node, match &node.extra.params {
            ProtocolParams::Vmess(p) => p,
            _ => unreachable!(),
        });
        let again = parse(&rebuilt).unwrap();
        assert_eq!(again.server, "a.example.com");
        assert_eq!(again.extra, node.extra);
    }
}
